//! # Authorization HTTP Server
//!
//! HTTP surface over the Veridia authorization engine: the decision endpoint
//! that enforcing services call, the administrative mutation endpoints, and
//! the read-only audit query for compliance tooling.
//!
//! ## Endpoints
//!
//! - `POST /v1/evaluate` - Permission decision
//! - `POST /v1/assignments` - Grant a role
//! - `DELETE /v1/assignments/:id` - Revoke a role assignment
//! - `POST /v1/overrides` - Grant a permission override
//! - `POST /v1/delegations` - Propose a delegation
//! - `POST /v1/delegations/:id/approve` - Approve a pending delegation
//! - `DELETE /v1/delegations/:id` - Revoke a delegation
//! - `GET /v1/audit` - Paginated audit query
//! - `GET /health` - Health check
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PORT` - HTTP server port (default: 8080)
//! - `RUST_LOG` - Log level (default: info)
//! - `EVALUATE_TIMEOUT_MS` - Per-request evaluation deadline (default: 1000)
//! - `SWEEP_INTERVAL_SECS` - Expiry/retention sweep cadence (default: 300)
//! - `OVERRIDE_RETENTION_DAYS` - Grace period before expired overrides are
//!   purged (default: 30)
//! - `DENY_AUDIT_SAMPLE_EVERY` - Record every Nth denied evaluation
//!   (default: 0, disabled)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    serve, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use veridia_authz::{
    AdminService, AuditQuery, AuditSink, AuthzError, DelegationProposal, EvaluateRequest,
    EvaluatorConfig, GrantOverrideRequest, GrantRoleRequest, InMemoryAuditSink,
    PermissionEvaluator, RequestScope, RoleCatalog, Stores, SweepConfig, SystemClock,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    admin: Arc<AdminService>,
    evaluator: Arc<PermissionEvaluator>,
    audit: Arc<dyn AuditSink>,
    evaluate_timeout: Duration,
    start_time: std::time::Instant,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Application error type
///
/// Maps the engine taxonomy onto HTTP statuses. An error is never collapsed
/// into an allow; evaluation failures surface as 500 and the caller treats
/// them as deny.
struct AppError(AuthzError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            AuthzError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AuthzError::RoleNotFound(_)
            | AuthzError::AssignmentNotFound(_)
            | AuthzError::OverrideNotFound(_)
            | AuthzError::DelegationNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AuthzError::DuplicateAssignment { .. } => {
                (StatusCode::CONFLICT, "duplicate_assignment")
            }
            AuthzError::SourceAssignmentInactive(_) => {
                (StatusCode::CONFLICT, "source_assignment_inactive")
            }
            AuthzError::Evaluation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "evaluation_error"),
            AuthzError::Audit(_) => (StatusCode::INTERNAL_SERVER_ERROR, "audit_error"),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: self.0.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<AuthzError> for AppError {
    fn from(err: AuthzError) -> Self {
        Self(err)
    }
}

/// Permission decision request
#[derive(Debug, Deserialize)]
struct EvaluateBody {
    subject_id: Uuid,
    resource: String,
    #[serde(default)]
    resource_id: Option<String>,
    action: String,
    #[serde(default)]
    organization_id: Option<Uuid>,
    #[serde(default)]
    region_id: Option<Uuid>,
    #[serde(default)]
    site_id: Option<Uuid>,
}

/// Permission decision response
#[derive(Debug, Serialize)]
struct EvaluateResponse {
    allowed: bool,
    matched_source: String,
    reason: String,
    evaluated_at: DateTime<Utc>,
}

/// Created-resource response
#[derive(Debug, Serialize)]
struct CreatedResponse {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct RevokeBody {
    revoked_by: Uuid,
}

#[derive(Debug, Deserialize)]
struct ApproveBody {
    approved_by: Uuid,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
}

/// POST /v1/evaluate - Permission decision
async fn evaluate(
    State(state): State<AppState>,
    Json(body): Json<EvaluateBody>,
) -> Result<Json<EvaluateResponse>, AppError> {
    // A site or region without an organization is malformed; reject before
    // touching any store rather than defaulting the tenancy.
    let organization_id = body.organization_id.ok_or_else(|| {
        AuthzError::Validation("organization id is required for scoped requests".into())
    })?;
    let scope = RequestScope::new(organization_id, body.region_id, body.site_id)?;

    let request = EvaluateRequest {
        subject_id: body.subject_id,
        resource: body.resource,
        resource_id: body.resource_id,
        action: body.action,
        scope,
    };

    let deadline = tokio::time::Instant::now() + state.evaluate_timeout;
    let decision = state
        .evaluator
        .evaluate_with_deadline(&request, deadline)
        .await?;

    info!(
        subject = %request.subject_id,
        resource = %request.resource,
        action = %request.action,
        allowed = decision.allowed,
        source = %decision.source,
        "evaluated"
    );

    Ok(Json(EvaluateResponse {
        allowed: decision.allowed,
        matched_source: decision.source.to_string(),
        reason: decision.reason,
        evaluated_at: decision.evaluated_at,
    }))
}

/// POST /v1/assignments - Grant a role
async fn grant_role(
    State(state): State<AppState>,
    Json(request): Json<GrantRoleRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let id = state.admin.grant_role(request).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

/// DELETE /v1/assignments/:id - Revoke a role assignment
async fn revoke_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RevokeBody>,
) -> Result<StatusCode, AppError> {
    state.admin.revoke_role(id, body.revoked_by).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/overrides - Grant a permission override
async fn grant_override(
    State(state): State<AppState>,
    Json(request): Json<GrantOverrideRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let id = state.admin.grant_override(request).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

/// POST /v1/delegations - Propose a delegation
async fn propose_delegation(
    State(state): State<AppState>,
    Json(proposal): Json<DelegationProposal>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let id = state.admin.propose_delegation(proposal).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

/// POST /v1/delegations/:id/approve - Approve a pending delegation
async fn approve_delegation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> Result<StatusCode, AppError> {
    state.admin.approve_delegation(id, body.approved_by).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/delegations/:id - Revoke a delegation
async fn revoke_delegation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RevokeBody>,
) -> Result<StatusCode, AppError> {
    state.admin.revoke_delegation(id, body.revoked_by).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/audit - Paginated audit query
async fn query_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<veridia_authz::AuditPage>, AppError> {
    let page = state.audit.query(&query).await?;
    Ok(Json(page))
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: veridia_authz::VERSION.to_string(),
    })
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/v1/evaluate", post(evaluate))
        .route("/v1/assignments", post(grant_role))
        .route("/v1/assignments/:id", delete(revoke_role))
        .route("/v1/overrides", post(grant_override))
        .route("/v1/delegations", post(propose_delegation))
        .route("/v1/delegations/:id/approve", post(approve_delegation))
        .route("/v1/delegations/:id", delete(revoke_delegation))
        .route("/v1/audit", get(query_audit))
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(state)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Veridia Authorization Server v{}", veridia_authz::VERSION);

    let port: u16 = env_parse("PORT", 8080);
    let evaluate_timeout = Duration::from_millis(env_parse("EVALUATE_TIMEOUT_MS", 1000));
    let sweep_interval = Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS", 300));
    let retention_days: i64 = env_parse("OVERRIDE_RETENTION_DAYS", 30);
    let deny_sample: u64 = env_parse("DENY_AUDIT_SAMPLE_EVERY", 0);

    info!("Configuration:");
    info!("  Port: {}", port);
    info!("  Evaluate timeout: {:?}", evaluate_timeout);
    info!("  Sweep interval: {:?}", sweep_interval);
    info!("  Override retention: {} days", retention_days);

    let stores = Stores::in_memory(RoleCatalog::builtin());
    let audit: Arc<dyn AuditSink> = Arc::new(InMemoryAuditSink::new());
    let clock = Arc::new(SystemClock);

    let admin = Arc::new(AdminService::new(
        stores.clone(),
        audit.clone(),
        clock.clone(),
    ));
    let evaluator = Arc::new(
        PermissionEvaluator::new(stores.clone(), clock.clone()).with_audit(
            audit.clone(),
            EvaluatorConfig {
                deny_audit_sample_every: deny_sample,
            },
        ),
    );

    // Background hygiene sweeps; evaluation filters by expiry on its own.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(veridia_authz::run_sweeps(
        stores,
        clock,
        SweepConfig {
            interval: sweep_interval,
            override_retention: chrono::Duration::days(retention_days),
        },
        shutdown_rx,
    ));

    let state = AppState {
        admin,
        evaluator,
        audit,
        evaluate_timeout,
        start_time: std::time::Instant::now(),
    };

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;

    info!("Server shut down gracefully");
    Ok(())
}
