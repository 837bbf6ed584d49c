//! Error types for the authorization engine

use thiserror::Error;
use uuid::Uuid;

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed or incomplete input, rejected before any store access
    #[error("validation failed: {0}")]
    Validation(String),

    /// An active assignment already exists for the identical scope tuple
    #[error("subject {subject_id} already holds role '{role}' in this scope")]
    DuplicateAssignment { subject_id: Uuid, role: String },

    /// Delegation approval rejected; the delegation stays pending
    #[error("source assignment {0} is not active")]
    SourceAssignmentInactive(Uuid),

    /// Role name unknown to the catalog
    #[error("role not found: {0}")]
    RoleNotFound(String),

    /// Assignment id unknown to the store
    #[error("assignment not found: {0}")]
    AssignmentNotFound(Uuid),

    /// Override id unknown to the store
    #[error("override not found: {0}")]
    OverrideNotFound(Uuid),

    /// Delegation id unknown to the store
    #[error("delegation not found: {0}")]
    DelegationNotFound(Uuid),

    /// Store or backend failure during evaluation; callers must treat as deny
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Audit record could not be persisted; the triggering mutation is rolled back
    #[error("audit write failed: {0}")]
    Audit(String),
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
