//! Push Probe Core Library
//!
//! Device registration, push-gateway fan-out and end-to-end delivery
//! acknowledgment. Every operation is a fresh round trip against the
//! SQLite store; the only in-process state is the delegated-token cache.

pub mod credentials;
pub mod dispatcher;
pub mod models;
pub mod registry;
pub mod secrets;
pub mod storage;
pub mod test_runs;

pub use credentials::{CredentialConfig, CredentialProvider, DelegatedToken, ServiceAccountCredentials};
pub use dispatcher::{DispatchConfig, DispatchPolicy, DispatchRequest, Dispatcher};
pub use models::{
    Device, DeviceOutcome, DispatchReport, Platform, RegisterOutcome, TestRun, TestRunStatus,
};
pub use registry::DeviceRegistry;
pub use secrets::{
    EnvSecretProvider, FileSecretProvider, InMemorySecretProvider, SecretError, SecretProvider,
};
pub use storage::Storage;
pub use test_runs::TestRuns;

use thiserror::Error;

/// Result type for push probe operations
pub type Result<T> = std::result::Result<T, PushProbeError>;

/// General error type for push probe operations
#[derive(Error, Debug)]
pub enum PushProbeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Also returned when a test run exists but was already acknowledged.
    /// Callers cannot tell the two apart.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upstream { status: Option<u16>, message: String },

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PushProbeError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Upstream { .. } => "upstream_error",
            Self::Credential(_) => "credential_error",
            Self::Secret(_) => "secret_error",
            Self::Storage(_) => "storage_error",
        }
    }

    pub(crate) fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for PushProbeError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// True when the error is a SQLite constraint violation (unique, check, ...).
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
