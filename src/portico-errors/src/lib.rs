use thiserror::Error;

pub type Result<T, E = ControlError> = std::result::Result<T, E>;

/// Errors surfaced by control plane operations.
///
/// Synchronous validation and lookup failures are returned to the caller that
/// triggered them. `Upstream` is reserved for calls made to external services
/// on the caller's behalf; asynchronous workflows record it as state instead.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Auth(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("data plane error: {0}")]
    DataPlane(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ControlError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Wraps a persistence failure, keeping the full context chain.
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    /// HTTP status code the Control API answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            ControlError::Validation(_) => 400,
            ControlError::Auth(_) => 401,
            ControlError::NotFound(_) => 404,
            ControlError::Conflict(_) => 409,
            ControlError::Upstream(_) => 502,
            ControlError::DataPlane(_) | ControlError::Storage(_) => 500,
        }
    }

    /// Short machine-readable kind, used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::Validation(_) => "validation",
            ControlError::NotFound(_) => "not_found",
            ControlError::Conflict(_) => "conflict",
            ControlError::Auth(_) => "auth",
            ControlError::Upstream(_) => "upstream",
            ControlError::DataPlane(_) => "data_plane",
            ControlError::Storage(_) => "storage",
        }
    }
}
