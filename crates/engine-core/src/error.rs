use thiserror::Error;

/// Error taxonomy shared by every engine component. Each variant maps to a
/// stable `kind` string that surfaces report verbatim.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Degenerate input: {0}")]
    Degenerate(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable kind identifier for the failure envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NotFound",
            EngineError::InvalidArgument(_) => "InvalidArgument",
            // RateLimited and ParseError are handled inside the data layer;
            // when they do surface they report as upstream failures.
            EngineError::Upstream(_) | EngineError::RateLimited(_) | EngineError::ParseError(_) => {
                "Upstream"
            }
            EngineError::Degenerate(_) => "Degenerate",
            EngineError::Timeout(_) => "Timeout",
            EngineError::Cancelled => "Cancelled",
            EngineError::Internal(_) => "Internal",
        }
    }

    /// Transient failures are retried by the data layer before surfacing.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::RateLimited(_) | EngineError::Upstream(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
