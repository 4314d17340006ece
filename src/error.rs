//! Error taxonomy for the observatory.
//!
//! Mirrors the error kinds a caller can distinguish: `CONFIG` and an
//! unrecoverable `STORAGE` failure are the only kinds that terminate the
//! process: everything else is contained at the adapter, cycle or request
//! level.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ObservatoryError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream returned {status}: {body}")]
    Upstream4xx { status: u16, body: String },

    #[error("upstream 5xx/network error: {0}")]
    UpstreamRetryable(String),

    #[error("failed to parse venue payload: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error (correlation_id={correlation_id})")]
    Internal {
        correlation_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

impl ObservatoryError {
    /// The closed-taxonomy error `kind` string, as surfaced in the API
    /// error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            ObservatoryError::Config(_) => "CONFIG",
            ObservatoryError::RateLimited { .. } => "RATE_LIMITED",
            ObservatoryError::Upstream4xx { .. } => "UPSTREAM_4XX",
            ObservatoryError::UpstreamRetryable(_) => "UPSTREAM_5XX",
            ObservatoryError::Parse(_) => "PARSE",
            ObservatoryError::Storage(_) => "STORAGE",
            ObservatoryError::Cache(_) => "CACHE",
            ObservatoryError::Cancelled => "CANCELLED",
            ObservatoryError::Validation(_) => "VALIDATION",
            ObservatoryError::Internal { .. } => "INTERNAL",
        }
    }

    /// Whether the caller's request should be retried by the adapter itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ObservatoryError::RateLimited { .. } | ObservatoryError::UpstreamRetryable(_)
        )
    }

    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        ObservatoryError::Internal {
            correlation_id: Uuid::new_v4(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservatoryError>;
