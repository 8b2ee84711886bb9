//! Crate-wide error taxonomy.
//!
//! `AppError` is the one type that crosses component boundaries: the HTTP layer, the agent
//! executor, and the dispatcher all return it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("quota exceeded for user={user_id} model={model}")]
    QuotaExceeded { user_id: String, model: String },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("provider transport error: {0}")]
    ProviderTransport(String),

    #[error("malformed provider chunk: {0}")]
    ProviderProtocol(String),

    #[error("tool argument invalid: {0}")]
    ToolArgumentInvalid(String),

    #[error("tool handler failure: {0}")]
    ToolHandlerFailure(String),

    #[error("MCP method unsupported: {0}")]
    MCPMethodUnsupported(String),

    #[error("MCP RPC error {code}: {message}")]
    MCPRpcError { code: i64, message: String },

    #[error("MCP transport broken: {0}")]
    MCPTransportBroken(String),

    #[error("MCP request timed out after {0}s")]
    MCPTimeout(u64),

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Maps to the HTTP status the error should surface as.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Config(_) => 500,
            AppError::QuotaExceeded { .. } => 429,
            AppError::ProviderUnavailable(_) => 400,
            AppError::ProviderTransport(_) => 502,
            AppError::ProviderProtocol(_) => 502,
            AppError::ToolArgumentInvalid(_) => 400,
            AppError::ToolHandlerFailure(_) => 500,
            AppError::MCPMethodUnsupported(_) => 400,
            AppError::MCPRpcError { .. } => 502,
            AppError::MCPTransportBroken(_) => 502,
            AppError::MCPTimeout(_) => 504,
            AppError::Cancelled => 499,
            AppError::Http(_) => 502,
            AppError::Json(_) => 502,
            AppError::Io(_) => 500,
        }
    }

    /// Whether this error is the one condition the agent executor auto-retries
    /// (provider HTTP 429, or a rate-limit-flavored transport error).
    pub fn is_rate_limited(&self) -> bool {
        match self {
            AppError::ProviderTransport(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
            }
            _ => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detection_matches_known_phrasings() {
        assert!(AppError::ProviderTransport("HTTP 429 Too Many Requests".into()).is_rate_limited());
        assert!(AppError::ProviderTransport("rate limit exceeded".into()).is_rate_limited());
        assert!(!AppError::ProviderTransport("connection reset".into()).is_rate_limited());
        assert!(!AppError::Config("bad config".into()).is_rate_limited());
    }

    #[test]
    fn status_codes_match_the_error_taxonomy() {
        assert_eq!(AppError::QuotaExceeded { user_id: "u".into(), model: "m".into() }.status_code(), 429);
        assert_eq!(AppError::ProviderUnavailable("x".into()).status_code(), 400);
        assert_eq!(AppError::MCPTimeout(30).status_code(), 504);
        assert_eq!(AppError::Cancelled.status_code(), 499);
    }
}
