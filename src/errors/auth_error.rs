use super::tool_error::{ToolError, ToolErrorKind};
use thiserror::Error;

/// Failure of the credential exchange with the vendor token endpoint.
///
/// Cloneable so that every caller attached to one in-flight exchange can
/// observe the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Network failure, timeout, throttling or a server-side error.
    #[error("credential exchange failed: {0}")]
    ExchangeFailed(String),
    /// The exchange succeeded but the response lacks a usable token or lifetime.
    #[error("credential exchange returned a malformed response: {0}")]
    ExchangeMalformed(String),
    /// The token endpoint refused the configured client identity.
    #[error("credential exchange denied ({status}): {message}")]
    ExchangeDenied { status: u16, message: String },
}

impl AuthError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::ExchangeFailed(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::ExchangeFailed(_) => "AUTH_EXCHANGE_FAILED",
            AuthError::ExchangeMalformed(_) => "AUTH_EXCHANGE_MALFORMED",
            AuthError::ExchangeDenied { .. } => "AUTH_EXCHANGE_DENIED",
        }
    }
}

impl From<AuthError> for ToolError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match &err {
            AuthError::ExchangeFailed(_) => {
                ToolError::new(ToolErrorKind::Retryable, err.code(), message)
                    .with_hint("The token endpoint was unreachable; retry after a short backoff.")
            }
            AuthError::ExchangeMalformed(_) => {
                ToolError::new(ToolErrorKind::Internal, err.code(), message)
            }
            AuthError::ExchangeDenied { status, .. } => {
                ToolError::new(ToolErrorKind::Denied, err.code(), message)
                    .with_hint("Check CLIENT_ID, CLIENT_SECRET and USE_SANDBOX.")
                    .with_details(serde_json::json!({ "status": status }))
            }
        }
    }
}
