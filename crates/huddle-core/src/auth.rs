use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the token service on a failed credential exchange.
#[derive(Debug, Deserialize)]
struct TokenServiceResponse {
    error: Option<TokenServiceError>,
}

#[derive(Debug, Deserialize)]
struct TokenServiceError {
    message: String,
    #[serde(default)]
    explanation: Option<String>,
}

/// Structured error from the token service, surfaced in `RoomEvent::TokenError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum AuthServiceError {
    #[error("invalid passcode")]
    InvalidPasscode,
    #[error("expired passcode")]
    ExpiredPasscode,
    #[error("{0}")]
    Other(String),
}

const INVALID_PASSCODE: &str = "passcode incorrect";
const EXPIRED_PASSCODE: &str = "passcode expired";

impl AuthServiceError {
    /// Classify a token service error body.
    ///
    /// Returns `None` when the body is not JSON or carries no `error` object,
    /// in which case callers should fall back to a generic token error.
    pub fn from_response_body(body: &str) -> Option<Self> {
        let response: TokenServiceResponse = serde_json::from_str(body).ok()?;
        let error = response.error?;
        let message = error.message.trim().to_lowercase();
        let classified = match message.as_str() {
            INVALID_PASSCODE => Self::InvalidPasscode,
            EXPIRED_PASSCODE => Self::ExpiredPasscode,
            _ => Self::Other(error.explanation.unwrap_or(error.message)),
        };
        tracing::debug!("token service error classified as {classified:?}");
        Some(classified)
    }
}
