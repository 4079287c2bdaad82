use thiserror::Error;

use crate::auth::AuthServiceError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HuddleError {
    #[error("a session is already active or connecting")]
    SessionActive,
    #[error("token retrieval failed: {0}")]
    Token(String),
    #[error("authentication failed: {0}")]
    AuthService(AuthServiceError),
    #[error("data track error: {0}")]
    DataTrack(String),
}

impl HuddleError {
    /// The structured auth-service error carried by this error, if any.
    pub fn service_error(&self) -> Option<AuthServiceError> {
        match self {
            HuddleError::AuthService(e) => Some(e.clone()),
            _ => None,
        }
    }
}

impl From<AuthServiceError> for HuddleError {
    fn from(e: AuthServiceError) -> Self {
        HuddleError::AuthService(e)
    }
}
