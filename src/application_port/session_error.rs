use crate::domain_port::{CredentialStoreError, TransportError};

/// Why a refresh cycle failed. Cloned once per queued caller, so every waiter sees the
/// same error as the driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no refresh token stored")]
    MissingRefreshToken,
    #[error("refresh rejected with status {status}")]
    RefreshRejected { status: u16 },
    #[error("refresh transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),
    #[error("credential store error: {0}")]
    Store(String),
    #[error("refresh abandoned before it settled")]
    RefreshAbandoned,
}

impl From<CredentialStoreError> for SessionError {
    fn from(error: CredentialStoreError) -> Self {
        SessionError::Store(error.to_string())
    }
}
