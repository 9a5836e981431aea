use crate::domain_model::*;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("credential io error: {0}")]
    Io(String),
    #[error("stored credentials are corrupt: {0}")]
    Corrupt(String),
}

/// Secure storage for the current token pair.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn access_token(&self) -> Result<Option<AccessToken>, CredentialStoreError>;
    async fn refresh_token(&self) -> Result<Option<RefreshToken>, CredentialStoreError>;
    async fn set_tokens(&self, session: &Session) -> Result<(), CredentialStoreError>;
    async fn clear_tokens(&self) -> Result<(), CredentialStoreError>;
}
