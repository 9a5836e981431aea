use crate::domain_model::*;
use crate::domain_port::*;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    session: RwLock<Option<Session>>,
}

impl MemoryCredentialStore {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }

    pub async fn current(&self) -> Option<Session> {
        self.session.read().await.clone()
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn access_token(&self) -> Result<Option<AccessToken>, CredentialStoreError> {
        Ok(self
            .session
            .read()
            .await
            .as_ref()
            .map(|session| session.access_token.clone()))
    }

    async fn refresh_token(&self) -> Result<Option<RefreshToken>, CredentialStoreError> {
        Ok(self
            .session
            .read()
            .await
            .as_ref()
            .map(|session| session.refresh_token.clone()))
    }

    async fn set_tokens(&self, session: &Session) -> Result<(), CredentialStoreError> {
        *self.session.write().await = Some(session.clone());
        Ok(())
    }

    async fn clear_tokens(&self) -> Result<(), CredentialStoreError> {
        *self.session.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_replaced_and_cleared_together() {
        let store = MemoryCredentialStore::new(Some(Session::new("t1", "r1")));

        store.set_tokens(&Session::new("t2", "r2")).await.unwrap();
        assert_eq!(store.access_token().await.unwrap(), Some(AccessToken::new("t2")));
        assert_eq!(store.refresh_token().await.unwrap(), Some(RefreshToken::new("r2")));

        store.clear_tokens().await.unwrap();
        assert_eq!(store.access_token().await.unwrap(), None);
        assert_eq!(store.refresh_token().await.unwrap(), None);
    }
}
