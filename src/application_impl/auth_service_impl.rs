use crate::application_impl::QueryCache;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::CredentialStore;
use crate::logger::*;
use std::sync::Arc;

/// Sign-in flows. Every flow that yields a token pair writes it to the store; opening or
/// closing a session drops whatever the cache holds for the previous one.
pub struct RealAuthService {
    api: Arc<dyn ApiClient>,
    credential_store: Arc<dyn CredentialStore>,
    cache: Arc<QueryCache>,
}

impl RealAuthService {
    pub fn new(
        api: Arc<dyn ApiClient>,
        credential_store: Arc<dyn CredentialStore>,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            api,
            credential_store,
            cache,
        }
    }

    async fn open_session(&self, request: HttpRequest) -> Result<(), ApiError> {
        let session: Session = fetch_json(self.api.as_ref(), request).await?;
        self.credential_store.set_tokens(&session).await?;
        self.cache.clear();
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn login(&self, input: LoginInput) -> Result<(), ApiError> {
        let request = HttpRequest::post(LOGIN_PATH).json(&input)?;
        self.open_session(request).await?;
        info!(email = %input.email, "signed in");
        Ok(())
    }

    async fn register(&self, input: RegisterInput) -> Result<(), ApiError> {
        let request = HttpRequest::post(REGISTER_PATH).json(&input)?;
        self.open_session(request).await?;
        info!(email = %input.email, "account registered");
        Ok(())
    }

    async fn request_magic_link(&self, email: &str) -> Result<(), ApiError> {
        let request = HttpRequest::post(MAGIC_LINK_REQUEST_PATH).json(&MagicLinkRequest {
            email: email.to_owned(),
        })?;
        expect_success(self.api.perform(request).await?)?;
        info!(%email, "magic link requested");
        Ok(())
    }

    async fn verify_magic_link(&self, token: &str) -> Result<(), ApiError> {
        let request = HttpRequest::post(MAGIC_LINK_VERIFY_PATH).json(&MagicLinkVerify {
            token: token.to_owned(),
        })?;
        self.open_session(request).await?;
        info!("signed in with magic link");
        Ok(())
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.credential_store.clear_tokens().await?;
        self.cache.clear();
        info!("signed out");
        Ok(())
    }

    async fn is_authenticated(&self) -> Result<bool, ApiError> {
        Ok(self.credential_store.access_token().await?.is_some())
    }
}
