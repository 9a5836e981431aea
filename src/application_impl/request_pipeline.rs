use crate::application_impl::SessionCoordinator;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Path prefixes that never carry a credential and never trigger a refresh.
#[derive(Debug, Clone)]
pub struct PublicPaths(Vec<String>);

impl PublicPaths {
    /// The refresh path is always added; a refresh answered with 401 must not refresh again.
    pub fn new<I, S>(paths: I, refresh_path: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        if !paths.iter().any(|path| path == refresh_path) {
            paths.push(refresh_path.to_owned());
        }
        Self(paths)
    }

    /// Segment-aware prefix match: `/auth/login` covers `/auth/login/otp`, not `/auth/logins`.
    pub fn matches(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        self.0.iter().any(|prefix| match path.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
            None => false,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt(u8);

impl Attempt {
    pub const FIRST: Attempt = Attempt(0);

    pub fn next(self) -> Self {
        Attempt(self.0.saturating_add(1))
    }

    pub fn is_retry(self) -> bool {
        self.0 > 0
    }

    pub fn number(self) -> u8 {
        self.0 + 1
    }
}

/// Wraps every outgoing call: attaches the bearer token to non-public paths and turns a
/// first 401 into one refresh-and-replay.
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    credential_store: Arc<dyn CredentialStore>,
    coordinator: Arc<SessionCoordinator>,
    public_paths: PublicPaths,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        credential_store: Arc<dyn CredentialStore>,
        coordinator: Arc<SessionCoordinator>,
        public_paths: PublicPaths,
    ) -> Self {
        Self {
            transport,
            credential_store,
            coordinator,
            public_paths,
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.matches(path)
    }

    fn should_replay(&self, response: &HttpResponse, public: bool, attempt: Attempt) -> bool {
        response.is_unauthorized() && !public && !attempt.is_retry()
    }

    async fn run(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let public = self.is_public(&request.path);
        let mut credential = if public {
            None
        } else {
            self.credential_store.access_token().await?
        };
        if !public && credential.is_none() {
            debug!("no access token stored, sending without credential");
        }

        let mut attempt = Attempt::FIRST;
        loop {
            let response = self
                .transport
                .send(request.credentialed(credential.as_ref()))
                .await?;
            trace!(status = response.status, attempt = attempt.number(), "response");

            if !self.should_replay(&response, public, attempt) {
                if response.is_unauthorized() {
                    debug!(public, attempt = attempt.number(), "returning 401 to caller");
                }
                return Ok(response);
            }

            debug!("access token rejected, obtaining a fresh one");
            let fresh = self
                .coordinator
                .obtain_fresh_token(credential.as_ref())
                .await?;
            credential = Some(fresh);
            attempt = attempt.next();
        }
    }
}

#[async_trait::async_trait]
impl ApiClient for RequestPipeline {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let span = tracing::debug_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %request.method,
            path = %request.path,
        );
        self.run(request).instrument(span).await
    }
}
