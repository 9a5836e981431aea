use crate::application_port::ApiError;
use serde::Serialize;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const MAGIC_LINK_REQUEST_PATH: &str = "/auth/magic-link/request";
pub const MAGIC_LINK_VERIFY_PATH: &str = "/auth/magic-link/verify";
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Paths that never carry a bearer token and never trigger a refresh.
pub fn default_public_paths() -> Vec<String> {
    [
        LOGIN_PATH,
        REGISTER_PATH,
        MAGIC_LINK_REQUEST_PATH,
        MAGIC_LINK_VERIFY_PATH,
        REFRESH_PATH,
    ]
    .iter()
    .map(|path| path.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MagicLinkRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MagicLinkVerify {
    pub token: String,
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, input: LoginInput) -> Result<(), ApiError>;
    async fn register(&self, input: RegisterInput) -> Result<(), ApiError>;
    async fn request_magic_link(&self, email: &str) -> Result<(), ApiError>;
    async fn verify_magic_link(&self, token: &str) -> Result<(), ApiError>;
    async fn logout(&self) -> Result<(), ApiError>;
    async fn is_authenticated(&self) -> Result<bool, ApiError>;
}
