use crate::application_port::SessionError;
use crate::domain_model::*;
use crate::domain_port::{CredentialStoreError, TransportError};
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session expired: {0}")]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] CredentialStoreError),
    #[error("server responded {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("failed to encode request: {0}")]
    Encode(String),
    #[error("no endpoint serves query {0}")]
    UnknownQuery(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ApiError::Status {
                status: STATUS_UNAUTHORIZED,
                ..
            }
        ) || matches!(self, ApiError::Session(_))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        ApiError::Encode(error.to_string())
    }
}

#[async_trait::async_trait]
pub trait ApiClient: Send + Sync {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, ApiError>;
}

/// Non-2xx becomes `ApiError::Status`.
pub fn expect_success(response: HttpResponse) -> Result<HttpResponse, ApiError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Status {
            status: response.status,
            body: response.text(),
        })
    }
}

pub fn decode_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T, ApiError> {
    let response = expect_success(response)?;
    response.json().map_err(|e| ApiError::Decode(e.to_string()))
}

pub async fn fetch_json<T: DeserializeOwned>(
    client: &dyn ApiClient,
    request: HttpRequest,
) -> Result<T, ApiError> {
    decode_json(client.perform(request).await?)
}

pub async fn get_json<T: DeserializeOwned>(
    client: &dyn ApiClient,
    path: &str,
) -> Result<T, ApiError> {
    fetch_json(client, HttpRequest::get(path)).await
}

pub async fn send_json<B, T>(
    client: &dyn ApiClient,
    method: Method,
    path: &str,
    body: &B,
) -> Result<T, ApiError>
where
    B: serde::Serialize + Sync,
    T: DeserializeOwned,
{
    let request = HttpRequest::new(method, path).json(body)?;
    fetch_json(client, request).await
}
