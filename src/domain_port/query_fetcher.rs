use crate::application_port::ApiError;
use crate::domain_model::QueryKey;

#[async_trait::async_trait]
pub trait QueryFetcher: Send + Sync {
    async fn fetch(&self, key: &QueryKey) -> Result<serde_json::Value, ApiError>;
}
