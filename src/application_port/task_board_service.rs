use crate::application_port::ApiError;
use crate::domain_model::*;

#[async_trait::async_trait]
pub trait TaskBoardService: Send + Sync {
    async fn list_tasks(&self, project: &ProjectId) -> Result<Vec<Task>, ApiError>;
    async fn move_task(
        &self,
        project: &ProjectId,
        task: &TaskId,
        status: TaskStatus,
    ) -> Result<Task, ApiError>;
}
