use crate::application_impl::OptimisticGuard;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::QueryFetcher;
use crate::logger::*;
use serde_json::{Value, json};
use std::sync::Arc;

/// Serves `["tasks", <project>]` from `GET /projects/{project}/tasks`.
pub struct TaskFetcher {
    api: Arc<dyn ApiClient>,
}

impl TaskFetcher {
    pub fn new(api: Arc<dyn ApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl QueryFetcher for TaskFetcher {
    async fn fetch(&self, key: &QueryKey) -> Result<Value, ApiError> {
        match key.segments() {
            [query, project] if query == TASKS_QUERY => {
                let request = HttpRequest::get(format!("/projects/{project}/tasks"));
                fetch_json(self.api.as_ref(), request).await
            }
            _ => Err(ApiError::UnknownQuery(key.to_string())),
        }
    }
}

fn lists_task(list: &Value, task: &TaskId) -> bool {
    list.as_array()
        .is_some_and(|items| items.iter().any(|item| item["id"] == task.0.as_str()))
}

fn with_status(list: &Value, task: &TaskId, status: TaskStatus) -> Option<Value> {
    let mut list = list.clone();
    let item = list
        .as_array_mut()?
        .iter_mut()
        .find(|item| item["id"] == task.0.as_str())?;
    item["status"] = json!(status);
    Some(list)
}

pub struct RealTaskBoardService {
    api: Arc<dyn ApiClient>,
    guard: Arc<OptimisticGuard>,
    fetcher: Arc<TaskFetcher>,
}

impl RealTaskBoardService {
    pub fn new(api: Arc<dyn ApiClient>, guard: Arc<OptimisticGuard>) -> Self {
        let fetcher = Arc::new(TaskFetcher::new(api.clone()));
        Self {
            api,
            guard,
            fetcher,
        }
    }
}

#[async_trait::async_trait]
impl TaskBoardService for RealTaskBoardService {
    async fn list_tasks(&self, project: &ProjectId) -> Result<Vec<Task>, ApiError> {
        let value = self
            .guard
            .cache()
            .get_or_fetch(&project.tasks_key(), self.fetcher.as_ref())
            .await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn move_task(
        &self,
        project: &ProjectId,
        task: &TaskId,
        status: TaskStatus,
    ) -> Result<Task, ApiError> {
        info!(%project, %task, %status, "moving task");
        let request = HttpRequest::patch(format!("/tasks/{task}/status"))
            .json(&StatusChange { status })?;
        let api = self.api.clone();

        // the project's list plus any other cached list (sprint views) that shows the task
        let project_key = project.tasks_key();
        let cache = self.guard.cache();
        let keys: Vec<QueryKey> = cache
            .matching_keys(&KeySelector::Prefix(QueryKey::new([TASKS_QUERY])))
            .into_iter()
            .filter(|key| {
                *key == project_key || cache.get(key).is_some_and(|list| lists_task(&list, task))
            })
            .collect();

        self.guard
            .mutate(
                &KeySelector::AnyOf(keys),
                |_, list| with_status(list, task, status),
                move || async move { fetch_json::<Task>(api.as_ref(), request).await },
            )
            .await
    }
}
