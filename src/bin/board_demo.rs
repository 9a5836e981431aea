use serde_json::Value;
use std::sync::Arc;
use workdesk::application_port::*;
use workdesk::client::*;
use workdesk::domain_model::*;
use workdesk::infra_fake::*;
use workdesk::infra_store::*;
use workdesk::logger::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logger = Logger::new_bootstrap();
    logger.reload_from_config(&LogConfig {
        filter: "workdesk=debug,info".to_string(),
    })?;

    let backend = FakeBackend::new(FakeBackendConfig::default());
    let client = Client::from_parts(
        backend.transport(),
        Arc::new(MemoryCredentialStore::default()),
        ClientConfig::default(),
    );
    client
        .invalidation_hub
        .set_handler(|| warn!("session expired, sign in again"));

    client
        .auth_service
        .login(LoginInput {
            email: "ada@example.com".to_string(),
            password: "correct horse".to_string(),
        })
        .await?;

    let project = ProjectId(DEMO_PROJECT.to_string());
    for task in client.task_board_service.list_tasks(&project).await? {
        info!(id = %task.id, status = %task.status, "{}", task.title);
    }

    // three calls hit a 401 together and share one refresh
    backend.expire_access_tokens();
    let api = client.api.as_ref();
    let (a, b, c) = tokio::join!(
        get_json::<Value>(api, "/me"),
        get_json::<Value>(api, "/me"),
        get_json::<Value>(api, "/me"),
    );
    info!(
        ok = [a, b, c].iter().filter(|r| r.is_ok()).count(),
        refreshes = backend.refresh_calls(),
        "concurrent calls after expiry"
    );

    let moved = client
        .task_board_service
        .move_task(&project, &TaskId("t-1".to_string()), TaskStatus::InProgress)
        .await?;
    info!(id = %moved.id, status = %moved.status, "task moved");

    backend.fail_next_status_change();
    let before = client.cache.get(&project.tasks_key());
    if let Err(e) = client
        .task_board_service
        .move_task(&project, &TaskId("t-2".to_string()), TaskStatus::Done)
        .await
    {
        let restored = client.cache.get(&project.tasks_key()) == before;
        warn!(restored, "move rejected: {e}");
    }

    backend.revoke_refresh_tokens();
    backend.expire_access_tokens();
    match get_json::<Value>(api, "/me").await {
        Ok(_) => info!("still signed in"),
        Err(e) => {
            let signed_in = client.auth_service.is_authenticated().await?;
            info!(signed_in, cached = client.cache.len(), "call failed: {e}");
        }
    }

    client.shutdown();
    Ok(())
}
