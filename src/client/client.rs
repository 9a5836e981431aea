use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_fake::*;
use crate::infra_http::*;
use crate::infra_store::*;
use crate::logger::*;
use crate::settings::Settings;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub refresh_path: String,
    pub public_paths: Vec<String>,
    pub refetch_after_mutation: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            refresh_path: REFRESH_PATH.to_string(),
            public_paths: default_public_paths(),
            refetch_after_mutation: true,
        }
    }
}

impl From<&Settings> for ClientConfig {
    fn from(settings: &Settings) -> Self {
        let mut public_paths = default_public_paths();
        for path in &settings.auth.public_paths {
            if !public_paths.contains(path) {
                public_paths.push(path.clone());
            }
        }
        Self {
            refresh_path: settings.auth.refresh_path.clone(),
            public_paths,
            refetch_after_mutation: settings.cache.refetch_after_mutation,
        }
    }
}

pub struct Client {
    pub api: Arc<dyn ApiClient>,
    pub auth_service: Arc<dyn AuthService>,
    pub task_board_service: Arc<dyn TaskBoardService>,
    pub invalidation_hub: Arc<InvalidationHub>,
    pub coordinator: Arc<SessionCoordinator>,
    pub cache: Arc<QueryCache>,
    fake_backend: Option<Arc<FakeBackend>>,
}

impl Client {
    pub fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let mut fake_backend = None;
        let transport: Arc<dyn Transport> = match settings.transport.backend.as_str() {
            "fake" => {
                let backend = Arc::new(FakeBackend::new(FakeBackendConfig::default()));
                let transport = backend.transport();
                fake_backend = Some(backend);
                transport
            }
            "real" => Arc::new(ReqwestTransport::new(
                settings.api.base_url.clone(),
                Duration::from_secs(settings.api.timeout_secs),
            )?),
            other => return Err(anyhow::anyhow!("Unknown transport backend: {}", other)),
        };

        let credential_store: Arc<dyn CredentialStore> =
            match settings.credentials.backend.as_str() {
                "memory" => Arc::new(MemoryCredentialStore::default()),
                "file" => {
                    let path = settings.credentials.path.as_deref().ok_or_else(|| {
                        anyhow::anyhow!("credentials.path is required for the file backend")
                    })?;
                    Arc::new(FileCredentialStore::new(path))
                }
                other => return Err(anyhow::anyhow!("Unknown credentials backend: {}", other)),
            };

        let mut client = Self::from_parts(transport, credential_store, settings.into());
        client.fake_backend = fake_backend;

        info!(
            transport = %settings.transport.backend,
            credentials = %settings.credentials.backend,
            "client ready"
        );
        Ok(client)
    }

    pub fn from_parts(
        transport: Arc<dyn Transport>,
        credential_store: Arc<dyn CredentialStore>,
        config: ClientConfig,
    ) -> Self {
        let invalidation_hub = Arc::new(InvalidationHub::new());
        let coordinator = Arc::new(SessionCoordinator::new(
            transport.clone(),
            credential_store.clone(),
            invalidation_hub.clone(),
            config.refresh_path.clone(),
        ));
        let public_paths = PublicPaths::new(config.public_paths, &config.refresh_path);
        let api: Arc<dyn ApiClient> = Arc::new(RequestPipeline::new(
            transport,
            credential_store.clone(),
            coordinator.clone(),
            public_paths,
        ));

        let cache = Arc::new(QueryCache::new());
        {
            // cached data belongs to the session that fetched it
            let cache = cache.clone();
            invalidation_hub.subscribe(move || cache.clear());
        }

        let refetcher: Option<Arc<dyn QueryFetcher>> = if config.refetch_after_mutation {
            Some(Arc::new(TaskFetcher::new(api.clone())))
        } else {
            None
        };
        let guard = Arc::new(OptimisticGuard::new(cache.clone(), refetcher));

        let auth_service: Arc<dyn AuthService> =
            Arc::new(RealAuthService::new(api.clone(), credential_store, cache.clone()));
        let task_board_service: Arc<dyn TaskBoardService> =
            Arc::new(RealTaskBoardService::new(api.clone(), guard));

        Self {
            api,
            auth_service,
            task_board_service,
            invalidation_hub,
            coordinator,
            cache,
            fake_backend: None,
        }
    }

    pub fn fake_backend(&self) -> Option<&Arc<FakeBackend>> {
        self.fake_backend.as_ref()
    }

    pub fn shutdown(&self) {
        info!("client shutting down...");
        self.cache.shutdown();
    }
}
