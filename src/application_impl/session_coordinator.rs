use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

type RefreshOutcome = Result<AccessToken, SessionError>;

type PendingCaller = oneshot::Sender<RefreshOutcome>;

#[derive(Default)]
struct CoordinatorState {
    refreshing: bool,
    // non-empty only while `refreshing`
    queue: Vec<PendingCaller>,
}

enum Role {
    Driver,
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

/// Single-flight token refresh shared by every request of one client.
///
/// The first caller that needs a fresh token becomes the driver and performs the refresh;
/// callers arriving while it runs are queued and receive the driver's outcome. On success
/// the new pair is stored before any waiter is released. On failure the stored pair is
/// cleared, every waiter gets the same error and the invalidation sink fires once.
pub struct SessionCoordinator {
    transport: Arc<dyn Transport>,
    credential_store: Arc<dyn CredentialStore>,
    invalidation_sink: Arc<dyn SessionInvalidationSink>,
    refresh_path: String,
    state: Mutex<CoordinatorState>,
}

impl SessionCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        credential_store: Arc<dyn CredentialStore>,
        invalidation_sink: Arc<dyn SessionInvalidationSink>,
        refresh_path: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            credential_store,
            invalidation_sink,
            refresh_path: refresh_path.into(),
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    pub fn is_refreshing(&self) -> bool {
        self.state().refreshing
    }

    pub fn queued_callers(&self) -> usize {
        self.state().queue.len()
    }

    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns an access token the server has not rejected yet.
    ///
    /// `rejected` is the token the failed request carried. When no refresh is running and
    /// the store already holds a different token, a refresh settled after that request
    /// left, and the stored token is returned as is.
    pub async fn obtain_fresh_token(
        &self,
        rejected: Option<&AccessToken>,
    ) -> Result<AccessToken, SessionError> {
        if let Some(rejected) = rejected {
            if !self.is_refreshing() {
                if let Some(current) = self.rotated_token(rejected).await {
                    debug!("access token already rotated, skipping refresh");
                    return Ok(current);
                }
            }
        }

        // check and set under one lock; nothing may suspend in between
        let role = {
            let mut state = self.state();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.queue.push(tx);
                Role::Waiter(rx)
            } else {
                state.refreshing = true;
                Role::Driver
            }
        };

        match role {
            Role::Waiter(rx) => {
                debug!("refresh in flight, waiting for its outcome");
                match rx.await.unwrap_or(Err(SessionError::RefreshAbandoned)) {
                    // the driver may have been dropped after the new pair was stored
                    Err(SessionError::RefreshAbandoned) => match rejected {
                        Some(rejected) => self
                            .rotated_token(rejected)
                            .await
                            .ok_or(SessionError::RefreshAbandoned),
                        None => Err(SessionError::RefreshAbandoned),
                    },
                    outcome => outcome,
                }
            }
            Role::Driver => self.drive_refresh().await,
        }
    }

    async fn rotated_token(&self, rejected: &AccessToken) -> Option<AccessToken> {
        let current = self.credential_store.access_token().await.ok().flatten();
        current.filter(|current| current != rejected)
    }

    async fn drive_refresh(&self) -> RefreshOutcome {
        let cycle = RefreshCycle {
            coordinator: self,
            settled: false,
        };
        info!("refreshing session");

        let outcome = match self.request_new_session().await {
            Ok(session) => {
                // stored before any waiter replays with it
                match self.credential_store.set_tokens(&session).await {
                    Ok(()) => Ok(session.access_token),
                    Err(e) => Err(SessionError::from(e)),
                }
            }
            Err(e) => Err(e),
        };

        if let Err(error) = &outcome {
            warn!(%error, "session refresh failed, clearing credentials");
            if let Err(e) = self.credential_store.clear_tokens().await {
                tracing::error!("failed to clear credentials: {e}");
            }
        }

        let waiters = cycle.settle(&outcome);
        match &outcome {
            Ok(_) => info!(waiters, "session refreshed"),
            Err(_) => self.invalidation_sink.session_invalidated(),
        }
        outcome
    }

    async fn request_new_session(&self) -> Result<Session, SessionError> {
        let refresh_token = self
            .credential_store
            .refresh_token()
            .await?
            .ok_or(SessionError::MissingRefreshToken)?;

        let request = HttpRequest::post(&self.refresh_path)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(SessionError::RefreshRejected {
                status: response.status,
            });
        }

        response
            .json::<Session>()
            .map_err(|e| SessionError::MalformedResponse(e.to_string()))
    }

    fn finish(&self, outcome: &RefreshOutcome) -> usize {
        let mut state = self.state();
        state.refreshing = false;
        let queue = mem::take(&mut state.queue);
        let waiters = queue.len();
        for caller in queue {
            // a waiter whose future was dropped no longer listens
            let _ = caller.send(outcome.clone());
        }
        waiters
    }
}

/// Held by the driver for the duration of one refresh. If the driver's future is dropped
/// before settling, the coordinator returns to idle and waiters are told the refresh was
/// abandoned instead of hanging.
struct RefreshCycle<'a> {
    coordinator: &'a SessionCoordinator,
    settled: bool,
}

impl RefreshCycle<'_> {
    fn settle(mut self, outcome: &RefreshOutcome) -> usize {
        self.settled = true;
        self.coordinator.finish(outcome)
    }
}

impl Drop for RefreshCycle<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("refresh dropped before settling");
            self.coordinator
                .finish(&Err(SessionError::RefreshAbandoned));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_fake::FakeTransport;
    use crate::infra_store::MemoryCredentialStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl SessionInvalidationSink for CountingSink {
        fn session_invalidated(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        transport: Arc<FakeTransport>,
        store: Arc<MemoryCredentialStore>,
        sink: Arc<CountingSink>,
        coordinator: SessionCoordinator,
    }

    fn fixture(session: Option<Session>) -> Fixture {
        let transport = Arc::new(FakeTransport::new());
        let store = Arc::new(MemoryCredentialStore::new(session));
        let sink = Arc::new(CountingSink::default());
        let coordinator = SessionCoordinator::new(
            transport.clone(),
            store.clone(),
            sink.clone(),
            REFRESH_PATH,
        );
        Fixture {
            transport,
            store,
            sink,
            coordinator,
        }
    }

    async fn wait_for_waiters(coordinator: &SessionCoordinator, count: usize) {
        while coordinator.queued_callers() < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let f = fixture(Some(Session::new("t1", "r1")));
        f.transport.respond(
            Method::Post,
            REFRESH_PATH,
            HttpResponse::ok_json(&json!({ "access_token": "t2", "refresh_token": "r2" })),
        );
        f.transport.hold(REFRESH_PATH);

        let release = async {
            wait_for_waiters(&f.coordinator, 2).await;
            assert!(f.coordinator.is_refreshing());
            f.transport.release(REFRESH_PATH);
        };
        let (a, b, c, _) = tokio::join!(
            f.coordinator.obtain_fresh_token(None),
            f.coordinator.obtain_fresh_token(None),
            f.coordinator.obtain_fresh_token(None),
            release,
        );

        for outcome in [a, b, c] {
            assert_eq!(outcome.unwrap(), AccessToken::new("t2"));
        }
        assert_eq!(f.transport.count(REFRESH_PATH), 1);
        assert_eq!(f.coordinator.queued_callers(), 0);
        assert!(!f.coordinator.is_refreshing());
        assert_eq!(f.store.current().await, Some(Session::new("t2", "r2")));
        assert_eq!(f.sink.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_sends_stored_refresh_token() {
        let f = fixture(Some(Session::new("t1", "r1")));
        f.transport.respond(
            Method::Post,
            REFRESH_PATH,
            HttpResponse::ok_json(&json!({ "access_token": "t2", "refresh_token": "r2" })),
        );

        f.coordinator.obtain_fresh_token(None).await.unwrap();

        let sent = f.transport.requests_to(REFRESH_PATH);
        assert_eq!(sent[0].body, Some(json!({ "refresh_token": "r1" })));
        assert_eq!(sent[0].bearer_token(), None);
    }

    #[tokio::test]
    async fn test_failed_refresh_rejects_every_waiter() {
        let f = fixture(Some(Session::new("t1", "r1")));
        f.transport
            .respond(Method::Post, REFRESH_PATH, HttpResponse::new(400));
        f.transport.hold(REFRESH_PATH);

        let release = async {
            wait_for_waiters(&f.coordinator, 2).await;
            f.transport.release(REFRESH_PATH);
        };
        let (a, b, c, _) = tokio::join!(
            f.coordinator.obtain_fresh_token(None),
            f.coordinator.obtain_fresh_token(None),
            f.coordinator.obtain_fresh_token(None),
            release,
        );

        for outcome in [a, b, c] {
            assert_eq!(
                outcome.unwrap_err(),
                SessionError::RefreshRejected { status: 400 }
            );
        }
        assert_eq!(f.store.current().await, None);
        assert_eq!(f.sink.0.load(Ordering::SeqCst), 1);
        assert!(!f.coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_network_error_during_refresh_invalidates() {
        let f = fixture(Some(Session::new("t1", "r1")));
        f.transport.fail(
            Method::Post,
            REFRESH_PATH,
            TransportError::Network("connection reset".into()),
        );

        let outcome = f.coordinator.obtain_fresh_token(None).await;

        assert!(matches!(outcome, Err(SessionError::Transport(_))));
        assert_eq!(f.store.current().await, None);
        assert_eq!(f.sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_refresh_body_is_failure() {
        let f = fixture(Some(Session::new("t1", "r1")));
        f.transport.respond(
            Method::Post,
            REFRESH_PATH,
            HttpResponse::ok_json(&json!({ "token": "t2" })),
        );

        let outcome = f.coordinator.obtain_fresh_token(None).await;

        assert!(matches!(outcome, Err(SessionError::MalformedResponse(_))));
        assert_eq!(f.store.current().await, None);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_skips_network() {
        let f = fixture(None);

        let outcome = f.coordinator.obtain_fresh_token(None).await;

        assert_eq!(outcome.unwrap_err(), SessionError::MissingRefreshToken);
        assert_eq!(f.transport.count(REFRESH_PATH), 0);
        assert_eq!(f.sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_rotated_token_is_reused() {
        let f = fixture(Some(Session::new("t2", "r2")));

        let token = f
            .coordinator
            .obtain_fresh_token(Some(&AccessToken::new("t1")))
            .await
            .unwrap();

        assert_eq!(token, AccessToken::new("t2"));
        assert_eq!(f.transport.count(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_dropped_driver_releases_waiters() {
        let f = fixture(Some(Session::new("t1", "r1")));
        f.transport.hold(REFRESH_PATH);

        let driver = tokio::time::timeout(
            Duration::from_millis(50),
            f.coordinator.obtain_fresh_token(None),
        );
        let waiter = async {
            while !f.coordinator.is_refreshing() {
                tokio::task::yield_now().await;
            }
            f.coordinator.obtain_fresh_token(None).await
        };
        let (driver, waiter) = tokio::join!(driver, waiter);

        assert!(driver.is_err());
        assert_eq!(waiter.unwrap_err(), SessionError::RefreshAbandoned);
        assert!(!f.coordinator.is_refreshing());
        assert_eq!(f.store.current().await, Some(Session::new("t1", "r1")));
        assert_eq!(f.sink.0.load(Ordering::SeqCst), 0);
    }

    struct StallingStore(MemoryCredentialStore);

    #[async_trait::async_trait]
    impl CredentialStore for StallingStore {
        async fn access_token(&self) -> Result<Option<AccessToken>, CredentialStoreError> {
            self.0.access_token().await
        }

        async fn refresh_token(&self) -> Result<Option<RefreshToken>, CredentialStoreError> {
            self.0.refresh_token().await
        }

        async fn set_tokens(&self, session: &Session) -> Result<(), CredentialStoreError> {
            self.0.set_tokens(session).await?;
            std::future::pending().await
        }

        async fn clear_tokens(&self) -> Result<(), CredentialStoreError> {
            self.0.clear_tokens().await
        }
    }

    #[tokio::test]
    async fn test_waiter_uses_pair_stored_before_driver_dropped() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(
            Method::Post,
            REFRESH_PATH,
            HttpResponse::ok_json(&json!({ "access_token": "t2", "refresh_token": "r2" })),
        );
        let store = Arc::new(StallingStore(MemoryCredentialStore::new(Some(Session::new(
            "t1", "r1",
        )))));
        let sink = Arc::new(CountingSink::default());
        let coordinator =
            SessionCoordinator::new(transport.clone(), store.clone(), sink.clone(), REFRESH_PATH);
        let rejected = AccessToken::new("t1");

        let driver = tokio::time::timeout(
            Duration::from_millis(50),
            coordinator.obtain_fresh_token(Some(&rejected)),
        );
        let waiter = async {
            while !coordinator.is_refreshing() {
                tokio::task::yield_now().await;
            }
            coordinator.obtain_fresh_token(Some(&rejected)).await
        };
        let (driver, waiter) = tokio::join!(driver, waiter);

        assert!(driver.is_err());
        assert_eq!(waiter.unwrap(), AccessToken::new("t2"));
        assert!(!coordinator.is_refreshing());
        assert_eq!(transport.count(REFRESH_PATH), 1);
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_next_cycle_starts_after_settle() {
        let f = fixture(Some(Session::new("t1", "r1")));
        f.transport.respond(
            Method::Post,
            REFRESH_PATH,
            HttpResponse::ok_json(&json!({ "access_token": "t2", "refresh_token": "r2" })),
        );

        f.coordinator.obtain_fresh_token(None).await.unwrap();
        f.coordinator.obtain_fresh_token(None).await.unwrap();

        assert_eq!(f.transport.count(REFRESH_PATH), 2);
        let sent = f.transport.requests_to(REFRESH_PATH);
        assert_eq!(sent[1].body, Some(json!({ "refresh_token": "r2" })));
    }
}
