use crate::application_impl::{CacheSnapshot, QueryCache};
use crate::domain_model::*;
use crate::domain_port::QueryFetcher;
use crate::logger::*;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::mem;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Runs state-changing calls whose effect is shown in the cache before the server confirms.
///
/// Mutations touching the same key run one after another: the second one snapshots only
/// after the first has settled, so a rollback can never resurrect a value the other
/// mutation already replaced. A mutation that outlives its session (the cache was cleared
/// while the call ran) neither restores nor refetches.
pub struct OptimisticGuard {
    cache: Arc<QueryCache>,
    key_locks: DashMap<QueryKey, Arc<Mutex<()>>>,
    refetcher: Option<Arc<dyn QueryFetcher>>,
}

/// Lives from snapshot to settle. Dropping it unsettled (the mutation future was dropped)
/// restores the snapshot.
struct MutationScope<'a> {
    guard: &'a OptimisticGuard,
    keys: &'a [QueryKey],
    snapshot: Option<CacheSnapshot>,
    locks: Vec<OwnedMutexGuard<()>>,
}

impl MutationScope<'_> {
    fn commit(mut self) {
        self.snapshot = None;
        self.guard.cache.invalidate(self.keys);
    }

    fn rollback(mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.guard.cache.restore(snapshot);
        }
    }
}

impl Drop for MutationScope<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            warn!(keys = snapshot.len(), "mutation dropped before settling, rolling back");
            self.guard.cache.restore(snapshot);
        }
        self.guard.cache.resume_fetches(self.keys);
        drop(mem::take(&mut self.locks));
        self.guard.release_locks(self.keys);
    }
}

impl OptimisticGuard {
    pub fn new(cache: Arc<QueryCache>, refetcher: Option<Arc<dyn QueryFetcher>>) -> Self {
        Self {
            cache,
            key_locks: DashMap::new(),
            refetcher,
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    async fn lock_keys(&self, keys: &[QueryKey]) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(keys.len());
        // `keys` is sorted, which keeps overlapping mutations from deadlocking
        for key in keys {
            let lock = self.key_locks.entry(key.clone()).or_default().clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    // drops table entries nobody holds or waits on
    fn release_locks(&self, keys: &[QueryKey]) {
        for key in keys {
            self.key_locks
                .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.key_locks.len()
    }

    /// Applies `transform` to every cached value matching `selector`, then runs `call`.
    ///
    /// `transform` returns `None` to leave an entry as it is. On success the affected keys
    /// are marked stale; on failure they are restored exactly as captured and the error is
    /// returned. Either way a background refetch follows when a refetcher is configured and
    /// the cache was not cleared in the meantime.
    pub async fn mutate<T, E, Tf, F, Fut>(
        &self,
        selector: &KeySelector,
        transform: Tf,
        call: F,
    ) -> Result<T, E>
    where
        Tf: Fn(&QueryKey, &Value) -> Option<Value> + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: Display + Send,
    {
        let keys = self.cache.matching_keys(selector);
        let locks = self.lock_keys(&keys).await;

        let epoch = self.cache.epoch();
        self.cache.pause_fetches(&keys);
        let scope = MutationScope {
            guard: self,
            keys: &keys,
            snapshot: Some(self.cache.snapshot(&keys)),
            locks,
        };

        let mut applied = 0;
        for key in &keys {
            let next = self
                .cache
                .get(key)
                .and_then(|current| transform(key, &current));
            if let Some(next) = next {
                self.cache.publish_optimistic(key, next);
                applied += 1;
            }
        }
        debug!(keys = keys.len(), applied, "optimistic state published");

        let result = call().await;
        match &result {
            Ok(_) => scope.commit(),
            Err(e) => {
                warn!("mutation failed, rolling back: {e}");
                scope.rollback();
            }
        }

        if self.cache.epoch() != epoch {
            debug!("cache cleared during mutation, skipping refetch");
        } else if let Some(fetcher) = &self.refetcher {
            if !keys.is_empty() {
                self.cache.refetch_in_background(keys, fetcher.clone());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_port::ApiError;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn board_key() -> QueryKey {
        QueryKey::new(["tasks", "p1"])
    }

    fn board() -> Value {
        json!([
            { "id": "a", "title": "Write brief", "status": "TODO" },
            { "id": "b", "title": "Ship it", "status": "IN_PROGRESS", "assignee": "kim" },
        ])
    }

    fn set_status(id: &'static str, status: &'static str) -> impl Fn(&QueryKey, &Value) -> Option<Value> + Send {
        move |_, list| {
            let mut list = list.clone();
            let item = list.as_array_mut()?.iter_mut().find(|item| item["id"] == id)?;
            item["status"] = json!(status);
            Some(list)
        }
    }

    fn seeded() -> OptimisticGuard {
        let cache = Arc::new(QueryCache::new());
        cache.set(board_key(), board());
        cache.set(QueryKey::new(["notes", "p1"]), json!(["unrelated"]));
        OptimisticGuard::new(cache, None)
    }

    #[tokio::test]
    async fn test_failure_restores_snapshot_exactly() {
        let guard = seeded();
        let before = guard.cache().peek(&board_key());
        let notes_before = guard.cache().peek(&QueryKey::new(["notes", "p1"]));

        let result: Result<(), ApiError> = guard
            .mutate(
                &KeySelector::Prefix(QueryKey::new(["tasks"])),
                set_status("a", "DONE"),
                || async {
                    Err(ApiError::Status {
                        status: 409,
                        body: "conflict".into(),
                    })
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(guard.cache().peek(&board_key()), before);
        assert_eq!(guard.cache().peek(&QueryKey::new(["notes", "p1"])), notes_before);
    }

    #[tokio::test]
    async fn test_optimistic_value_visible_during_call() {
        let guard = seeded();
        let cache = guard.cache().clone();

        let result: Result<u32, ApiError> = guard
            .mutate(
                &KeySelector::Exact(board_key()),
                set_status("a", "DONE"),
                || async move {
                    let during = cache.get(&board_key()).unwrap();
                    assert_eq!(during[0]["status"], "DONE");
                    assert_eq!(during[1], board()[1]);
                    Ok(7)
                },
            )
            .await;

        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_success_marks_keys_stale() {
        let guard = seeded();

        let result: Result<(), ApiError> = guard
            .mutate(
                &KeySelector::Exact(board_key()),
                set_status("a", "DONE"),
                || async { Ok(()) },
            )
            .await;

        assert!(result.is_ok());
        let cached = guard.cache().peek(&board_key()).unwrap();
        assert!(cached.stale);
        assert_eq!(cached.value[0]["status"], "DONE");
        assert!(!guard.cache().is_stale(&QueryKey::new(["notes", "p1"])));
    }

    #[tokio::test]
    async fn test_same_key_mutations_are_serialized() {
        let guard = Arc::new(seeded());
        let (release_first, first_may_finish) = oneshot::channel::<()>();
        let (first_started, wait_first_started) = oneshot::channel::<()>();

        let first = tokio::spawn({
            let guard = guard.clone();
            async move {
                guard
                    .mutate(
                        &KeySelector::Exact(board_key()),
                        set_status("a", "DONE"),
                        || async move {
                            let _ = first_started.send(());
                            let _ = first_may_finish.await;
                            Err::<(), _>(ApiError::Decode("first fails".into()))
                        },
                    )
                    .await
            }
        });
        wait_first_started.await.unwrap();

        let second = tokio::spawn({
            let guard = guard.clone();
            async move {
                guard
                    .mutate(
                        &KeySelector::Exact(board_key()),
                        set_status("b", "DONE"),
                        || async { Ok::<(), ApiError>(()) },
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        // the second mutation is parked on the key, its optimistic write not applied yet
        assert_eq!(guard.cache().get(&board_key()).unwrap()[1]["status"], "IN_PROGRESS");

        release_first.send(()).unwrap();
        assert!(first.await.unwrap().is_err());
        assert!(second.await.unwrap().is_ok());

        let value = guard.cache().get(&board_key()).unwrap();
        assert_eq!(value[0]["status"], "TODO");
        assert_eq!(value[1]["status"], "DONE");
    }

    #[tokio::test]
    async fn test_dropped_mutation_rolls_back() {
        let guard = seeded();
        let before = guard.cache().peek(&board_key());

        let selector = KeySelector::Exact(board_key());
        let pending = guard.mutate(
            &selector,
            set_status("a", "DONE"),
            || std::future::pending::<Result<(), ApiError>>(),
        );
        let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;

        assert!(timed_out.is_err());
        assert_eq!(guard.cache().peek(&board_key()), before);
    }

    struct CountingFetcher(std::sync::atomic::AtomicUsize);

    #[async_trait::async_trait]
    impl QueryFetcher for CountingFetcher {
        async fn fetch(&self, _key: &QueryKey) -> Result<Value, ApiError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(json!([]))
        }
    }

    #[tokio::test]
    async fn test_mutation_outliving_session_leaves_cache_empty() {
        let cache = Arc::new(QueryCache::new());
        cache.set(board_key(), board());
        let fetcher = Arc::new(CountingFetcher(Default::default()));
        let guard = OptimisticGuard::new(cache.clone(), Some(fetcher.clone()));

        let result: Result<(), ApiError> = guard
            .mutate(
                &KeySelector::Exact(board_key()),
                set_status("a", "DONE"),
                move || async move {
                    // the session ends while the call is in flight
                    cache.clear();
                    Err(ApiError::Decode("signed out".into()))
                },
            )
            .await;
        tokio::task::yield_now().await;

        assert!(result.is_err());
        assert!(guard.cache().is_empty());
        assert_eq!(fetcher.0.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lock_entries_released_even_when_dropped() {
        let guard = seeded();

        let settled: Result<(), ApiError> = guard
            .mutate(
                &KeySelector::Exact(board_key()),
                set_status("a", "DONE"),
                || async { Ok(()) },
            )
            .await;
        assert!(settled.is_ok());
        assert_eq!(guard.lock_entries(), 0);

        let selector = KeySelector::Exact(board_key());
        let pending = guard.mutate(
            &selector,
            set_status("b", "DONE"),
            || std::future::pending::<Result<(), ApiError>>(),
        );
        let _ = tokio::time::timeout(Duration::from_millis(20), pending).await;

        assert_eq!(guard.lock_entries(), 0);
    }
}
