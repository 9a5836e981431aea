use crate::application_port::ApiError;
use crate::domain_model::*;
use crate::domain_port::QueryFetcher;
use crate::logger::*;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    /// Set once the server may disagree; the next read refetches.
    pub stale: bool,
}

struct Slot {
    cached: CachedValue,
    // bumped on every write; a fetch only lands if it is unchanged since the fetch began
    generation: u64,
    // number of mutations holding this key; fetch results are dropped while non-zero
    paused: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    entries: Vec<(QueryKey, CachedValue)>,
    epoch: u64,
}

impl CacheSnapshot {
    pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct QueryCache {
    slots: DashMap<QueryKey, Slot>,
    // bumped by `clear`; values captured under an older epoch never come back
    epoch: AtomicU64,
    cancel: CancellationToken,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            epoch: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, key: &QueryKey) -> Option<Value> {
        self.slots.get(key).map(|slot| slot.cached.value.clone())
    }

    pub fn peek(&self, key: &QueryKey) -> Option<CachedValue> {
        self.slots.get(key).map(|slot| slot.cached.clone())
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Missing keys count as stale.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.slots.get(key).is_none_or(|slot| slot.cached.stale)
    }

    pub fn set(&self, key: QueryKey, value: Value) {
        let cached = CachedValue {
            value,
            stale: false,
        };
        match self.slots.get_mut(&key) {
            Some(mut slot) => {
                slot.cached = cached;
                slot.generation += 1;
            }
            None => {
                self.slots.insert(
                    key,
                    Slot {
                        cached,
                        generation: 0,
                        paused: 0,
                    },
                );
            }
        }
    }

    pub fn remove(&self, key: &QueryKey) -> Option<Value> {
        self.slots.remove(key).map(|(_, slot)| slot.cached.value)
    }

    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.slots.clear();
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Sorted, so callers locking several keys always lock in the same order.
    pub fn matching_keys(&self, selector: &KeySelector) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self
            .slots
            .iter()
            .filter(|entry| selector.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn invalidate(&self, keys: &[QueryKey]) {
        for key in keys {
            if let Some(mut slot) = self.slots.get_mut(key) {
                slot.cached.stale = true;
            }
        }
    }

    pub fn invalidate_matching(&self, selector: &KeySelector) {
        self.invalidate(&self.matching_keys(selector));
    }

    /// Drops the results of fetches already in flight for `keys` and of any that start
    /// before `resume_fetches`.
    pub fn pause_fetches(&self, keys: &[QueryKey]) {
        for key in keys {
            if let Some(mut slot) = self.slots.get_mut(key) {
                slot.generation += 1;
                slot.paused += 1;
            }
        }
    }

    pub fn resume_fetches(&self, keys: &[QueryKey]) {
        for key in keys {
            if let Some(mut slot) = self.slots.get_mut(key) {
                slot.paused = slot.paused.saturating_sub(1);
            }
        }
    }

    pub fn snapshot(&self, keys: &[QueryKey]) -> CacheSnapshot {
        let entries = keys
            .iter()
            .filter_map(|key| {
                self.slots
                    .get(key)
                    .map(|slot| (key.clone(), slot.cached.clone()))
            })
            .collect();
        CacheSnapshot {
            entries,
            epoch: self.epoch(),
        }
    }

    /// Puts every captured value back exactly. Keys outside the snapshot, keys removed
    /// since, and snapshots taken before a `clear` are left alone. Returns whether anything
    /// was restored.
    pub fn restore(&self, snapshot: CacheSnapshot) -> bool {
        if snapshot.epoch != self.epoch() {
            debug!("cache cleared since snapshot, nothing to restore");
            return false;
        }
        let mut restored = false;
        for (key, cached) in snapshot.entries {
            if let Some(mut slot) = self.slots.get_mut(&key) {
                slot.cached = cached;
                slot.generation += 1;
                restored = true;
            }
        }
        restored
    }

    /// Writes a tentative value, keeping the key's stale flag as it was.
    pub fn publish_optimistic(&self, key: &QueryKey, value: Value) {
        if let Some(mut slot) = self.slots.get_mut(key) {
            slot.cached.value = value;
            slot.generation += 1;
        }
    }

    /// Loads `key` from the server and stores the result unless a write or a mutation
    /// overtook the fetch. The fetched value is returned either way.
    pub async fn fetch(&self, key: &QueryKey, fetcher: &dyn QueryFetcher) -> Result<Value, ApiError> {
        let epoch = self.epoch();
        let started = self.slots.get(key).map(|slot| slot.generation);
        let value = fetcher.fetch(key).await?;

        if epoch != self.epoch() {
            debug!(%key, "cache cleared during fetch, result dropped");
            return Ok(value);
        }

        match (self.slots.get_mut(key), started) {
            (Some(mut slot), Some(generation)) => {
                if slot.generation == generation && slot.paused == 0 {
                    slot.cached = CachedValue {
                        value: value.clone(),
                        stale: false,
                    };
                    slot.generation += 1;
                } else {
                    debug!(%key, "fetch overtaken, result dropped");
                }
            }
            (Some(_), None) => debug!(%key, "key written during fetch, result dropped"),
            (None, _) => self.set(key.clone(), value.clone()),
        }
        Ok(value)
    }

    /// Cached value when fresh, or while a mutation holds the key; otherwise a fetch.
    pub async fn get_or_fetch(
        &self,
        key: &QueryKey,
        fetcher: &dyn QueryFetcher,
    ) -> Result<Value, ApiError> {
        if let Some(slot) = self.slots.get(key) {
            if !slot.cached.stale || slot.paused > 0 {
                return Ok(slot.cached.value.clone());
            }
        }
        self.fetch(key, fetcher).await
    }

    /// Refetches `keys` on a background task. Failures are logged; the stale flag stays so
    /// the next read tries again.
    pub fn refetch_in_background(
        self: &Arc<Self>,
        keys: Vec<QueryKey>,
        fetcher: Arc<dyn QueryFetcher>,
    ) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let refetch = join_all(keys.iter().map(|key| cache.fetch(key, fetcher.as_ref())));
            tokio::select! {
                biased;
                _ = cache.cancel.cancelled() => {
                    debug!("background refetch cancelled");
                }
                results = refetch => {
                    for (key, result) in keys.iter().zip(results) {
                        if let Err(e) = result {
                            warn!(%key, "background refetch failed: {e}");
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct StaticFetcher {
        value: Value,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl QueryFetcher for StaticFetcher {
        async fn fetch(&self, _key: &QueryKey) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.clone())
        }
    }

    struct GatedFetcher {
        value: Value,
        gate: Notify,
    }

    #[async_trait::async_trait]
    impl QueryFetcher for GatedFetcher {
        async fn fetch(&self, _key: &QueryKey) -> Result<Value, ApiError> {
            self.gate.notified().await;
            Ok(self.value.clone())
        }
    }

    fn key(project: &str) -> QueryKey {
        QueryKey::new(["tasks", project])
    }

    #[tokio::test]
    async fn test_get_or_fetch_uses_fresh_value() {
        let cache = QueryCache::new();
        let fetcher = StaticFetcher {
            value: json!(["server"]),
            calls: AtomicUsize::new(0),
        };

        assert_eq!(cache.get_or_fetch(&key("p1"), &fetcher).await.unwrap(), json!(["server"]));
        cache.get_or_fetch(&key("p1"), &fetcher).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        cache.invalidate(&[key("p1")]);
        cache.get_or_fetch(&key("p1"), &fetcher).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(!cache.is_stale(&key("p1")));
    }

    #[tokio::test]
    async fn test_paused_key_drops_in_flight_fetch() {
        let cache = QueryCache::new();
        cache.set(key("p1"), json!(["old"]));
        let fetcher = GatedFetcher {
            value: json!(["late"]),
            gate: Notify::new(),
        };

        let fetch_key = key("p1");
        let fetch = cache.fetch(&fetch_key, &fetcher);
        let mutate = async {
            tokio::task::yield_now().await;
            cache.pause_fetches(&[key("p1")]);
            cache.publish_optimistic(&key("p1"), json!(["optimistic"]));
            fetcher.gate.notify_one();
        };
        let (fetched, _) = tokio::join!(fetch, mutate);

        assert_eq!(fetched.unwrap(), json!(["late"]));
        assert_eq!(cache.get(&key("p1")), Some(json!(["optimistic"])));
    }

    #[test]
    fn test_restore_only_touches_snapshot_keys() {
        let cache = QueryCache::new();
        cache.set(key("p1"), json!([1]));
        cache.set(key("p2"), json!([2]));

        let snapshot = cache.snapshot(&[key("p1")]);
        cache.publish_optimistic(&key("p1"), json!([10]));
        cache.set(key("p2"), json!([20]));
        cache.restore(snapshot);

        assert_eq!(cache.get(&key("p1")), Some(json!([1])));
        assert_eq!(cache.get(&key("p2")), Some(json!([20])));
    }

    #[test]
    fn test_restore_after_clear_keeps_cache_empty() {
        let cache = QueryCache::new();
        cache.set(key("p1"), json!(["previous session"]));

        let snapshot = cache.snapshot(&[key("p1")]);
        cache.clear();

        assert!(!cache.restore(snapshot));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_restore_skips_removed_keys() {
        let cache = QueryCache::new();
        cache.set(key("p1"), json!([1]));
        cache.set(key("p2"), json!([2]));

        let snapshot = cache.snapshot(&[key("p1"), key("p2")]);
        cache.remove(&key("p2"));

        assert!(cache.restore(snapshot));
        assert_eq!(cache.get(&key("p2")), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_spanning_clear_is_dropped() {
        let cache = QueryCache::new();
        let fetcher = GatedFetcher {
            value: json!(["previous session"]),
            gate: Notify::new(),
        };

        let fetch_key = key("p1");
        let fetch = cache.fetch(&fetch_key, &fetcher);
        let sign_out = async {
            tokio::task::yield_now().await;
            cache.clear();
            fetcher.gate.notify_one();
        };
        let (fetched, _) = tokio::join!(fetch, sign_out);

        assert!(fetched.is_ok());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_matching_keys_sorted() {
        let cache = QueryCache::new();
        cache.set(key("b"), json!([]));
        cache.set(key("a"), json!([]));
        cache.set(QueryKey::new(["notes", "a"]), json!([]));

        let keys = cache.matching_keys(&KeySelector::Prefix(QueryKey::new(["tasks"])));

        assert_eq!(keys, vec![key("a"), key("b")]);
    }

    #[tokio::test]
    async fn test_background_refetch_lands() {
        let cache = Arc::new(QueryCache::new());
        cache.set(key("p1"), json!(["old"]));
        cache.invalidate(&[key("p1")]);
        let fetcher = Arc::new(StaticFetcher {
            value: json!(["new"]),
            calls: AtomicUsize::new(0),
        });

        cache
            .refetch_in_background(vec![key("p1")], fetcher)
            .await
            .unwrap();

        assert_eq!(cache.peek(&key("p1")), Some(CachedValue { value: json!(["new"]), stale: false }));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_background_refetch() {
        let cache = Arc::new(QueryCache::new());
        cache.set(key("p1"), json!(["old"]));
        let fetcher = Arc::new(GatedFetcher {
            value: json!(["never"]),
            gate: Notify::new(),
        });

        let handle = cache.refetch_in_background(vec![key("p1")], fetcher);
        cache.shutdown();
        handle.await.unwrap();

        assert_eq!(cache.get(&key("p1")), Some(json!(["old"])));
    }
}
