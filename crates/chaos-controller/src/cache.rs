//! Version cache over a resource store
//!
//! Watches and reads may lag behind our own writes. The cache remembers the
//! object each write returned and serves it instead of an older read, so a
//! step never works from a status it has already superseded.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use chaos_common::crd::ChaosResource;
use kube::{Resource, ResourceExt};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::store::{ExperimentKey, ResourceStore};
use crate::StoreError;

/// Default number of objects remembered
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Write-through LRU keyed by `apiVersion/kind/namespace/name`
pub struct CachedStore<K: ChaosResource> {
    inner: Arc<dyn ResourceStore<K>>,
    cache: Mutex<LruCache<String, K>>,
}

impl<K: ChaosResource> CachedStore<K> {
    /// Wrap `inner`, remembering at most `capacity` objects
    pub fn new(inner: Arc<dyn ResourceStore<K>>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn cache_key(key: &ExperimentKey) -> String {
        format!(
            "{}/{}/{}/{}",
            K::api_version(&()),
            K::kind(&()),
            key.namespace,
            key.name
        )
    }

    fn remember(&self, obj: &K) {
        let key = Self::cache_key(&ExperimentKey::of(obj));
        self.cache.lock().put(key, obj.clone());
    }
}

/// `metadata.resourceVersion` as a number, if it is one
fn version_of<K: Resource>(obj: &K) -> Option<u64> {
    obj.resource_version()?.parse().ok()
}

/// Whether `cached` should be served instead of `fetched`
fn cached_is_newer<K: Resource>(cached: &K, fetched: &K) -> bool {
    match (version_of(cached), version_of(fetched)) {
        (Some(c), Some(f)) => c >= f,
        _ => false,
    }
}

#[async_trait]
impl<K: ChaosResource> ResourceStore<K> for CachedStore<K> {
    async fn get(&self, key: &ExperimentKey) -> Result<K, StoreError> {
        let fetched = self.inner.get(key).await?;
        let cache_key = Self::cache_key(key);
        let mut cache = self.cache.lock();
        match cache.get(&cache_key) {
            Some(cached) if cached_is_newer(cached, &fetched) => {
                trace!(%key, version = ?cached.resource_version(), "serving cached copy");
                Ok(cached.clone())
            }
            _ => Ok(fetched),
        }
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let written = self.inner.update(obj).await?;
        self.remember(&written);
        Ok(written)
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let written = self.inner.update_status(obj).await?;
        self.remember(&written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockResourceStore;
    use chaos_common::crd::{DesiredPhase, PodChaos};

    fn pod_chaos(version: &str, phase: Option<DesiredPhase>) -> PodChaos {
        let mut obj: PodChaos = serde_json::from_value(serde_json::json!({
            "apiVersion": "chaos-mesh.org/v1alpha1",
            "kind": "PodChaos",
            "metadata": {"name": "demo", "namespace": "default", "resourceVersion": version},
            "spec": {"action": "pod-failure", "mode": "one", "selector": {}}
        }))
        .unwrap();
        obj.chaos_status_mut().experiment.desired_phase = phase;
        obj
    }

    fn key() -> ExperimentKey {
        ExperimentKey::new("default", "demo")
    }

    /// Story: the controller writes desiredPhase=Run and gets version 11
    /// back, but the next read still returns version 10. The cache serves the
    /// object it wrote so the following step sees its own write.
    #[tokio::test]
    async fn story_read_after_write_sees_own_write() {
        let mut inner = MockResourceStore::<PodChaos>::new();
        inner
            .expect_update_status()
            .returning(|_| Ok(pod_chaos("11", Some(DesiredPhase::Run))));
        inner.expect_get().returning(|_| Ok(pod_chaos("10", None)));
        let store = CachedStore::new(Arc::new(inner), DEFAULT_CACHE_CAPACITY);

        store
            .update_status(&pod_chaos("10", Some(DesiredPhase::Run)))
            .await
            .unwrap();
        let read = store.get(&key()).await.unwrap();
        assert_eq!(read.resource_version().as_deref(), Some("11"));
        assert_eq!(read.desired_phase(), Some(DesiredPhase::Run));
    }

    #[tokio::test]
    async fn newer_fetch_wins_over_cache() {
        let mut inner = MockResourceStore::<PodChaos>::new();
        inner
            .expect_update_status()
            .returning(|_| Ok(pod_chaos("11", Some(DesiredPhase::Run))));
        inner
            .expect_get()
            .returning(|_| Ok(pod_chaos("12", Some(DesiredPhase::Stop))));
        let store = CachedStore::new(Arc::new(inner), DEFAULT_CACHE_CAPACITY);

        store.update_status(&pod_chaos("10", None)).await.unwrap();
        let read = store.get(&key()).await.unwrap();
        assert_eq!(read.desired_phase(), Some(DesiredPhase::Stop));
    }

    #[tokio::test]
    async fn unparsable_versions_defer_to_the_fetch() {
        let mut inner = MockResourceStore::<PodChaos>::new();
        inner
            .expect_update()
            .returning(|_| Ok(pod_chaos("opaque-b", Some(DesiredPhase::Run))));
        inner.expect_get().returning(|_| Ok(pod_chaos("opaque-a", None)));
        let store = CachedStore::new(Arc::new(inner), DEFAULT_CACHE_CAPACITY);

        store.update(&pod_chaos("opaque-a", None)).await.unwrap();
        let read = store.get(&key()).await.unwrap();
        assert_eq!(read.resource_version().as_deref(), Some("opaque-a"));
    }

    #[tokio::test]
    async fn not_found_passes_through() {
        let mut inner = MockResourceStore::<PodChaos>::new();
        inner.expect_get().returning(|k| {
            Err(StoreError::NotFound {
                key: k.to_string(),
            })
        });
        let store = CachedStore::new(Arc::new(inner), 1);
        assert!(store.get(&key()).await.unwrap_err().is_not_found());
    }

    #[test]
    fn cache_keys_include_api_version_and_kind() {
        assert_eq!(
            CachedStore::<PodChaos>::cache_key(&key()),
            "chaos-mesh.org/v1alpha1/PodChaos/default/demo"
        );
    }
}
