//! In-memory collaborators for driving the pipeline without a cluster

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chaos_common::crd::{ChaosResource, Phase, PodChaos, Record, SelectorSpec};
use chaos_common::events::RecordingEventPublisher;
use chaos_common::retry::RetryConfig;
use chaos_selector::{SelectError, Selector};
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use parking_lot::Mutex;

use crate::context::{Clock, Context, PipelineConfig};
use crate::injector::{InjectContext, Injector};
use crate::store::{ExperimentKey, ResourceStore};
use crate::{InjectError, StoreError};

/// Versioned store that behaves like the API server for one kind.
///
/// Writes must carry the stored `resourceVersion`. `update` keeps the stored
/// status and `update_status` keeps the stored metadata and spec. Removing
/// the last finalizer of a deleted object removes the object.
pub struct MemoryStore<K: ChaosResource> {
    inner: Mutex<MemoryState<K>>,
}

struct MemoryState<K> {
    objects: HashMap<ExperimentKey, K>,
    previous: HashMap<ExperimentKey, K>,
    version: u64,
    conflicts: u32,
    lagging: bool,
    writes: u32,
}

impl<K: ChaosResource> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                objects: HashMap::new(),
                previous: HashMap::new(),
                version: 0,
                conflicts: 0,
                lagging: false,
                writes: 0,
            }),
        }
    }
}

impl<K: ChaosResource> MemoryStore<K> {
    /// Store `obj` as if a user had created it
    pub fn insert(&self, mut obj: K) -> ExperimentKey {
        let key = ExperimentKey::of(&obj);
        let mut state = self.inner.lock();
        state.version += 1;
        obj.meta_mut().resource_version = Some(state.version.to_string());
        state.objects.insert(key.clone(), obj);
        key
    }

    /// Apply an external change, bumping the version
    pub fn modify(&self, key: &ExperimentKey, change: impl FnOnce(&mut K)) {
        let mut state = self.inner.lock();
        state.version += 1;
        let version = state.version;
        if let Some(obj) = state.objects.get_mut(key) {
            change(obj);
            obj.meta_mut().resource_version = Some(version.to_string());
        }
    }

    /// Request deletion the way the API server does: finalized objects only
    /// get a deletion timestamp
    pub fn delete(&self, key: &ExperimentKey, at: DateTime<Utc>) {
        let finalized = self
            .get_now(key)
            .is_some_and(|obj| !obj.finalizers().is_empty());
        if finalized {
            self.modify(key, |obj| obj.meta_mut().deletion_timestamp = Some(Time(at)));
        } else {
            self.inner.lock().objects.remove(key);
        }
    }

    /// Current stored object, bypassing lag
    pub fn get_now(&self, key: &ExperimentKey) -> Option<K> {
        self.inner.lock().objects.get(key).cloned()
    }

    /// Fail the next `n` writes with a conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.inner.lock().conflicts = n;
    }

    /// Serve the version before the latest write on reads
    pub fn set_lagging(&self, lagging: bool) {
        self.inner.lock().lagging = lagging;
    }

    /// Number of successful writes
    pub fn writes(&self) -> u32 {
        self.inner.lock().writes
    }

    fn write(&self, obj: &K, merge: impl FnOnce(&K, &mut K)) -> Result<K, StoreError> {
        let key = ExperimentKey::of(obj);
        let mut state = self.inner.lock();
        if state.conflicts > 0 {
            state.conflicts -= 1;
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }
        let Some(stored) = state.objects.get(&key).cloned() else {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        };
        if stored.resource_version() != obj.resource_version() {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        let mut next = obj.clone();
        merge(&stored, &mut next);
        state.version += 1;
        state.writes += 1;
        next.meta_mut().resource_version = Some(state.version.to_string());
        state.previous.insert(key.clone(), stored);
        if next.is_deleted() && next.finalizers().is_empty() {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, next.clone());
        }
        Ok(next)
    }
}

#[async_trait]
impl<K: ChaosResource> ResourceStore<K> for MemoryStore<K> {
    async fn get(&self, key: &ExperimentKey) -> Result<K, StoreError> {
        let state = self.inner.lock();
        let current = state.objects.get(key);
        let served = match (state.lagging, state.previous.get(key)) {
            (true, Some(stale)) if current.is_some() => Some(stale),
            _ => current,
        };
        served.cloned().ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        self.write(obj, |stored, next| {
            *next.status_block_mut() = stored.status_block().cloned();
        })
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        self.write(obj, |stored, next| {
            let status = next.status_block().cloned();
            *next = stored.clone();
            *next.status_block_mut() = status;
        })
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock stopped at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Injector that succeeds unless told to fail a record a number of times.
///
/// Phases queued with [`FakeInjector::apply_returns`] and
/// [`FakeInjector::recover_returns`] replace the settled phase for the next
/// calls on that record.
#[derive(Default)]
pub struct FakeInjector {
    apply_failures: Mutex<HashMap<String, u32>>,
    recover_failures: Mutex<HashMap<String, u32>>,
    apply_phases: Mutex<HashMap<String, VecDeque<Phase>>>,
    recover_phases: Mutex<HashMap<String, VecDeque<Phase>>>,
    hanging: Mutex<HashSet<String>>,
    cancelling: Mutex<HashSet<String>>,
    applied: Mutex<Vec<String>>,
    recovered: Mutex<Vec<String>>,
}

impl FakeInjector {
    /// Fail the next `times` applies of record `id`
    pub fn fail_apply(self, id: &str, times: u32) -> Self {
        self.apply_failures.lock().insert(id.to_string(), times);
        self
    }

    /// Fail the next `times` recovers of record `id`
    pub fn fail_recover(self, id: &str, times: u32) -> Self {
        self.recover_failures.lock().insert(id.to_string(), times);
        self
    }

    /// Answer the next apply of record `id` with `phase`
    pub fn apply_returns(self, id: &str, phase: &str) -> Self {
        Self::queue(&self.apply_phases, id, phase);
        self
    }

    /// Answer the next recover of record `id` with `phase`
    pub fn recover_returns(self, id: &str, phase: &str) -> Self {
        Self::queue(&self.recover_phases, id, phase);
        self
    }

    /// Never return from apply on record `id`
    pub fn hang_apply(self, id: &str) -> Self {
        self.hanging.lock().insert(id.to_string());
        self
    }

    /// Cancel the shutdown token while applying record `id`, then never return
    pub fn cancel_on_apply(self, id: &str) -> Self {
        self.cancelling.lock().insert(id.to_string());
        self
    }

    /// Record ids successfully applied, in call order
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    /// Record ids successfully recovered, in call order
    pub fn recovered(&self) -> Vec<String> {
        self.recovered.lock().clone()
    }

    fn queue(phases: &Mutex<HashMap<String, VecDeque<Phase>>>, id: &str, phase: &str) {
        phases
            .lock()
            .entry(id.to_string())
            .or_default()
            .push_back(Phase::from(phase));
    }

    fn next_phase(phases: &Mutex<HashMap<String, VecDeque<Phase>>>, id: &str) -> Option<Phase> {
        phases.lock().get_mut(id).and_then(VecDeque::pop_front)
    }

    fn should_fail(failures: &Mutex<HashMap<String, u32>>, id: &str) -> bool {
        match failures.lock().get_mut(id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl<K: ChaosResource> Injector<K> for FakeInjector {
    async fn apply(
        &self,
        ctx: &InjectContext,
        index: usize,
        records: &[Record],
        _obj: &mut K,
    ) -> Result<Phase, InjectError> {
        let id = &records[index].id;
        if self.cancelling.lock().contains(id) {
            ctx.cancel.cancel();
            std::future::pending::<()>().await;
        }
        if self.hanging.lock().contains(id) {
            std::future::pending::<()>().await;
        }
        if Self::should_fail(&self.apply_failures, id) {
            return Err(InjectError::failed(format!("injection refused on {id}")));
        }
        self.applied.lock().push(id.clone());
        Ok(Self::next_phase(&self.apply_phases, id).unwrap_or_else(Phase::injected))
    }

    async fn recover(
        &self,
        _ctx: &InjectContext,
        index: usize,
        records: &[Record],
        _obj: &mut K,
    ) -> Result<Phase, InjectError> {
        let id = &records[index].id;
        if Self::should_fail(&self.recover_failures, id) {
            return Err(InjectError::failed(format!("recovery refused on {id}")));
        }
        self.recovered.lock().push(id.clone());
        Ok(Self::next_phase(&self.recover_phases, id).unwrap_or_else(Phase::not_injected))
    }
}

/// Selector returning a fixed answer
pub struct StaticSelector {
    ids: Mutex<Option<Vec<String>>>,
    hang: bool,
}

impl StaticSelector {
    /// Always select `ids`
    pub fn new(ids: &[&str]) -> Self {
        Self {
            ids: Mutex::new(Some(ids.iter().map(|id| id.to_string()).collect())),
            hang: false,
        }
    }

    /// Fail with an inventory error
    pub fn failing() -> Self {
        Self {
            ids: Mutex::new(None),
            hang: false,
        }
    }

    /// Never answer
    pub fn hanging() -> Self {
        Self {
            ids: Mutex::new(None),
            hang: true,
        }
    }
}

#[async_trait]
impl Selector for StaticSelector {
    async fn select(&self, _spec: &SelectorSpec, _namespace: &str) -> Result<Vec<String>, SelectError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.ids
            .lock()
            .clone()
            .ok_or_else(|| SelectError::inventory("pods unavailable"))
    }
}

/// Start time shared by the scenario tests
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// A `pod-failure` experiment named `name` in `default`, created at `created`
pub fn pod_failure(name: &str, duration: Option<&str>, created: DateTime<Utc>) -> PodChaos {
    let mut obj: PodChaos = serde_json::from_value(serde_json::json!({
        "apiVersion": "chaos-mesh.org/v1alpha1",
        "kind": "PodChaos",
        "metadata": {"name": name, "namespace": "default"},
        "spec": {"action": "pod-failure", "mode": "all", "selector": {"namespaces": ["default"]}}
    }))
    .unwrap_or_else(|e| panic!("fixture: {e}"));
    obj.spec.duration = duration.map(str::to_string);
    obj.metadata.creation_timestamp = Some(Time(created));
    obj
}

/// A pipeline over in-memory collaborators
pub struct Harness {
    /// Backing store
    pub store: Arc<MemoryStore<PodChaos>>,
    /// Scripted injector
    pub injector: Arc<FakeInjector>,
    /// Captured Events
    pub events: Arc<RecordingEventPublisher>,
    /// Manual clock starting at [`epoch`]
    pub clock: Arc<ManualClock>,
    /// Context wired to the above
    pub ctx: Context<PodChaos>,
}

impl Harness {
    /// Pipeline reading straight from the store
    pub fn new(selector: StaticSelector, injector: FakeInjector) -> Self {
        let store = Arc::new(MemoryStore::default());
        Self::with_store(store.clone(), store, selector, injector)
    }

    /// Pipeline reading through `reader`, which must wrap `store`
    pub fn with_store(
        store: Arc<MemoryStore<PodChaos>>,
        reader: Arc<dyn ResourceStore<PodChaos>>,
        selector: StaticSelector,
        injector: FakeInjector,
    ) -> Self {
        let injector = Arc::new(injector);
        let events = Arc::new(RecordingEventPublisher::default());
        let clock = Arc::new(ManualClock::new(epoch()));
        let config = PipelineConfig {
            conflict_retry: RetryConfig::conflict().with_initial_delay(Duration::from_millis(1)),
            ..PipelineConfig::default()
        };
        let ctx = Context::builder(reader, Arc::new(selector), injector.clone())
            .events(events.clone())
            .clock(clock.clone())
            .config(config)
            .build();
        Self {
            store,
            injector,
            events,
            clock,
            ctx,
        }
    }

    /// Phases of the stored records, in record order
    pub fn phases(&self, key: &ExperimentKey) -> Vec<String> {
        self.store
            .get_now(key)
            .and_then(|obj| obj.records().map(|r| r.iter().map(|r| r.phase.to_string()).collect()))
            .unwrap_or_default()
    }
}
