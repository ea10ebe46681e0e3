//! Injector seam: how a fault is produced and undone for one record

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chaos_common::crd::{ChaosResource, Phase, Record};
use tokio_util::sync::CancellationToken;

use crate::InjectError;

/// Per-call information for an injector
#[derive(Clone, Debug)]
pub struct InjectContext {
    /// Fires when the controller shuts down
    pub cancel: CancellationToken,
    /// Deadline the pipeline enforces on this call
    pub timeout: Duration,
}

/// Applies and recovers one kind's fault on a single record.
///
/// Both operations must be idempotent: the pipeline repeats them after
/// failures, restarts and conflicts. `records` is the whole record list and
/// `index` the record to act on; `obj` is a working copy whose kind-specific
/// status the injector may update.
#[async_trait]
pub trait Injector<K: ChaosResource>: Send + Sync {
    /// Inject the fault; returns the phase reached
    async fn apply(
        &self,
        ctx: &InjectContext,
        index: usize,
        records: &[Record],
        obj: &mut K,
    ) -> Result<Phase, InjectError>;

    /// Undo the fault; returns the phase reached
    async fn recover(
        &self,
        ctx: &InjectContext,
        index: usize,
        records: &[Record],
        obj: &mut K,
    ) -> Result<Phase, InjectError>;
}

/// Routes calls to a per-action injector by the experiment's `action`
pub struct ActionMultiplexer<K: ChaosResource> {
    actions: HashMap<&'static str, Arc<dyn Injector<K>>>,
}

impl<K: ChaosResource> Default for ActionMultiplexer<K> {
    fn default() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }
}

impl<K: ChaosResource> ActionMultiplexer<K> {
    /// Empty multiplexer
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `action` to `injector`
    pub fn with_action(mut self, action: &'static str, injector: Arc<dyn Injector<K>>) -> Self {
        self.actions.insert(action, injector);
        self
    }

    /// Actions with an injector, sorted
    pub fn actions(&self) -> Vec<&'static str> {
        let mut actions: Vec<_> = self.actions.keys().copied().collect();
        actions.sort_unstable();
        actions
    }

    fn route(&self, obj: &K) -> Result<Arc<dyn Injector<K>>, InjectError> {
        let action = obj.action();
        self.actions
            .get(action)
            .cloned()
            .ok_or_else(|| InjectError::UnknownAction {
                action: action.to_string(),
            })
    }
}

#[async_trait]
impl<K: ChaosResource> Injector<K> for ActionMultiplexer<K> {
    async fn apply(
        &self,
        ctx: &InjectContext,
        index: usize,
        records: &[Record],
        obj: &mut K,
    ) -> Result<Phase, InjectError> {
        let injector = self.route(obj)?;
        injector.apply(ctx, index, records, obj).await
    }

    async fn recover(
        &self,
        ctx: &InjectContext,
        index: usize,
        records: &[Record],
        obj: &mut K,
    ) -> Result<Phase, InjectError> {
        let injector = self.route(obj)?;
        injector.recover(ctx, index, records, obj).await
    }
}
