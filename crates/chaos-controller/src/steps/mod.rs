//! Reconcile steps
//!
//! Each step re-reads the experiment through the store, decides, and writes
//! what it changed under conflict retry. Steps report a [`StepOutcome`]; the
//! pipeline merges them into one requeue decision.

pub mod condition;
pub mod desired_phase;
pub mod finalizer;
pub mod records;

use std::time::Duration;

use chaos_common::crd::ChaosResource;
use chaos_common::events::ChaosEvent;
use chaos_common::retry::retry_on_conflict;
use tracing::debug;

use crate::context::Context;
use crate::store::ExperimentKey;
use crate::{ReconcileError, StoreError};

/// Requeue request of one step
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Run again after the configured retry interval
    pub requeue: bool,
    /// Run again after this delay
    pub requeue_after: Option<Duration>,
}

impl StepOutcome {
    /// Nothing more to do until the experiment changes
    pub fn done() -> Self {
        Self::default()
    }

    /// Retry after the configured interval
    pub fn retry() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    /// Wake up after `delay`
    pub fn after(delay: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(delay),
        }
    }

    /// Combine two outcomes: either retry wins, the earliest non-zero delay wins
    pub fn merge(self, other: Self) -> Self {
        let non_zero = |d: Option<Duration>| d.filter(|d| !d.is_zero());
        let requeue_after = match (non_zero(self.requeue_after), non_zero(other.requeue_after)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            requeue: self.requeue || other.requeue,
            requeue_after,
        }
    }
}

/// Which part of the object a write replaces
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteTarget {
    /// Metadata and spec
    Object,
    /// Status subresource
    Status,
}

/// Re-read, mutate and write `key` until the write lands or conflicts are
/// exhausted.
///
/// `mutate` returns false when the fresh object already needs no change;
/// nothing is written and `Ok(None)` is returned.
pub(crate) async fn write_with_retry<K, F>(
    ctx: &Context<K>,
    key: &ExperimentKey,
    target: WriteTarget,
    operation: &str,
    mutate: F,
) -> Result<Option<K>, StoreError>
where
    K: ChaosResource,
    F: Fn(&mut K) -> bool + Send + Sync,
{
    let mutate = &mutate;
    retry_on_conflict(
        &ctx.config.conflict_retry,
        operation,
        StoreError::is_conflict,
        || async move {
            let mut obj = ctx.store.get(key).await?;
            if !mutate(&mut obj) {
                debug!(%key, operation, "nothing to write");
                return Ok(None);
            }
            let written = match target {
                WriteTarget::Object => ctx.store.update(&obj).await?,
                WriteTarget::Status => ctx.store.update_status(&obj).await?,
            };
            Ok(Some(written))
        },
    )
    .await
}

/// Publish `event` on `obj`
pub(crate) async fn emit<K: ChaosResource>(ctx: &Context<K>, obj: &K, event: ChaosEvent) {
    event.publish(ctx.events.as_ref(), &obj.object_ref(&())).await;
}

/// Fail fast once shutdown has been requested
pub(crate) fn ensure_live<K: ChaosResource>(ctx: &Context<K>) -> Result<(), ReconcileError> {
    if ctx.cancel.is_cancelled() {
        return Err(ReconcileError::Cancelled);
    }
    Ok(())
}

/// Handle a failed write: exhausted conflicts become a Failed event and a
/// retry, anything else stops the reconcile.
pub(crate) async fn write_failed<K: ChaosResource>(
    ctx: &Context<K>,
    obj: &K,
    activity: &str,
    err: StoreError,
) -> Result<StepOutcome, ReconcileError> {
    if err.is_conflict() {
        emit(ctx, obj, ChaosEvent::failed(activity, &err)).await;
        return Ok(StepOutcome::retry());
    }
    Err(err.into())
}
