//! Records finalizer: block deletion while targets may still be injected

use chaos_common::crd::ChaosResource;
use chaos_common::events::ChaosEvent;
use chaos_common::RECORDS_FINALIZER;
use kube::ResourceExt;
use tracing::info;

use super::{emit, ensure_live, write_failed, write_with_retry, StepOutcome, WriteTarget};
use crate::context::Context;
use crate::store::ExperimentKey;
use crate::ReconcileError;

fn needs_finalizer<K: ChaosResource>(obj: &K) -> bool {
    !obj.is_deleted() && !obj.finalizers().iter().any(|f| f == RECORDS_FINALIZER)
}

/// Whether the finalizers of a deleted experiment may be dropped
pub fn can_release<K: ChaosResource>(obj: &K) -> bool {
    if !obj.is_deleted() || obj.finalizers().is_empty() {
        return false;
    }
    if obj.is_cleanup_forced() {
        return true;
    }
    obj.records()
        .map_or(true, |records| records.iter().all(|r| r.phase.is_not_injected()))
}

/// Add the records finalizer to a live experiment that lacks it
pub async fn init<K: ChaosResource>(
    ctx: &Context<K>,
    key: &ExperimentKey,
) -> Result<StepOutcome, ReconcileError> {
    let obj = ctx.store.get(key).await?;
    if !needs_finalizer(&obj) {
        return Ok(StepOutcome::done());
    }

    ensure_live(ctx)?;
    let written = write_with_retry(ctx, key, WriteTarget::Object, "add finalizer", |fresh: &mut K| {
        if !needs_finalizer(fresh) {
            return false;
        }
        fresh.finalizers_mut().push(RECORDS_FINALIZER.to_string());
        true
    })
    .await;

    match written {
        Ok(Some(updated)) => {
            info!(%key, "records finalizer added");
            emit(ctx, &updated, ChaosEvent::FinalizerInited).await;
            emit(ctx, &updated, ChaosEvent::updated("finalizer")).await;
            Ok(StepOutcome::done())
        }
        Ok(None) => Ok(StepOutcome::done()),
        Err(e) => write_failed(ctx, &obj, "update finalizer", e).await,
    }
}

/// Drop every finalizer of a deleted experiment once its targets are
/// recovered, or unconditionally under the forced-cleanup annotation
pub async fn clean<K: ChaosResource>(
    ctx: &Context<K>,
    key: &ExperimentKey,
) -> Result<StepOutcome, ReconcileError> {
    let obj = ctx.store.get(key).await?;
    if !can_release(&obj) {
        return Ok(StepOutcome::done());
    }

    ensure_live(ctx)?;
    let written = write_with_retry(ctx, key, WriteTarget::Object, "remove finalizer", |fresh: &mut K| {
        if !can_release(fresh) {
            return false;
        }
        fresh.meta_mut().finalizers = None;
        true
    })
    .await;

    match written {
        Ok(Some(updated)) => {
            info!(%key, forced = obj.is_cleanup_forced(), "finalizers removed");
            emit(ctx, &updated, ChaosEvent::FinalizerRemoved).await;
            Ok(StepOutcome::done())
        }
        Ok(None) => Ok(StepOutcome::done()),
        // The object is gone as soon as the last finalizer goes.
        Err(e) if e.is_not_found() => Ok(StepOutcome::done()),
        Err(e) => write_failed(ctx, &obj, "update finalizer", e).await,
    }
}
