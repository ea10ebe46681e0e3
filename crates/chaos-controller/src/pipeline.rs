//! The reconcile pipeline for one experiment

use chaos_common::crd::ChaosResource;
use tracing::{debug, instrument};

use crate::context::Context;
use crate::steps::{condition, desired_phase, finalizer, records, StepOutcome};
use crate::store::ExperimentKey;
use crate::ReconcileError;

/// Run every step once, in order, and merge their requeue requests.
///
/// A step that fails a write it could retry reports a retry and the
/// following steps still run. Store, malformed-spec and cancellation errors
/// stop the pipeline. An experiment that disappears mid-way is done.
#[instrument(skip(ctx), fields(kind = %K::KIND, experiment = %key))]
pub async fn reconcile_experiment<K: ChaosResource>(
    ctx: &Context<K>,
    key: &ExperimentKey,
) -> Result<StepOutcome, ReconcileError> {
    match run_steps(ctx, key).await {
        Err(ReconcileError::Store(e)) if e.is_not_found() => {
            debug!("experiment is gone");
            Ok(StepOutcome::done())
        }
        other => other,
    }
}

async fn run_steps<K: ChaosResource>(
    ctx: &Context<K>,
    key: &ExperimentKey,
) -> Result<StepOutcome, ReconcileError> {
    let mut outcome = finalizer::init(ctx, key).await?;
    outcome = outcome.merge(desired_phase::run(ctx, key).await?);
    outcome = outcome.merge(records::run(ctx, key).await?);
    outcome = outcome.merge(condition::run(ctx, key).await?);
    outcome = outcome.merge(finalizer::clean(ctx, key).await?);
    debug!(requeue = outcome.requeue, requeue_after = ?outcome.requeue_after, "pipeline finished");
    Ok(outcome)
}
