//! Conditions rolled up from records and annotations

use chaos_common::crd::{ChaosCondition, ChaosResource, ConditionType};
use tracing::debug;

use super::{ensure_live, write_failed, write_with_retry, StepOutcome, WriteTarget};
use crate::context::Context;
use crate::store::ExperimentKey;
use crate::ReconcileError;

/// Conditions implied by the current records and annotations, in
/// [`ConditionType::ALL`] order
pub fn compute_conditions<K: ChaosResource>(obj: &K) -> Vec<ChaosCondition> {
    let records = obj.records().unwrap_or_default();
    ConditionType::ALL
        .iter()
        .map(|&type_| {
            let holds = match type_ {
                ConditionType::Selected => !records.is_empty(),
                ConditionType::AllInjected => {
                    !records.is_empty() && records.iter().all(|r| r.phase.is_injected())
                }
                ConditionType::AllRecovered => records.iter().all(|r| r.phase.is_not_injected()),
                ConditionType::Paused => obj.is_paused(),
            };
            ChaosCondition::new(type_, holds)
        })
        .collect()
}

fn conditions_of<K: ChaosResource>(obj: &K) -> &[ChaosCondition] {
    obj.chaos_status()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default()
}

/// Write the conditions when they differ from the persisted ones
pub async fn run<K: ChaosResource>(
    ctx: &Context<K>,
    key: &ExperimentKey,
) -> Result<StepOutcome, ReconcileError> {
    let obj = ctx.store.get(key).await?;
    if conditions_of(&obj) == compute_conditions(&obj).as_slice() {
        debug!(%key, "conditions unchanged");
        return Ok(StepOutcome::done());
    }

    ensure_live(ctx)?;
    let written = write_with_retry(ctx, key, WriteTarget::Status, "update conditions", |fresh: &mut K| {
        let wanted = compute_conditions(fresh);
        if conditions_of(fresh) == wanted.as_slice() {
            return false;
        }
        fresh.chaos_status_mut().conditions = wanted;
        true
    })
    .await;

    match written {
        Ok(_) => Ok(StepOutcome::done()),
        Err(e) => write_failed(ctx, &obj, "update conditions", e).await,
    }
}
