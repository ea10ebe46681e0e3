//! Records: select targets once, then drive each record towards the desired phase

use chaos_common::crd::{
    ChaosResource, DesiredPhase, Phase, Record, RecordEvent, RecordEventOperation,
    RecordEventType,
};
use chaos_common::events::ChaosEvent;
use chaos_selector::SelectError;
use tracing::{debug, info, instrument, warn};

use super::{emit, ensure_live, write_failed, write_with_retry, StepOutcome, WriteTarget};
use crate::context::Context;
use crate::injector::InjectContext;
use crate::store::ExperimentKey;
use crate::{InjectError, ReconcileError};

/// What to do with one record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Inject the fault
    Apply,
    /// Undo the fault
    Recover,
}

impl Operation {
    fn activity(self) -> &'static str {
        match self {
            Self::Apply => "apply chaos",
            Self::Recover => "recover chaos",
        }
    }

    fn record_operation(self) -> RecordEventOperation {
        match self {
            Self::Apply => RecordEventOperation::Apply,
            Self::Recover => RecordEventOperation::Recover,
        }
    }
}

/// Operation needed to move a record in `phase` towards `desired`.
///
/// Settled phases only move when the desired phase points the other way.
/// A transient phase is finished from the side it started on: an
/// unfinished apply is applied again, an unfinished recover is recovered
/// again, whatever the desired phase.
pub fn transition(phase: &Phase, desired: DesiredPhase) -> Option<Operation> {
    match desired {
        DesiredPhase::Run if phase.is_injected() => None,
        DesiredPhase::Stop if phase.is_not_injected() => None,
        _ if phase.is_not_injected_side() => Some(Operation::Apply),
        _ => Some(Operation::Recover),
    }
}

/// Select targets and create records for an experiment that has none.
///
/// Each selector query is bounded by the per-call timeout and the shutdown
/// token.
async fn select_records<K: ChaosResource>(
    ctx: &Context<K>,
    obj: &K,
    namespace: &str,
) -> Result<Option<Vec<Record>>, ReconcileError> {
    let mut records = Vec::new();
    let deadline = ctx.config.injector_timeout;
    for (key, spec) in obj.selector_specs() {
        let selected = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ReconcileError::Cancelled),
            result = tokio::time::timeout(deadline, ctx.selector.select(&spec, namespace)) => {
                result.unwrap_or_else(|_| {
                    Err(SelectError::inventory(format!("selection timed out after {deadline:?}")))
                })
            }
        };
        let selected = match selected {
            Ok(ids) if ids.is_empty() => Err(SelectError::NoTargets),
            other => other,
        };
        match selected {
            Ok(ids) => {
                debug!(selector = %key, count = ids.len(), "targets selected");
                records.extend(ids.into_iter().map(|id| Record::new(id, key.clone())));
            }
            Err(SelectError::InvalidSpec { message }) => {
                let err = ReconcileError::malformed(message);
                emit(ctx, obj, ChaosEvent::failed("select targets", &err)).await;
                return Err(err);
            }
            Err(e) => {
                warn!(selector = %key, error = %e, "failed to select targets");
                emit(ctx, obj, ChaosEvent::failed("select targets", &e)).await;
                return Ok(None);
            }
        }
    }
    if records.is_empty() {
        emit(ctx, obj, ChaosEvent::failed("select targets", SelectError::NoTargets)).await;
        return Ok(None);
    }
    Ok(Some(records))
}

/// Call the injector for one record, bounded by the per-call timeout and
/// the shutdown token
async fn invoke<K: ChaosResource>(
    ctx: &Context<K>,
    op: Operation,
    index: usize,
    records: &[Record],
    working: &mut K,
) -> Result<Phase, InjectError> {
    let inject_ctx = InjectContext {
        cancel: ctx.cancel.clone(),
        timeout: ctx.config.injector_timeout,
    };
    let call = async {
        match op {
            Operation::Apply => {
                ctx.injector
                    .apply(&inject_ctx, index, records, working)
                    .await
            }
            Operation::Recover => {
                ctx.injector
                    .recover(&inject_ctx, index, records, working)
                    .await
            }
        }
    };
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(InjectError::Cancelled),
        result = tokio::time::timeout(ctx.config.injector_timeout, call) => {
            result.unwrap_or(Err(InjectError::TimedOut(ctx.config.injector_timeout)))
        }
    }
}

/// Drive every record towards the desired phase and write the records back
#[instrument(skip(ctx), fields(kind = %K::KIND))]
pub async fn run<K: ChaosResource>(
    ctx: &Context<K>,
    key: &ExperimentKey,
) -> Result<StepOutcome, ReconcileError> {
    let obj = ctx.store.get(key).await?;
    let Some(desired) = obj.desired_phase() else {
        debug!("desired phase not persisted yet");
        return Ok(StepOutcome::retry());
    };

    let mut changed = false;
    let mut records = match obj.records() {
        Some(existing) => existing.to_vec(),
        None if obj.is_deleted() => {
            debug!("deleted before any target was selected");
            return Ok(StepOutcome::done());
        }
        None => {
            ensure_live(ctx)?;
            match select_records(ctx, &obj, &key.namespace).await? {
                Some(selected) => {
                    changed = true;
                    selected
                }
                None => return Ok(StepOutcome::retry()),
            }
        }
    };

    let mut working = obj.clone();
    let mut need_retry = false;
    for index in 0..records.len() {
        let Some(op) = transition(&records[index].phase, desired) else {
            continue;
        };
        ensure_live(ctx)?;

        let result = invoke(ctx, op, index, &records, &mut working).await;
        let now = ctx.clock.now();
        let record = &mut records[index];
        match result {
            Ok(phase) => {
                let succeeded = match op {
                    Operation::Apply => phase.is_injected(),
                    Operation::Recover => phase.is_not_injected(),
                };
                changed |= record.phase != phase || succeeded;
                record.phase = phase;
                if !succeeded {
                    debug!(id = %record.id, phase = %record.phase, "{} left a transient phase", op.activity());
                    continue;
                }

                let event = match op {
                    Operation::Apply => {
                        record.injected_count += 1;
                        ChaosEvent::Applied {
                            id: record.id.clone(),
                        }
                    }
                    Operation::Recover => {
                        record.recovered_count += 1;
                        ChaosEvent::Recovered {
                            id: record.id.clone(),
                        }
                    }
                };
                record.push_event(RecordEvent::new(
                    RecordEventType::Succeeded,
                    op.record_operation(),
                    "",
                    now,
                ));
                info!(id = %record.id, phase = %record.phase, "record transitioned");
                emit(ctx, &obj, event).await;
            }
            Err(InjectError::Cancelled) => return Err(ReconcileError::Cancelled),
            Err(InjectError::UnknownAction { action }) => {
                let err = ReconcileError::malformed(format!("unknown action {action:?}"));
                emit(ctx, &obj, ChaosEvent::failed(op.activity(), &err)).await;
                return Err(err);
            }
            Err(err) => {
                warn!(id = %record.id, error = %err, "{} failed", op.activity());
                if let Some(phase) = err.phase() {
                    record.phase = phase.clone();
                }
                record.push_event(RecordEvent::new(
                    RecordEventType::Failed,
                    op.record_operation(),
                    err.to_string(),
                    now,
                ));
                changed = true;
                need_retry = true;
                emit(ctx, &obj, ChaosEvent::failed(op.activity(), &err)).await;
            }
        }
    }

    let outcome = if need_retry {
        StepOutcome::retry()
    } else {
        StepOutcome::done()
    };
    if !changed {
        return Ok(outcome);
    }

    for record in &mut records {
        record.truncate_events();
    }
    ensure_live(ctx)?;
    let written = write_with_retry(ctx, key, WriteTarget::Status, "update records", |fresh: &mut K| {
        fresh.chaos_status_mut().experiment.records = Some(records.clone());
        fresh.adopt_custom_status(&working);
        true
    })
    .await;

    match written {
        Ok(Some(updated)) => {
            emit(ctx, &updated, ChaosEvent::updated("records")).await;
            Ok(outcome)
        }
        Ok(None) => Ok(outcome),
        Err(e) => Ok(write_failed(ctx, &obj, "update records", e)
            .await?
            .merge(outcome)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        let cases = [
            ("Not Injected", DesiredPhase::Run, Some(Operation::Apply)),
            ("Not Injected", DesiredPhase::Stop, None),
            ("Not Injected/wait", DesiredPhase::Run, Some(Operation::Apply)),
            ("Not Injected/wait", DesiredPhase::Stop, Some(Operation::Apply)),
            ("Injected", DesiredPhase::Run, None),
            ("Injected", DesiredPhase::Stop, Some(Operation::Recover)),
            ("Injected/partial", DesiredPhase::Run, Some(Operation::Recover)),
            ("Injected/partial", DesiredPhase::Stop, Some(Operation::Recover)),
        ];
        for (phase, desired, expected) in cases {
            assert_eq!(
                transition(&Phase::from(phase), desired),
                expected,
                "{phase} -> {desired}"
            );
        }
    }

    #[test]
    fn unknown_phases_count_as_injected_side() {
        assert_eq!(
            transition(&Phase::from("Mystery"), DesiredPhase::Stop),
            Some(Operation::Recover)
        );
    }
}
