//! Desired phase: should the experiment be injecting right now?

use std::time::Duration;

use chaos_common::crd::{ChaosResource, DesiredPhase};
use chaos_common::duration::parse_duration;
use chaos_common::events::ChaosEvent;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{emit, ensure_live, write_failed, write_with_retry, StepOutcome, WriteTarget};
use crate::context::Context;
use crate::store::ExperimentKey;
use crate::ReconcileError;

/// Everything the desired phase depends on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseInputs {
    /// Deletion has been requested
    pub deleted: bool,
    /// Pause annotation is set
    pub paused: bool,
    /// The injector ends the fault on its own
    pub one_shot: bool,
    /// Raw duration from the spec
    pub duration: Option<String>,
    /// When the experiment was created
    pub creation_time: Option<DateTime<Utc>>,
}

impl PhaseInputs {
    /// Inputs read from an experiment
    pub fn of<K: ChaosResource>(obj: &K) -> Self {
        Self {
            deleted: obj.is_deleted(),
            paused: obj.is_paused(),
            one_shot: obj.is_one_shot(),
            duration: obj.duration().map(str::to_string),
            creation_time: obj.meta().creation_timestamp.as_ref().map(|t| t.0),
        }
    }
}

/// Outcome of [`compute_desired_phase`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseDecision {
    /// Phase to persist
    pub phase: DesiredPhase,
    /// Event to publish if the phase changes
    pub event: ChaosEvent,
    /// When to look again because the duration will expire
    pub requeue_after: Option<Duration>,
}

/// Decide the desired phase.
///
/// Deletion wins, then one-shot, then an expired duration, then the pause
/// annotation. A running duration schedules a wake-up for its expiry and
/// lets the later rules decide. An experiment without a creation time is
/// treated as created `now`.
pub fn compute_desired_phase(
    inputs: &PhaseInputs,
    now: DateTime<Utc>,
) -> Result<PhaseDecision, chaos_common::Error> {
    let stop = |event| PhaseDecision {
        phase: DesiredPhase::Stop,
        event,
        requeue_after: None,
    };

    if inputs.deleted {
        return Ok(stop(ChaosEvent::Deleted));
    }

    if inputs.one_shot {
        return Ok(PhaseDecision {
            phase: DesiredPhase::Run,
            event: ChaosEvent::Started,
            requeue_after: None,
        });
    }

    let mut requeue_after = None;
    if let Some(raw) = inputs.duration.as_deref().filter(|d| !d.is_empty()) {
        let duration = parse_duration(raw)
            .map_err(|e| chaos_common::Error::validation_for_field("spec.duration", e.to_string()))?;
        let created = inputs.creation_time.unwrap_or(now);
        let elapsed = (now - created).to_std().unwrap_or_default();
        if elapsed >= duration {
            return Ok(stop(ChaosEvent::TimeUp));
        }
        requeue_after = Some(duration - elapsed);
    }

    if inputs.paused {
        return Ok(PhaseDecision {
            requeue_after,
            ..stop(ChaosEvent::Paused)
        });
    }

    Ok(PhaseDecision {
        phase: DesiredPhase::Run,
        event: ChaosEvent::Started,
        requeue_after,
    })
}

/// Persist the desired phase when it changed
pub async fn run<K: ChaosResource>(
    ctx: &Context<K>,
    key: &ExperimentKey,
) -> Result<StepOutcome, ReconcileError> {
    let obj = ctx.store.get(key).await?;
    let now = ctx.clock.now();

    let decision = match compute_desired_phase(&PhaseInputs::of(&obj), now) {
        Ok(decision) => decision,
        Err(e) => {
            emit(ctx, &obj, ChaosEvent::failed("compute desired phase", &e)).await;
            return Err(ReconcileError::malformed(e.to_string()));
        }
    };

    let outcome = decision
        .requeue_after
        .map(StepOutcome::after)
        .unwrap_or_default();

    if obj.desired_phase() == Some(decision.phase) {
        debug!(%key, phase = %decision.phase, "desired phase unchanged");
        return Ok(outcome);
    }

    ensure_live(ctx)?;
    let phase = decision.phase;
    let written = write_with_retry(ctx, key, WriteTarget::Status, "update desired phase", |fresh: &mut K| {
        if fresh.desired_phase() == Some(phase) {
            return false;
        }
        let experiment = &mut fresh.chaos_status_mut().experiment;
        experiment.desired_phase = Some(phase);
        match phase {
            DesiredPhase::Run => {
                if experiment.start_time.is_none() {
                    experiment.start_time = Some(now);
                }
            }
            DesiredPhase::Stop => experiment.end_time = Some(now),
        }
        true
    })
    .await;

    match written {
        Ok(Some(updated)) => {
            info!(%key, %phase, "desired phase changed");
            emit(ctx, &updated, decision.event).await;
            emit(ctx, &updated, ChaosEvent::updated("desiredPhase")).await;
            Ok(outcome)
        }
        Ok(None) => Ok(outcome),
        Err(e) => Ok(write_failed(ctx, &obj, "update desired phase", e)
            .await?
            .merge(outcome)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn inputs() -> PhaseInputs {
        PhaseInputs {
            deleted: false,
            paused: false,
            one_shot: false,
            duration: None,
            creation_time: Some(t(0)),
        }
    }

    #[test]
    fn defaults_to_run() {
        let d = compute_desired_phase(&inputs(), t(5)).unwrap();
        assert_eq!(d.phase, DesiredPhase::Run);
        assert_eq!(d.event, ChaosEvent::Started);
        assert_eq!(d.requeue_after, None);
    }

    #[test]
    fn deletion_beats_everything() {
        let i = PhaseInputs {
            deleted: true,
            one_shot: true,
            paused: true,
            ..inputs()
        };
        let d = compute_desired_phase(&i, t(5)).unwrap();
        assert_eq!((d.phase, d.event), (DesiredPhase::Stop, ChaosEvent::Deleted));
    }

    #[test]
    fn one_shot_ignores_duration_and_pause() {
        let i = PhaseInputs {
            one_shot: true,
            paused: true,
            duration: Some("1s".into()),
            ..inputs()
        };
        assert_eq!(compute_desired_phase(&i, t(60)).unwrap().phase, DesiredPhase::Run);
    }

    #[test]
    fn running_duration_schedules_expiry() {
        let i = PhaseInputs {
            duration: Some("30s".into()),
            ..inputs()
        };
        let d = compute_desired_phase(&i, t(10)).unwrap();
        assert_eq!(d.phase, DesiredPhase::Run);
        assert_eq!(d.requeue_after, Some(Duration::from_secs(20)));

        let d = compute_desired_phase(&i, t(30)).unwrap();
        assert_eq!((d.phase, d.event), (DesiredPhase::Stop, ChaosEvent::TimeUp));
        assert_eq!(d.requeue_after, None);
    }

    #[test]
    fn pause_keeps_the_expiry_wakeup() {
        let i = PhaseInputs {
            paused: true,
            duration: Some("1m".into()),
            ..inputs()
        };
        let d = compute_desired_phase(&i, t(15)).unwrap();
        assert_eq!((d.phase, d.event), (DesiredPhase::Stop, ChaosEvent::Paused));
        assert_eq!(d.requeue_after, Some(Duration::from_secs(45)));
    }

    #[test]
    fn bad_duration_is_a_validation_error() {
        let i = PhaseInputs {
            duration: Some("ten minutes".into()),
            ..inputs()
        };
        assert!(matches!(
            compute_desired_phase(&i, t(0)),
            Err(chaos_common::Error::Validation { .. })
        ));
    }

    fn arb_inputs() -> impl Strategy<Value = PhaseInputs> {
        (
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            prop::option::of(prop::sample::select(vec!["10s", "1m", "90s", "1h"])),
            0i64..100,
        )
            .prop_map(|(deleted, paused, one_shot, duration, created)| PhaseInputs {
                deleted,
                paused,
                one_shot,
                duration: duration.map(String::from),
                creation_time: Some(t(created)),
            })
    }

    proptest! {
        /// Story: the desired phase is recomputed from scratch on every
        /// reconcile. Equal inputs at the same instant must give the same
        /// answer no matter what was decided before, and only deletion,
        /// expiry or pause ever yield Stop.
        #[test]
        fn story_desired_phase_is_a_pure_function(i in arb_inputs(), now in 0i64..7200) {
            let a = compute_desired_phase(&i, t(now)).unwrap();
            let b = compute_desired_phase(&i.clone(), t(now)).unwrap();
            prop_assert_eq!(&a, &b);

            if a.phase == DesiredPhase::Stop {
                prop_assert!(i.deleted || i.paused || i.duration.is_some());
                prop_assert!(!i.one_shot || i.deleted);
            }
            if i.deleted {
                prop_assert_eq!(a.phase, DesiredPhase::Stop);
            }
        }
    }
}
