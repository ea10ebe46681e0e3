//! Status block shared by every experiment kind

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::MAX_RECORD_EVENTS;

/// Whether the experiment should currently be injecting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum DesiredPhase {
    /// Targets should be Injected
    Run,
    /// Targets should be Not Injected
    Stop,
}

impl fmt::Display for DesiredPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "Run"),
            Self::Stop => write!(f, "Stop"),
        }
    }
}

/// Phase of one record.
///
/// Besides the two settled phases an injector may report a transient phase
/// `"<settled>/<step>"`, e.g. `Not Injected/wait` while a daemon is still
/// applying. Only the prefix matters to the engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Phase(String);

impl Phase {
    /// Wire value of the settled not-injected phase
    pub const NOT_INJECTED: &'static str = "Not Injected";
    /// Wire value of the settled injected phase
    pub const INJECTED: &'static str = "Injected";

    /// The settled not-injected phase
    pub fn not_injected() -> Self {
        Self(Self::NOT_INJECTED.to_string())
    }

    /// The settled injected phase
    pub fn injected() -> Self {
        Self(Self::INJECTED.to_string())
    }

    /// Raw wire value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exactly `Not Injected`
    pub fn is_not_injected(&self) -> bool {
        self.0 == Self::NOT_INJECTED
    }

    /// Exactly `Injected`
    pub fn is_injected(&self) -> bool {
        self.0 == Self::INJECTED
    }

    /// `Not Injected` or any `Not Injected/*`.
    ///
    /// Every other value, including ones an injector invented, is treated as
    /// being on the injected side of the cycle.
    pub fn is_not_injected_side(&self) -> bool {
        self.0.starts_with(Self::NOT_INJECTED)
    }
}

impl From<&str> for Phase {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome recorded on a record event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RecordEventType {
    /// The operation succeeded
    Succeeded,
    /// The operation failed
    Failed,
}

/// Operation recorded on a record event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RecordEventOperation {
    /// Inject the fault
    Apply,
    /// Undo the fault
    Recover,
}

/// One apply/recover attempt on a record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordEvent {
    /// Succeeded or Failed
    #[serde(rename = "type")]
    pub type_: RecordEventType,
    /// Apply or Recover
    pub operation: RecordEventOperation,
    /// Error text for failures
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
}

impl RecordEvent {
    /// Create an event stamped at `timestamp`
    pub fn new(
        type_: RecordEventType,
        operation: RecordEventOperation,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            type_,
            operation,
            message: message.into(),
            timestamp,
        }
    }
}

/// Per-target bookkeeping
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Target identifier (`ns/name`, `ns/name/container`, or a cloud JSON blob)
    pub id: String,
    /// Name of the selector that produced the target
    pub selector_key: String,
    /// Current phase
    pub phase: Phase,
    /// Number of successful transitions to Injected
    #[serde(default)]
    pub injected_count: u32,
    /// Number of successful transitions to Not Injected
    #[serde(default)]
    pub recovered_count: u32,
    /// Most recent apply/recover attempts, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<RecordEvent>,
}

impl Record {
    /// A freshly selected target
    pub fn new(id: impl Into<String>, selector_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            selector_key: selector_key.into(),
            phase: Phase::not_injected(),
            injected_count: 0,
            recovered_count: 0,
            events: Vec::new(),
        }
    }

    /// Append an event, dropping the oldest ones beyond the cap
    pub fn push_event(&mut self, event: RecordEvent) {
        self.events.push(event);
        self.truncate_events();
    }

    /// Keep only the newest [`MAX_RECORD_EVENTS`] events
    pub fn truncate_events(&mut self) {
        if self.events.len() > MAX_RECORD_EVENTS {
            let excess = self.events.len() - MAX_RECORD_EVENTS;
            self.events.drain(..excess);
        }
    }
}

/// Lifecycle part of the status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentStatus {
    /// Phase the records are being driven towards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_phase: Option<DesiredPhase>,
    /// One record per selected target; absent until selection succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<Record>>,
    /// When the desired phase last became Run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the desired phase last became Stop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Aggregate flags derived from records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    /// At least one target was selected
    Selected,
    /// Every target is Injected
    AllInjected,
    /// Every target is Not Injected
    AllRecovered,
    /// The pause annotation is set
    Paused,
}

impl ConditionType {
    /// Order in which conditions are written to the status
    pub const ALL: [ConditionType; 4] = [
        ConditionType::Selected,
        ConditionType::AllInjected,
        ConditionType::AllRecovered,
        ConditionType::Paused,
    ];
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not evaluated yet
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// One aggregate condition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChaosCondition {
    /// Which flag
    #[serde(rename = "type")]
    pub type_: ConditionType,
    /// Its value
    pub status: ConditionStatus,
    /// Machine-readable reason, empty when there is nothing to add
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl ChaosCondition {
    /// Create a condition without a reason
    pub fn new(type_: ConditionType, status: impl Into<ConditionStatus>) -> Self {
        Self {
            type_,
            status: status.into(),
            reason: String::new(),
        }
    }
}

/// Status common to every experiment kind
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChaosStatus {
    /// Aggregate conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ChaosCondition>,
    /// Desired phase and records
    #[serde(default)]
    pub experiment: ExperimentStatus,
}

impl ChaosStatus {
    /// Records, if selection has happened
    pub fn records(&self) -> Option<&[Record]> {
        self.experiment.records.as_deref()
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: ConditionType) -> Option<&ChaosCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Whether a condition is present and True
    pub fn is_condition_true(&self, type_: ConditionType) -> bool {
        self.condition(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }
}

/// A kind's status: the common block plus whatever the kind keeps on its own.
///
/// The engine only touches [`ChaosStatus`]; the custom part is owned by the
/// kind's injector and carried over verbatim when records are written back.
pub trait ChaosStatusBlock: Default + Clone + PartialEq + Send + Sync {
    /// The common block
    fn common(&self) -> &ChaosStatus;
    /// The common block, mutably
    fn common_mut(&mut self) -> &mut ChaosStatus;
    /// Copy the kind-specific part of `from` into `self`
    fn adopt_custom(&mut self, from: &Self);
}

impl ChaosStatusBlock for ChaosStatus {
    fn common(&self) -> &ChaosStatus {
        self
    }

    fn common_mut(&mut self) -> &mut ChaosStatus {
        self
    }

    fn adopt_custom(&mut self, _from: &Self) {}
}

/// Status for kinds whose injectors track a per-target instance counter
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstancesStatus {
    /// Common status
    #[serde(flatten)]
    pub chaos: ChaosStatus,
    /// Record id to the generation of the child resource holding its fault
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instances: BTreeMap<String, i64>,
}

impl ChaosStatusBlock for InstancesStatus {
    fn common(&self) -> &ChaosStatus {
        &self.chaos
    }

    fn common_mut(&mut self) -> &mut ChaosStatus {
        &mut self.chaos
    }

    fn adopt_custom(&mut self, from: &Self) {
        self.instances = from.instances.clone();
    }
}

/// A stress process started in a target container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StressInstance {
    /// Identifier of the stress process on the node
    pub uid: String,
    /// When the process was started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
}

/// Status for StressChaos
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StressChaosStatus {
    /// Common status
    #[serde(flatten)]
    pub chaos: ChaosStatus,
    /// Record id to the running stress process
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instances: BTreeMap<String, StressInstance>,
}

impl ChaosStatusBlock for StressChaosStatus {
    fn common(&self) -> &ChaosStatus {
        &self.chaos
    }

    fn common_mut(&mut self) -> &mut ChaosStatus {
        &mut self.chaos
    }

    fn adopt_custom(&mut self, from: &Self) {
        self.instances = from.instances.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_sides_follow_prefix() {
        assert!(Phase::not_injected().is_not_injected_side());
        assert!(Phase::from("Not Injected/wait").is_not_injected_side());
        assert!(!Phase::injected().is_not_injected_side());
        assert!(!Phase::from("Injected/partial").is_not_injected_side());
        assert!(!Phase::from("Something Else").is_not_injected_side());

        assert!(!Phase::from("Not Injected/wait").is_not_injected());
        assert!(!Phase::from("Injected/partial").is_injected());
    }

    /// Story: Status writes must stay small even for long-running experiments
    /// that flap many times, so only the newest events survive.
    #[test]
    fn story_record_events_are_capped() {
        let mut record = Record::new("default/web-0", ".");
        let now = Utc::now();
        for i in 0..(MAX_RECORD_EVENTS + 5) {
            record.push_event(RecordEvent::new(
                RecordEventType::Failed,
                RecordEventOperation::Apply,
                format!("attempt {i}"),
                now,
            ));
        }
        assert_eq!(record.events.len(), MAX_RECORD_EVENTS);
        assert_eq!(record.events[0].message, "attempt 5");
        assert_eq!(
            record.events.last().map(|e| e.message.as_str()),
            Some(format!("attempt {}", MAX_RECORD_EVENTS + 4).as_str())
        );
    }

    #[test]
    fn status_serializes_with_platform_field_names() {
        let mut status = ChaosStatus::default();
        status.experiment.desired_phase = Some(DesiredPhase::Run);
        status.experiment.records = Some(vec![Record::new("default/web-0", ".")]);
        status.conditions.push(ChaosCondition::new(ConditionType::Selected, true));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["experiment"]["desiredPhase"], "Run");
        assert_eq!(json["experiment"]["records"][0]["phase"], "Not Injected");
        assert_eq!(json["experiment"]["records"][0]["selectorKey"], ".");
        assert_eq!(json["conditions"][0]["type"], "Selected");
        assert_eq!(json["conditions"][0]["status"], "True");
    }

    #[test]
    fn custom_status_is_flattened_next_to_common_status() {
        let mut status = InstancesStatus::default();
        status.instances.insert("default/web-0".to_string(), 3);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["instances"]["default/web-0"], 3);
        assert!(json.get("experiment").is_some());

        let mut target = InstancesStatus::default();
        target.adopt_custom(&status);
        assert_eq!(target.instances, status.instances);
    }

    #[test]
    fn condition_lookup() {
        let status = ChaosStatus {
            conditions: vec![
                ChaosCondition::new(ConditionType::Selected, true),
                ChaosCondition::new(ConditionType::Paused, false),
            ],
            ..Default::default()
        };
        assert!(status.is_condition_true(ConditionType::Selected));
        assert!(!status.is_condition_true(ConditionType::Paused));
        assert!(!status.is_condition_true(ConditionType::AllInjected));
    }
}
