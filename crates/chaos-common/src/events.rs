//! Kubernetes Event recording for chaos experiments.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so that every pipeline step can emit Events visible via
//! `kubectl describe` on the experiment.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use parking_lot::Mutex;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The experiment this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "Applied")
    /// * `action` - What action was taken (e.g. "Reconcile")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher for the given controller name.
    ///
    /// One publisher is built per experiment kind, so the reporting component
    /// reads e.g. "podchaos-controller".
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests and dry runs.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// An event captured by [`RecordingEventPublisher`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedEvent {
    /// Name of the resource the event was published on
    pub name: Option<String>,
    /// Whether the event was a warning
    pub warning: bool,
    /// Event reason
    pub reason: String,
    /// Event note
    pub note: Option<String>,
}

/// In-memory publisher that keeps every event, for assertions in tests.
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<PublishedEvent>>,
}

impl RecordingEventPublisher {
    /// Snapshot of everything published so far
    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().clone()
    }

    /// Reasons of everything published so far, in order
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().push(PublishedEvent {
            name: resource_ref.name.clone(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}

/// Everything the reconcile pipeline reports about an experiment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChaosEvent {
    /// Desired phase became Stop because the experiment is being deleted
    Deleted,
    /// Desired phase became Stop because the duration elapsed
    TimeUp,
    /// Desired phase became Stop because of the pause annotation
    Paused,
    /// Desired phase became Run
    Started,
    /// A target reached Injected
    Applied {
        /// Record id of the target
        id: String,
    },
    /// A target reached Not Injected
    Recovered {
        /// Record id of the target
        id: String,
    },
    /// A field of the experiment was written back
    Updated {
        /// Name of the field (e.g. "records")
        field: String,
    },
    /// An activity failed
    Failed {
        /// What was being done (e.g. "apply chaos")
        activity: String,
        /// Error text
        err: String,
    },
    /// The records finalizer was added
    FinalizerInited,
    /// The records finalizer was removed
    FinalizerRemoved,
}

impl ChaosEvent {
    /// Shorthand for [`ChaosEvent::Failed`]
    pub fn failed(activity: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Failed {
            activity: activity.into(),
            err: err.to_string(),
        }
    }

    /// Shorthand for [`ChaosEvent::Updated`]
    pub fn updated(field: impl Into<String>) -> Self {
        Self::Updated {
            field: field.into(),
        }
    }

    /// Reason column of the Event
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Deleted => reasons::DELETED,
            Self::TimeUp => reasons::TIME_UP,
            Self::Paused => reasons::PAUSED,
            Self::Started => reasons::STARTED,
            Self::Applied { .. } => reasons::APPLIED,
            Self::Recovered { .. } => reasons::RECOVERED,
            Self::Updated { .. } => reasons::UPDATED,
            Self::Failed { .. } => reasons::FAILED,
            Self::FinalizerInited => reasons::FINALIZER_INITED,
            Self::FinalizerRemoved => reasons::FINALIZER_REMOVED,
        }
    }

    /// Failures are warnings, everything else is normal
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Failed { .. } => EventType::Warning,
            _ => EventType::Normal,
        }
    }

    /// Human readable note
    pub fn message(&self) -> String {
        match self {
            Self::Deleted => "Experiment has been deleted".to_string(),
            Self::TimeUp => "Time up according to the duration".to_string(),
            Self::Paused => "Experiment has been paused".to_string(),
            Self::Started => "Experiment has started".to_string(),
            Self::Applied { id } => format!("Successfully apply chaos for {id}"),
            Self::Recovered { id } => format!("Successfully recover chaos for {id}"),
            Self::Updated { field } => format!("Successfully update {field} of resource"),
            Self::Failed { activity, err } => format!("Failed to {activity}: {err}"),
            Self::FinalizerInited => "Finalizer has been inited".to_string(),
            Self::FinalizerRemoved => "Finalizer has been removed".to_string(),
        }
    }

    /// Publish this event on `resource_ref`
    pub async fn publish(&self, publisher: &dyn EventPublisher, resource_ref: &ObjectReference) {
        publisher
            .publish(
                resource_ref,
                self.event_type(),
                self.reason(),
                actions::RECONCILE,
                Some(self.message()),
            )
            .await;
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// Experiment is being deleted
    pub const DELETED: &str = "Deleted";
    /// Duration elapsed
    pub const TIME_UP: &str = "TimeUp";
    /// Pause annotation set
    pub const PAUSED: &str = "Paused";
    /// Experiment started
    pub const STARTED: &str = "Started";
    /// Chaos applied on a target
    pub const APPLIED: &str = "Applied";
    /// Chaos recovered on a target
    pub const RECOVERED: &str = "Recovered";
    /// Status or metadata written back
    pub const UPDATED: &str = "Updated";
    /// Something failed
    pub const FAILED: &str = "Failed";
    /// Records finalizer added
    pub const FINALIZER_INITED: &str = "FinalizerInited";
    /// Records finalizer removed
    pub const FINALIZER_REMOVED: &str = "FinalizerRemoved";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
}
