//! Common types for the chaos controller: CRDs, status model, errors and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod duration;
pub mod error;
pub mod events;
pub mod leader_election;
pub mod retry;
pub mod target;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of every chaos experiment kind
pub const CHAOS_API_GROUP: &str = "chaos-mesh.org";

/// API version of every chaos experiment kind
pub const CHAOS_API_VERSION: &str = "v1alpha1";

/// Namespace the controller itself runs in (leases, events)
pub const CHAOS_SYSTEM_NAMESPACE: &str = "chaos-mesh";

/// Finalizer that blocks deletion until every record has been recovered
pub const RECORDS_FINALIZER: &str = "chaos-mesh/records";

/// Annotation that pauses an experiment when set to [`PAUSE_ANNOTATION_VALUE`]
pub const PAUSE_ANNOTATION: &str = "experiment.chaos-mesh.org/pause";

/// Value of [`PAUSE_ANNOTATION`] that pauses the experiment
pub const PAUSE_ANNOTATION_VALUE: &str = "true";

/// Annotation that lets the finalizer be removed without recovering targets
pub const CLEAN_FINALIZER_ANNOTATION: &str = "chaos-mesh.chaos-mesh.org/cleanFinalizer";

/// Value of [`CLEAN_FINALIZER_ANNOTATION`] that forces finalizer removal
pub const CLEAN_FINALIZER_FORCED: &str = "forced";

/// Namespace annotation that opts a namespace into injection when filtering is enabled
pub const NAMESPACE_INJECT_ANNOTATION: &str = "chaos-mesh.org/inject";

/// Value of [`NAMESPACE_INJECT_ANNOTATION`] that enables injection
pub const NAMESPACE_INJECT_ENABLED: &str = "enabled";

/// Maximum number of events kept per record in the status block
pub const MAX_RECORD_EVENTS: usize = 32;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "chaos-controller";
