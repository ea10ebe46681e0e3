//! Reconcile pipeline for chaos experiments
//!
//! Every experiment kind runs the same pipeline: add the records finalizer,
//! decide whether the experiment should be injecting, drive every record
//! towards that, roll the records up into conditions, and finally release
//! the finalizer once nothing is left injected. Kind-specific work lives
//! behind the [`Injector`] trait.

#![deny(missing_docs)]

pub mod cache;
pub mod context;
mod error;
pub mod filter;
pub mod injector;
pub mod injectors;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod steps;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CachedStore, DEFAULT_CACHE_CAPACITY};
pub use context::{Clock, Context, ContextBuilder, PipelineConfig, SystemClock};
pub use error::{InjectError, ReconcileError, StoreError};
pub use injector::{ActionMultiplexer, InjectContext, Injector};
pub use pipeline::reconcile_experiment;
pub use registry::{InjectorRegistry, RegistryEntry};
pub use runner::controller_for;
pub use steps::StepOutcome;
pub use store::{ExperimentKey, KubeStore, ResourceStore};
