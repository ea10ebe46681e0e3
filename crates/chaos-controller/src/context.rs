//! Shared state handed to every reconcile of one experiment kind

use std::sync::Arc;
use std::time::Duration;

use chaos_common::crd::ChaosResource;
use chaos_common::events::{EventPublisher, NoopEventPublisher};
use chaos_common::retry::RetryConfig;
use chaos_selector::Selector;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::injector::Injector;
use crate::store::ResourceStore;

/// Default deadline for one injector call
pub const DEFAULT_INJECTOR_TIMEOUT: Duration = Duration::from_secs(60);

/// Default delay before a reconcile that asked for a retry runs again
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Tunables of the reconcile pipeline
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Deadline for one apply or recover call
    pub injector_timeout: Duration,
    /// Requeue delay when a step asks for a retry
    pub retry_interval: Duration,
    /// Policy for write conflicts
    pub conflict_retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            injector_timeout: DEFAULT_INJECTOR_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            conflict_retry: RetryConfig::conflict(),
        }
    }
}

/// Everything a reconcile of kind `K` needs
pub struct Context<K: ChaosResource> {
    /// Experiment store, normally a [`CachedStore`](crate::CachedStore)
    pub store: Arc<dyn ResourceStore<K>>,
    /// Target selector
    pub selector: Arc<dyn Selector>,
    /// Injector for this kind
    pub injector: Arc<dyn Injector<K>>,
    /// Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Tunables
    pub config: PipelineConfig,
    /// Cancelled on shutdown
    pub cancel: CancellationToken,
}

impl<K: ChaosResource> Context<K> {
    /// Start building a context from its three required collaborators
    pub fn builder(
        store: Arc<dyn ResourceStore<K>>,
        selector: Arc<dyn Selector>,
        injector: Arc<dyn Injector<K>>,
    ) -> ContextBuilder<K> {
        ContextBuilder {
            store,
            selector,
            injector,
            events: None,
            clock: None,
            config: PipelineConfig::default(),
            cancel: None,
        }
    }
}

/// Builder for [`Context`]
///
/// ```text
/// let ctx = Context::builder(store, selector, injector)
///     .events(publisher)
///     .cancel(token)
///     .build();
/// ```
pub struct ContextBuilder<K: ChaosResource> {
    store: Arc<dyn ResourceStore<K>>,
    selector: Arc<dyn Selector>,
    injector: Arc<dyn Injector<K>>,
    events: Option<Arc<dyn EventPublisher>>,
    clock: Option<Arc<dyn Clock>>,
    config: PipelineConfig,
    cancel: Option<CancellationToken>,
}

impl<K: ChaosResource> ContextBuilder<K> {
    /// Publish Events through `events` (default: dropped)
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Read time from `clock` (default: wall clock)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the pipeline tunables
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Abort reconciles when `cancel` fires
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Build the context
    pub fn build(self) -> Context<K> {
        Context {
            store: self.store,
            selector: self.selector,
            injector: self.injector,
            events: self.events.unwrap_or_else(|| Arc::new(NoopEventPublisher)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}
