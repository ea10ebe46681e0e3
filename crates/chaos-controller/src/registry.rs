//! Process-wide table of injectors keyed by experiment kind

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use chaos_common::crd::{ChaosKind, ChaosResource, ChildKind};

use crate::injector::Injector;

/// What the registry knows about one kind
pub struct RegistryEntry<K: ChaosResource> {
    kind: ChaosKind,
    injector: Arc<dyn Injector<K>>,
    controls: Vec<ChildKind>,
}

impl<K: ChaosResource> RegistryEntry<K> {
    /// Kind tag
    pub fn kind(&self) -> ChaosKind {
        self.kind
    }

    /// Per-target child kinds the injector owns
    pub fn controls(&self) -> &[ChildKind] {
        &self.controls
    }

    /// The kind's injector
    pub fn injector(&self) -> Arc<dyn Injector<K>> {
        self.injector.clone()
    }
}

/// Immutable after [`InjectorRegistryBuilder::build`]
#[derive(Default)]
pub struct InjectorRegistry {
    entries: BTreeMap<ChaosKind, Arc<dyn Any + Send + Sync>>,
}

impl InjectorRegistry {
    /// Start an empty registry
    pub fn builder() -> InjectorRegistryBuilder {
        InjectorRegistryBuilder::default()
    }

    /// Entry for `K`, if registered
    pub fn get<K: ChaosResource>(&self) -> Option<Arc<RegistryEntry<K>>> {
        self.entries
            .get(&K::KIND)
            .cloned()
            .and_then(|entry| entry.downcast::<RegistryEntry<K>>().ok())
    }

    /// Whether `kind` has an injector
    pub fn contains(&self, kind: ChaosKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Registered kinds, in kind order
    pub fn kinds(&self) -> Vec<ChaosKind> {
        self.entries.keys().copied().collect()
    }
}

/// Builder for [`InjectorRegistry`]
#[derive(Default)]
pub struct InjectorRegistryBuilder {
    entries: BTreeMap<ChaosKind, Arc<dyn Any + Send + Sync>>,
}

impl InjectorRegistryBuilder {
    /// Register the injector for `K`, replacing any earlier one
    pub fn register<K: ChaosResource>(
        mut self,
        injector: Arc<dyn Injector<K>>,
        controls: Vec<ChildKind>,
    ) -> Self {
        let entry: Arc<RegistryEntry<K>> = Arc::new(RegistryEntry {
            kind: K::KIND,
            injector,
            controls,
        });
        self.entries.insert(K::KIND, entry);
        self
    }

    /// Freeze the table
    pub fn build(self) -> InjectorRegistry {
        InjectorRegistry {
            entries: self.entries,
        }
    }
}
