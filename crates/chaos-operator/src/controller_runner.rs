//! Controller builders
//!
//! One kube-runtime controller per experiment kind with a registered
//! injector. Kinds without an injector keep their CRD installed but are not
//! reconciled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chaos_common::crd::{
    AWSChaos, ChaosKind, ChaosResource, GCPChaos, HTTPChaos, IOChaos, KernelChaos, NetworkChaos,
    PodChaos, StressChaos, TimeChaos, ALL_CHAOS_KINDS,
};
use chaos_common::events::KubeEventPublisher;
use chaos_controller::injectors::{pod_chaos_injector, KubePodClient, PodClient};
use chaos_controller::{controller_for, CachedStore, Context, InjectorRegistry, KubeStore};
use chaos_selector::{KubeInventory, Selector, TargetSelector};
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;

/// A running controller
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Registry with every built-in injector
pub fn injector_registry(pods: Arc<dyn PodClient>, pod_kill_grace_period: u32) -> InjectorRegistry {
    InjectorRegistry::builder()
        .register::<PodChaos>(
            Arc::new(pod_chaos_injector(pods, pod_kill_grace_period)),
            Vec::new(),
        )
        .build()
}

/// Registry backed by the API server
pub fn build_registry(client: &Client, config: &ControllerConfig) -> InjectorRegistry {
    injector_registry(
        Arc::new(KubePodClient::new(client.clone())),
        config.pod_kill_grace_period,
    )
}

/// Kinds that get a controller and kinds that are skipped, in kind order
pub fn planned_kinds(registry: &InjectorRegistry) -> (Vec<ChaosKind>, Vec<ChaosKind>) {
    ALL_CHAOS_KINDS
        .iter()
        .copied()
        .partition(|kind| registry.contains(*kind))
}

/// Build a controller for every kind with an injector
pub fn build_chaos_controllers(
    client: Client,
    config: &ControllerConfig,
    registry: &InjectorRegistry,
    cancel: CancellationToken,
) -> Vec<ControllerFuture> {
    let selector: Arc<dyn Selector> = Arc::new(TargetSelector::new(
        Arc::new(KubeInventory::new(client.clone())),
        config.scope.clone(),
    ));

    let (enabled, skipped) = planned_kinds(registry);
    for kind in &skipped {
        tracing::info!(%kind, "no injector registered, not reconciling");
    }

    tracing::info!("Starting chaos controllers...");
    enabled
        .into_iter()
        .filter_map(|kind| {
            let (client, selector, cancel) = (client.clone(), selector.clone(), cancel.clone());
            match kind {
                ChaosKind::PodChaos => build_kind::<PodChaos>(client, config, registry, selector, cancel),
                ChaosKind::NetworkChaos => {
                    build_kind::<NetworkChaos>(client, config, registry, selector, cancel)
                }
                ChaosKind::IOChaos => build_kind::<IOChaos>(client, config, registry, selector, cancel),
                ChaosKind::StressChaos => {
                    build_kind::<StressChaos>(client, config, registry, selector, cancel)
                }
                ChaosKind::HTTPChaos => build_kind::<HTTPChaos>(client, config, registry, selector, cancel),
                ChaosKind::KernelChaos => {
                    build_kind::<KernelChaos>(client, config, registry, selector, cancel)
                }
                ChaosKind::TimeChaos => build_kind::<TimeChaos>(client, config, registry, selector, cancel),
                ChaosKind::AWSChaos => build_kind::<AWSChaos>(client, config, registry, selector, cancel),
                ChaosKind::GCPChaos => build_kind::<GCPChaos>(client, config, registry, selector, cancel),
            }
        })
        .collect()
}

fn build_kind<K: ChaosResource>(
    client: Client,
    config: &ControllerConfig,
    registry: &InjectorRegistry,
    selector: Arc<dyn Selector>,
    cancel: CancellationToken,
) -> Option<ControllerFuture> {
    let entry = registry.get::<K>()?;
    let store = Arc::new(CachedStore::new(
        Arc::new(KubeStore::<K>::new(client.clone())),
        config.cache_capacity,
    ));
    let events = Arc::new(KubeEventPublisher::new(
        client.clone(),
        &K::KIND.controller_name(),
    ));

    let ctx = Arc::new(
        Context::builder(store, selector, entry.injector())
            .events(events)
            .config(config.pipeline.clone())
            .cancel(cancel)
            .build(),
    );

    Some(controller_for(client, ctx, entry.controls(), config.workers))
}
