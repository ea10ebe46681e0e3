//! Built-in injectors

pub mod pod_kill;

use std::sync::Arc;

use chaos_common::crd::PodChaos;

use crate::injector::ActionMultiplexer;
pub use pod_kill::{KubePodClient, PodClient, PodKillInjector};

/// Multiplexer for `PodChaos` with every built-in action wired in
pub fn pod_chaos_injector(pods: Arc<dyn PodClient>, grace_period: u32) -> ActionMultiplexer<PodChaos> {
    ActionMultiplexer::new().with_action(
        "pod-kill",
        Arc::new(PodKillInjector::new(pods, grace_period)),
    )
}
