//! Target selection for chaos experiments
//!
//! Turns a [`SelectorSpec`] into the ordered list of target ids an experiment
//! records: `namespace/name` for pods, `namespace/name/container` for
//! containers and a JSON blob for cloud instances.

#![deny(missing_docs)]

pub mod cloud;
mod error;
pub mod inventory;
pub mod mode;
pub mod pod;
mod scope;

use std::sync::Arc;

use async_trait::async_trait;
use chaos_common::crd::{SelectorMode, SelectorSpec};
use tracing::{debug, instrument};

pub use cloud::CloudTarget;
pub use error::SelectError;
pub use inventory::{ClusterInventory, KubeInventory, PodQuery};
pub use mode::apply_mode;
pub use scope::ScopeOptions;

/// Resolves selectors into target ids
#[async_trait]
pub trait Selector: Send + Sync {
    /// Target ids for `spec`, sorted within the chosen subset.
    ///
    /// `namespace` is the experiment's namespace.
    async fn select(&self, spec: &SelectorSpec, namespace: &str)
        -> Result<Vec<String>, SelectError>;
}

/// Selector backed by a cluster inventory
pub struct TargetSelector {
    cluster: Arc<dyn ClusterInventory>,
    scope: ScopeOptions,
}

impl TargetSelector {
    /// Create a selector over `cluster` limited by `scope`
    pub fn new(cluster: Arc<dyn ClusterInventory>, scope: ScopeOptions) -> Self {
        Self { cluster, scope }
    }

    /// Namespace limits in effect
    pub fn scope(&self) -> &ScopeOptions {
        &self.scope
    }
}

#[async_trait]
impl Selector for TargetSelector {
    #[instrument(skip(self, spec), fields(mode = ?spec.mode()))]
    async fn select(
        &self,
        spec: &SelectorSpec,
        _namespace: &str,
    ) -> Result<Vec<String>, SelectError> {
        let (mode, value) = spec.mode();
        let mode = SelectorMode::parse(mode, value)?;

        let ids = match spec {
            SelectorSpec::Pod(sel) => {
                let pods = pod::select_pods(self.cluster.as_ref(), &self.scope, &sel.selector).await?;
                let candidates = pods.iter().map(pod::pod_id).collect();
                let chosen = apply_mode(candidates, mode, &mut rand::thread_rng())?;
                chosen
            }
            SelectorSpec::Container(sel) => {
                let pods =
                    pod::select_pods(self.cluster.as_ref(), &self.scope, &sel.pod.selector).await?;
                let candidates = pods.iter().map(pod::pod_id).collect();
                let chosen = apply_mode(candidates, mode, &mut rand::thread_rng())?;
                let mut ids: Vec<String> = pods
                    .iter()
                    .filter(|p| chosen.contains(&pod::pod_id(p)))
                    .flat_map(|p| pod::container_ids(p, &sel.container_names))
                    .collect();
                ids.sort();
                ids.dedup();
                ids
            }
            SelectorSpec::Cloud(sel) => {
                let instances = cloud::candidate_instances(sel)?;
                let chosen = apply_mode(instances, mode, &mut rand::thread_rng())?;
                chosen
                    .iter()
                    .map(|instance| CloudTarget::new(sel, instance.as_str()).to_id())
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        debug!(count = ids.len(), "resolved selector");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::MockClusterInventory;
    use chaos_common::crd::{
        CloudProvider, CloudSelector, ContainerSelector, PodSelector, PodSelectorSpec,
    };
    use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str, containers: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some("default".into()),
                name: Some(name.into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: containers
                    .iter()
                    .map(|c| Container {
                        name: c.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn inventory() -> Arc<MockClusterInventory> {
        let mut inv = MockClusterInventory::new();
        inv.expect_list_pods().returning(|_| {
            Ok(vec![
                pod("web-2", &["app"]),
                pod("web-0", &["app", "proxy"]),
                pod("web-1", &["app"]),
            ])
        });
        Arc::new(inv)
    }

    fn pod_spec(mode: &str, value: Option<&str>) -> PodSelector {
        PodSelector {
            selector: PodSelectorSpec::default(),
            mode: mode.into(),
            value: value.map(String::from),
        }
    }

    /// Story: a fixed-size pod experiment always lands on the same pods for
    /// the same inventory, in sorted order.
    #[tokio::test]
    async fn story_fixed_mode_is_a_sorted_prefix() {
        let selector = TargetSelector::new(inventory(), ScopeOptions::default());
        let ids = selector
            .select(&SelectorSpec::Pod(pod_spec("fixed", Some("2"))), "default")
            .await
            .unwrap();
        assert_eq!(ids, vec!["default/web-0".to_string(), "default/web-1".to_string()]);
    }

    #[tokio::test]
    async fn container_mode_applies_to_pods_before_expanding() {
        let selector = TargetSelector::new(inventory(), ScopeOptions::default());
        let spec = SelectorSpec::Container(ContainerSelector {
            pod: pod_spec("one", None),
            container_names: Vec::new(),
        });
        let ids = selector.select(&spec, "default").await.unwrap();
        assert_eq!(
            ids,
            vec!["default/web-0/app".to_string(), "default/web-0/proxy".to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_mode_is_invalid_spec() {
        let selector = TargetSelector::new(inventory(), ScopeOptions::default());
        let err = selector
            .select(&SelectorSpec::Pod(pod_spec("most", None)), "default")
            .await
            .unwrap_err();
        assert!(matches!(err, SelectError::InvalidSpec { .. }));
    }

    #[tokio::test]
    async fn insufficient_targets_for_fixed() {
        let selector = TargetSelector::new(inventory(), ScopeOptions::default());
        let err = selector
            .select(&SelectorSpec::Pod(pod_spec("fixed", Some("5"))), "default")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SelectError::InsufficientTargets {
                requested: 5,
                available: 3
            }
        ));
    }

    #[tokio::test]
    async fn cloud_ids_are_json() {
        let selector = TargetSelector::new(Arc::new(MockClusterInventory::new()), ScopeOptions::default());
        let spec = SelectorSpec::Cloud(CloudSelector {
            provider: CloudProvider::Gcp,
            region: "us-central1-a".into(),
            project: Some("demo".into()),
            secret_name: None,
            instances: vec!["vm-1".into()],
            filters: Vec::new(),
            mode: "all".into(),
            value: None,
        });
        let ids = selector.select(&spec, "default").await.unwrap();
        assert_eq!(ids.len(), 1);
        let target = CloudTarget::from_id(&ids[0]).unwrap();
        assert_eq!(target.instance, "vm-1");
        assert_eq!(target.project.as_deref(), Some("demo"));
    }
}
