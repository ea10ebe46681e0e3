//! Pod and container selection

use std::collections::{BTreeSet, HashMap};

use chaos_common::crd::{PodSelectorSpec, SelectorRequirement};
use chaos_common::target::PodTarget;
use chaos_common::{NAMESPACE_INJECT_ANNOTATION, NAMESPACE_INJECT_ENABLED};
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

use crate::inventory::{ClusterInventory, PodQuery};
use crate::{ScopeOptions, SelectError};

/// `namespace/name` of a pod
pub fn pod_id(pod: &Pod) -> String {
    PodTarget::pod(
        pod.metadata.namespace.clone().unwrap_or_default(),
        pod.metadata.name.clone().unwrap_or_default(),
    )
    .to_string()
}

/// `namespace/name/container` ids for the named containers of `pod`.
///
/// An empty `names` list means every regular container plus sidecar init
/// containers (restart policy `Always`). Names the pod does not run are
/// skipped.
pub fn container_ids(pod: &Pod, names: &[String]) -> Vec<String> {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let name = pod.metadata.name.clone().unwrap_or_default();
    let Some(spec) = &pod.spec else {
        return Vec::new();
    };

    let sidecars = spec
        .init_containers
        .iter()
        .flatten()
        .filter(|c| c.restart_policy.as_deref() == Some("Always"));
    spec.containers
        .iter()
        .chain(sidecars)
        .filter(|c| names.is_empty() || names.contains(&c.name))
        .map(|c| PodTarget::container(namespace.clone(), name.clone(), c.name.clone()).to_string())
        .collect()
}

/// Render label equality and set-based requirements as a selector string
pub fn label_selector_string(
    labels: &std::collections::BTreeMap<String, String>,
    expressions: &[SelectorRequirement],
) -> Result<Option<String>, SelectError> {
    let mut parts: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    for req in expressions {
        let part = match req.operator.as_str() {
            "In" | "NotIn" if req.values.is_empty() => {
                return Err(SelectError::invalid(format!(
                    "expression on {:?} with operator {} needs values",
                    req.key, req.operator
                )))
            }
            "In" => format!("{} in ({})", req.key, req.values.join(",")),
            "NotIn" => format!("{} notin ({})", req.key, req.values.join(",")),
            "Exists" => req.key.clone(),
            "DoesNotExist" => format!("!{}", req.key),
            other => {
                return Err(SelectError::invalid(format!(
                    "unknown expression operator {other:?}"
                )))
            }
        };
        parts.push(part);
    }
    Ok((!parts.is_empty()).then(|| parts.join(",")))
}

fn field_selector_string(fields: &std::collections::BTreeMap<String, String>) -> Option<String> {
    (!fields.is_empty()).then(|| {
        fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    })
}

/// Split `["a", "!b"]` into included and excluded sets
fn split_negations(values: &[String]) -> (BTreeSet<&str>, BTreeSet<&str>) {
    let mut include = BTreeSet::new();
    let mut exclude = BTreeSet::new();
    for v in values {
        match v.strip_prefix('!') {
            Some(neg) => exclude.insert(neg),
            None => include.insert(v.as_str()),
        };
    }
    (include, exclude)
}

fn passes(include: &BTreeSet<&str>, exclude: &BTreeSet<&str>, value: &str) -> bool {
    (include.is_empty() || include.contains(value)) && !exclude.contains(value)
}

/// Resolve a pod selector spec into matching pods.
///
/// Explicit `pods` bypass the list filters; pods that no longer exist are
/// skipped. The result is unordered; the caller sorts ids.
pub async fn select_pods(
    inventory: &dyn ClusterInventory,
    scope: &ScopeOptions,
    spec: &PodSelectorSpec,
) -> Result<Vec<Pod>, SelectError> {
    let mut pods = if spec.pods.is_empty() {
        list_candidates(inventory, scope, spec).await?
    } else {
        get_explicit(inventory, scope, spec).await?
    };

    if !spec.nodes.is_empty() || !spec.node_selectors.is_empty() {
        let nodes = node_names(inventory, spec).await?;
        pods.retain(|p| {
            p.spec
                .as_ref()
                .and_then(|s| s.node_name.as_deref())
                .is_some_and(|n| nodes.contains(n))
        });
    }

    if scope.enable_filter_namespace {
        pods = filter_injectable_namespaces(inventory, pods).await?;
    }

    let (ns_include, ns_exclude) = split_negations(&spec.namespaces);
    let (phase_include, phase_exclude) = split_negations(&spec.pod_phase_selectors);

    pods.retain(|pod| {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        if pod.metadata.deletion_timestamp.is_some() {
            debug!(pod = %pod_id(pod), "skipping pod being deleted");
            return false;
        }
        if spec.pods.is_empty() && !passes(&ns_include, &ns_exclude, namespace) {
            return false;
        }
        if !matches_annotations(pod, &spec.annotation_selectors) {
            return false;
        }
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or_default();
        if !passes(&phase_include, &phase_exclude, phase) {
            return false;
        }
        scope.is_namespace_allowed(namespace)
    });

    Ok(pods)
}

async fn get_explicit(
    inventory: &dyn ClusterInventory,
    scope: &ScopeOptions,
    spec: &PodSelectorSpec,
) -> Result<Vec<Pod>, SelectError> {
    let mut pods = Vec::new();
    for (namespace, names) in &spec.pods {
        if !scope.is_in_scope(namespace) {
            debug!(%namespace, "skipping namespace outside of the controller's scope");
            continue;
        }
        for name in names {
            match inventory.get_pod(namespace, name).await? {
                Some(pod) => pods.push(pod),
                None => warn!(%namespace, pod = %name, "selected pod not found"),
            }
        }
    }
    Ok(pods)
}

async fn list_candidates(
    inventory: &dyn ClusterInventory,
    scope: &ScopeOptions,
    spec: &PodSelectorSpec,
) -> Result<Vec<Pod>, SelectError> {
    let (include, _) = split_negations(&spec.namespaces);

    if !scope.cluster_scoped {
        if include.len() > 1 {
            return Err(SelectError::invalid(
                "more than one namespace cannot be selected in namespace scoped mode",
            ));
        }
        if let Some(ns) = include.iter().next() {
            if *ns != scope.target_namespace {
                return Err(SelectError::invalid(format!(
                    "namespace {ns:?} is out of the controller's scope"
                )));
            }
        }
    }

    let label_selector =
        label_selector_string(&spec.label_selectors, &spec.expression_selectors)?;
    let field_selector = field_selector_string(&spec.field_selectors);
    let query = |namespace: Option<String>| PodQuery {
        namespace,
        label_selector: label_selector.clone(),
        field_selector: field_selector.clone(),
    };

    let mut pods = Vec::new();
    if include.is_empty() {
        let namespace = (!scope.cluster_scoped).then(|| scope.target_namespace.clone());
        pods.extend(inventory.list_pods(&query(namespace)).await?);
    } else {
        for ns in include {
            pods.extend(inventory.list_pods(&query(Some(ns.to_string()))).await?);
        }
    }
    Ok(pods)
}

async fn node_names(
    inventory: &dyn ClusterInventory,
    spec: &PodSelectorSpec,
) -> Result<BTreeSet<String>, SelectError> {
    let mut names = BTreeSet::new();
    for name in &spec.nodes {
        match inventory.get_node(name).await? {
            Some(node) => names.extend(node.metadata.name),
            None => warn!(node = %name, "selected node not found"),
        }
    }
    if !spec.node_selectors.is_empty() {
        let selector = label_selector_string(&spec.node_selectors, &[])?.unwrap_or_default();
        for node in inventory.list_nodes(&selector).await? {
            names.extend(node.metadata.name);
        }
    }
    Ok(names)
}

async fn filter_injectable_namespaces(
    inventory: &dyn ClusterInventory,
    pods: Vec<Pod>,
) -> Result<Vec<Pod>, SelectError> {
    let mut verdicts: HashMap<String, bool> = HashMap::new();
    let mut kept = Vec::with_capacity(pods.len());
    for pod in pods {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let allowed = match verdicts.get(&namespace) {
            Some(v) => *v,
            None => {
                let v = inventory
                    .get_namespace(&namespace)
                    .await?
                    .and_then(|ns| ns.metadata.annotations)
                    .and_then(|a| a.get(NAMESPACE_INJECT_ANNOTATION).cloned())
                    .is_some_and(|v| v == NAMESPACE_INJECT_ENABLED);
                verdicts.insert(namespace, v);
                v
            }
        };
        if allowed {
            kept.push(pod);
        }
    }
    Ok(kept)
}

fn matches_annotations(pod: &Pod, wanted: &std::collections::BTreeMap<String, String>) -> bool {
    if wanted.is_empty() {
        return true;
    }
    let Some(annotations) = &pod.metadata.annotations else {
        return false;
    };
    wanted
        .iter()
        .all(|(k, v)| annotations.get(k).is_some_and(|actual| actual == v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::MockClusterInventory;
    use k8s_openapi::api::core::v1::{Container, Namespace, Node, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::BTreeMap;

    fn pod(ns: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some(ns.into()),
                name: Some(name.into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "app".into(),
                    ..Default::default()
                }],
                node_name: Some("node-a".into()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".into()),
                ..Default::default()
            }),
        }
    }

    fn names(pods: &[Pod]) -> Vec<String> {
        let mut ids: Vec<_> = pods.iter().map(pod_id).collect();
        ids.sort();
        ids
    }

    #[test]
    fn label_selector_renders_every_operator() {
        let labels = BTreeMap::from([("app".to_string(), "web".to_string())]);
        let exprs = vec![
            SelectorRequirement {
                key: "tier".into(),
                operator: "In".into(),
                values: vec!["a".into(), "b".into()],
            },
            SelectorRequirement {
                key: "canary".into(),
                operator: "DoesNotExist".into(),
                values: vec![],
            },
        ];
        assert_eq!(
            label_selector_string(&labels, &exprs).unwrap().as_deref(),
            Some("app=web,tier in (a,b),!canary")
        );
        assert_eq!(label_selector_string(&BTreeMap::new(), &[]).unwrap(), None);

        let bad = vec![SelectorRequirement {
            key: "x".into(),
            operator: "Gt".into(),
            values: vec![],
        }];
        assert!(matches!(
            label_selector_string(&BTreeMap::new(), &bad),
            Err(SelectError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn container_ids_include_sidecars_and_filter_names() {
        let mut p = pod("default", "web-0");
        if let Some(spec) = p.spec.as_mut() {
            spec.init_containers = Some(vec![
                Container {
                    name: "proxy".into(),
                    restart_policy: Some("Always".into()),
                    ..Default::default()
                },
                Container {
                    name: "migrate".into(),
                    ..Default::default()
                },
            ]);
        }
        assert_eq!(
            container_ids(&p, &[]),
            vec!["default/web-0/app".to_string(), "default/web-0/proxy".to_string()]
        );
        assert_eq!(
            container_ids(&p, &["proxy".to_string(), "missing".to_string()]),
            vec!["default/web-0/proxy".to_string()]
        );
    }

    /// Story: an experiment names two pods explicitly and one of them has
    /// already been deleted. Selection keeps the survivor instead of failing.
    #[tokio::test]
    async fn story_explicit_pods_skip_missing() {
        let mut inv = MockClusterInventory::new();
        inv.expect_get_pod().returning(|ns, name| {
            Ok((name == "web-0").then(|| pod(ns, name)))
        });
        let spec = PodSelectorSpec {
            pods: BTreeMap::from([(
                "default".to_string(),
                vec!["web-0".to_string(), "web-1".to_string()],
            )]),
            ..Default::default()
        };
        let pods = select_pods(&inv, &ScopeOptions::default(), &spec).await.unwrap();
        assert_eq!(names(&pods), vec!["default/web-0".to_string()]);
    }

    #[tokio::test]
    async fn lists_each_included_namespace_with_pushed_down_selectors() {
        let mut inv = MockClusterInventory::new();
        inv.expect_list_pods()
            .withf(|q| {
                q.label_selector.as_deref() == Some("app=web")
                    && q.field_selector.as_deref() == Some("spec.nodeName=node-a")
            })
            .times(2)
            .returning(|q| {
                let ns = q.namespace.clone().unwrap_or_default();
                Ok(vec![pod(&ns, "web-0")])
            });
        let spec = PodSelectorSpec {
            namespaces: vec!["a".into(), "b".into()],
            label_selectors: BTreeMap::from([("app".to_string(), "web".to_string())]),
            field_selectors: BTreeMap::from([(
                "spec.nodeName".to_string(),
                "node-a".to_string(),
            )]),
            ..Default::default()
        };
        let pods = select_pods(&inv, &ScopeOptions::default(), &spec).await.unwrap();
        assert_eq!(names(&pods), vec!["a/web-0".to_string(), "b/web-0".to_string()]);
    }

    /// Story: a cluster-wide experiment excludes kube-system, only targets
    /// running pods carrying an opt-in annotation, and never touches a pod
    /// that is already terminating.
    #[tokio::test]
    async fn story_negations_annotations_phases_and_deleting_pods() {
        let mut inv = MockClusterInventory::new();
        inv.expect_list_pods()
            .withf(|q| q.namespace.is_none())
            .returning(|_| {
                let opted_in = |mut p: Pod| {
                    p.metadata.annotations =
                        Some(BTreeMap::from([("chaos".to_string(), "yes".to_string())]));
                    p
                };
                let mut pending = opted_in(pod("default", "pending"));
                pending.status = Some(PodStatus {
                    phase: Some("Pending".into()),
                    ..Default::default()
                });
                let mut deleting = opted_in(pod("default", "deleting"));
                deleting.metadata.deletion_timestamp = Some(Time(Default::default()));
                Ok(vec![
                    opted_in(pod("default", "web-0")),
                    pod("default", "no-annotation"),
                    opted_in(pod("kube-system", "dns")),
                    pending,
                    deleting,
                ])
            });
        let spec = PodSelectorSpec {
            namespaces: vec!["!kube-system".into()],
            annotation_selectors: BTreeMap::from([("chaos".to_string(), "yes".to_string())]),
            pod_phase_selectors: vec!["!Pending".into()],
            ..Default::default()
        };
        let pods = select_pods(&inv, &ScopeOptions::default(), &spec).await.unwrap();
        assert_eq!(names(&pods), vec!["default/web-0".to_string()]);
    }

    #[tokio::test]
    async fn node_filters_combine_names_and_labels() {
        let mut inv = MockClusterInventory::new();
        inv.expect_list_pods().returning(|_| {
            let mut on_b = pod("default", "web-1");
            if let Some(s) = on_b.spec.as_mut() {
                s.node_name = Some("node-b".into());
            }
            let mut on_c = pod("default", "web-2");
            if let Some(s) = on_c.spec.as_mut() {
                s.node_name = Some("node-c".into());
            }
            Ok(vec![pod("default", "web-0"), on_b, on_c])
        });
        inv.expect_get_node().returning(|name| {
            Ok(Some(Node {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }))
        });
        inv.expect_list_nodes()
            .withf(|sel| sel == "zone=b")
            .returning(|_| {
                Ok(vec![Node {
                    metadata: ObjectMeta {
                        name: Some("node-b".into()),
                        ..Default::default()
                    },
                    ..Default::default()
                }])
            });
        let spec = PodSelectorSpec {
            nodes: vec!["node-a".into()],
            node_selectors: BTreeMap::from([("zone".to_string(), "b".to_string())]),
            ..Default::default()
        };
        let pods = select_pods(&inv, &ScopeOptions::default(), &spec).await.unwrap();
        assert_eq!(
            names(&pods),
            vec!["default/web-0".to_string(), "default/web-1".to_string()]
        );
    }

    #[tokio::test]
    async fn namespace_inject_filter_and_ignored_pattern() {
        let mut inv = MockClusterInventory::new();
        inv.expect_list_pods().returning(|_| {
            Ok(vec![
                pod("enabled", "a"),
                pod("plain", "b"),
                pod("enabled-canary", "c"),
            ])
        });
        inv.expect_get_namespace().returning(|name| {
            let annotations = name.starts_with("enabled").then(|| {
                BTreeMap::from([(
                    NAMESPACE_INJECT_ANNOTATION.to_string(),
                    NAMESPACE_INJECT_ENABLED.to_string(),
                )])
            });
            Ok(Some(Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    annotations,
                    ..Default::default()
                },
                ..Default::default()
            }))
        });
        let scope = ScopeOptions {
            enable_filter_namespace: true,
            ignored_namespaces: Some(regex::Regex::new("canary").unwrap()),
            ..Default::default()
        };
        let pods = select_pods(&inv, &scope, &PodSelectorSpec::default()).await.unwrap();
        assert_eq!(names(&pods), vec!["enabled/a".to_string()]);
    }

    #[tokio::test]
    async fn namespace_scoped_mode_rejects_foreign_namespaces() {
        let inv = MockClusterInventory::new();
        let scope = ScopeOptions {
            cluster_scoped: false,
            target_namespace: "chaos".into(),
            ..Default::default()
        };
        let spec = PodSelectorSpec {
            namespaces: vec!["default".into()],
            ..Default::default()
        };
        assert!(matches!(
            select_pods(&inv, &scope, &spec).await,
            Err(SelectError::InvalidSpec { .. })
        ));
    }

    #[tokio::test]
    async fn namespace_scoped_mode_lists_target_namespace() {
        let mut inv = MockClusterInventory::new();
        inv.expect_list_pods()
            .withf(|q| q.namespace.as_deref() == Some("chaos"))
            .returning(|_| Ok(vec![pod("chaos", "web-0")]));
        let scope = ScopeOptions {
            cluster_scoped: false,
            target_namespace: "chaos".into(),
            ..Default::default()
        };
        let pods = select_pods(&inv, &scope, &PodSelectorSpec::default()).await.unwrap();
        assert_eq!(names(&pods), vec!["chaos/web-0".to_string()]);
    }

    #[tokio::test]
    async fn list_failures_surface_as_inventory_errors() {
        let mut inv = MockClusterInventory::new();
        inv.expect_list_pods().returning(|_| {
            Err(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".into(),
                message: "etcd timeout".into(),
                reason: "InternalError".into(),
                code: 500,
            }))
        });
        let err = select_pods(&inv, &ScopeOptions::default(), &PodSelectorSpec::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SelectError::Inventory { .. }));
    }
}
