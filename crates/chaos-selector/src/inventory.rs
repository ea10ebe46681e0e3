//! Read access to the cluster objects selection looks at

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::api::{Api, ListParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

/// Filters pushed down to a pod list call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodQuery {
    /// Namespace to list in; `None` lists every namespace
    pub namespace: Option<String>,
    /// Label selector string (`app=web,tier in (a,b)`)
    pub label_selector: Option<String>,
    /// Field selector string (`metadata.name=web-0`)
    pub field_selector: Option<String>,
}

/// Pods, nodes and namespaces as seen by the selector.
///
/// `get_*` return `Ok(None)` for objects that do not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    /// Read one pod
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, kube::Error>;

    /// List pods matching a query
    async fn list_pods(&self, query: &PodQuery) -> Result<Vec<Pod>, kube::Error>;

    /// Read one node
    async fn get_node(&self, name: &str) -> Result<Option<Node>, kube::Error>;

    /// List nodes matching a label selector
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, kube::Error>;

    /// Read one namespace
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, kube::Error>;
}

/// Inventory backed by the API server
#[derive(Clone)]
pub struct KubeInventory {
    client: Client,
}

impl KubeInventory {
    /// Create an inventory reading through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterInventory for KubeInventory {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, kube::Error> {
        Api::<Pod>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
    }

    async fn list_pods(&self, query: &PodQuery) -> Result<Vec<Pod>, kube::Error> {
        let api: Api<Pod> = match &query.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let mut lp = ListParams::default();
        if let Some(labels) = &query.label_selector {
            lp = lp.labels(labels);
        }
        if let Some(fields) = &query.field_selector {
            lp = lp.fields(fields);
        }
        Ok(api.list(&lp).await?.items)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, kube::Error> {
        Api::<Node>::all(self.client.clone()).get_opt(name).await
    }

    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, kube::Error> {
        let lp = ListParams::default().labels(label_selector);
        Ok(Api::<Node>::all(self.client.clone()).list(&lp).await?.items)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, kube::Error> {
        Api::<Namespace>::all(self.client.clone())
            .get_opt(name)
            .await
    }
}
