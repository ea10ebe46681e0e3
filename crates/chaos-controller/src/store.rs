//! Read and write experiments

use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use chaos_common::crd::ChaosResource;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};

use crate::StoreError;

#[cfg(test)]
use mockall::automock;

/// Namespace and name of an experiment
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExperimentKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ExperimentKey {
    /// Key from parts
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object
    pub fn of<K: ChaosResource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for ExperimentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Last-writer-wins access to experiments of one kind.
///
/// Writes carry the object's `resourceVersion`; a stale version fails with
/// [`StoreError::Conflict`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore<K: ChaosResource>: Send + Sync {
    /// Read the current object
    async fn get(&self, key: &ExperimentKey) -> Result<K, StoreError>;

    /// Replace metadata and spec
    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace the status subresource
    async fn update_status(&self, obj: &K) -> Result<K, StoreError>;
}

/// Store backed by the API server
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    /// Create a store using `client`
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K: ChaosResource> KubeStore<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<K: ChaosResource> ResourceStore<K> for KubeStore<K> {
    async fn get(&self, key: &ExperimentKey) -> Result<K, StoreError> {
        self.api(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| StoreError::from_kube(key.to_string(), e))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = ExperimentKey::of(obj);
        self.api(&key.namespace)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(key.to_string(), e))
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let key = ExperimentKey::of(obj);
        let body = serde_json::to_vec(obj).map_err(|e| StoreError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.api(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| StoreError::from_kube(key.to_string(), e))
    }
}
