//! `PodChaos` `pod-kill`: delete the target pod once

use std::sync::Arc;

use async_trait::async_trait;
use chaos_common::crd::{Phase, PodChaos, Record};
use chaos_common::target::PodTarget;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams};
use kube::Client;
use tracing::{debug, info};

use crate::injector::{InjectContext, Injector};
use crate::InjectError;

#[cfg(test)]
use mockall::automock;

/// Deletes pods
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodClient: Send + Sync {
    /// Delete a pod; a pod that is already gone is not an error
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_secs: u32,
    ) -> Result<(), kube::Error>;
}

/// Pod client backed by the API server
#[derive(Clone)]
pub struct KubePodClient {
    client: Client,
}

impl KubePodClient {
    /// Create a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_secs: u32,
    ) -> Result<(), kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let dp = DeleteParams {
            grace_period_seconds: Some(grace_period_secs),
            ..Default::default()
        };
        match api.delete(name, &dp).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(%namespace, pod = %name, "pod already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Kills the record's pod on apply; recover has nothing to undo
pub struct PodKillInjector {
    pods: Arc<dyn PodClient>,
    default_grace_period: u32,
}

impl PodKillInjector {
    /// Use `default_grace_period` when the spec leaves it at zero
    pub fn new(pods: Arc<dyn PodClient>, default_grace_period: u32) -> Self {
        Self {
            pods,
            default_grace_period,
        }
    }

    fn grace_period(&self, obj: &PodChaos) -> u32 {
        match u32::try_from(obj.spec.grace_period) {
            Ok(secs) if secs > 0 => secs,
            _ => self.default_grace_period,
        }
    }
}

#[async_trait]
impl Injector<PodChaos> for PodKillInjector {
    async fn apply(
        &self,
        _ctx: &InjectContext,
        index: usize,
        records: &[Record],
        obj: &mut PodChaos,
    ) -> Result<Phase, InjectError> {
        let record = records
            .get(index)
            .ok_or_else(|| InjectError::failed(format!("no record at index {index}")))?;
        let target: PodTarget = record
            .id
            .parse()
            .map_err(|e| InjectError::failed(format!("bad pod id {:?}: {e}", record.id)))?;

        let grace = self.grace_period(obj);
        self.pods
            .delete_pod(&target.namespace, &target.name, grace)
            .await
            .map_err(|e| InjectError::failed(format!("delete pod {target}: {e}")))?;

        info!(pod = %target, grace_period = grace, "killed pod");
        Ok(Phase::injected())
    }

    async fn recover(
        &self,
        _ctx: &InjectContext,
        _index: usize,
        _records: &[Record],
        _obj: &mut PodChaos,
    ) -> Result<Phase, InjectError> {
        Ok(Phase::not_injected())
    }
}
