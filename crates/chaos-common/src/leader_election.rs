//! Leader election using Kubernetes Leases
//!
//! Only the leader runs chaos controllers; standby replicas wait on the lease.
//! Updates carry the lease's resourceVersion, so two replicas racing for an
//! expired lease cannot both win: the loser gets 409 Conflict and waits.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lease name for the chaos controller leader election
pub const LEADER_LEASE_NAME: &str = "chaos-controller-leader";

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    /// Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// What to do with the lease as observed at `now`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseDecision {
    /// No lease object exists yet
    Create,
    /// We hold it, renew
    Renew,
    /// Someone else held it but it expired
    TakeOver,
    /// Someone else holds a live lease
    Wait,
}

/// Decide how to treat an existing (or missing) lease.
pub fn decide(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let Some(lease) = lease else {
        return LeaseDecision::Create;
    };
    let spec = lease.spec.as_ref();
    if spec.and_then(|s| s.holder_identity.as_deref()) == Some(identity) {
        return LeaseDecision::Renew;
    }

    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (renew_time, duration_secs) {
        (Some(rt), Some(secs)) => now > rt.0 + chrono::Duration::seconds(secs as i64),
        _ => true,
    };
    if expired || spec.and_then(|s| s.holder_identity.as_ref()).is_none() {
        LeaseDecision::TakeOver
    } else {
        LeaseDecision::Wait
    }
}

/// Leader elector using Kubernetes Leases
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    /// Create a new leader elector (30s lease, 10s renew, 5s retry)
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Block until leadership is acquired.
    ///
    /// Returns a token that is cancelled when leadership is lost; the caller
    /// should stop its controllers at that point.
    pub async fn acquire(self: Arc<Self>) -> CancellationToken {
        info!(identity = %self.identity, lease = %self.lease_name, "Waiting for leadership");

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => break,
                Ok(false) => debug!(identity = %self.identity, "Lease held by another replica"),
                Err(e) => warn!(
                    identity = %self.identity,
                    error = %e,
                    "Failed to acquire lease, retrying"
                ),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }

        info!(identity = %self.identity, "Leadership acquired");
        let lost = CancellationToken::new();
        let elector = Arc::clone(&self);
        let token = lost.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RENEW_INTERVAL).await;
                match elector.try_acquire_or_renew().await {
                    Ok(true) => {}
                    Ok(false) | Err(_) => {
                        warn!(identity = %elector.identity, "Leadership lost");
                        token.cancel();
                        return;
                    }
                }
            }
        });
        lost
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let existing = match api.get(&self.lease_name).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e.into()),
        };

        let result = match decide(existing.as_ref(), &self.identity, now) {
            LeaseDecision::Wait => return Ok(false),
            LeaseDecision::Create => {
                api.create(&PostParams::default(), &self.lease(None, now, 0))
                    .await
            }
            LeaseDecision::Renew => {
                let mut renewed = existing.unwrap_or_default();
                if let Some(spec) = renewed.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                api.replace(&self.lease_name, &PostParams::default(), &renewed)
                    .await
            }
            LeaseDecision::TakeOver => {
                let transitions = existing
                    .as_ref()
                    .and_then(|l| l.spec.as_ref())
                    .and_then(|s| s.lease_transitions)
                    .unwrap_or(0);
                let rv = existing.and_then(|l| l.metadata.resource_version);
                let lease = self.lease(rv, now, transitions + 1);
                api.replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
            }
        };

        match result {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease update conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lease(&self, resource_version: Option<String>, now: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease_held_by(holder: &str, renewed: DateTime<Utc>) -> Lease {
        Lease {
            metadata: ObjectMeta::default(),
            spec: Some(LeaseSpec {
                holder_identity: Some(holder.to_string()),
                lease_duration_seconds: Some(30),
                renew_time: Some(MicroTime(renewed)),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn missing_lease_is_created() {
        assert_eq!(decide(None, "a", Utc::now()), LeaseDecision::Create);
    }

    #[test]
    fn own_lease_is_renewed() {
        let now = Utc::now();
        assert_eq!(decide(Some(&lease_held_by("a", now)), "a", now), LeaseDecision::Renew);
    }

    /// Story: A standby replica must not steal a lease that its holder keeps
    /// renewing, but takes over once the holder stops renewing.
    #[test]
    fn story_standby_takes_over_only_expired_leases() {
        let now = Utc::now();
        let fresh = lease_held_by("a", now - chrono::Duration::seconds(5));
        let stale = lease_held_by("a", now - chrono::Duration::seconds(31));

        assert_eq!(decide(Some(&fresh), "b", now), LeaseDecision::Wait);
        assert_eq!(decide(Some(&stale), "b", now), LeaseDecision::TakeOver);
    }
}
