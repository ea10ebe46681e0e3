//! kube-runtime glue: one `Controller` per experiment kind
//!
//! The controller watches the kind itself and every child kind its injector
//! owns. Child changes are mapped back to the experiments whose records point
//! at the child's pod.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chaos_common::crd::{ChaosResource, ChildKind};
use chaos_common::target::PodTarget;
use futures::{future, StreamExt, TryStreamExt};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::filter::SpecChangeFilter;
use crate::pipeline::reconcile_experiment;
use crate::steps::StepOutcome;
use crate::store::ExperimentKey;
use crate::ReconcileError;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Translate a merged step outcome into a controller action
pub fn to_action(outcome: StepOutcome, retry_interval: Duration) -> Action {
    let delay = match (outcome.requeue, outcome.requeue_after) {
        (true, Some(after)) => Some(after.min(retry_interval)),
        (true, None) => Some(retry_interval),
        (false, after) => after,
    };
    match delay {
        Some(d) => Action::requeue(d),
        None => Action::await_change(),
    }
}

/// Reconcile entry point handed to the controller
pub async fn reconcile<K: ChaosResource>(
    obj: Arc<K>,
    ctx: Arc<Context<K>>,
) -> Result<Action, ReconcileError> {
    let key = ExperimentKey::of(obj.as_ref());
    match reconcile_experiment(&ctx, &key).await {
        Ok(outcome) => Ok(to_action(outcome, ctx.config.retry_interval)),
        Err(ReconcileError::Malformed { message }) => {
            warn!(kind = %K::KIND, experiment = %key, %message, "experiment cannot be reconciled until its spec changes");
            Ok(Action::await_change())
        }
        Err(e) => Err(e),
    }
}

/// Requeue policy for failed reconciles
pub fn error_policy<K: ChaosResource>(
    obj: Arc<K>,
    error: &ReconcileError,
    ctx: Arc<Context<K>>,
) -> Action {
    if matches!(error, ReconcileError::Cancelled) {
        debug!(experiment = %obj.name_any(), "reconcile cancelled");
        return Action::await_change();
    }
    error!(
        kind = %K::KIND,
        experiment = %obj.name_any(),
        namespace = %obj.namespace().unwrap_or_default(),
        error = %error,
        "reconcile failed, requeueing"
    );
    Action::requeue(ctx.config.retry_interval)
}

/// Experiments in `store` with a record on the pod `namespace/name`
pub fn owners_of<K: ChaosResource>(store: &Store<K>, namespace: &str, name: &str) -> Vec<ObjectRef<K>> {
    store
        .state()
        .into_iter()
        .filter(|obj| {
            obj.records().is_some_and(|records| {
                records.iter().any(|record| {
                    record
                        .id
                        .parse::<PodTarget>()
                        .is_ok_and(|target| target.is_on_pod(namespace, name))
                })
            })
        })
        .map(|obj| ObjectRef::from_obj(obj.as_ref()))
        .collect()
}

fn child_resource(child: &ChildKind) -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(child.group, child.version, child.kind),
        child.plural,
    )
}

/// Build the controller future for kind `K`.
///
/// `workers` bounds concurrent reconciles; the runtime never runs two
/// reconciles of the same experiment at once.
pub fn controller_for<K: ChaosResource>(
    client: Client,
    ctx: Arc<Context<K>>,
    controls: &[ChildKind],
    workers: u16,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let wc = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    let experiments: Api<K> = Api::all(client.clone());
    let (reader, writer) = reflector::store::<K>();
    let filter = Arc::new(SpecChangeFilter::default());

    let trigger = watcher::watcher(experiments, wc.clone())
        .default_backoff()
        .reflect(writer)
        .try_filter(move |event| future::ready(filter.admit(event)))
        .applied_objects();

    let mut ctrl = Controller::for_stream(trigger, reader.clone())
        .with_config(controller::Config::default().concurrency(workers));

    for child in controls {
        let resource = child_resource(child);
        let children: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
        let store = reader.clone();
        info!(kind = %K::KIND, child = child.kind, "watching child kind");
        ctrl = ctrl.watches_with(children, resource, wc.clone(), move |obj: DynamicObject| {
            let namespace = obj.namespace().unwrap_or_default();
            let owners = owners_of(&store, &namespace, &obj.name_any());
            debug!(child = %obj.name_any(), %namespace, owners = owners.len(), "child changed");
            owners
        });
    }

    info!(kind = %K::KIND, workers, "- {} controller", K::KIND);
    Box::pin(
        ctrl.shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result(K::KIND.as_str())),
    )
}

/// Create a closure that logs reconciliation results for a named controller
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaos_common::crd::{PodChaos, Record};
    use kube::runtime::watcher::Event;

    use crate::testing::{epoch, pod_failure, FakeInjector, Harness, StaticSelector};

    #[test]
    fn outcomes_map_to_actions() {
        let retry = Duration::from_secs(10);
        assert_eq!(to_action(StepOutcome::done(), retry), Action::await_change());
        assert_eq!(to_action(StepOutcome::retry(), retry), Action::requeue(retry));
        assert_eq!(
            to_action(StepOutcome::after(Duration::from_secs(30)), retry),
            Action::requeue(Duration::from_secs(30))
        );
        let both = StepOutcome::retry().merge(StepOutcome::after(Duration::from_secs(3)));
        assert_eq!(to_action(both, retry), Action::requeue(Duration::from_secs(3)));
        let both = StepOutcome::retry().merge(StepOutcome::after(Duration::from_secs(300)));
        assert_eq!(to_action(both, retry), Action::requeue(retry));
    }

    /// Story: a PodNetworkChaos for `default/web-0` changes. Only the
    /// experiments holding a record on that pod, including container-level
    /// records, are re-enqueued.
    #[test]
    fn story_child_changes_map_to_owning_experiments() {
        let (reader, mut writer) = reflector::store::<PodChaos>();
        let mut owner = pod_failure("owner", None, epoch());
        owner.chaos_status_mut().experiment.records =
            Some(vec![Record::new("default/web-0/app", ".")]);
        let mut other = pod_failure("other", None, epoch());
        other.chaos_status_mut().experiment.records =
            Some(vec![Record::new("default/web-01", ".")]);
        let unselected = pod_failure("unselected", None, epoch());
        for obj in [owner, other, unselected] {
            writer.apply_watcher_event(&Event::Apply(obj));
        }

        let owners = owners_of(&reader, "default", "web-0");
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].name, "owner");
        assert!(owners_of(&reader, "other", "web-0").is_empty());
    }

    #[test]
    fn child_kinds_resolve_to_api_resources() {
        let resource = child_resource(&chaos_common::crd::POD_NETWORK_CHAOS);
        assert_eq!(resource.api_version, "chaos-mesh.org/v1alpha1");
        assert_eq!(resource.plural, "podnetworkchaos");
    }

    #[tokio::test]
    async fn malformed_experiments_wait_for_a_spec_change() {
        let h = Harness::new(StaticSelector::new(&["default/web-0"]), FakeInjector::default());
        let key = h.store.insert(pod_failure("bad", Some("forever"), epoch()));
        let obj = h.store.get_now(&key).unwrap();

        let action = reconcile(Arc::new(obj), Arc::new(h.ctx)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn store_failures_requeue_after_retry_interval() {
        let h = Harness::new(StaticSelector::new(&["default/web-0"]), FakeInjector::default());
        let retry = h.ctx.config.retry_interval;
        let obj = Arc::new(pod_failure("any", None, epoch()));
        let ctx = Arc::new(h.ctx);

        let err = ReconcileError::from(crate::StoreError::Api {
            key: "default/any".into(),
            message: "etcd unavailable".into(),
        });
        assert_eq!(error_policy(obj.clone(), &err, ctx.clone()), Action::requeue(retry));
        assert_eq!(
            error_policy(obj, &ReconcileError::Cancelled, ctx),
            Action::await_change()
        );
    }
}
