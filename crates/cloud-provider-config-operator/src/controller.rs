//! Runs the [`CloudProviderConfigReconciler`] whenever the cloud provider configuration or the
//! [`Cluster`] singleton changes.

use std::{sync::Arc, time::Duration};

use futures::{StreamExt, future};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    ResourceExt,
    runtime::{Controller, controller::Action, reflector::ObjectRef, watcher},
};
use tracing::instrument;

use crate::{
    client::Client,
    crd::{Cluster, SINGLETON_CLUSTER_NAME},
    logging::controller::{ReconcilerError, report_controller_reconciled},
    reconciler::{
        CLOUD_PROVIDER_CONFIG_NAME, CLOUD_PROVIDER_CONFIG_NAMESPACE, CONTROLLER_NAME,
        CloudProviderConfigReconciler, Error, ReconcileOutcome,
    },
};

/// Requeue policy of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerOptions {
    /// How long to wait before reconciling again after a successful pass.
    pub resync_interval: Duration,

    /// How long to wait before retrying a failed pass.
    pub error_requeue_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(10 * 60),
            error_requeue_delay: Duration::from_secs(5),
        }
    }
}

struct Ctx {
    reconciler: CloudProviderConfigReconciler<Client, Client>,
    options: ControllerOptions,
}

/// Watches the cloud provider configuration and keeps it converged until `shutdown` completes.
pub async fn run_controller<F>(client: Client, options: ControllerOptions, shutdown: F)
where
    F: Future<Output = ()> + Send + Sync + 'static,
{
    let reconciler = CloudProviderConfigReconciler::new(client.clone(), client.clone());
    let target = reconciler.target();

    let config_maps = client.get_namespaced_api::<ConfigMap>(CLOUD_PROVIDER_CONFIG_NAMESPACE);
    let clusters = client.get_all_api::<Cluster>();

    tracing::info!(
        controller.name = CONTROLLER_NAME,
        config_map = %target,
        ?options,
        "starting controller"
    );

    Controller::new(
        config_maps,
        watcher::Config::default().fields(&format!("metadata.name={CLOUD_PROVIDER_CONFIG_NAME}")),
    )
    .watches(
        clusters,
        watcher::Config::default().fields(&format!("metadata.name={SINGLETON_CLUSTER_NAME}")),
        move |_: Cluster| Some(target.clone()),
    )
    .graceful_shutdown_on(shutdown)
    .run(
        reconcile,
        error_policy,
        Arc::new(Ctx {
            reconciler,
            options,
        }),
    )
    .for_each(|result| {
        report_controller_reconciled(&client, CONTROLLER_NAME, &result);
        future::ready(())
    })
    .await;

    tracing::info!(controller.name = CONTROLLER_NAME, "controller stopped");
}

#[instrument(skip_all, fields(config_map = %ObjectRef::from_obj(config_map.as_ref())))]
async fn reconcile(config_map: Arc<ConfigMap>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    if ObjectRef::from_obj(config_map.as_ref()) != ctx.reconciler.target() {
        tracing::debug!(
            name = %config_map.name_any(),
            namespace = ?config_map.namespace(),
            "ignoring unrelated ConfigMap"
        );
        return Ok(Action::await_change());
    }

    let outcome = ctx.reconciler.reconcile().await?;
    tracing::debug!(%outcome, "reconciliation pass finished");

    Ok(match outcome {
        ReconcileOutcome::Disabled => Action::await_change(),
        ReconcileOutcome::Unchanged | ReconcileOutcome::Updated => {
            Action::requeue(ctx.options.resync_interval)
        }
    })
}

fn error_policy(_config_map: Arc<ConfigMap>, error: &Error, ctx: Arc<Ctx>) -> Action {
    if error.is_retriable() {
        Action::requeue(ctx.options.error_requeue_delay)
    } else {
        Action::await_change()
    }
}
