//! Reports the results of the controller's reconciliation passes.
//!
//! Every item produced by [`kube::runtime::Controller::run`] is handed to
//! [`report_controller_reconciled`], which logs it and, for failed passes, tells the owner of the
//! ConfigMap through a Kubernetes event.

use std::error::Error;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    core::DynamicObject,
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
    },
};

use crate::{client::Client, logging::k8s_events::publish_reconcile_error};

/// Classification of reconciliation errors for reporting and requeueing.
pub trait ReconcilerError: Error {
    /// `PascalCase`d name of the error kind, used as the event reason.
    ///
    /// Usually delegated to [`strum::EnumDiscriminants`] and [`strum::IntoStaticStr`].
    fn category(&self) -> &'static str;

    /// Whether reconciling again without an external change can succeed.
    fn is_retriable(&self) -> bool;

    /// The object the error is about, if it is not the reconciled ConfigMap itself (for example
    /// the `Cluster` singleton when the operator flags could not be read).
    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

/// Logs the result of a reconciliation pass of the ConfigMap controller.
///
/// Failed passes are additionally published as Warning events on the ConfigMap. Errors of the
/// controller machinery itself (watches, queue) are not tied to the ConfigMap and are only logged.
pub fn report_controller_reconciled<ReconcileErr, QueueErr>(
    client: &Client,
    controller_name: &str,
    result: &Result<(ObjectRef<ConfigMap>, Action), controller::Error<ReconcileErr, QueueErr>>,
) where
    ReconcileErr: ReconcilerError + 'static,
    QueueErr: Error + 'static,
{
    match result {
        Ok((config_map, action)) => {
            tracing::info!(
                controller.name = controller_name,
                %config_map,
                ?action,
                "Reconciled ConfigMap"
            );
        }
        Err(controller::Error::ReconcilerFailed(error, config_map)) => {
            tracing::error!(
                controller.name = controller_name,
                %config_map,
                category = error.category(),
                retriable = error.is_retriable(),
                error = error as &dyn Error,
                "Failed to reconcile ConfigMap"
            );
            publish_reconcile_error(client, controller_name, error, config_map);
        }
        Err(error) => {
            tracing::error!(
                controller.name = controller_name,
                error = error as &dyn Error,
                "Controller failed"
            );
        }
    }
}
