//! An operator keeping the cloud provider configuration of an OpenShift cluster converged.
//!
//! The `openshift-config/cloud-provider-config` ConfigMap carries the cloud provider settings as
//! a flat JSON object. While the `aro.cloudproviderconfig.enabled` operator flag of the
//! [`crd::Cluster`] singleton is set, the [`reconciler`] makes sure outbound SNAT stays disabled.
//!
//! - [`flat_json`] merges required settings into flat JSON objects.
//! - [`reconciler`] runs a single reconciliation pass against a [`store`].
//! - [`controller`] triggers reconciliation passes from Kubernetes watches.

pub mod cli;
pub mod client;
pub mod controller;
pub mod crd;
pub mod flat_json;
pub mod logging;
pub mod reconciler;
pub mod store;
pub mod utils;

// External re-exports
pub use k8s_openapi;
pub use kube;
