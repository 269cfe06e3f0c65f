//! The seam between reconcilers and the Kubernetes API.
//!
//! Reconcilers only talk to the cluster through the traits in this module, which are implemented
//! by [`Client`](crate::client::Client). This keeps a single reconciliation pass testable
//! without a running API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use snafu::Snafu;

use crate::crd::Cluster;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{kind} {name:?} not found"))]
    NotFound { kind: String, name: String },

    #[snafu(display("{kind} {name:?} was modified concurrently"))]
    Conflict { kind: String, name: String },

    #[snafu(display("object {name:?} is missing a namespace"))]
    ObjectHasNoNamespace { name: String },

    #[snafu(display("request to the Kubernetes API failed"))]
    Kube { source: kube::Error },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Provides read access to the [`Cluster`] singleton.
#[async_trait]
pub trait ClusterStateSource: Send + Sync {
    /// Retrieves the current state of the [`Cluster`] singleton.
    async fn cluster_state(&self) -> Result<Cluster>;
}

/// Provides read and write access to [`ConfigMap`]s.
#[async_trait]
pub trait ConfigMapStore: Send + Sync {
    /// Retrieves the ConfigMap `name` in `namespace`.
    async fn get_config_map(&self, name: &str, namespace: &str) -> Result<ConfigMap>;

    /// Replaces an existing ConfigMap.
    ///
    /// The `resourceVersion` of `config_map` is sent along, so that concurrent modifications
    /// are detected and reported as [`Error::Conflict`].
    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;
}

#[async_trait]
impl<T> ClusterStateSource for std::sync::Arc<T>
where
    T: ClusterStateSource + ?Sized,
{
    async fn cluster_state(&self) -> Result<Cluster> {
        (**self).cluster_state().await
    }
}

#[async_trait]
impl<T> ConfigMapStore for std::sync::Arc<T>
where
    T: ConfigMapStore + ?Sized,
{
    async fn get_config_map(&self, name: &str, namespace: &str) -> Result<ConfigMap> {
        (**self).get_config_map(name, namespace).await
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        (**self).update_config_map(config_map).await
    }
}
