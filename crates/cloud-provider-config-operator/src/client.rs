use async_trait::async_trait;
use k8s_openapi::{NamespaceResourceScope, api::core::v1::ConfigMap};
use kube::{Api, Resource, ResourceExt, api::PostParams};
use serde::de::DeserializeOwned;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::instrument;

use crate::{
    crd::{Cluster, SINGLETON_CLUSTER_NAME},
    store::{self, ClusterStateSource, ConfigMapStore},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create kubernetes client"))]
    CreateKubeClient { source: kube::Error },
}

/// This `Client` can be used to access Kubernetes.
/// It wraps an underlying [`kube::Client`] and provides some common functionality.
#[derive(Clone)]
pub struct Client {
    client: kube::Client,
    post_params: PostParams,
}

impl Client {
    pub fn new(client: kube::Client, field_manager: Option<String>) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager,
                ..PostParams::default()
            },
        }
    }

    /// Infers the Kubernetes configuration from the environment (in-cluster or kubeconfig) and
    /// creates a [`Client`] which writes with the given `field_manager`.
    pub async fn try_default(field_manager: impl Into<String>) -> Result<Self, Error> {
        let client = kube::Client::try_default()
            .await
            .context(CreateKubeClientSnafu)?;

        Ok(Self::new(client, Some(field_manager.into())))
    }

    /// Returns a [`kube::Client`] that can be freely used.
    /// It does not need to be cloned before first use.
    pub fn as_kube_client(&self) -> kube::Client {
        self.client.clone()
    }

    /// Retrieves a single cluster-scoped resource with the given name.
    pub async fn get_cluster_scoped<T>(&self, resource_name: &str) -> store::Result<T>
    where
        T: Clone + std::fmt::Debug + DeserializeOwned + Resource<DynamicType = ()>,
    {
        self.get_all_api::<T>()
            .get(resource_name)
            .await
            .map_err(|source| classify_api_error::<T>(source, resource_name))
    }

    /// Retrieves a single namespaced resource with the given name.
    pub async fn get_namespaced<T>(&self, resource_name: &str, namespace: &str) -> store::Result<T>
    where
        T: Clone
            + std::fmt::Debug
            + DeserializeOwned
            + Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        self.get_namespaced_api::<T>(namespace)
            .get(resource_name)
            .await
            .map_err(|source| classify_api_error::<T>(source, resource_name))
    }

    /// Replaces a namespaced resource.
    ///
    /// This will _update_ an existing resource. If the `resourceVersion` of `resource` is set,
    /// the write fails with a conflict when the object was modified in the meantime.
    pub async fn update<T>(&self, resource: &T) -> store::Result<T>
    where
        T: Clone
            + std::fmt::Debug
            + DeserializeOwned
            + serde::Serialize
            + Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        let (name, namespace) = name_and_namespace(resource)?;

        self.get_namespaced_api::<T>(&namespace)
            .replace(&name, &self.post_params, resource)
            .await
            .map_err(|source| classify_api_error::<T>(source, &name))
    }

    pub fn get_all_api<T>(&self) -> Api<T>
    where
        T: Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    pub fn get_namespaced_api<T>(&self, namespace: &str) -> Api<T>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterStateSource for Client {
    #[instrument(skip(self))]
    async fn cluster_state(&self) -> store::Result<Cluster> {
        self.get_cluster_scoped(SINGLETON_CLUSTER_NAME).await
    }
}

#[async_trait]
impl ConfigMapStore for Client {
    #[instrument(skip(self))]
    async fn get_config_map(&self, name: &str, namespace: &str) -> store::Result<ConfigMap> {
        self.get_namespaced(name, namespace).await
    }

    #[instrument(skip(self, config_map), fields(config_map = %config_map.name_any()))]
    async fn update_config_map(&self, config_map: &ConfigMap) -> store::Result<ConfigMap> {
        self.update(config_map).await
    }
}

/// Sorts API errors into the kinds reconcilers need to tell apart.
fn classify_api_error<T>(source: kube::Error, name: &str) -> store::Error
where
    T: Resource<DynamicType = ()>,
{
    let kind = T::kind(&()).into_owned();
    let name = name.to_owned();

    match &source {
        kube::Error::Api(status) if status.code == 404 => store::Error::NotFound { kind, name },
        kube::Error::Api(status) if status.code == 409 => store::Error::Conflict { kind, name },
        _ => store::Error::Kube { source },
    }
}

/// Namespaced objects can only be written back when they know their namespace.
fn name_and_namespace<T: Resource>(resource: &T) -> store::Result<(String, String)> {
    let name = resource.name_any();
    let namespace = resource
        .namespace()
        .context(store::ObjectHasNoNamespaceSnafu { name: &name })?;

    Ok((name, namespace))
}
