//! Reconciles the `openshift-config/cloud-provider-config` ConfigMap.
//!
//! The `config` field of this ConfigMap holds the cloud provider configuration as a flat JSON
//! object. Whenever the controller is enabled through its operator flag, a reconciliation pass
//! makes sure that the required settings (outbound SNAT disabled) are present, and writes the
//! ConfigMap back only if something had drifted.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{core::DynamicObject, runtime::reflector::ObjectRef};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::instrument;

use crate::{
    crd::{Cluster, SINGLETON_CLUSTER_NAME},
    flat_json,
    logging::controller::ReconcilerError,
    store::{self, ClusterStateSource, ConfigMapStore},
};

pub const CONTROLLER_NAME: &str = "AROCloudProviderConfig";

/// The operator flag gating this controller.
pub const CONTROLLER_ENABLED_FLAG: &str = "aro.cloudproviderconfig.enabled";

pub const CLOUD_PROVIDER_CONFIG_NAME: &str = "cloud-provider-config";
pub const CLOUD_PROVIDER_CONFIG_NAMESPACE: &str = "openshift-config";

/// The ConfigMap field holding the cloud provider configuration JSON.
pub const CONFIG_FIELD: &str = "config";

/// The settings enforced in the cloud provider configuration.
pub const REQUIRED_SETTINGS: &[(&str, &str)] = &[("disableOutboundSNAT", "true")];

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to retrieve the cluster state"))]
    GetClusterState { source: store::Error },

    #[snafu(display("ConfigMap {namespace}/{name} not found"))]
    TargetNotFound { name: String, namespace: String },

    #[snafu(display("failed to retrieve ConfigMap {namespace}/{name}"))]
    GetTarget {
        source: store::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("field {field} in ConfigMap {namespace}/{name} is missing"))]
    MissingField {
        field: String,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to merge required settings into field {field} of ConfigMap {namespace}/{name}"))]
    MergeConfig {
        source: flat_json::Error,
        field: String,
        name: String,
        namespace: String,
    },

    #[snafu(display("ConfigMap {namespace}/{name} was modified while it was being updated"))]
    PersistConflict {
        source: store::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to update ConfigMap {namespace}/{name}"))]
    UpdateTarget {
        source: store::Error,
        name: String,
        namespace: String,
    },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    /// Malformed ConfigMap contents stay malformed until someone fixes them, everything else is
    /// worth another attempt.
    fn is_retriable(&self) -> bool {
        !matches!(self, Self::MissingField { .. } | Self::MergeConfig { .. })
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::GetClusterState { .. } => {
                Some(ObjectRef::<Cluster>::new(SINGLETON_CLUSTER_NAME).erase())
            }
            Self::TargetNotFound { .. }
            | Self::GetTarget { .. }
            | Self::MissingField { .. }
            | Self::MergeConfig { .. }
            | Self::PersistConflict { .. }
            | Self::UpdateTarget { .. } => None,
        }
    }
}

/// The terminal state of a successful reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ReconcileOutcome {
    /// The controller is disabled by its operator flag, nothing was read or written.
    Disabled,

    /// The ConfigMap already contained the required settings, nothing was written.
    Unchanged,

    /// The ConfigMap had drifted and was written back.
    Updated,
}

/// Converges the cloud provider configuration on the required settings.
///
/// The reconciler holds no state between passes, each [`Self::reconcile`] call observes the
/// cluster afresh. Repeated passes without drift never write.
pub struct CloudProviderConfigReconciler<S, C> {
    cluster_state: S,
    config_maps: C,
    name: String,
    namespace: String,
    required: BTreeMap<String, String>,
}

impl<S, C> CloudProviderConfigReconciler<S, C>
where
    S: ClusterStateSource,
    C: ConfigMapStore,
{
    /// Creates a reconciler for `openshift-config/cloud-provider-config` enforcing
    /// [`REQUIRED_SETTINGS`].
    pub fn new(cluster_state: S, config_maps: C) -> Self {
        Self {
            cluster_state,
            config_maps,
            name: CLOUD_PROVIDER_CONFIG_NAME.to_owned(),
            namespace: CLOUD_PROVIDER_CONFIG_NAMESPACE.to_owned(),
            required: REQUIRED_SETTINGS
                .iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                .collect(),
        }
    }

    /// Replaces the enforced settings.
    pub fn with_required_settings(mut self, required: BTreeMap<String, String>) -> Self {
        self.required = required;
        self
    }

    /// The reference of the ConfigMap this reconciler converges.
    pub fn target(&self) -> ObjectRef<ConfigMap> {
        ObjectRef::new(&self.name).within(&self.namespace)
    }

    /// Runs a single reconciliation pass.
    #[instrument(skip(self), fields(config_map = %self.target()))]
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let cluster = self
            .cluster_state
            .cluster_state()
            .await
            .context(GetClusterStateSnafu)?;

        if !cluster
            .spec
            .operator_flags
            .is_enabled(CONTROLLER_ENABLED_FLAG)
        {
            tracing::debug!("controller is disabled");
            return Ok(ReconcileOutcome::Disabled);
        }

        tracing::debug!("running");
        self.update_cloud_provider_config().await
    }

    async fn update_cloud_provider_config(&self) -> Result<ReconcileOutcome> {
        let name = &self.name;
        let namespace = &self.namespace;

        let mut config_map = match self.config_maps.get_config_map(name, namespace).await {
            Ok(config_map) => config_map,
            Err(error) if error.is_not_found() => {
                tracing::debug!(
                    "the ConfigMap {name} was not found in the {namespace} namespace"
                );
                return TargetNotFoundSnafu { name, namespace }.fail();
            }
            Err(error) => return Err(error).context(GetTargetSnafu { name, namespace }),
        };

        let Some(config) = config_map
            .data
            .as_mut()
            .and_then(|data| data.get_mut(CONFIG_FIELD))
        else {
            return MissingFieldSnafu {
                field: CONFIG_FIELD,
                name,
                namespace,
            }
            .fail();
        };

        let merged = flat_json::merge(config, &self.required).context(MergeConfigSnafu {
            field: CONFIG_FIELD,
            name,
            namespace,
        })?;

        if !merged.changed {
            tracing::debug!("required settings are already present");
            return Ok(ReconcileOutcome::Unchanged);
        }

        *config = merged.json;

        match self.config_maps.update_config_map(&config_map).await {
            Ok(_) => {
                tracing::info!("{namespace}/{name} was updated");
                Ok(ReconcileOutcome::Updated)
            }
            Err(error) if error.is_conflict() => {
                Err(error).context(PersistConflictSnafu { name, namespace })
            }
            Err(error) => Err(error).context(UpdateTargetSnafu { name, namespace }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use kube::api::ObjectMeta;
    use rstest::rstest;

    use super::*;
    use crate::crd::{ClusterSpec, OperatorFlags};

    /// An in-memory stand-in for the Kubernetes API that counts every request.
    #[derive(Default)]
    struct FakeStore {
        cluster: Option<Cluster>,
        config_map: Mutex<Option<ConfigMap>>,
        /// Makes every ConfigMap read fail with the returned error.
        get_error: Option<fn() -> store::Error>,
        /// Makes every ConfigMap write fail with the returned error, leaving the stored one as is.
        update_error: Option<fn() -> store::Error>,
        cluster_reads: AtomicUsize,
        config_map_reads: AtomicUsize,
        config_map_writes: AtomicUsize,
    }

    impl FakeStore {
        fn new(flag: Option<&str>, config_map: Option<ConfigMap>) -> Arc<Self> {
            Arc::new(Self::with(flag, config_map))
        }

        fn with(flag: Option<&str>, config_map: Option<ConfigMap>) -> Self {
            let flags: OperatorFlags = flag
                .map(|value| (CONTROLLER_ENABLED_FLAG, value))
                .into_iter()
                .collect();

            Self {
                cluster: Some(Cluster::new(
                    SINGLETON_CLUSTER_NAME,
                    ClusterSpec {
                        operator_flags: flags,
                    },
                )),
                config_map: Mutex::new(config_map),
                ..Self::default()
            }
        }

        fn stored_config(&self) -> Option<String> {
            self.config_map
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|cm| cm.data.as_ref())
                .and_then(|data| data.get(CONFIG_FIELD))
                .cloned()
        }

        fn config_map_reads(&self) -> usize {
            self.config_map_reads.load(Ordering::SeqCst)
        }

        fn config_map_writes(&self) -> usize {
            self.config_map_writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ClusterStateSource for FakeStore {
        async fn cluster_state(&self) -> store::Result<Cluster> {
            self.cluster_reads.fetch_add(1, Ordering::SeqCst);
            self.cluster.clone().ok_or_else(|| store::Error::NotFound {
                kind: "Cluster".to_owned(),
                name: SINGLETON_CLUSTER_NAME.to_owned(),
            })
        }
    }

    #[async_trait]
    impl ConfigMapStore for FakeStore {
        async fn get_config_map(&self, name: &str, _namespace: &str) -> store::Result<ConfigMap> {
            self.config_map_reads.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.get_error {
                return Err(error());
            }
            self.config_map
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| store::Error::NotFound {
                    kind: "ConfigMap".to_owned(),
                    name: name.to_owned(),
                })
        }

        async fn update_config_map(&self, config_map: &ConfigMap) -> store::Result<ConfigMap> {
            self.config_map_writes.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.update_error {
                return Err(error());
            }
            *self.config_map.lock().unwrap() = Some(config_map.clone());
            Ok(config_map.clone())
        }
    }

    fn conflict() -> store::Error {
        store::Error::Conflict {
            kind: "ConfigMap".to_owned(),
            name: CLOUD_PROVIDER_CONFIG_NAME.to_owned(),
        }
    }

    fn api_unavailable() -> store::Error {
        store::Error::Kube {
            source: kube::Error::SerdeError(
                serde_json::from_str::<ConfigMap>("<html>503 Service Unavailable</html>")
                    .unwrap_err(),
            ),
        }
    }

    fn drifted_store(
        get_error: Option<fn() -> store::Error>,
        update_error: Option<fn() -> store::Error>,
    ) -> Arc<FakeStore> {
        Arc::new(FakeStore {
            get_error,
            update_error,
            ..FakeStore::with(
                Some("true"),
                Some(cloud_provider_config(&[(
                    CONFIG_FIELD,
                    r#"{"disableOutboundSNAT":"false"}"#,
                )])),
            )
        })
    }

    fn cloud_provider_config(data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(CLOUD_PROVIDER_CONFIG_NAME.to_owned()),
                namespace: Some(CLOUD_PROVIDER_CONFIG_NAMESPACE.to_owned()),
                ..ObjectMeta::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                    .collect(),
            ),
            ..ConfigMap::default()
        }
    }

    fn reconciler(
        store: &Arc<FakeStore>,
    ) -> CloudProviderConfigReconciler<Arc<FakeStore>, Arc<FakeStore>> {
        CloudProviderConfigReconciler::new(store.clone(), store.clone())
    }

    #[tokio::test]
    async fn drifted_config_is_updated() {
        let store = FakeStore::new(
            Some("true"),
            Some(cloud_provider_config(&[(
                CONFIG_FIELD,
                r#"{"cloud":"AzurePublicCloud","disableOutboundSNAT":"false"}"#,
            )])),
        );

        let outcome = reconciler(&store).reconcile().await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Updated);
        assert_eq!(store.config_map_writes(), 1);
        assert_eq!(
            store.stored_config().as_deref(),
            Some(r#"{"cloud":"AzurePublicCloud","disableOutboundSNAT":"true"}"#)
        );
    }

    #[tokio::test]
    async fn converged_config_is_not_written() {
        let store = FakeStore::new(
            Some("true"),
            Some(cloud_provider_config(&[(
                CONFIG_FIELD,
                r#"{"disableOutboundSNAT":"true"}"#,
            )])),
        );

        let outcome = reconciler(&store).reconcile().await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert_eq!(store.config_map_reads(), 1);
        assert_eq!(store.config_map_writes(), 0);
    }

    #[tokio::test]
    async fn repeated_reconciles_write_once() {
        let store = FakeStore::new(
            Some("true"),
            Some(cloud_provider_config(&[(
                CONFIG_FIELD,
                r#"{"disableOutboundSNAT":"false"}"#,
            )])),
        );
        let reconciler = reconciler(&store);

        assert_eq!(
            reconciler.reconcile().await.unwrap(),
            ReconcileOutcome::Updated
        );
        assert_eq!(
            reconciler.reconcile().await.unwrap(),
            ReconcileOutcome::Unchanged
        );
        assert_eq!(store.config_map_reads(), 2);
        assert_eq!(store.config_map_writes(), 1);
    }

    #[rstest]
    #[case::flag_absent(None)]
    #[case::flag_false(Some("false"))]
    #[case::flag_invalid(Some("maybe"))]
    #[tokio::test]
    async fn disabled_controller_does_not_read_target(#[case] flag: Option<&str>) {
        let store = FakeStore::new(
            flag,
            Some(cloud_provider_config(&[(
                CONFIG_FIELD,
                r#"{"disableOutboundSNAT":"false"}"#,
            )])),
        );

        let outcome = reconciler(&store).reconcile().await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Disabled);
        assert_eq!(store.cluster_reads.load(Ordering::SeqCst), 1);
        assert_eq!(store.config_map_reads(), 0);
        assert_eq!(store.config_map_writes(), 0);
    }

    #[tokio::test]
    async fn unavailable_cluster_state_is_surfaced() {
        let store = Arc::new(FakeStore::default());

        let err = reconciler(&store).reconcile().await.unwrap_err();

        assert!(matches!(err, Error::GetClusterState { .. }));
        assert!(err.is_retriable());
        assert_eq!(store.config_map_reads(), 0);
    }

    #[tokio::test]
    async fn missing_target_is_surfaced() {
        let store = FakeStore::new(Some("true"), None);

        let err = reconciler(&store).reconcile().await.unwrap_err();

        assert!(matches!(err, Error::TargetNotFound { .. }));
        assert_eq!(
            err.to_string(),
            "ConfigMap openshift-config/cloud-provider-config not found"
        );
        assert_eq!(err.category(), "TargetNotFound");
        assert_eq!(store.config_map_writes(), 0);
    }

    #[tokio::test]
    async fn missing_config_field_is_surfaced() {
        let store = FakeStore::new(
            Some("true"),
            Some(cloud_provider_config(&[("notconfig", "{}")])),
        );

        let err = reconciler(&store).reconcile().await.unwrap_err();

        assert!(matches!(err, Error::MissingField { .. }));
        assert_eq!(
            err.to_string(),
            "field config in ConfigMap openshift-config/cloud-provider-config is missing"
        );
        assert!(!err.is_retriable());
        assert_eq!(store.config_map_writes(), 0);
    }

    #[tokio::test]
    async fn config_map_without_data_is_missing_field() {
        let mut config_map = cloud_provider_config(&[]);
        config_map.data = None;
        let store = FakeStore::new(Some("true"), Some(config_map));

        let err = reconciler(&store).reconcile().await.unwrap_err();

        assert!(matches!(err, Error::MissingField { .. }));
    }

    #[tokio::test]
    async fn missing_required_key_is_not_written() {
        let store = FakeStore::new(
            Some("true"),
            Some(cloud_provider_config(&[(CONFIG_FIELD, "{}")])),
        );

        let err = reconciler(&store).reconcile().await.unwrap_err();

        assert!(matches!(
            &err,
            Error::MergeConfig {
                source: flat_json::Error::MissingKey { key },
                ..
            } if key == "disableOutboundSNAT"
        ));
        assert!(!err.is_retriable());
        assert_eq!(store.config_map_writes(), 0);
        assert_eq!(store.stored_config().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn write_conflict_is_surfaced() {
        let store = drifted_store(None, Some(conflict));

        let err = reconciler(&store).reconcile().await.unwrap_err();

        assert!(matches!(err, Error::PersistConflict { .. }));
        assert!(err.is_retriable());
        assert_eq!(store.config_map_writes(), 1);
        assert_eq!(
            store.stored_config().as_deref(),
            Some(r#"{"disableOutboundSNAT":"false"}"#)
        );
    }

    #[tokio::test]
    async fn failed_fetch_is_surfaced() {
        let store = drifted_store(Some(api_unavailable), None);

        let err = reconciler(&store).reconcile().await.unwrap_err();

        assert!(matches!(
            err,
            Error::GetTarget {
                source: store::Error::Kube { .. },
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "failed to retrieve ConfigMap openshift-config/cloud-provider-config"
        );
        assert!(err.is_retriable());
        assert_eq!(store.config_map_reads(), 1);
        assert_eq!(store.config_map_writes(), 0);
    }

    #[tokio::test]
    async fn failed_write_is_surfaced() {
        let store = drifted_store(None, Some(api_unavailable));

        let err = reconciler(&store).reconcile().await.unwrap_err();

        assert!(matches!(
            err,
            Error::UpdateTarget {
                source: store::Error::Kube { .. },
                ..
            }
        ));
        assert_eq!(err.category(), "UpdateTarget");
        assert!(err.is_retriable());
        assert_eq!(store.config_map_writes(), 1);
        assert_eq!(
            store.stored_config().as_deref(),
            Some(r#"{"disableOutboundSNAT":"false"}"#)
        );
    }

    #[tokio::test]
    async fn custom_required_settings_are_enforced() {
        let store = FakeStore::new(
            Some("true"),
            Some(cloud_provider_config(&[(
                CONFIG_FIELD,
                r#"{"disableOutboundSNAT":"true","loadBalancerSku":"basic"}"#,
            )])),
        );
        let reconciler = reconciler(&store).with_required_settings(BTreeMap::from([(
            "loadBalancerSku".to_owned(),
            "standard".to_owned(),
        )]));

        let outcome = reconciler.reconcile().await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Updated);
        assert_eq!(
            store.stored_config().as_deref(),
            Some(r#"{"disableOutboundSNAT":"true","loadBalancerSku":"standard"}"#)
        );
    }
}
