//! This module contains the `Cluster` custom resource, the cluster-wide singleton which carries
//! the operator flags that gate the controllers of this operator.
//!
//! The resource is owned by the cluster's control plane. This operator only ever reads it, so
//! only the parts of the spec the operator cares about are modelled here. Unknown fields are
//! ignored during deserialization.

use std::{collections::BTreeMap, str::FromStr};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// The well-known name of the [`Cluster`] singleton.
pub const SINGLETON_CLUSTER_NAME: &str = "cluster";

/// The cluster-wide configuration of the operator.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "aro.openshift.io",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters"
)]
pub struct ClusterSpec {
    /// Feature flags of the individual operator controllers.
    #[serde(default, rename = "operatorflags")]
    pub operator_flags: OperatorFlags,
}

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("invalid flag value {value:?}, expected \"true\" or \"false\""))]
pub struct ParseFlagValueError {
    value: String,
}

/// A boolean operator flag value.
///
/// Values are compared ASCII case-insensitively, so `"True"` and `"TRUE"` are accepted as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagValue {
    Enabled,
    Disabled,
}

impl FromStr for FlagValue {
    type Err = ParseFlagValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("true") {
            Ok(Self::Enabled)
        } else if s.eq_ignore_ascii_case("false") {
            Ok(Self::Disabled)
        } else {
            ParseFlagValueSnafu { value: s }.fail()
        }
    }
}

/// Operator flags, mapping flag names (like `aro.cloudproviderconfig.enabled`) to their
/// string-encoded values.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(transparent)]
pub struct OperatorFlags(pub BTreeMap<String, String>);

impl OperatorFlags {
    /// Returns the parsed value of `flag`, or [`None`] if the flag is not set.
    pub fn get(&self, flag: &str) -> Option<Result<FlagValue, ParseFlagValueError>> {
        self.0.get(flag).map(|value| value.parse())
    }

    /// Returns whether `flag` is set to `true`.
    ///
    /// Absent flags are disabled. Flags with a value that is not a boolean are disabled as well,
    /// which is logged as a warning.
    pub fn is_enabled(&self, flag: &str) -> bool {
        self.get_with_default(flag, FlagValue::Disabled) == FlagValue::Enabled
    }

    /// Returns the value of `flag`, falling back to `default` if it is absent or unparseable.
    pub fn get_with_default(&self, flag: &str, default: FlagValue) -> FlagValue {
        match self.get(flag) {
            Some(Ok(value)) => value,
            Some(Err(error)) => {
                tracing::warn!(
                    flag,
                    error = &error as &dyn std::error::Error,
                    ?default,
                    "ignoring invalid operator flag"
                );
                default
            }
            None => default,
        }
    }
}

impl<K, V> FromIterator<(K, V)> for OperatorFlags
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
