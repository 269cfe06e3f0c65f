//! Merging required key/value pairs into flat JSON objects.
//!
//! A "flat" JSON object is one whose values are all strings, for example the
//! cloud provider configuration stored in a ConfigMap:
//!
//! ```json
//! {"cloud":"AzurePublicCloud","disableOutboundSNAT":"false"}
//! ```
//!
//! The primary entry point is [`merge`].

use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode flat JSON object"))]
    Decode { source: serde_json::Error },

    #[snafu(display("key {key} does not exist in json string"))]
    MissingKey { key: String },

    #[snafu(display("failed to encode flat JSON object"))]
    Encode { source: serde_json::Error },
}

/// The result of a successful [`merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    /// The re-encoded JSON object.
    pub json: String,

    /// Whether any required value differed from the value found in the input.
    pub changed: bool,
}

/// Ensures that every key in `required` maps to its required value in the flat JSON object `json`.
///
/// Every required key must already be present in `json`, keys are never added. If one is missing
/// the whole merge fails with [`Error::MissingKey`] and no output is produced.
///
/// The returned JSON is compact and its keys are sorted, so neither the key order nor the
/// formatting of the input survives. Only the key/value content is guaranteed to be equivalent.
pub fn merge(json: &str, required: &BTreeMap<String, String>) -> Result<Merged> {
    let mut object: BTreeMap<String, String> = serde_json::from_str(json).context(DecodeSnafu)?;
    let mut changed = false;

    for (key, required_value) in required {
        let Some(value) = object.get_mut(key) else {
            return MissingKeySnafu { key }.fail();
        };

        if value != required_value {
            value.clone_from(required_value);
            changed = true;
        }
    }

    let json = serde_json::to_string(&object).context(EncodeSnafu)?;
    Ok(Merged { json, changed })
}
