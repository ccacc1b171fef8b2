//! The signed top-level metadata document.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{CommonProps, PackageName, SchemaError, VersionCode, VersionRecord};

/// The superseded-free view of one package, ascending by version code.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct ConsolidatedPackageIndex(BTreeMap<VersionCode, VersionRecord>);

impl ConsolidatedPackageIndex {
    /// Wrap an already-consolidated version map.
    pub fn new(versions: BTreeMap<VersionCode, VersionRecord>) -> Self {
        Self(versions)
    }

    /// Retained version codes in ascending order.
    pub fn version_codes(&self) -> Vec<VersionCode> {
        self.0.keys().copied().collect()
    }

    /// Look up a retained version.
    pub fn get(&self, code: VersionCode) -> Option<&VersionRecord> {
        self.0.get(&code)
    }

    /// Iterate retained versions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (&VersionCode, &VersionRecord)> {
        self.0.iter()
    }

    /// Number of retained versions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no version survived consolidation.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A package as it appears in the document: shared properties plus the
/// consolidated variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageEntry {
    /// Shared properties, flattened into the package object.
    #[serde(flatten)]
    pub common: CommonProps,
    /// Retained versions keyed by version code.
    pub variants: ConsolidatedPackageIndex,
}

/// The index clients download and verify.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDocument {
    /// UTC seconds captured when assembly started.
    pub time: i64,
    /// Every package keyed by identifier.
    pub packages: BTreeMap<PackageName, PackageEntry>,
    /// Base64 DER fs-verity certificates keyed by epoch.
    pub fs_verity_certs: BTreeMap<u32, String>,
}

impl MetadataDocument {
    /// Serialize to compact JSON with every object's keys sorted.
    ///
    /// The output is a pure function of the document's logical content, so
    /// re-running on unchanged input yields identical bytes to sign.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Serialize`] if serialization fails.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, SchemaError> {
        let value = canonicalize(serde_json::to_value(self)?);
        Ok(serde_json::to_vec(&value)?)
    }
}

/// Rebuild every object with its keys in sorted order, independent of how
/// `serde_json::Map` is backed.
fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(canonicalize).collect())
        }
        other => other,
    }
}
