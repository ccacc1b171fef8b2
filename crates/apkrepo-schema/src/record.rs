//! Per-package and per-version records, plus the redundancy signature the
//! consolidator compares.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::{Abi, Channel, PackageName, SchemaError, Sha256Digest, VersionCode};

/// Wire keys that describe which bytes get delivered rather than whether a
/// version applies to a client. Everything else participates in the
/// redundancy signature.
pub const DELIVERY_KEYS: [&str; 10] = [
    "apks",
    "apkHashes",
    "apkSizes",
    "apkGzSizes",
    "apkBrSizes",
    "versionCode",
    "versionName",
    "label",
    "description",
    "releaseNotes",
];

/// One physical APK file of a version (the base APK or a split).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// File name inside the version directory (e.g. `base.apk`).
    pub file_name: String,
    /// SHA-256 of the file contents.
    pub sha256: Sha256Digest,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Size of the gzip-encoded sibling.
    pub gz_size: u64,
    /// Size of the brotli-encoded sibling.
    pub br_size: u64,
}

/// The artifacts of one version, ordered by file name.
///
/// Serialized as the parallel arrays clients read (`apks`, `apkHashes`,
/// `apkSizes`, `apkGzSizes`, `apkBrSizes`), flattened into the enclosing
/// version object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArtifactSet(Vec<ArtifactRecord>);

impl ArtifactSet {
    /// Build a set, sorting by file name.
    pub fn new(mut artifacts: Vec<ArtifactRecord>) -> Self {
        artifacts.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Self(artifacts)
    }

    /// Consume the set.
    pub fn into_inner(self) -> Vec<ArtifactRecord> {
        self.0
    }
}

impl Deref for ArtifactSet {
    type Target = [ArtifactRecord];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for ArtifactSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names: Vec<&str> = self.0.iter().map(|a| a.file_name.as_str()).collect();
        let hashes: Vec<&Sha256Digest> = self.0.iter().map(|a| &a.sha256).collect();
        let sizes: Vec<u64> = self.0.iter().map(|a| a.size).collect();
        let gz: Vec<u64> = self.0.iter().map(|a| a.gz_size).collect();
        let br: Vec<u64> = self.0.iter().map(|a| a.br_size).collect();

        let mut map = serializer.serialize_map(Some(5))?;
        map.serialize_entry("apks", &names)?;
        map.serialize_entry("apkHashes", &hashes)?;
        map.serialize_entry("apkSizes", &sizes)?;
        map.serialize_entry("apkGzSizes", &gz)?;
        map.serialize_entry("apkBrSizes", &br)?;
        map.end()
    }
}

/// One release of a package: badging facts merged with the version's
/// property overlay, plus its artifacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    /// Unique key within the package.
    pub version_code: VersionCode,
    /// Display version string.
    pub version_name: String,
    /// Application label from the manifest, possibly overridden.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Release channel.
    pub channel: Channel,
    /// Minimum supported SDK level.
    pub min_sdk: u32,
    /// Maximum supported SDK level, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sdk: Option<u32>,
    /// Native ABIs from the manifest and from split file names.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub abis: BTreeSet<Abi>,
    /// Static shared libraries this version links against.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub static_deps: Vec<PackageName>,
    /// Packages that must be installed alongside.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<PackageName>,
    /// Free-form description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Release notes shown to users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    /// Overlay keys with no typed field, passed through verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
    /// Delivered files.
    #[serde(flatten)]
    pub artifacts: ArtifactSet,
}

/// Applicability-relevant view of a [`VersionRecord`]: its wire form minus
/// [`DELIVERY_KEYS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedundancySignature(serde_json::Map<String, serde_json::Value>);

impl RedundancySignature {
    /// Keys that made it into the signature.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl VersionRecord {
    /// Compute the redundancy signature of this version.
    ///
    /// Fields are removed by exclusion, so a field added to the record later
    /// counts as applicability-relevant until it is listed in
    /// [`DELIVERY_KEYS`].
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Serialize`] if the record cannot be serialized
    /// to a JSON object.
    pub fn redundancy_signature(&self) -> Result<RedundancySignature, SchemaError> {
        let serde_json::Value::Object(mut map) = serde_json::to_value(self)? else {
            return Err(SchemaError::NotAnObject("version record"));
        };
        for key in DELIVERY_KEYS {
            map.remove(key);
        }
        Ok(RedundancySignature(map))
    }

    /// Whether this version was demoted to the transitional `old` channel.
    pub fn is_old(&self) -> bool {
        self.channel == Channel::Old
    }
}

/// Properties shared by every version of a package (`common-props.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonProps {
    /// Trusted signer certificate digests. A base APK signed by anything
    /// else is rejected.
    pub signatures: BTreeSet<Sha256Digest>,
    /// Whether fs-verity signatures must be produced for this package's
    /// artifacts.
    #[serde(default)]
    pub has_fs_verity_signatures: bool,
    /// Icon format, set when the package directory carries an icon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_type: Option<String>,
    /// Unrecognized keys, passed through verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Every scanned version of one package.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageRecord {
    /// Package identifier.
    pub name: PackageName,
    /// Shared properties.
    pub common: CommonProps,
    /// All versions found in the store, including `old` ones.
    pub versions: BTreeMap<VersionCode, VersionRecord>,
}
