//! Declarative property overlays and their merge over badging facts.
//!
//! Two TOML files feed a version record: `common-props.toml` at the package
//! level and an optional `props.toml` per version directory. Overlay keys win
//! over badging facts key by key; keys with no typed field are kept verbatim
//! and end up in the index.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use apkrepo_schema::{
    Abi, ArtifactSet, Channel, CommonProps, PackageName, VersionCode, VersionRecord,
};
use serde::Deserialize;

use crate::badging::Badging;
use crate::error::{IndexError, IoResultExt, Result};

/// Package-level property file name.
pub const COMMON_PROPS_FILE: &str = "common-props.toml";

/// Version-level property file name.
pub const PROPS_FILE: &str = "props.toml";

/// Keys an overlay may not set: they are derived from the store itself.
const RESERVED_KEYS: [&str; 6] = [
    "versionCode",
    "apks",
    "apkHashes",
    "apkSizes",
    "apkGzSizes",
    "apkBrSizes",
];

/// Load `common-props.toml` from a package directory.
///
/// # Errors
///
/// Returns [`IndexError::Configuration`] if the file is missing, is not
/// valid TOML, or lacks the trusted `signatures` list, and
/// [`IndexError::Io`] if it cannot be read.
pub fn load_common_props(package_dir: &Path) -> Result<CommonProps> {
    let path = package_dir.join(COMMON_PROPS_FILE);
    if !path.is_file() {
        return Err(IndexError::config(
            &path,
            "missing; every package must declare its trusted signatures",
        ));
    }
    let content = fs::read_to_string(&path).at(&path)?;
    toml::from_str(&content).map_err(|e| IndexError::config(&path, e))
}

/// Optional per-version `props.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropsOverlay {
    /// Release channel; required once merged.
    pub channel: Option<Channel>,
    /// Overrides `sdkVersion` from badging.
    pub min_sdk: Option<u32>,
    /// Overrides `maxSdkVersion` from badging.
    pub max_sdk: Option<u32>,
    /// Overrides the manifest versionName.
    pub version_name: Option<String>,
    /// Overrides the application label.
    pub label: Option<String>,
    /// Replaces the inferred ABI set.
    pub abis: Option<BTreeSet<Abi>>,
    /// Replaces the `uses-static-library` list.
    pub static_deps: Option<Vec<PackageName>>,
    /// Runtime package dependencies.
    pub deps: Option<Vec<PackageName>>,
    /// Free-form description.
    pub description: Option<String>,
    /// Release notes.
    pub release_notes: Option<String>,
    /// Anything else, passed through.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PropsOverlay {
    /// Load `props.toml` from a version directory, or an empty overlay if
    /// there is none.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] for invalid TOML, a channel
    /// outside `alpha`/`beta`/`stable`/`old`, or a reserved key, and
    /// [`IndexError::Io`] if the file cannot be read.
    pub fn load(version_dir: &Path) -> Result<Self> {
        let path = version_dir.join(PROPS_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).at(&path)?;
        Self::parse(&content, &path)
    }

    /// Parse overlay TOML; `path` only feeds error messages.
    ///
    /// # Errors
    ///
    /// See [`PropsOverlay::load`].
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let overlay: Self = toml::from_str(content).map_err(|e| IndexError::config(path, e))?;
        if let Some(key) = RESERVED_KEYS.iter().find(|k| overlay.extra.contains_key(**k)) {
            return Err(IndexError::config(
                path,
                format!("'{key}' is derived from the store and cannot be overridden"),
            ));
        }
        Ok(overlay)
    }
}

/// Badging facts with an overlay applied; everything of a
/// [`VersionRecord`] except its artifacts and inferred ABIs.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedProps {
    /// Display version.
    pub version_name: String,
    /// Label.
    pub label: Option<String>,
    /// Channel.
    pub channel: Channel,
    /// Minimum SDK.
    pub min_sdk: u32,
    /// Maximum SDK.
    pub max_sdk: Option<u32>,
    /// ABIs declared by the overlay, which replace inference entirely.
    pub declared_abis: Option<BTreeSet<Abi>>,
    /// ABIs from the manifest `native-code` line.
    pub native_abis: BTreeSet<Abi>,
    /// Static library dependencies.
    pub static_deps: Vec<PackageName>,
    /// Package dependencies.
    pub deps: Vec<PackageName>,
    /// Description.
    pub description: Option<String>,
    /// Release notes.
    pub release_notes: Option<String>,
    /// Pass-through keys.
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Merge `overlay` over `badging`, overlay winning key by key.
///
/// `overlay_path` is the version's `props.toml` and only feeds errors.
///
/// # Errors
///
/// Returns [`IndexError::Configuration`] if no channel is declared or no
/// minSdk is known after the merge.
pub fn merge(badging: &Badging, overlay: PropsOverlay, overlay_path: &Path) -> Result<MergedProps> {
    let channel = overlay
        .channel
        .ok_or_else(|| IndexError::config(overlay_path, "no channel declared"))?;
    let min_sdk = overlay
        .min_sdk
        .or(badging.min_sdk)
        .ok_or_else(|| IndexError::config(overlay_path, "minSdk is unknown after merge"))?;

    Ok(MergedProps {
        version_name: overlay
            .version_name
            .or_else(|| badging.version_name.clone())
            .unwrap_or_default(),
        label: overlay.label.or_else(|| badging.label.clone()),
        channel,
        min_sdk,
        max_sdk: overlay.max_sdk.or(badging.max_sdk),
        declared_abis: overlay.abis,
        native_abis: badging.native_code.iter().copied().collect(),
        static_deps: overlay
            .static_deps
            .unwrap_or_else(|| badging.static_libraries.clone()),
        deps: overlay.deps.unwrap_or_default(),
        description: overlay.description,
        release_notes: overlay.release_notes,
        extra: overlay.extra,
    })
}

impl MergedProps {
    /// Finish the record with the version's artifacts.
    ///
    /// `split_abis` are ABIs inferred from artifact file names; they join
    /// the manifest's unless the overlay declared an explicit set.
    pub fn into_record(
        self,
        version_code: VersionCode,
        split_abis: BTreeSet<Abi>,
        artifacts: ArtifactSet,
    ) -> VersionRecord {
        let abis = self.declared_abis.unwrap_or_else(|| {
            let mut abis = self.native_abis;
            abis.extend(split_abis);
            abis
        });

        VersionRecord {
            version_code,
            version_name: self.version_name,
            label: self.label,
            channel: self.channel,
            min_sdk: self.min_sdk,
            max_sdk: self.max_sdk,
            abis,
            static_deps: self.static_deps,
            deps: self.deps,
            description: self.description,
            release_notes: self.release_notes,
            extra: self.extra,
            artifacts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn badging() -> Badging {
        Badging {
            package: PackageName::new("com.example.app"),
            version_code: VersionCode::new(5),
            version_name: Some("5.0".into()),
            split: None,
            label: Some("Example".into()),
            min_sdk: Some(29),
            max_sdk: None,
            native_code: vec![Abi::Arm64V8a],
            static_libraries: vec![PackageName::new("com.example.lib")],
        }
    }

    fn overlay(toml: &str) -> Result<PropsOverlay> {
        PropsOverlay::parse(toml, Path::new("props.toml"))
    }

    #[test]
    fn overlay_wins_key_by_key() {
        let o = overlay(
            r#"
channel = "beta"
minSdk = 31
label = "Renamed"
deps = ["com.example.dep"]
originalPackage = "org.example.old"
"#,
        )
        .unwrap();
        let merged = merge(&badging(), o, Path::new("props.toml")).unwrap();
        assert_eq!(merged.channel, Channel::Beta);
        assert_eq!(merged.min_sdk, 31);
        assert_eq!(merged.label.as_deref(), Some("Renamed"));
        assert_eq!(merged.version_name, "5.0");
        assert_eq!(merged.static_deps, vec![PackageName::new("com.example.lib")]);
        assert_eq!(merged.deps, vec![PackageName::new("com.example.dep")]);
        assert_eq!(
            merged.extra["originalPackage"],
            serde_json::json!("org.example.old")
        );
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let err = overlay("channel = \"nightly\"").unwrap_err();
        assert!(matches!(err, IndexError::Configuration { .. }));
    }

    #[test]
    fn missing_channel_is_rejected() {
        let err = merge(&badging(), PropsOverlay::default(), Path::new("props.toml")).unwrap_err();
        assert!(err.to_string().contains("no channel"));
    }

    #[test]
    fn missing_min_sdk_is_rejected() {
        let mut b = badging();
        b.min_sdk = None;
        let o = overlay("channel = \"stable\"").unwrap();
        let err = merge(&b, o, Path::new("props.toml")).unwrap_err();
        assert!(err.to_string().contains("minSdk"));
    }

    #[test]
    fn reserved_keys_are_rejected() {
        let err = overlay("channel = \"stable\"\nversionCode = 7").unwrap_err();
        assert!(err.to_string().contains("versionCode"));
    }

    #[test]
    fn declared_abis_replace_inference() {
        let o = overlay("channel = \"stable\"\nabis = [\"x86_64\"]").unwrap();
        let merged = merge(&badging(), o, Path::new("props.toml")).unwrap();
        let record = merged.into_record(
            VersionCode::new(5),
            [Abi::ArmeabiV7a].into_iter().collect(),
            ArtifactSet::default(),
        );
        assert_eq!(record.abis, [Abi::X86_64].into_iter().collect());
    }

    #[test]
    fn inferred_abis_union_manifest_and_splits() {
        let o = overlay("channel = \"stable\"").unwrap();
        let merged = merge(&badging(), o, Path::new("props.toml")).unwrap();
        let record = merged.into_record(
            VersionCode::new(5),
            [Abi::ArmeabiV7a].into_iter().collect(),
            ArtifactSet::default(),
        );
        assert_eq!(
            record.abis,
            [Abi::Arm64V8a, Abi::ArmeabiV7a].into_iter().collect()
        );
    }

    #[test]
    fn common_props_require_signatures() {
        let dir = tempdir().unwrap();
        assert!(load_common_props(dir.path()).is_err());

        fs::write(dir.path().join(COMMON_PROPS_FILE), "hasFsVeritySignatures = true\n").unwrap();
        let err = load_common_props(dir.path()).unwrap_err();
        assert!(matches!(err, IndexError::Configuration { .. }));

        let digest = "ab".repeat(32);
        fs::write(
            dir.path().join(COMMON_PROPS_FILE),
            format!("signatures = [\"{digest}\"]\nhasFsVeritySignatures = true\n"),
        )
        .unwrap();
        let props = load_common_props(dir.path()).unwrap();
        assert!(props.has_fs_verity_signatures);
        assert_eq!(props.signatures.len(), 1);
    }

    #[test]
    fn absent_overlay_is_empty() {
        let dir = tempdir().unwrap();
        assert_eq!(PropsOverlay::load(dir.path()).unwrap(), PropsOverlay::default());
    }
}
