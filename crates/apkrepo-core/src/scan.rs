//! Store walk: validates every artifact and turns the store into records.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

use apkrepo_schema::{
    Abi, ArtifactRecord, ArtifactSet, PackageName, PackageRecord, Sha256Digest, VersionCode,
    VersionRecord,
};

use crate::badging::{Badging, BadgingSource};
use crate::error::{IndexError, Result};
use crate::fingerprint::{self, FileStamp, FingerprintCache};
use crate::props::{self, PROPS_FILE, PropsOverlay};
use crate::signature::{self, SignatureSource};
use crate::store::{BASE_APK, ICON_WEBP, PackageStore};

/// Walks package directories and produces validated [`PackageRecord`]s.
pub struct Scanner<'a> {
    badging: &'a dyn BadgingSource,
    signatures: &'a dyn SignatureSource,
    cache: FingerprintCache,
}

impl<'a> Scanner<'a> {
    /// Scanner using the given collaborators and the default cache.
    pub fn new(badging: &'a dyn BadgingSource, signatures: &'a dyn SignatureSource) -> Self {
        Self {
            badging,
            signatures,
            cache: FingerprintCache::default(),
        }
    }

    /// Replace the fingerprint cache.
    #[must_use]
    pub fn with_cache(mut self, cache: FingerprintCache) -> Self {
        self.cache = cache;
        self
    }

    /// Scan every package of `store` into a [`Repository`].
    ///
    /// # Errors
    ///
    /// The first validation failure aborts the scan.
    pub fn scan_store(&self, store: &PackageStore) -> Result<Repository> {
        let mut builder = RepositoryBuilder::default();
        for (name, dir) in store.packages()? {
            builder.add(self.scan_package(&name, &dir)?, &dir)?;
        }
        Ok(builder.finish())
    }

    /// Scan one package directory.
    ///
    /// # Errors
    ///
    /// Returns the first property, signer, badging, fingerprint or I/O
    /// error met in any of the package's versions.
    pub fn scan_package(&self, name: &PackageName, package_dir: &Path) -> Result<PackageRecord> {
        let mut common = props::load_common_props(package_dir)?;
        if package_dir.join(ICON_WEBP).is_file() {
            common.icon_type = Some("webp".to_string());
        }

        let mut versions = BTreeMap::new();
        for (code, version_dir) in PackageStore::versions(package_dir)? {
            tracing::info!("processing {name}/{code}");
            let record = self.scan_version(name, &common.signatures, code, &version_dir)?;
            versions.insert(code, record);
        }

        Ok(PackageRecord {
            name: name.clone(),
            common,
            versions,
        })
    }

    fn scan_version(
        &self,
        package: &PackageName,
        trusted: &BTreeSet<Sha256Digest>,
        code: VersionCode,
        version_dir: &Path,
    ) -> Result<VersionRecord> {
        let base = version_dir.join(BASE_APK);
        if !base.is_file() {
            return Err(IndexError::io(
                &base,
                io::Error::new(io::ErrorKind::NotFound, "every version needs a base.apk"),
            ));
        }

        // The base APK is checked fresh every run: it anchors the trust
        // decision for the whole version.
        let base_signer = self.signatures.primary_signer(&base)?;
        signature::ensure_trusted(&base, &base_signer, trusted)?;
        let badging = self.badging.badging(&base)?;
        check_identity(&base, &badging, package, code)?;

        let overlay = PropsOverlay::load(version_dir)?;
        let merged = props::merge(&badging, overlay, &version_dir.join(PROPS_FILE))?;

        let mut artifacts = Vec::new();
        let mut split_abis = BTreeSet::new();
        for apk in PackageStore::artifacts(version_dir)? {
            artifacts.push(self.fingerprint_artifact(package, code, &base_signer, &apk)?);
            if let Some(abi) = apk
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(Abi::from_file_name)
            {
                split_abis.insert(abi);
            }
        }

        let record = merged.into_record(code, split_abis, ArtifactSet::new(artifacts));
        tracing::info!("{}", summary(&record));
        Ok(record)
    }

    /// Hash, size and validate one artifact.
    ///
    /// Split signer and versionCode come from the cache sidecar when the
    /// artifact is unchanged since it was last validated.
    fn fingerprint_artifact(
        &self,
        package: &PackageName,
        code: VersionCode,
        base_signer: &Sha256Digest,
        apk: &Path,
    ) -> Result<ArtifactRecord> {
        let stamp = FileStamp::of(apk)?;
        let sizes = fingerprint::encoded_sizes(apk, &stamp)?;
        let is_base = apk.file_name().is_some_and(|n| n == BASE_APK);

        let (sha256, signer, found_code) = match self.cache.lookup(apk, &stamp) {
            Some(cached) => (cached.sha256, cached.signer, cached.version_code),
            None => {
                tracing::debug!("hashing {}", apk.display());
                let (signer, found_code) = if is_base {
                    (base_signer.clone(), code)
                } else {
                    let signer = self.signatures.primary_signer(apk)?;
                    let badging = self.badging.badging(apk)?;
                    check_package(apk, &badging, package)?;
                    (signer, badging.version_code)
                };
                let sha256 = fingerprint::sha256_file(apk)?;
                self.cache.store(apk, &stamp, &sha256, &signer, found_code)?;
                (sha256, signer, found_code)
            }
        };

        signature::ensure_same_signer(apk, base_signer, &signer)?;
        if found_code != code {
            return Err(IndexError::VersionCodeMismatch {
                artifact: apk.to_path_buf(),
                expected: code,
                found: found_code,
            });
        }

        Ok(ArtifactRecord {
            file_name: apk
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            sha256,
            size: stamp.size,
            gz_size: sizes.gz,
            br_size: sizes.br,
        })
    }
}

fn check_package(apk: &Path, badging: &Badging, package: &PackageName) -> Result<()> {
    if badging.package == *package {
        Ok(())
    } else {
        Err(IndexError::PackageMismatch {
            artifact: apk.to_path_buf(),
            expected: package.to_string(),
            found: badging.package.to_string(),
        })
    }
}

fn check_identity(
    apk: &Path,
    badging: &Badging,
    package: &PackageName,
    code: VersionCode,
) -> Result<()> {
    check_package(apk, badging, package)?;
    if badging.version_code == code {
        Ok(())
    } else {
        Err(IndexError::VersionCodeMismatch {
            artifact: apk.to_path_buf(),
            expected: code,
            found: badging.version_code,
        })
    }
}

/// One-line description of a version's applicability.
fn summary(record: &VersionRecord) -> String {
    let mut msg = format!("channel: {}, minSdk: {}", record.channel, record.min_sdk);
    if let Some(max) = record.max_sdk {
        msg.push_str(&format!(", maxSdk: {max}"));
    }
    let join = |items: Vec<&str>| items.join(", ");
    if !record.abis.is_empty() {
        msg.push_str(&format!(
            ", abis: {}",
            join(record.abis.iter().map(Abi::as_str).collect())
        ));
    }
    if !record.static_deps.is_empty() {
        msg.push_str(&format!(
            ", staticDeps: {}",
            join(record.static_deps.iter().map(PackageName::as_str).collect())
        ));
    }
    if !record.deps.is_empty() {
        msg.push_str(&format!(
            ", deps: {}",
            join(record.deps.iter().map(PackageName::as_str).collect())
        ));
    }
    msg
}

/// Collects scanned packages; the only way to obtain a [`Repository`].
#[derive(Debug, Default)]
pub struct RepositoryBuilder {
    packages: BTreeMap<PackageName, PackageRecord>,
}

impl RepositoryBuilder {
    /// Add a package; `origin` only feeds error messages.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] if the package was already
    /// added.
    pub fn add(&mut self, package: PackageRecord, origin: &Path) -> Result<()> {
        if self.packages.contains_key(&package.name) {
            return Err(IndexError::config(
                origin,
                format!("package {} appears more than once", package.name),
            ));
        }
        self.packages.insert(package.name.clone(), package);
        Ok(())
    }

    /// Freeze the collected packages.
    pub fn finish(self) -> Repository {
        Repository {
            packages: self.packages,
        }
    }
}

/// Every validated package of a store, keyed by name. Immutable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Repository {
    packages: BTreeMap<PackageName, PackageRecord>,
}

impl Repository {
    /// Package by name.
    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.get(name)
    }

    /// Packages in name order.
    pub fn packages(&self) -> impl Iterator<Item = &PackageRecord> {
        self.packages.values()
    }

    /// Number of packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the store had no packages.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Consume into the package map.
    pub fn into_packages(self) -> BTreeMap<PackageName, PackageRecord> {
        self.packages
    }
}
