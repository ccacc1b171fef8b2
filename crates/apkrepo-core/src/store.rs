//! On-disk layout of the package store.
//!
//! ```text
//! <root>/<package>/common-props.toml
//! <root>/<package>/icon.webp                  (optional)
//! <root>/<package>/<versionCode>/props.toml   (optional)
//! <root>/<package>/<versionCode>/base.apk
//! <root>/<package>/<versionCode>/<split>.apk
//! <root>/<package>/<versionCode>/<apk>.gz | .br | .sha256 | .<epoch>.fsv_sig
//! ```

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use apkrepo_schema::{PackageName, VersionCode};

use crate::badging::BadgingSource;
use crate::error::{IndexError, IoResultExt, Result};
use crate::props::PROPS_FILE;

/// File name of a version's base APK.
pub const BASE_APK: &str = "base.apk";

/// Optional package icon; its presence sets `iconType`.
pub const ICON_WEBP: &str = "icon.webp";

/// `path` with `suffix` appended to its file name.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Gzip-encoded sibling of an APK.
pub fn gz_path(apk: &Path) -> PathBuf {
    with_suffix(apk, ".gz")
}

/// Brotli-encoded sibling of an APK.
pub fn br_path(apk: &Path) -> PathBuf {
    with_suffix(apk, ".br")
}

/// Cached fingerprint sidecar of an APK.
pub fn fingerprint_path(apk: &Path) -> PathBuf {
    with_suffix(apk, ".sha256")
}

/// fs-verity signature of an APK under certificate `epoch`.
pub fn fsverity_sig_path(apk: &Path, epoch: u32) -> PathBuf {
    with_suffix(apk, &format!(".{epoch}.fsv_sig"))
}

/// APK signature scheme v4 sidecar that travels with an imported APK.
fn idsig_path(apk: &Path) -> PathBuf {
    with_suffix(apk, ".idsig")
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Sorted subdirectories of `dir`, by file name.
fn subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_hidden(&name) {
            dirs.push((name, path));
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Handle on a package store directory.
#[derive(Debug, Clone)]
pub struct PackageStore {
    root: PathBuf,
}

impl PackageStore {
    /// Wrap the store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `package`.
    pub fn package_dir(&self, package: &PackageName) -> PathBuf {
        self.root.join(package.as_str())
    }

    /// Directory of one version of `package`.
    pub fn version_dir(&self, package: &PackageName, code: VersionCode) -> PathBuf {
        self.package_dir(package).join(code.to_string())
    }

    /// Every package directory, sorted by package name.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Io`] if the store root cannot be listed.
    pub fn packages(&self) -> Result<Vec<(PackageName, PathBuf)>> {
        Ok(subdirs(&self.root)?
            .into_iter()
            .map(|(name, path)| (PackageName::new(name), path))
            .collect())
    }

    /// Every version directory of a package, ascending by version code.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] for a directory whose name is
    /// not a version code, and [`IndexError::Io`] if listing fails.
    pub fn versions(package_dir: &Path) -> Result<Vec<(VersionCode, PathBuf)>> {
        let mut versions = subdirs(package_dir)?
            .into_iter()
            .map(|(name, path)| {
                let code = name.parse::<VersionCode>().map_err(|e| IndexError::config(&path, e))?;
                Ok((code, path))
            })
            .collect::<Result<Vec<_>>>()?;
        versions.sort_by_key(|(code, _)| *code);
        Ok(versions)
    }

    /// APK files of a version directory, sorted by file name.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Io`] if the directory cannot be listed.
    pub fn artifacts(version_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut apks = Vec::new();
        for entry in fs::read_dir(version_dir).at(version_dir)? {
            let path = entry.at(version_dir)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "apk") {
                apks.push(path);
            }
        }
        apks.sort();
        Ok(apks)
    }

    /// Every APK in the store.
    ///
    /// # Errors
    ///
    /// Propagates listing errors.
    pub fn all_artifacts(&self) -> Result<Vec<PathBuf>> {
        let mut all = Vec::new();
        for (_, package_dir) in self.packages()? {
            for (_, version_dir) in Self::versions(&package_dir)? {
                all.extend(Self::artifacts(&version_dir)?);
            }
        }
        Ok(all)
    }

    /// Copy an APK into the store under the version directory its badging
    /// names.
    ///
    /// A newly created version directory gets a `props.toml` placing it in
    /// the `alpha` channel. Base APKs are stored as `base.apk`, splits keep
    /// their file name, and an `.idsig` sidecar is copied along.
    ///
    /// # Errors
    ///
    /// Returns badging errors and [`IndexError::Io`] on copy failures.
    pub fn import_apk(&self, apk: &Path, badging: &dyn BadgingSource) -> Result<ImportedApk> {
        let facts = badging.badging(apk)?;
        let dest_dir = self.version_dir(&facts.package, facts.version_code);

        let created = !dest_dir.is_dir();
        if created {
            fs::create_dir_all(&dest_dir).at(&dest_dir)?;
            let props = dest_dir.join(PROPS_FILE);
            fs::write(&props, "channel = \"alpha\"\n").at(&props)?;
        }

        let dest = if facts.is_split() {
            let name = apk
                .file_name()
                .ok_or_else(|| IndexError::config(apk, "not a file path"))?;
            dest_dir.join(name)
        } else {
            dest_dir.join(BASE_APK)
        };
        fs::copy(apk, &dest).at(apk)?;

        let idsig = idsig_path(apk);
        if idsig.is_file() {
            let idsig_dest = idsig_path(&dest);
            fs::copy(&idsig, &idsig_dest).at(&idsig)?;
        }

        Ok(ImportedApk {
            package: facts.package,
            version_code: facts.version_code,
            destination: dest,
            created_version: created,
        })
    }
}

/// Where [`PackageStore::import_apk`] put an APK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedApk {
    /// Package identifier.
    pub package: PackageName,
    /// Version code.
    pub version_code: VersionCode,
    /// Copied APK path.
    pub destination: PathBuf,
    /// Whether the version directory was created by this import.
    pub created_version: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badging::Badging;
    use tempfile::tempdir;

    struct FixedBadging(Badging);

    impl BadgingSource for FixedBadging {
        fn badging(&self, _apk: &Path) -> Result<Badging> {
            Ok(self.0.clone())
        }
    }

    fn facts(split: Option<&str>) -> Badging {
        Badging {
            package: PackageName::new("com.example.app"),
            version_code: VersionCode::new(42),
            version_name: Some("4.2".into()),
            split: split.map(str::to_string),
            label: None,
            min_sdk: Some(29),
            max_sdk: None,
            native_code: vec![],
            static_libraries: vec![],
        }
    }

    #[test]
    fn sidecar_paths() {
        let apk = Path::new("/s/p/1/base.apk");
        assert_eq!(gz_path(apk), Path::new("/s/p/1/base.apk.gz"));
        assert_eq!(br_path(apk), Path::new("/s/p/1/base.apk.br"));
        assert_eq!(fingerprint_path(apk), Path::new("/s/p/1/base.apk.sha256"));
        assert_eq!(fsverity_sig_path(apk, 2), Path::new("/s/p/1/base.apk.2.fsv_sig"));
    }

    #[test]
    fn versions_sort_numerically_and_reject_junk() {
        let dir = tempdir().unwrap();
        for v in ["9", "10", "100"] {
            fs::create_dir(dir.path().join(v)).unwrap();
        }
        fs::write(dir.path().join("common-props.toml"), "").unwrap();
        let codes: Vec<u64> = PackageStore::versions(dir.path())
            .unwrap()
            .into_iter()
            .map(|(c, _)| c.get())
            .collect();
        assert_eq!(codes, vec![9, 10, 100]);

        fs::create_dir(dir.path().join("latest")).unwrap();
        assert!(matches!(
            PackageStore::versions(dir.path()),
            Err(IndexError::Configuration { .. })
        ));
    }

    #[test]
    fn artifacts_only_lists_apks() {
        let dir = tempdir().unwrap();
        for f in ["base.apk", "base.apk.gz", "split_config.x86.apk", "props.toml"] {
            fs::write(dir.path().join(f), b"x").unwrap();
        }
        let names: Vec<String> = PackageStore::artifacts(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["base.apk", "split_config.x86.apk"]);
    }

    #[test]
    fn missing_store_is_io_error() {
        let store = PackageStore::new("/nonexistent/apkrepo/store");
        assert!(matches!(store.packages(), Err(IndexError::Io { .. })));
    }

    #[test]
    fn import_creates_alpha_version() {
        let store_dir = tempdir().unwrap();
        let incoming = tempdir().unwrap();
        let store = PackageStore::new(store_dir.path());

        let base = incoming.path().join("app-release.apk");
        fs::write(&base, b"base").unwrap();
        fs::write(incoming.path().join("app-release.apk.idsig"), b"v4").unwrap();

        let imported = store.import_apk(&base, &FixedBadging(facts(None))).unwrap();
        assert!(imported.created_version);
        let version_dir = store_dir.path().join("com.example.app/42");
        assert_eq!(imported.destination, version_dir.join("base.apk"));
        assert_eq!(
            fs::read_to_string(version_dir.join("props.toml")).unwrap(),
            "channel = \"alpha\"\n"
        );
        assert!(version_dir.join("base.apk.idsig").is_file());

        let split = incoming.path().join("split_config.arm64_v8a.apk");
        fs::write(&split, b"split").unwrap();
        fs::write(version_dir.join("props.toml"), "channel = \"stable\"\n").unwrap();
        let imported = store
            .import_apk(&split, &FixedBadging(facts(Some("config.arm64_v8a"))))
            .unwrap();
        assert!(!imported.created_version);
        assert!(version_dir.join("split_config.arm64_v8a.apk").is_file());
        // an existing overlay is left alone
        assert_eq!(
            fs::read_to_string(version_dir.join("props.toml")).unwrap(),
            "channel = \"stable\"\n"
        );
    }
}
