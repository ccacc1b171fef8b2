//! Assembly of the top-level metadata document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use apkrepo_schema::{MetadataDocument, PackageEntry};
use chrono::Utc;

use crate::consolidate::consolidate;
use crate::error::Result;
use crate::fingerprint::write_atomic;
use crate::fsverity::{FsVerityEpoch, FsVeritySigner};
use crate::scan::Repository;
use crate::store::PackageStore;

/// Turns a scanned [`Repository`] into a [`MetadataDocument`].
pub struct IndexAssembler<'a> {
    store: &'a PackageStore,
    keys_dir: PathBuf,
    fsverity: &'a dyn FsVeritySigner,
}

impl<'a> IndexAssembler<'a> {
    /// `keys_dir` holds the fs-verity certificate generations.
    pub fn new(
        store: &'a PackageStore,
        keys_dir: impl Into<PathBuf>,
        fsverity: &'a dyn FsVeritySigner,
    ) -> Self {
        Self {
            store,
            keys_dir: keys_dir.into(),
            fsverity,
        }
    }

    /// Consolidate every package and build the document, timestamped now.
    ///
    /// # Errors
    ///
    /// See [`IndexAssembler::assemble_at`].
    pub fn assemble(&self, repository: Repository) -> Result<MetadataDocument> {
        self.assemble_at(repository, Utc::now().timestamp())
    }

    /// Consolidate every package and build the document with `time`.
    ///
    /// For each fs-verity certificate generation, oldest first, every
    /// retained artifact of a package that asks for fs-verity signatures is
    /// signed if it has no signature for that generation yet; only then is
    /// the certificate published.
    ///
    /// # Errors
    ///
    /// Returns consolidation, epoch discovery, fs-verity and certificate
    /// read errors.
    pub fn assemble_at(&self, repository: Repository, time: i64) -> Result<MetadataDocument> {
        let mut packages = BTreeMap::new();
        for (name, record) in repository.into_packages() {
            let variants = consolidate(record.versions.into_values())?;
            tracing::debug!("{name}: {} variants retained", variants.len());
            packages.insert(
                name,
                PackageEntry {
                    common: record.common,
                    variants,
                },
            );
        }

        let mut fs_verity_certs = BTreeMap::new();
        for epoch in FsVerityEpoch::discover(&self.keys_dir)? {
            let apks: Vec<PathBuf> = packages
                .iter()
                .filter(|(_, entry)| entry.common.has_fs_verity_signatures)
                .flat_map(|(name, entry)| {
                    entry.variants.iter().flat_map(move |(code, version)| {
                        let dir = self.store.version_dir(name, *code);
                        version.artifacts.iter().map(move |a| dir.join(&a.file_name))
                    })
                })
                .collect();
            let created = epoch.sign_missing(self.fsverity, apks.iter().map(PathBuf::as_path))?;
            if created > 0 {
                tracing::info!("created {created} fs-verity signatures for epoch {}", epoch.epoch);
            }
            fs_verity_certs.insert(epoch.epoch, epoch.cert_base64()?);
        }

        Ok(MetadataDocument {
            time,
            packages,
            fs_verity_certs,
        })
    }
}

/// Write the canonical form of `document` to `<output_dir>/<name>.json`.
///
/// The file is replaced atomically, so readers never see a partial
/// document.
///
/// # Errors
///
/// Returns serialization and I/O errors.
pub fn write_document(document: &MetadataDocument, output_dir: &Path, name: &str) -> Result<PathBuf> {
    let path = output_dir.join(format!("{name}.json"));
    let bytes = document.to_canonical_json()?;
    write_atomic(&path, &bytes)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::testing::{StoreFixture, badging};
    use crate::store;
    use apkrepo_schema::VersionCode;
    use std::cell::Cell;
    use std::fs;

    #[derive(Default)]
    struct CountingSigner {
        calls: Cell<usize>,
    }

    impl FsVeritySigner for CountingSigner {
        fn sign(&self, _apk: &Path, sig_out: &Path, _key: &Path, _cert: &Path) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            fs::write(sig_out, b"fsv").unwrap();
            Ok(())
        }
    }

    fn three_versions(fx: &mut StoreFixture, package_extra: &str) {
        fx.package("com.example.app", &[1], package_extra);
        for (code, abis) in [(10, "[\"arm64-v8a\"]"), (11, "[\"arm64-v8a\"]"), (12, "[\"arm64-v8a\", \"armeabi-v7a\"]")] {
            fx.apk("com.example.app", code, "base.apk", 1, badging("com.example.app", code, None));
            fx.props(
                "com.example.app",
                code,
                &format!("channel = \"stable\"\nabis = {abis}\n"),
            );
        }
        fx.compress();
    }

    #[test]
    fn superseded_versions_are_dropped_from_document() {
        let mut fx = StoreFixture::new();
        three_versions(&mut fx, "");
        let repo = fx.scanner().scan_store(&fx.store()).unwrap();

        let keys = tempfile::tempdir().unwrap();
        let signer = CountingSigner::default();
        let store = fx.store();
        let doc = IndexAssembler::new(&store, keys.path(), &signer)
            .assemble_at(repo, 1_700_000_000)
            .unwrap();

        assert_eq!(doc.time, 1_700_000_000);
        let entry = &doc.packages["com.example.app"];
        assert_eq!(
            entry.variants.version_codes(),
            vec![VersionCode::new(11), VersionCode::new(12)]
        );
        assert!(doc.fs_verity_certs.is_empty());
        assert_eq!(signer.calls.get(), 0);
    }

    #[test]
    fn fs_verity_pass_signs_retained_artifacts_per_epoch() {
        let mut fx = StoreFixture::new();
        three_versions(&mut fx, "hasFsVeritySignatures = true\n");
        let repo = fx.scanner().scan_store(&fx.store()).unwrap();

        let keys = tempfile::tempdir().unwrap();
        fs::write(keys.path().join("fsverity_cert.0.der"), b"c0").unwrap();
        fs::write(keys.path().join("fsverity_cert.1.der"), b"c1").unwrap();

        let signer = CountingSigner::default();
        let store = fx.store();
        let assembler = IndexAssembler::new(&store, keys.path(), &signer);
        let doc = assembler.assemble_at(repo.clone(), 1).unwrap();

        // two retained versions, one artifact each, two epochs
        assert_eq!(signer.calls.get(), 4);
        assert_eq!(doc.fs_verity_certs.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        let base11 = fx.dir.path().join("com.example.app/11/base.apk");
        assert!(store::fsverity_sig_path(&base11, 1).is_file());
        let base10 = fx.dir.path().join("com.example.app/10/base.apk");
        assert!(!store::fsverity_sig_path(&base10, 0).exists());

        // existing signatures are reused
        assembler.assemble_at(repo, 2).unwrap();
        assert_eq!(signer.calls.get(), 4);
    }

    #[test]
    fn written_document_is_canonical_and_stable() {
        let mut fx = StoreFixture::new();
        three_versions(&mut fx, "");
        let keys = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let signer = CountingSigner::default();
        let store = fx.store();
        let assembler = IndexAssembler::new(&store, keys.path(), &signer);

        let first = assembler
            .assemble_at(fx.scanner().scan_store(&store).unwrap(), 5)
            .unwrap();
        let path = write_document(&first, out.path(), "metadata.1").unwrap();
        let bytes_a = fs::read(&path).unwrap();

        let second = assembler
            .assemble_at(fx.scanner().scan_store(&store).unwrap(), 5)
            .unwrap();
        write_document(&second, out.path(), "metadata.1").unwrap();
        assert_eq!(bytes_a, fs::read(&path).unwrap());

        let value: serde_json::Value = serde_json::from_slice(&bytes_a).unwrap();
        assert_eq!(value["time"], 5);
        assert_eq!(
            value["packages"]["com.example.app"]["variants"]["12"]["abis"],
            serde_json::json!(["arm64-v8a", "armeabi-v7a"])
        );
        assert!(value["packages"]["com.example.app"]["variants"].get("10").is_none());
    }

    #[test]
    fn empty_repository_is_valid() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = PackageStore::new(store_dir.path());
        let signer = CountingSigner::default();
        let doc = IndexAssembler::new(&store, store_dir.path(), &signer)
            .assemble_at(Repository::default(), 0)
            .unwrap();
        assert!(doc.packages.is_empty());
    }
}
