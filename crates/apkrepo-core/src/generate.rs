//! The full `generate` run: compress, scan, assemble, write, sign.

use std::fs;
use std::path::PathBuf;

use crate::assemble::{IndexAssembler, write_document};
use crate::badging::{Aapt2, BadgingSource};
use crate::compress::{CompressionSummary, compress_store};
use crate::config::{RepoConfig, ToolPaths};
use crate::error::{IoResultExt, Result};
use crate::fingerprint::FingerprintCache;
use crate::fsverity::{FsVerityTool, FsVeritySigner};
use crate::scan::Scanner;
use crate::signature::{ApkSigner, SignatureSource};
use crate::signify::{SignedOutput, load_epoch_keys, sign_document};
use crate::store::PackageStore;

/// The external collaborators of a run.
pub struct Toolchain {
    /// Badging extractor.
    pub badging: Box<dyn BadgingSource>,
    /// Signer extractor.
    pub signatures: Box<dyn SignatureSource>,
    /// fs-verity signer.
    pub fsverity: Box<dyn FsVeritySigner>,
}

impl Toolchain {
    /// The real tools at the configured paths.
    pub fn from_paths(paths: &ToolPaths) -> Self {
        Self {
            badging: Box::new(Aapt2::new(&paths.aapt2)),
            signatures: Box::new(ApkSigner::new(&paths.apksigner)),
            fsverity: Box::new(FsVerityTool::new(&paths.fsverity)),
        }
    }
}

/// Knobs of a `generate` run.
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    /// Run the compression pass first.
    pub compress: bool,
    /// Fingerprint cache policy.
    pub cache: FingerprintCache,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            compress: true,
            cache: FingerprintCache::default(),
        }
    }
}

/// What a `generate` run produced.
#[derive(Debug, Clone)]
pub struct GenerateReport {
    /// The written document.
    pub document: PathBuf,
    /// Packages indexed.
    pub packages: usize,
    /// Versions found in the store.
    pub versions: usize,
    /// Versions published after consolidation.
    pub retained: usize,
    /// Compression pass outcome, if it ran.
    pub compression: Option<CompressionSummary>,
    /// Signature files, one entry per key epoch.
    pub signatures: Vec<SignedOutput>,
}

/// Build, write and sign the index described by `config`.
///
/// The document is only written once every package has validated and
/// every signing key has loaded; any error before that leaves the previous
/// document and its signatures in place.
///
/// # Errors
///
/// Returns the first error of any stage.
pub fn generate(
    config: &RepoConfig,
    tools: &Toolchain,
    options: GenerateOptions,
) -> Result<GenerateReport> {
    let store = PackageStore::new(&config.packages_dir);

    let compression = if options.compress {
        Some(compress_store(&store, false)?)
    } else {
        None
    };

    let repository = Scanner::new(tools.badging.as_ref(), tools.signatures.as_ref())
        .with_cache(options.cache)
        .scan_store(&store)?;
    let packages = repository.len();
    let versions = repository.packages().map(|p| p.versions.len()).sum();

    let document = IndexAssembler::new(&store, &config.keys_dir, tools.fsverity.as_ref())
        .assemble(repository)?;
    let retained = document.packages.values().map(|p| p.variants.len()).sum();
    let keys = load_epoch_keys(&config.keys_dir)?;

    fs::create_dir_all(&config.output_dir).at(&config.output_dir)?;
    let path = write_document(&document, &config.output_dir, &config.metadata_name)?;
    let signatures = sign_document(&path, &keys)?;

    Ok(GenerateReport {
        document: path,
        packages,
        versions,
        retained,
        compression,
        signatures,
    })
}
