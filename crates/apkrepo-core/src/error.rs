//! Error taxonomy for index generation.
//!
//! Every variant is fatal to a run: the generator has no partial-success
//! mode, and each variant names the artifact, package or file at fault.

use std::path::{Path, PathBuf};

use apkrepo_schema::{SchemaError, Sha256Digest, VersionCode};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = IndexError> = std::result::Result<T, E>;

/// Errors that abort index generation.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Missing or malformed declarative properties.
    #[error("configuration error in {}: {message}", path.display())]
    Configuration {
        /// File or directory the problem was found in.
        path: PathBuf,
        /// What is wrong.
        message: String,
    },

    /// A file or directory could not be read or written.
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// More than one unrestricted signer on an APK.
    #[error("{} has more than one signer", artifact.display())]
    MultiSignerUnsupported {
        /// Offending APK.
        artifact: PathBuf,
    },

    /// No unrestricted signer could be extracted from an APK.
    #[error("didn't find signature of {}", artifact.display())]
    MissingSigner {
        /// Offending APK.
        artifact: PathBuf,
    },

    /// A split is signed by a different certificate than its base APK.
    #[error("signature mismatch, apk: {} (expected {expected}, found {found})", artifact.display())]
    SignerMismatch {
        /// Offending split APK.
        artifact: PathBuf,
        /// Base APK signer.
        expected: Sha256Digest,
        /// Split signer.
        found: Sha256Digest,
    },

    /// The base APK signer is not in the package's trusted set.
    #[error("unknown signature of {}, SHA-256: {digest}", artifact.display())]
    UntrustedSigner {
        /// Offending base APK.
        artifact: PathBuf,
        /// Signer that was found.
        digest: Sha256Digest,
    },

    /// A compressed sibling is missing or was produced from other content.
    #[error("{} is missing or stale relative to {}; re-run compression", sibling.display(), artifact.display())]
    EncodingConsistency {
        /// Source APK.
        artifact: PathBuf,
        /// The `.gz`/`.br` sibling at fault.
        sibling: PathBuf,
    },

    /// An APK's versionCode disagrees with its version directory.
    #[error("{} has versionCode {found}, expected {expected}", artifact.display())]
    VersionCodeMismatch {
        /// Offending APK.
        artifact: PathBuf,
        /// Code from the version directory.
        expected: VersionCode,
        /// Code reported by badging.
        found: VersionCode,
    },

    /// An APK's package name disagrees with its package directory.
    #[error("{} belongs to package {found}, expected {expected}", artifact.display())]
    PackageMismatch {
        /// Offending APK.
        artifact: PathBuf,
        /// Name from the package directory.
        expected: String,
        /// Name reported by badging.
        found: String,
    },

    /// An external collaborator could not be run or failed.
    #[error("{tool} failed on {}: {message}", path.display())]
    Tool {
        /// Program name.
        tool: &'static str,
        /// Input the tool was run on.
        path: PathBuf,
        /// Exit status and stderr, or the spawn error.
        message: String,
    },

    /// A detached signature could not be produced or did not verify.
    #[error("signature error on {}: {message}", path.display())]
    Signature {
        /// Key, signature or message file involved.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// Document serialization failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl IndexError {
    /// Build an [`IndexError::Io`] for `path`.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Build an [`IndexError::Configuration`] for `path`.
    pub fn config(path: impl AsRef<Path>, message: impl std::fmt::Display) -> Self {
        Self::Configuration {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Build an [`IndexError::Signature`] for `path`.
    pub fn signature(path: impl AsRef<Path>, message: impl std::fmt::Display) -> Self {
        Self::Signature {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }
}

/// Attach a path to `std::io::Result` values.
pub trait IoResultExt<T> {
    /// Map the error into [`IndexError::Io`] for `path`.
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| IndexError::io(path, e))
    }
}
