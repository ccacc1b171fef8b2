//! Content hashes and sizes of APK artifacts, memoized in sidecar files.
//!
//! Hashing every APK on every run is the slow part of indexing a large
//! store. Each artifact gets a `<apk>.sha256` sidecar recording its digest,
//! the signer and versionCode it was validated with, and the size and
//! modification time it had at the time. The sidecar is only trusted while
//! the artifact still has that size and modification time.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use apkrepo_schema::{Sha256Digest, VersionCode};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{IndexError, IoResultExt, Result};
use crate::store;

/// Size and modification time of a file at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    /// Length in bytes.
    pub size: u64,
    /// Modification time, if the platform tracks one.
    pub mtime: Option<FileTime>,
}

impl FileStamp {
    /// Stat `path`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Io`] if the file cannot be stat'ed.
    pub fn of(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).at(path)?;
        Ok(Self {
            size: meta.len(),
            mtime: meta.modified().ok().map(FileTime::from_system_time),
        })
    }
}

/// Persisted sidecar contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFingerprint {
    /// SHA-256 of the artifact.
    pub sha256: Sha256Digest,
    /// Effective signer the artifact was validated with.
    pub signer: Sha256Digest,
    /// versionCode badging reported for the artifact.
    pub version_code: VersionCode,
    /// Artifact size when hashed.
    pub size: u64,
    /// Artifact modification time when hashed (seconds part).
    pub mtime_secs: i64,
    /// Artifact modification time when hashed (nanoseconds part).
    pub mtime_nanos: u32,
}

impl CachedFingerprint {
    fn matches(&self, stamp: &FileStamp) -> bool {
        stamp.mtime.is_some_and(|mtime| {
            self.size == stamp.size
                && self.mtime_secs == mtime.unix_seconds()
                && self.mtime_nanos == mtime.nanoseconds()
        })
    }
}

/// Sidecar-backed fingerprint cache.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintCache {
    enabled: bool,
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl FingerprintCache {
    /// A cache that never reads or writes sidecars.
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// The cached fingerprint of `apk` if its sidecar still matches `stamp`.
    ///
    /// Unreadable or unparseable sidecars are treated as absent. A sidecar
    /// holding only a hex digest, as older generators wrote, records no
    /// size or mtime to check it against, so the artifact is rehashed.
    pub fn lookup(&self, apk: &Path, stamp: &FileStamp) -> Option<CachedFingerprint> {
        if !self.enabled || stamp.mtime.is_none() {
            return None;
        }
        let path = store::fingerprint_path(apk);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CachedFingerprint>(&content) {
            Ok(entry) if entry.matches(stamp) => {
                tracing::debug!("fingerprint cache hit for {}", apk.display());
                Some(entry)
            }
            Ok(_) => None,
            Err(_) if is_bare_digest(&content) => {
                tracing::debug!("replacing digest-only {}", path.display());
                None
            }
            Err(e) => {
                tracing::warn!("ignoring corrupt {}: {e}", path.display());
                None
            }
        }
    }

    /// Persist a fingerprint for `apk` as of `stamp`.
    ///
    /// Does nothing when the cache is disabled or the platform reports no
    /// modification time.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Io`] if the sidecar cannot be written.
    pub fn store(
        &self,
        apk: &Path,
        stamp: &FileStamp,
        sha256: &Sha256Digest,
        signer: &Sha256Digest,
        version_code: VersionCode,
    ) -> Result<()> {
        let Some(mtime) = stamp.mtime.filter(|_| self.enabled) else {
            return Ok(());
        };
        let entry = CachedFingerprint {
            sha256: sha256.clone(),
            signer: signer.clone(),
            version_code,
            size: stamp.size,
            mtime_secs: mtime.unix_seconds(),
            mtime_nanos: mtime.nanoseconds(),
        };
        let path = store::fingerprint_path(apk);
        let json = serde_json::to_string(&entry).map_err(apkrepo_schema::SchemaError::from)?;
        write_atomic(&path, json.as_bytes())
    }
}

fn is_bare_digest(content: &str) -> bool {
    content.trim().parse::<Sha256Digest>().is_ok()
}

/// Write `bytes` to `path` via a temporary file in the same directory.
///
/// # Errors
///
/// Returns [`IndexError::Io`] on any write or rename failure.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).at(dir)?;
    tmp.write_all(bytes).at(path)?;
    tmp.persist(path).map_err(|e| IndexError::io(path, e.error))?;
    Ok(())
}

/// Stream `path` through SHA-256.
///
/// # Errors
///
/// Returns [`IndexError::Io`] if the file cannot be read.
pub fn sha256_file(path: &Path) -> Result<Sha256Digest> {
    let mut file = File::open(path).at(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).at(path)?;
    Ok(Sha256Digest::from_bytes(hasher.finalize().into()))
}

/// Sizes of an artifact's two encoded siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedSizes {
    /// `.gz` size.
    pub gz: u64,
    /// `.br` size.
    pub br: u64,
}

/// Check that both encoded siblings of `apk` exist and carry its
/// modification time, and return their sizes.
///
/// # Errors
///
/// Returns [`IndexError::EncodingConsistency`] if a sibling is missing or
/// its modification time differs from the artifact's (or cannot be
/// compared).
pub fn encoded_sizes(apk: &Path, stamp: &FileStamp) -> Result<EncodedSizes> {
    let sibling_size = |sibling: &Path| -> Result<u64> {
        let inconsistent = || IndexError::EncodingConsistency {
            artifact: apk.to_path_buf(),
            sibling: sibling.to_path_buf(),
        };
        let Ok(sibling_stamp) = FileStamp::of(sibling) else {
            return Err(inconsistent());
        };
        match (stamp.mtime, sibling_stamp.mtime) {
            (Some(a), Some(b)) if a == b => Ok(sibling_stamp.size),
            _ => Err(inconsistent()),
        }
    };

    Ok(EncodedSizes {
        gz: sibling_size(&store::gz_path(apk))?,
        br: sibling_size(&store::br_path(apk))?,
    })
}
