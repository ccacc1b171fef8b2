//! Discovery of numbered key and certificate generations.
//!
//! Keys are rotated by adding a file with the next epoch number next to the
//! existing ones (`apps.0.sec`, `apps.1.sec`, ...). Every epoch present is
//! used, oldest first, so clients pinned to an older key keep verifying.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};

/// A family of epoch-numbered files: `<prefix>.<N>.<extension>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochFamily {
    prefix: &'static str,
    extension: &'static str,
}

impl EpochFamily {
    /// fs-verity signing certificates, `fsverity_cert.<N>.der`.
    pub const FSVERITY_CERT: Self = Self::new("fsverity_cert", "der");
    /// PEM form of the fs-verity certificate handed to the signing tool.
    pub const FSVERITY_CERT_PEM: Self = Self::new("fsverity_cert", "pem");
    /// fs-verity signing keys, `fsverity_private_key.<N>.pem`.
    pub const FSVERITY_KEY: Self = Self::new("fsverity_private_key", "pem");
    /// Document signing secret keys, `apps.<N>.sec`.
    pub const SIGNIFY_SECRET: Self = Self::new("apps", "sec");
    /// Document signing public keys, `apps.<N>.pub`.
    pub const SIGNIFY_PUBLIC: Self = Self::new("apps", "pub");

    /// Family of `<prefix>.<N>.<extension>` files.
    pub const fn new(prefix: &'static str, extension: &'static str) -> Self {
        Self { prefix, extension }
    }

    /// File name of `epoch` in this family.
    pub fn file_name(&self, epoch: u32) -> String {
        format!("{}.{epoch}.{}", self.prefix, self.extension)
    }

    /// Path of `epoch` in this family under `dir`.
    pub fn path(&self, dir: &Path, epoch: u32) -> PathBuf {
        dir.join(self.file_name(epoch))
    }

    /// Epoch number encoded in `name`, if it belongs to this family.
    pub fn parse(&self, name: &str) -> Option<u32> {
        let rest = name.strip_prefix(self.prefix)?.strip_prefix('.')?;
        let digits = rest.strip_suffix(self.extension)?.strip_suffix('.')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // "01" would alias "1"
        if digits.len() > 1 && digits.starts_with('0') {
            return None;
        }
        digits.parse().ok()
    }
}

/// Epochs `0..k` of `family` present in `dir`, ascending.
///
/// Discovery stops at the first missing epoch; files numbered past a gap
/// are ignored with a warning. A missing directory has no epochs.
///
/// # Errors
///
/// Returns [`IndexError::Io`](crate::error::IndexError::Io) if the
/// directory cannot be listed.
pub fn discover_epochs(dir: &Path, family: EpochFamily) -> Result<Vec<u32>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut epochs = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        if let Some(epoch) = entry.file_name().to_str().and_then(|n| family.parse(n)) {
            epochs.push(epoch);
        }
    }
    epochs.sort_unstable();

    let gap = (0u32..)
        .zip(epochs.iter().copied())
        .find(|(n, e)| n != e);
    if let Some((missing, first_ignored)) = gap {
        tracing::warn!(
            "ignoring {} and later: {} is missing",
            family.path(dir, first_ignored).display(),
            family.file_name(missing)
        );
        epochs.retain(|&e| e < missing);
    }
    Ok(epochs)
}
