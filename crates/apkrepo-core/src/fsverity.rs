//! Detached fs-verity signatures for published artifacts.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;

use crate::epoch::{EpochFamily, discover_epochs};
use crate::error::{IoResultExt, Result};
use crate::store;
use crate::tool::ExternalTool;

/// Produces fs-verity signatures.
pub trait FsVeritySigner {
    /// Sign `apk` with `key`/`cert` and write the signature to `sig_out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the collaborator fails.
    fn sign(&self, apk: &Path, sig_out: &Path, key: &Path, cert: &Path) -> Result<()>;
}

/// [`FsVeritySigner`] backed by `fsverity sign`.
#[derive(Debug, Clone)]
pub struct FsVerityTool {
    tool: ExternalTool,
}

impl FsVerityTool {
    /// Use `program` (a name in `PATH` or an explicit path).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            tool: ExternalTool::new("fsverity", program),
        }
    }
}

impl Default for FsVerityTool {
    fn default() -> Self {
        Self::new("fsverity")
    }
}

fn flag(name: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(name);
    arg.push(path.as_os_str());
    arg
}

impl FsVeritySigner for FsVerityTool {
    fn sign(&self, apk: &Path, sig_out: &Path, key: &Path, cert: &Path) -> Result<()> {
        self.tool.run(
            [
                OsString::from("sign"),
                apk.as_os_str().to_os_string(),
                sig_out.as_os_str().to_os_string(),
                flag("--key=", key),
                flag("--cert=", cert),
            ],
            apk,
        )?;
        Ok(())
    }
}

/// Key material of one fs-verity certificate generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsVerityEpoch {
    /// Epoch number.
    pub epoch: u32,
    /// `fsverity_cert.<N>.der`, published in the index.
    pub cert_der: PathBuf,
    /// `fsverity_cert.<N>.pem`, handed to the signer.
    pub cert_pem: PathBuf,
    /// `fsverity_private_key.<N>.pem`.
    pub key: PathBuf,
}

impl FsVerityEpoch {
    /// Every certificate generation in `keys_dir`, ascending.
    ///
    /// # Errors
    ///
    /// Propagates [`discover_epochs`] errors.
    pub fn discover(keys_dir: &Path) -> Result<Vec<Self>> {
        Ok(discover_epochs(keys_dir, EpochFamily::FSVERITY_CERT)?
            .into_iter()
            .map(|epoch| Self {
                epoch,
                cert_der: EpochFamily::FSVERITY_CERT.path(keys_dir, epoch),
                cert_pem: EpochFamily::FSVERITY_CERT_PEM.path(keys_dir, epoch),
                key: EpochFamily::FSVERITY_KEY.path(keys_dir, epoch),
            })
            .collect())
    }

    /// The DER certificate, base64-encoded for the index.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::Io`] if the certificate cannot be read.
    pub fn cert_base64(&self) -> Result<String> {
        let der = fs::read(&self.cert_der).at(&self.cert_der)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(der))
    }

    /// Sign every artifact in `apks` that has no signature for this epoch
    /// yet. Returns how many signatures were created.
    ///
    /// # Errors
    ///
    /// Propagates signer failures.
    pub fn sign_missing<'a, I>(&self, signer: &dyn FsVeritySigner, apks: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut created = 0;
        for apk in apks {
            let sig = store::fsverity_sig_path(apk, self.epoch);
            if sig.is_file() {
                continue;
            }
            tracing::info!("fs-verity signing {} (epoch {})", apk.display(), self.epoch);
            signer.sign(apk, &sig, &self.key, &self.cert_pem)?;
            created += 1;
        }
        Ok(created)
    }
}
