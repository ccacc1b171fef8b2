//! APK signer extraction and the single-signer trust gate.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use apkrepo_schema::Sha256Digest;
use regex::Regex;

use crate::error::{IndexError, Result};
use crate::tool::ExternalTool;

/// `Signer #1 certificate SHA-256 digest: <hex>` as printed by
/// `apksigner verify --print-certs --verbose`.
static SIGNER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Signer .+ certificate SHA-256 digest: ([0-9a-fA-F]{64})")
        .expect("signer line pattern is valid")
});

/// One signer certificate found on an APK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerCert {
    /// SHA-256 of the signer certificate.
    pub digest: Sha256Digest,
    /// Whether the signer only applies up to some `maxSdkVersion`
    /// (e.g. a rotated-out key kept for old platforms).
    pub sdk_restricted: bool,
}

/// Parse `apksigner verify --print-certs --verbose` output.
///
/// # Errors
///
/// Returns [`IndexError::Tool`] if a digest fails validation.
pub fn parse_signers(output: &str, apk: &Path) -> Result<Vec<SignerCert>> {
    output
        .lines()
        .filter_map(|line| {
            SIGNER_LINE
                .captures(line)
                .map(|caps| (line, caps[1].to_string()))
        })
        .map(|(line, hex)| {
            let digest = Sha256Digest::new(hex).map_err(|e| IndexError::Tool {
                tool: "apksigner",
                path: apk.to_path_buf(),
                message: e.to_string(),
            })?;
            Ok(SignerCert {
                digest,
                sdk_restricted: line.contains("maxSdkVersion="),
            })
        })
        .collect()
}

/// The one effective signer of `apk`.
///
/// SDK-restricted signers are ignored.
///
/// # Errors
///
/// Returns [`IndexError::MultiSignerUnsupported`] for more than one
/// unrestricted signer and [`IndexError::MissingSigner`] for none.
pub fn primary_signer(apk: &Path, certs: &[SignerCert]) -> Result<Sha256Digest> {
    let mut primary = certs.iter().filter(|c| !c.sdk_restricted);
    let first = primary.next().ok_or_else(|| IndexError::MissingSigner {
        artifact: apk.to_path_buf(),
    })?;
    if primary.next().is_some() {
        return Err(IndexError::MultiSignerUnsupported {
            artifact: apk.to_path_buf(),
        });
    }
    Ok(first.digest.clone())
}

/// Require the base APK's signer to be one the package trusts.
///
/// # Errors
///
/// Returns [`IndexError::UntrustedSigner`] otherwise.
pub fn ensure_trusted(
    apk: &Path,
    digest: &Sha256Digest,
    trusted: &BTreeSet<Sha256Digest>,
) -> Result<()> {
    if trusted.contains(digest) {
        Ok(())
    } else {
        Err(IndexError::UntrustedSigner {
            artifact: apk.to_path_buf(),
            digest: digest.clone(),
        })
    }
}

/// Require a split to carry its base APK's signer.
///
/// # Errors
///
/// Returns [`IndexError::SignerMismatch`] otherwise.
pub fn ensure_same_signer(
    split: &Path,
    base_signer: &Sha256Digest,
    split_signer: &Sha256Digest,
) -> Result<()> {
    if base_signer == split_signer {
        Ok(())
    } else {
        Err(IndexError::SignerMismatch {
            artifact: split.to_path_buf(),
            expected: base_signer.clone(),
            found: split_signer.clone(),
        })
    }
}

/// Source of signer certificates for an APK.
pub trait SignatureSource {
    /// All signer certificates of `apk`, restricted ones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the collaborator fails.
    fn signers(&self, apk: &Path) -> Result<Vec<SignerCert>>;

    /// The single effective signer of `apk`; see [`primary_signer`].
    ///
    /// # Errors
    ///
    /// Propagates [`SignatureSource::signers`] and [`primary_signer`] errors.
    fn primary_signer(&self, apk: &Path) -> Result<Sha256Digest> {
        primary_signer(apk, &self.signers(apk)?)
    }
}

/// [`SignatureSource`] backed by `apksigner verify`.
#[derive(Debug, Clone)]
pub struct ApkSigner {
    tool: ExternalTool,
}

impl ApkSigner {
    /// Use `program` (a name in `PATH` or an explicit path).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            tool: ExternalTool::new("apksigner", program),
        }
    }
}

impl Default for ApkSigner {
    fn default() -> Self {
        Self::new("apksigner")
    }
}

impl SignatureSource for ApkSigner {
    fn signers(&self, apk: &Path) -> Result<Vec<SignerCert>> {
        let output = self.tool.run(
            [
                OsStr::new("verify"),
                OsStr::new("--print-certs"),
                OsStr::new("--verbose"),
                apk.as_os_str(),
            ],
            apk,
        )?;
        parse_signers(&output, apk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(b: u8) -> String {
        format!("{b:02x}").repeat(32)
    }

    #[test]
    fn parses_apksigner_output() {
        let out = format!(
            "Verifies\nVerified using v2 scheme (APK Signature Scheme v2): true\n\
             Number of signers: 1\n\
             Signer #1 certificate DN: CN=Example\n\
             Signer #1 certificate SHA-256 digest: {}\n\
             Signer #1 certificate SHA-1 digest: 0011\n\
             Signer (minSdkVersion=24, maxSdkVersion=32) certificate SHA-256 digest: {}\n",
            hex(0xaa),
            hex(0xbb)
        );
        let certs = parse_signers(&out, Path::new("base.apk")).unwrap();
        assert_eq!(certs.len(), 2);
        assert!(!certs[0].sdk_restricted);
        assert!(certs[1].sdk_restricted);
        assert_eq!(
            primary_signer(Path::new("base.apk"), &certs).unwrap().as_str(),
            hex(0xaa)
        );
    }

    #[test]
    fn two_unrestricted_signers_fail() {
        let certs = vec![
            SignerCert {
                digest: Sha256Digest::from_bytes([1; 32]),
                sdk_restricted: false,
            },
            SignerCert {
                digest: Sha256Digest::from_bytes([2; 32]),
                sdk_restricted: false,
            },
        ];
        let err = primary_signer(Path::new("base.apk"), &certs).unwrap_err();
        assert!(matches!(err, IndexError::MultiSignerUnsupported { .. }));
    }

    #[test]
    fn no_signer_fails() {
        let err = primary_signer(Path::new("base.apk"), &[]).unwrap_err();
        assert!(matches!(err, IndexError::MissingSigner { .. }));
    }

    #[test]
    fn trust_and_split_checks() {
        let a = Sha256Digest::from_bytes([1; 32]);
        let b = Sha256Digest::from_bytes([2; 32]);
        let trusted: BTreeSet<_> = [a.clone()].into_iter().collect();

        assert!(ensure_trusted(Path::new("base.apk"), &a, &trusted).is_ok());
        assert!(matches!(
            ensure_trusted(Path::new("base.apk"), &b, &trusted),
            Err(IndexError::UntrustedSigner { .. })
        ));
        assert!(ensure_same_signer(Path::new("split.apk"), &a, &a).is_ok());
        assert!(matches!(
            ensure_same_signer(Path::new("split.apk"), &a, &b),
            Err(IndexError::SignerMismatch { .. })
        ));
    }
}
