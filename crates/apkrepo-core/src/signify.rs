//! Detached Ed25519 signatures in the signify file format.
//!
//! Clients verify `metadata.1.json` with signify-compatible public keys, so
//! keys and signatures use its layout:
//!
//! ```text
//! secret key  Ed | BK | kdfrounds (u32 BE) | salt[16] | checksum[8] | keynum[8] | seed+pub[64]
//! public key  Ed | keynum[8] | pub[32]
//! signature   Ed | keynum[8] | sig[64]
//! ```
//!
//! Each is stored base64-encoded under an `untrusted comment:` line. Only
//! unencrypted secret keys (`kdfrounds = 0`) are supported.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha512};

use crate::epoch::{EpochFamily, discover_epochs};
use crate::error::{IndexError, IoResultExt, Result};
use crate::fingerprint::write_atomic;

const PKALG: &[u8; 2] = b"Ed";
const KDFALG: &[u8; 2] = b"BK";
const COMMENT_PREFIX: &str = "untrusted comment: ";

const SECRET_LEN: usize = 2 + 2 + 4 + 16 + 8 + 8 + 64;
const PUBLIC_LEN: usize = 2 + 8 + 32;
const SIGNATURE_LEN: usize = 2 + 8 + 64;

/// Random identifier tying signatures to the key that made them.
pub type KeyNum = [u8; 8];

/// Split a signify file into its comment and decoded payload.
fn decode_file(text: &str, path: &Path, expected_len: usize) -> Result<Vec<u8>> {
    let mut lines = text.lines();
    let payload = match lines.next() {
        Some(first) if first.starts_with(COMMENT_PREFIX) => lines.next(),
        // a bare base64 line, as found at the end of an sjson bundle
        other => other,
    }
    .ok_or_else(|| IndexError::signature(path, "empty file"))?;

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| IndexError::signature(path, format!("invalid base64: {e}")))?;
    if bytes.len() != expected_len {
        return Err(IndexError::signature(
            path,
            format!("expected {expected_len} bytes, found {}", bytes.len()),
        ));
    }
    if &bytes[..2] != PKALG {
        return Err(IndexError::signature(path, "unsupported signature algorithm"));
    }
    Ok(bytes)
}

fn encode_file(comment: &str, bytes: &[u8]) -> String {
    format!("{COMMENT_PREFIX}{comment}\n{}\n", STANDARD.encode(bytes))
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).at(path)
}

/// An unencrypted signify secret key.
pub struct SecretKey {
    keynum: KeyNum,
    signing: SigningKey,
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("keynum", &hex_keynum(&self.keynum))
            .finish_non_exhaustive()
    }
}

fn hex_keynum(keynum: &KeyNum) -> String {
    keynum.iter().map(|b| format!("{b:02x}")).collect()
}

impl SecretKey {
    /// A fresh random key.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut seed = [0u8; 32];
        let mut keynum = [0u8; 8];
        rng.fill_bytes(&mut seed);
        rng.fill_bytes(&mut keynum);
        Self {
            keynum,
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Parse secret key file contents; `path` only feeds errors.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] for an encrypted key and
    /// [`IndexError::Signature`] for a malformed one or a checksum mismatch.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let bytes = decode_file(text, path, SECRET_LEN)?;
        if &bytes[2..4] != KDFALG {
            return Err(IndexError::signature(path, "unsupported key derivation"));
        }
        let mut rounds = [0u8; 4];
        rounds.copy_from_slice(&bytes[4..8]);
        if u32::from_be_bytes(rounds) != 0 {
            return Err(IndexError::config(
                path,
                "password-protected secret keys are not supported; use an unencrypted key",
            ));
        }
        let checksum = &bytes[24..32];
        let mut keynum = [0u8; 8];
        keynum.copy_from_slice(&bytes[32..40]);
        let mut keypair = [0u8; 64];
        keypair.copy_from_slice(&bytes[40..104]);

        if Sha512::digest(keypair)[..8] != *checksum {
            return Err(IndexError::signature(path, "secret key checksum mismatch"));
        }
        let signing = SigningKey::from_keypair_bytes(&keypair)
            .map_err(|e| IndexError::signature(path, e))?;
        Ok(Self { keynum, signing })
    }

    /// Read and parse a secret key file.
    ///
    /// # Errors
    ///
    /// See [`SecretKey::parse`]; also [`IndexError::Io`].
    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&read_text(path)?, path)
    }

    /// Serialize as a secret key file.
    pub fn to_file_string(&self) -> String {
        let keypair = self.signing.to_keypair_bytes();
        let mut salt = [0u8; 16];
        rand::rng().fill_bytes(&mut salt);

        let mut bytes = Vec::with_capacity(SECRET_LEN);
        bytes.extend_from_slice(PKALG);
        bytes.extend_from_slice(KDFALG);
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&salt);
        bytes.extend_from_slice(&Sha512::digest(keypair)[..8]);
        bytes.extend_from_slice(&self.keynum);
        bytes.extend_from_slice(&keypair);
        encode_file("signify secret key", &bytes)
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            keynum: self.keynum,
            verifying: self.signing.verifying_key(),
        }
    }

    /// Sign `message`.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            keynum: self.keynum,
            signature: self.signing.sign(message),
        }
    }
}

/// A signify public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    keynum: KeyNum,
    verifying: VerifyingKey,
}

impl PublicKey {
    /// Parse public key file contents; `path` only feeds errors.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Signature`] for a malformed key.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let bytes = decode_file(text, path, PUBLIC_LEN)?;
        let mut keynum = [0u8; 8];
        keynum.copy_from_slice(&bytes[2..10]);
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[10..42]);
        let verifying =
            VerifyingKey::from_bytes(&key).map_err(|e| IndexError::signature(path, e))?;
        Ok(Self { keynum, verifying })
    }

    /// Read and parse a public key file.
    ///
    /// # Errors
    ///
    /// See [`PublicKey::parse`]; also [`IndexError::Io`].
    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&read_text(path)?, path)
    }

    /// Serialize as a public key file.
    pub fn to_file_string(&self) -> String {
        let mut bytes = Vec::with_capacity(PUBLIC_LEN);
        bytes.extend_from_slice(PKALG);
        bytes.extend_from_slice(&self.keynum);
        bytes.extend_from_slice(self.verifying.as_bytes());
        encode_file("signify public key", &bytes)
    }

    /// Check `signature` over `message`; `path` only feeds errors.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Signature`] if the signature was made by
    /// another key or does not verify.
    pub fn verify(&self, message: &[u8], signature: &Signature, path: &Path) -> Result<()> {
        if signature.keynum != self.keynum {
            return Err(IndexError::signature(
                path,
                "signature was made by a different key",
            ));
        }
        self.verifying
            .verify(message, &signature.signature)
            .map_err(|_| IndexError::signature(path, "signature verification failed"))
    }
}

/// A detached signify signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    keynum: KeyNum,
    signature: ed25519_dalek::Signature,
}

impl Signature {
    /// Parse a signature file, or a bare base64 signature line.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Signature`] for a malformed signature.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let bytes = decode_file(text, path, SIGNATURE_LEN)?;
        let mut keynum = [0u8; 8];
        keynum.copy_from_slice(&bytes[2..10]);
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&bytes[10..74]);
        Ok(Self {
            keynum,
            signature: ed25519_dalek::Signature::from_bytes(&sig),
        })
    }

    /// The base64 line clients append to bundles.
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(SIGNATURE_LEN);
        bytes.extend_from_slice(PKALG);
        bytes.extend_from_slice(&self.keynum);
        bytes.extend_from_slice(&self.signature.to_bytes());
        STANDARD.encode(bytes)
    }

    /// Serialize as a signature file naming the public key to verify with.
    pub fn to_file_string(&self, pubkey_name: &str) -> String {
        format!("{COMMENT_PREFIX}verify with {pubkey_name}\n{}\n", self.to_base64())
    }
}

/// Write a new key pair as `<dir>/<name>.sec` and `<dir>/<name>.pub`.
///
/// # Errors
///
/// Returns [`IndexError::Configuration`] if either file already exists and
/// [`IndexError::Io`] on write failures.
pub fn write_keypair(dir: &Path, name: &str) -> Result<(PathBuf, PathBuf)> {
    let sec = dir.join(format!("{name}.sec"));
    let public = dir.join(format!("{name}.pub"));
    for path in [&sec, &public] {
        if path.exists() {
            return Err(IndexError::config(path, "refusing to overwrite an existing key"));
        }
    }
    let key = SecretKey::generate();
    fs::create_dir_all(dir).at(dir)?;
    write_atomic(&sec, key.to_file_string().as_bytes())?;
    write_atomic(&public, key.public_key().to_file_string().as_bytes())?;
    Ok((sec, public))
}

/// Files produced by signing the document with one key epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOutput {
    /// Key epoch.
    pub epoch: u32,
    /// Detached signature, `<document>.<N>.sig`.
    pub sig: PathBuf,
    /// Document with the signature appended, `<name>.<N>.sjson`.
    pub sjson: PathBuf,
}

/// A document signing key and the epoch it was found under.
#[derive(Debug)]
pub struct EpochKey {
    /// Key epoch, the `N` of `apps.<N>.sec`.
    pub epoch: u32,
    /// The loaded key.
    pub key: SecretKey,
}

/// Load every `apps.<N>.sec` in `keys_dir`, oldest epoch first.
///
/// Called before anything is published so a bad key fails the run while
/// the previous document and its signatures are still in place.
///
/// # Errors
///
/// Returns epoch discovery, key, and I/O errors.
pub fn load_epoch_keys(keys_dir: &Path) -> Result<Vec<EpochKey>> {
    discover_epochs(keys_dir, EpochFamily::SIGNIFY_SECRET)?
        .into_iter()
        .map(|epoch| {
            let key = SecretKey::load(&EpochFamily::SIGNIFY_SECRET.path(keys_dir, epoch))?;
            Ok(EpochKey { epoch, key })
        })
        .collect()
}

/// Sign the document at `document` with each of `keys`.
///
/// For `<dir>/<name>.json` this writes `<dir>/<name>.json.<N>.sig` and
/// `<dir>/<name>.<N>.sjson` per epoch. No key means no signatures.
///
/// # Errors
///
/// Returns [`IndexError::Io`] if the document cannot be read or a
/// signature file cannot be written.
pub fn sign_document(document: &Path, keys: &[EpochKey]) -> Result<Vec<SignedOutput>> {
    let message = fs::read(document).at(document)?;
    let dir = document.parent().unwrap_or_else(|| Path::new("."));
    let file_name = document
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| IndexError::config(document, "not a file path"))?;
    let stem = file_name.strip_suffix(".json").unwrap_or(&file_name);

    let mut outputs = Vec::new();
    for &EpochKey { epoch, ref key } in keys {
        let signature = key.sign(&message);

        let sig = dir.join(format!("{file_name}.{epoch}.sig"));
        let pubkey_name = EpochFamily::SIGNIFY_PUBLIC.file_name(epoch);
        write_atomic(&sig, signature.to_file_string(&pubkey_name).as_bytes())?;

        let sjson = dir.join(format!("{stem}.{epoch}.sjson"));
        let mut bundle = message.clone();
        bundle.push(b'\n');
        bundle.extend_from_slice(signature.to_base64().as_bytes());
        bundle.push(b'\n');
        write_atomic(&sjson, &bundle)?;

        tracing::info!("signed {} with key epoch {epoch}", document.display());
        outputs.push(SignedOutput { epoch, sig, sjson });
    }
    Ok(outputs)
}

/// Split an sjson bundle into the signed document and its signature line.
///
/// # Errors
///
/// Returns [`IndexError::Signature`] if the bundle does not end with a
/// newline-delimited signature line.
pub fn split_bundle<'b>(bundle: &'b [u8], path: &Path) -> Result<(&'b [u8], &'b str)> {
    let malformed = || IndexError::signature(path, "not a signed bundle");
    let body = bundle.strip_suffix(b"\n").ok_or_else(malformed)?;
    let split = body.iter().rposition(|b| *b == b'\n').ok_or_else(malformed)?;
    let line = std::str::from_utf8(&body[split + 1..]).map_err(|_| malformed())?;
    Ok((&body[..split], line))
}

/// Verify a detached signature file or, when `sig` is `None`, an sjson
/// bundle at `input`.
///
/// # Errors
///
/// Returns [`IndexError::Signature`] if verification fails, and key and
/// I/O errors.
pub fn verify_file(input: &Path, sig: Option<&Path>, pubkey: &Path) -> Result<()> {
    let key = PublicKey::load(pubkey)?;
    let content = fs::read(input).at(input)?;
    match sig {
        Some(sig_path) => {
            let signature = Signature::parse(&read_text(sig_path)?, sig_path)?;
            key.verify(&content, &signature, sig_path)
        }
        None => {
            let (message, line) = split_bundle(&content, input)?;
            let signature = Signature::parse(line, input)?;
            key.verify(message, &signature, input)
        }
    }
}
