//! Pre-encoded `.gz` and `.br` siblings of every APK.
//!
//! Each sibling's modification time is pinned to its source APK's. The
//! fingerprinter uses that pairing as a staleness check, so a sibling left
//! behind by an interrupted or older compression pass is rejected instead
//! of having its size published.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::Path;

use brotli::CompressorWriter;
use filetime::FileTime;
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::{IndexError, IoResultExt, Result};
use crate::store::{self, PackageStore};

/// Brotli quality used for siblings; they are written once and served many times.
const BROTLI_QUALITY: u32 = 11;
/// Brotli window size (log2).
const BROTLI_LGWIN: u32 = 22;
const BROTLI_BUFFER: usize = 64 * 1024;

/// What a compression pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSummary {
    /// Siblings written.
    pub written: usize,
    /// Siblings already present and left alone.
    pub skipped: usize,
}

/// Which encoding to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// gzip (`.gz`)
    Gzip,
    /// Brotli (`.br`)
    Brotli,
}

impl Encoding {
    fn sibling(self, apk: &Path) -> std::path::PathBuf {
        match self {
            Self::Gzip => store::gz_path(apk),
            Self::Brotli => store::br_path(apk),
        }
    }
}

/// Write the `encoding` sibling of `apk` and pin its mtime to the APK's.
///
/// # Errors
///
/// Returns [`IndexError::Io`] on read, write or timestamp failures.
pub fn encode_sibling(apk: &Path, encoding: Encoding) -> Result<()> {
    let dest = encoding.sibling(apk);
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut input = BufReader::new(File::open(apk).at(apk)?);
    let tmp = tempfile::NamedTempFile::new_in(dir).at(dir)?;

    let tmp = match encoding {
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(tmp, Compression::best());
            io::copy(&mut input, &mut encoder).at(apk)?;
            encoder.finish().at(&dest)?
        }
        Encoding::Brotli => {
            let mut encoder =
                CompressorWriter::new(tmp, BROTLI_BUFFER, BROTLI_QUALITY, BROTLI_LGWIN);
            io::copy(&mut input, &mut encoder).at(apk)?;
            encoder.flush().at(&dest)?;
            encoder.into_inner()
        }
    };
    tmp.as_file().sync_all().at(&dest)?;
    tmp.persist(&dest).map_err(|e| IndexError::io(&dest, e.error))?;

    let meta = fs::metadata(apk).at(apk)?;
    filetime::set_file_mtime(&dest, FileTime::from_last_modification_time(&meta)).at(&dest)?;
    Ok(())
}

/// Produce missing siblings for every APK in the store.
///
/// Existing siblings are kept unless `force` is set, even when stale; the
/// fingerprinter reports those so the operator re-runs with `force`.
///
/// # Errors
///
/// Propagates listing and encoding errors.
pub fn compress_store(store: &PackageStore, force: bool) -> Result<CompressionSummary> {
    let mut summary = CompressionSummary::default();
    for apk in store.all_artifacts()? {
        for encoding in [Encoding::Gzip, Encoding::Brotli] {
            if !force && encoding.sibling(&apk).exists() {
                summary.skipped += 1;
                continue;
            }
            tracing::info!("compressing {} ({encoding:?})", apk.display());
            encode_sibling(&apk, encoding)?;
            summary.written += 1;
        }
    }
    Ok(summary)
}
