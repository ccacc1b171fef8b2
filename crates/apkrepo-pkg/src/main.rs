//! `apkrepo` - builds and signs the metadata index of an APK package store.

use anyhow::{Context, Result};
use apkrepo_core::badging::Aapt2;
use apkrepo_core::fingerprint::FingerprintCache;
use apkrepo_core::signify::{self, SecretKey};
use apkrepo_core::{GenerateOptions, PackageStore, RepoConfig, Toolchain};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apkrepo", version)]
#[command(about = "Signed metadata index builder for an APK package store", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./apkrepo.toml when present)
    #[arg(short, long, global = true, env = "APKREPO_CONFIG")]
    config: Option<PathBuf>,

    /// Package store root
    #[arg(long, global = true, env = "APKREPO_PACKAGES_DIR")]
    packages: Option<PathBuf>,

    /// Output directory for the document and its signatures
    #[arg(long, global = true, env = "APKREPO_OUTPUT_DIR")]
    output: Option<PathBuf>,

    /// Directory holding signing keys and fs-verity certificates
    #[arg(long, global = true, env = "APKREPO_KEYS_DIR")]
    keys: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, write and sign the metadata index
    Generate {
        /// Do not create missing .gz/.br siblings first
        #[arg(long)]
        skip_compress: bool,
        /// Ignore and do not write fingerprint sidecars
        #[arg(long)]
        no_cache: bool,
    },
    /// Copy APKs into the store under their package and versionCode
    Import {
        /// APK files to import
        #[arg(required = true)]
        apks: Vec<PathBuf>,
    },
    /// Create .gz and .br siblings for every APK in the store
    Compress {
        /// Rewrite siblings that already exist
        #[arg(long)]
        force: bool,
    },
    /// Generate a signify-compatible Ed25519 key pair in the keys directory
    Keygen {
        /// Key file stem, e.g. apps.1 for the next rotation
        #[arg(long, default_value = "apps.0")]
        name: String,
    },
    /// Sign an arbitrary file with a signify secret key
    Sign {
        /// Secret key file
        #[arg(short, long)]
        key: PathBuf,
        /// Input file to sign
        #[arg(short, long)]
        input: PathBuf,
        /// Signature file to write (defaults to <input>.sig)
        #[arg(short, long)]
        sig: Option<PathBuf>,
    },
    /// Verify a detached signature, or an .sjson bundle when --sig is omitted
    Verify {
        /// Public key file
        #[arg(short, long)]
        pubkey: PathBuf,
        /// Signed file or bundle
        #[arg(short, long)]
        input: PathBuf,
        /// Detached signature file
        #[arg(short, long)]
        sig: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Generate {
            skip_compress,
            no_cache,
        } => cli_generate(&config, skip_compress, no_cache),
        Commands::Import { apks } => cli_import(&config, &apks),
        Commands::Compress { force } => cli_compress(&config, force),
        Commands::Keygen { name } => cli_keygen(&config.keys_dir, &name),
        Commands::Sign { key, input, sig } => cli_sign(&key, &input, sig.as_deref()),
        Commands::Verify {
            pubkey,
            input,
            sig,
        } => cli_verify(&pubkey, &input, sig.as_deref()),
    }
}

/// Configuration file values, overridden by flags and environment.
fn resolve_config(cli: &Cli) -> Result<RepoConfig> {
    let mut config = match &cli.config {
        Some(path) => RepoConfig::load(path, true)?,
        None => RepoConfig::load(Path::new(apkrepo_core::config::CONFIG_FILE), false)?,
    };
    if let Some(dir) = &cli.packages {
        config.packages_dir.clone_from(dir);
    }
    if let Some(dir) = &cli.output {
        config.output_dir.clone_from(dir);
    }
    if let Some(dir) = &cli.keys {
        config.keys_dir.clone_from(dir);
    }
    Ok(config)
}

fn cli_generate(config: &RepoConfig, skip_compress: bool, no_cache: bool) -> Result<()> {
    println!("  indexing {}", config.packages_dir.display());

    let tools = Toolchain::from_paths(&config.tools);
    let options = GenerateOptions {
        compress: !skip_compress,
        cache: if no_cache {
            FingerprintCache::disabled()
        } else {
            FingerprintCache::default()
        },
    };
    let report = apkrepo_core::generate(config, &tools, options).context("index generation failed")?;

    if let Some(summary) = report.compression {
        if summary.written > 0 {
            println!("  compressed {} siblings", summary.written);
        }
    }
    println!("  wrote {}", report.document.display());
    for signed in &report.signatures {
        println!("  signed with key {}: {}", signed.epoch, signed.sjson.display());
    }
    if report.signatures.is_empty() {
        println!(
            "  warn: no apps.<N>.sec in {}, document is unsigned",
            config.keys_dir.display()
        );
    }
    println!();
    println!(
        "  {} packages, {} versions, {} published",
        report.packages, report.versions, report.retained
    );
    Ok(())
}

fn cli_import(config: &RepoConfig, apks: &[PathBuf]) -> Result<()> {
    let store = PackageStore::new(&config.packages_dir);
    let aapt2 = Aapt2::new(&config.tools.aapt2);
    for apk in apks {
        let imported = store
            .import_apk(apk, &aapt2)
            .with_context(|| format!("failed to import {}", apk.display()))?;
        println!(
            "  imported {} -> {}",
            apk.display(),
            imported.destination.display()
        );
        if imported.created_version {
            println!(
                "    new version {}/{} placed in the alpha channel",
                imported.package, imported.version_code
            );
        }
    }
    Ok(())
}

fn cli_compress(config: &RepoConfig, force: bool) -> Result<()> {
    let store = PackageStore::new(&config.packages_dir);
    let summary = apkrepo_core::compress::compress_store(&store, force)?;
    println!(
        "  {} written, {} already present",
        summary.written, summary.skipped
    );
    Ok(())
}

fn cli_keygen(keys_dir: &Path, name: &str) -> Result<()> {
    println!("  generating ed25519 keypair");
    let (sec, public) = signify::write_keypair(keys_dir, name)?;
    println!("  wrote {}", sec.display());
    println!("  wrote {}", public.display());
    println!();
    println!("  public key (embed in clients):");
    let text = fs::read_to_string(&public)?;
    if let Some(line) = text.lines().nth(1) {
        println!("  {line}");
    }
    Ok(())
}

fn cli_sign(key: &Path, input: &Path, output: Option<&Path>) -> Result<()> {
    let secret = SecretKey::load(key)?;
    let data = fs::read(input).context("Failed to read input file")?;

    let output = output.map_or_else(
        || {
            let mut name = input.as_os_str().to_owned();
            name.push(".sig");
            PathBuf::from(name)
        },
        Path::to_path_buf,
    );
    let pubkey_name = key.with_extension("pub");
    let pubkey_name = pubkey_name
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    fs::write(&output, secret.sign(&data).to_file_string(&pubkey_name))
        .context("Failed to write signature file")?;
    println!("  signed {} -> {}", input.display(), output.display());
    Ok(())
}

fn cli_verify(pubkey: &Path, input: &Path, sig: Option<&Path>) -> Result<()> {
    signify::verify_file(input, sig, pubkey)?;
    println!("  signature ok: {}", input.display());
    Ok(())
}
