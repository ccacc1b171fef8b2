//! Core library for apkrepo.
//!
//! Scans a package store of APKs, validates every artifact against the
//! package's trusted signers, drops superseded versions and assembles the
//! signed metadata document clients download.

pub mod assemble;
pub mod badging;
pub mod compress;
pub mod config;
pub mod consolidate;
pub mod epoch;
pub mod error;
pub mod fingerprint;
pub mod fsverity;
pub mod generate;
pub mod props;
pub mod scan;
pub mod signature;
pub mod signify;
pub mod store;
pub mod tool;

pub use assemble::{IndexAssembler, write_document};
pub use config::RepoConfig;
pub use consolidate::consolidate;
pub use error::{IndexError, Result};
pub use generate::{GenerateOptions, GenerateReport, Toolchain, generate};
pub use scan::{Repository, RepositoryBuilder, Scanner};
pub use store::PackageStore;
