//! Record model and wire format for the apkrepo metadata index.
//!
//! Shared between the index generator (producer) and anything that reads
//! the emitted document back.

pub mod abi;
pub mod document;
pub mod hash;
pub mod record;
pub mod types;

// Re-exports
pub use abi::*;
pub use document::{ConsolidatedPackageIndex, MetadataDocument, PackageEntry};
pub use hash::*;
pub use record::*;
pub use types::*;

/// Errors raised while constructing or serializing schema values.
#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    /// A digest was not 64 hex characters.
    #[error("invalid SHA-256 digest: '{0}'")]
    InvalidDigest(String),

    /// An ABI name outside the supported set.
    #[error("unknown ABI: '{0}'")]
    UnknownAbi(String),

    /// A channel name outside `alpha`, `beta`, `stable`, `old`.
    #[error("unknown channel: '{0}' (expected alpha, beta, stable or old)")]
    UnknownChannel(String),

    /// A version code that is not a non-negative integer.
    #[error("invalid version code: '{0}'")]
    InvalidVersionCode(String),

    /// A value expected to serialize as a JSON object did not.
    #[error("{0} did not serialize to a JSON object")]
    NotAnObject(&'static str),

    /// JSON serialization failure.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
