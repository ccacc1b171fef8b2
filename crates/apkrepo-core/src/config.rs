//! `apkrepo.toml`: where the store, output and keys live, and which
//! external programs to run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{IndexError, IoResultExt, Result};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "apkrepo.toml";

/// Repository layout and tool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepoConfig {
    /// Package store root.
    pub packages_dir: PathBuf,
    /// Where `metadata.1.json` and its signatures are written.
    pub output_dir: PathBuf,
    /// Directory holding `apps.<N>.sec` and `fsverity_*.<N>.*`.
    pub keys_dir: PathBuf,
    /// Document file stem.
    pub metadata_name: String,
    /// External programs.
    pub tools: ToolPaths,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            packages_dir: PathBuf::from("apps/packages"),
            output_dir: PathBuf::from("apps"),
            keys_dir: PathBuf::from("."),
            metadata_name: "metadata.1".to_string(),
            tools: ToolPaths::default(),
        }
    }
}

/// Names or paths of the external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    /// Badging extractor.
    pub aapt2: PathBuf,
    /// Signer certificate extractor.
    pub apksigner: PathBuf,
    /// fs-verity signer.
    pub fsverity: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            aapt2: PathBuf::from("aapt2"),
            apksigner: PathBuf::from("apksigner"),
            fsverity: PathBuf::from("fsverity"),
        }
    }
}

impl RepoConfig {
    /// Parse configuration TOML; `path` only feeds errors.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] for invalid TOML or unknown
    /// keys.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| IndexError::config(path, e))
    }

    /// Load `path`, or the defaults when `path` does not exist and
    /// `required` is false.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] for a missing required file or
    /// bad content, and [`IndexError::Io`] if it cannot be read.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        if !path.is_file() {
            if required {
                return Err(IndexError::config(path, "configuration file not found"));
            }
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).at(path)?;
        Self::parse(&content, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_store_layout() {
        let config = RepoConfig::default();
        assert_eq!(config.packages_dir, Path::new("apps/packages"));
        assert_eq!(config.output_dir, Path::new("apps"));
        assert_eq!(config.metadata_name, "metadata.1");
        assert_eq!(config.tools.aapt2, Path::new("aapt2"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = RepoConfig::parse(
            "output_dir = \"public\"\n[tools]\napksigner = \"/opt/build-tools/apksigner\"\n",
            Path::new(CONFIG_FILE),
        )
        .unwrap();
        assert_eq!(config.output_dir, Path::new("public"));
        assert_eq!(config.packages_dir, Path::new("apps/packages"));
        assert_eq!(config.tools.apksigner, Path::new("/opt/build-tools/apksigner"));
        assert_eq!(config.tools.fsverity, Path::new("fsverity"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RepoConfig::parse("packages = \"x\"\n", Path::new(CONFIG_FILE)).unwrap_err();
        assert!(matches!(err, IndexError::Configuration { .. }));
    }

    #[test]
    fn missing_file_is_optional_unless_required() {
        let path = Path::new("/nonexistent/apkrepo.toml");
        assert_eq!(RepoConfig::load(path, false).unwrap(), RepoConfig::default());
        assert!(RepoConfig::load(path, true).is_err());
    }
}
