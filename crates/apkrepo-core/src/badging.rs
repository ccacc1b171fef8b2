//! Manifest facts extracted from an APK by `aapt2 dump badging`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use apkrepo_schema::{Abi, PackageName, VersionCode};

use crate::error::{IndexError, Result};
use crate::tool::ExternalTool;

/// Facts about one APK, as reported by the badging collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badging {
    /// Package identifier.
    pub package: PackageName,
    /// Manifest versionCode.
    pub version_code: VersionCode,
    /// Manifest versionName, if present.
    pub version_name: Option<String>,
    /// Split name; `None` for a base APK.
    pub split: Option<String>,
    /// `application-label`.
    pub label: Option<String>,
    /// `sdkVersion` (minSdk).
    pub min_sdk: Option<u32>,
    /// `maxSdkVersion`.
    pub max_sdk: Option<u32>,
    /// ABIs from the `native-code` line.
    pub native_code: Vec<Abi>,
    /// `uses-static-library` names.
    pub static_libraries: Vec<PackageName>,
}

impl Badging {
    /// Whether the APK is a split rather than a base APK.
    pub fn is_split(&self) -> bool {
        self.split.is_some()
    }

    /// Parse `aapt2 dump badging` output for `apk`.
    ///
    /// The first line is the `package:` line of `key='value'` pairs; each
    /// following non-empty line is one `key:value...` fact. Facts this
    /// indexer has no use for are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Tool`] when the output is malformed or lacks
    /// the package name or versionCode, and [`IndexError::Configuration`]
    /// when `native-code` lists an unsupported ABI or appears twice.
    pub fn parse(output: &str, apk: &Path) -> Result<Self> {
        let malformed = |message: String| IndexError::Tool {
            tool: "aapt2",
            path: apk.to_path_buf(),
            message,
        };

        let mut lines = output.lines();
        let header = lines
            .next()
            .ok_or_else(|| malformed("empty badging output".into()))?;

        let mut package = None;
        let mut version_code = None;
        let mut version_name = None;
        let mut split = None;

        for word in split_words(header).map_err(malformed)? {
            let Some((key, value)) = word.split_once('=') else {
                continue;
            };
            match key {
                "name" => package = Some(PackageName::new(value)),
                "versionCode" => {
                    version_code = Some(value.parse::<VersionCode>().map_err(|e| {
                        malformed(format!("bad versionCode: {e}"))
                    })?);
                }
                "versionName" => version_name = Some(value.to_string()),
                "split" => split = Some(value.to_string()),
                _ => {}
            }
        }

        let mut badging = Self {
            package: package.ok_or_else(|| malformed("no package name".into()))?,
            version_code: version_code.ok_or_else(|| malformed("no versionCode".into()))?,
            version_name,
            split,
            label: None,
            min_sdk: None,
            max_sdk: None,
            native_code: Vec::new(),
            static_libraries: Vec::new(),
        };

        let mut seen_native_code = false;
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let words = split_words(line).map_err(malformed)?;
            let Some((first, rest)) = words.split_first() else {
                continue;
            };
            let Some((key, value)) = first.split_once(':') else {
                continue;
            };

            match key {
                "application-label" => badging.label = Some(value.to_string()),
                "sdkVersion" => {
                    badging.min_sdk = Some(parse_sdk(value).map_err(malformed)?);
                }
                "maxSdkVersion" => {
                    badging.max_sdk = Some(parse_sdk(value).map_err(malformed)?);
                }
                "native-code" => {
                    if seen_native_code {
                        return Err(IndexError::config(apk, "native-code listed twice"));
                    }
                    seen_native_code = true;
                    for abi in rest {
                        let abi = abi
                            .parse::<Abi>()
                            .map_err(|e| IndexError::config(apk, e))?;
                        badging.native_code.push(abi);
                    }
                }
                "uses-static-library" => {
                    if let Some(name) = rest.iter().find_map(|w| w.strip_prefix("name=")) {
                        badging.static_libraries.push(PackageName::new(name));
                    }
                }
                _ => {}
            }
        }

        Ok(badging)
    }
}

fn parse_sdk(value: &str) -> std::result::Result<u32, String> {
    value
        .parse()
        .map_err(|_| format!("bad SDK level '{value}'"))
}

/// Split a line into words the way a POSIX shell would: whitespace
/// separates, single quotes are literal, double quotes allow `\` escapes.
fn split_words(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(format!("unterminated quote in: {line}")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch) => current.push(ch),
                            None => return Err(format!("trailing escape in: {line}")),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(format!("unterminated quote in: {line}")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Source of [`Badging`] facts for an APK.
pub trait BadgingSource {
    /// Extract the badging facts of `apk`.
    ///
    /// # Errors
    ///
    /// Returns an error if the collaborator fails or its output is malformed.
    fn badging(&self, apk: &Path) -> Result<Badging>;
}

/// [`BadgingSource`] backed by `aapt2 dump badging`.
#[derive(Debug, Clone)]
pub struct Aapt2 {
    tool: ExternalTool,
}

impl Aapt2 {
    /// Use `program` (a name in `PATH` or an explicit path).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            tool: ExternalTool::new("aapt2", program),
        }
    }
}

impl Default for Aapt2 {
    fn default() -> Self {
        Self::new("aapt2")
    }
}

impl BadgingSource for Aapt2 {
    fn badging(&self, apk: &Path) -> Result<Badging> {
        let output = self
            .tool
            .run([OsStr::new("dump"), OsStr::new("badging"), apk.as_os_str()], apk)?;
        Badging::parse(&output, apk)
    }
}
