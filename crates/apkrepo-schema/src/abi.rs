//! Native ABI identifiers.

/// Native instruction set an APK (or one of its splits) carries code for.
///
/// The set of supported ABIs is closed: badging output naming anything else
/// is rejected when the version is loaded.
///
/// # Example
///
/// ```
/// use apkrepo_schema::Abi;
///
/// let abi: Abi = "arm64-v8a".parse().unwrap();
/// assert_eq!(abi.file_qualifier(), "arm64_v8a");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Abi {
    /// 64-bit ARM (`arm64-v8a`)
    #[serde(rename = "arm64-v8a")]
    Arm64V8a,
    /// 32-bit ARM (`armeabi-v7a`)
    #[serde(rename = "armeabi-v7a")]
    ArmeabiV7a,
    /// 32-bit Intel (`x86`)
    #[serde(rename = "x86")]
    X86,
    /// 64-bit Intel (`x86_64`)
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Abi {
    /// All supported ABIs.
    pub const ALL: [Abi; 4] = [Abi::Arm64V8a, Abi::ArmeabiV7a, Abi::X86, Abi::X86_64];

    /// Canonical Android name, as printed by `aapt2` and stored in the index.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm64V8a => "arm64-v8a",
            Self::ArmeabiV7a => "armeabi-v7a",
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
        }
    }

    /// Spelling used inside split file names (`-` replaced by `_`).
    pub fn file_qualifier(&self) -> &'static str {
        match self {
            Self::Arm64V8a => "arm64_v8a",
            Self::ArmeabiV7a => "armeabi_v7a",
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
        }
    }

    /// Infer an ABI from an artifact file name such as
    /// `split_config.arm64_v8a.apk`.
    ///
    /// Only the component right before the extension is inspected, and only
    /// names with at least three dot-separated components qualify.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() < 3 {
            return None;
        }
        let qualifier = parts[parts.len() - 2];
        Self::ALL
            .into_iter()
            .find(|abi| abi.file_qualifier() == qualifier)
    }
}

impl std::fmt::Display for Abi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Abi {
    type Err = crate::SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|abi| abi.as_str() == s)
            .ok_or_else(|| crate::SchemaError::UnknownAbi(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_names() {
        for abi in Abi::ALL {
            assert_eq!(abi.as_str().parse::<Abi>().unwrap(), abi);
        }
        assert!("mips".parse::<Abi>().is_err());
    }

    #[test]
    fn infers_from_split_names() {
        assert_eq!(
            Abi::from_file_name("split_config.arm64_v8a.apk"),
            Some(Abi::Arm64V8a)
        );
        assert_eq!(Abi::from_file_name("base.x86_64.apk"), Some(Abi::X86_64));
        assert_eq!(Abi::from_file_name("split_config.en.apk"), None);
        assert_eq!(Abi::from_file_name("x86.apk"), None);
        // the canonical dash spelling is not a file qualifier
        assert_eq!(Abi::from_file_name("split.arm64-v8a.apk"), None);
    }

    #[test]
    fn serializes_with_android_names() {
        let json = serde_json::to_string(&Abi::ArmeabiV7a).unwrap();
        assert_eq!(json, "\"armeabi-v7a\"");
    }
}
