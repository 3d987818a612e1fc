//! Container compression names.
//!
//! Supported names (case-insensitive):
//! - "none"
//! - "fast" or "xpress"
//! - "maximum", "max" or "lzx"
//! - "recovery" or "lzms" (ESD containers)
//!
//! Parsing is exhaustive: an unrecognized name is an error, never a silent
//! fallback to no compression.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{WimError, WimResult};

/// Compression used when creating a destination container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Store resources uncompressed.
    None,
    /// XPRESS compression.
    Fast,
    /// LZX compression.
    Maximum,
    /// LZMS solid compression.
    Recovery,
}

impl Compression {
    /// Native `WIM_COMPRESS_*` constant for this compression.
    #[must_use]
    pub const fn as_native(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fast => 1,
            Self::Maximum => 2,
            Self::Recovery => 3,
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Fast => "fast",
            Self::Maximum => "maximum",
            Self::Recovery => "recovery",
        }
    }

    /// Parse a compression name.
    ///
    /// # Errors
    ///
    /// Returns [`WimError::UnknownCompression`] for any name outside the
    /// supported set.
    pub fn parse(s: &str) -> WimResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "fast" | "xpress" => Ok(Self::Fast),
            "maximum" | "max" | "lzx" => Ok(Self::Maximum),
            "recovery" | "lzms" => Ok(Self::Recovery),
            _ => Err(WimError::UnknownCompression {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = WimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_names() {
        assert_eq!(Compression::parse("none").unwrap(), Compression::None);
        assert_eq!(Compression::parse("Fast").unwrap(), Compression::Fast);
        assert_eq!(Compression::parse("xpress").unwrap(), Compression::Fast);
        assert_eq!(Compression::parse("MAX").unwrap(), Compression::Maximum);
        assert_eq!(Compression::parse("lzx").unwrap(), Compression::Maximum);
        assert_eq!(Compression::parse("recovery").unwrap(), Compression::Recovery);
        assert_eq!(Compression::parse(" lzms ").unwrap(), Compression::Recovery);
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = Compression::parse("zstd").unwrap_err();
        assert!(matches!(err, WimError::UnknownCompression { ref name } if name == "zstd"));
        assert!(Compression::parse("").is_err());
    }

    #[test]
    fn native_constants() {
        assert_eq!(Compression::None.as_native(), 0);
        assert_eq!(Compression::Fast.as_native(), 1);
        assert_eq!(Compression::Maximum.as_native(), 2);
        assert_eq!(Compression::Recovery.as_native(), 3);
    }

    proptest::proptest! {
        #[test]
        fn unrecognized_names_never_default(name in "[a-z0-9]{1,12}") {
            let known = ["none", "fast", "xpress", "maximum", "max", "lzx", "recovery", "lzms"];
            proptest::prop_assume!(!known.contains(&name.as_str()));
            proptest::prop_assert!(Compression::parse(&name).is_err());
        }
    }
}
