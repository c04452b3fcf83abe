//! Shared-memory pixel formats.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A shared-memory buffer pixel format.
///
/// The two mandatory formats use the small protocol codes 0 and 1; every
/// other format is identified by its DRM fourcc code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShmFormat(u32);

impl ShmFormat {
    /// 32-bit ARGB, 8 bits per channel. Always supported.
    pub const ARGB8888: ShmFormat = ShmFormat(0);

    /// 32-bit RGB with an unused alpha byte. Always supported.
    pub const XRGB8888: ShmFormat = ShmFormat(1);

    /// Creates a format from its protocol code.
    pub const fn new(code: u32) -> Self {
        ShmFormat(code)
    }

    /// Creates a format from a four character code such as `"AB24"`.
    pub fn from_fourcc(code: &str) -> Result<Self, ParseError> {
        let bytes = code.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(ParseError::InvalidShmFormat(code.to_string()));
        }
        Ok(ShmFormat(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }

    /// Returns the protocol code.
    pub const fn code(&self) -> u32 {
        self.0
    }

    /// Returns true for the formats every shm implementation must offer.
    pub const fn is_mandatory(&self) -> bool {
        self.0 == 0 || self.0 == 1
    }
}

impl fmt::Display for ShmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ShmFormat::ARGB8888 => write!(f, "argb8888"),
            ShmFormat::XRGB8888 => write!(f, "xrgb8888"),
            ShmFormat(code) => write!(f, "0x{:08x}", code),
        }
    }
}

impl FromStr for ShmFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "argb8888" => Ok(ShmFormat::ARGB8888),
            "xrgb8888" => Ok(ShmFormat::XRGB8888),
            _ => ShmFormat::from_fourcc(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mandatory_formats() {
        assert!(ShmFormat::ARGB8888.is_mandatory());
        assert!(ShmFormat::XRGB8888.is_mandatory());
        assert!(!ShmFormat::from_fourcc("AB24").unwrap().is_mandatory());
    }

    #[test]
    fn test_fourcc() {
        // 'A' 'B' '2' '4' little-endian
        assert_eq!(ShmFormat::from_fourcc("AB24").unwrap().code(), 0x3432_4241);
        assert!(ShmFormat::from_fourcc("AB2").is_err());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("ARGB8888".parse::<ShmFormat>().unwrap(), ShmFormat::ARGB8888);
        assert_eq!("xrgb8888".parse::<ShmFormat>().unwrap(), ShmFormat::XRGB8888);
    }

    #[test]
    fn test_display() {
        assert_eq!(ShmFormat::ARGB8888.to_string(), "argb8888");
        assert_eq!(ShmFormat::new(0x3432_4241).to_string(), "0x34324241");
    }
}
