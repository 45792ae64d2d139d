//! Encoding versions and instance formats.

use std::fmt;

use serde::Deserialize;

use crate::error::{MarshalError, Result};

/// Wire encoding version; selects the slicing algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct EncodingVersion {
    pub major: u8,
    pub minor: u8,
}

/// Legacy encoding: direct instance ids, batched pending instances.
pub const ENCODING_1_0: EncodingVersion = EncodingVersion { major: 1, minor: 0 };
/// Current encoding: inline instances, slice flags, tagged members.
pub const ENCODING_1_1: EncodingVersion = EncodingVersion { major: 1, minor: 1 };

impl EncodingVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn is_legacy(&self) -> bool {
        *self == ENCODING_1_0
    }

    /// Fails unless this stream implementation can decode `self`.
    pub fn check_supported(&self) -> Result<()> {
        if self.major != 1 || self.minor > 1 {
            return Err(MarshalError::UnsupportedEncoding(*self));
        }
        Ok(())
    }
}

impl Default for EncodingVersion {
    fn default() -> Self {
        ENCODING_1_1
    }
}

impl fmt::Display for EncodingVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// How class instances are laid out inside a write encapsulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    /// No slice sizes; the type-id is written on the most-derived slice only.
    #[default]
    Compact,
    /// Every slice carries its type-id and byte length so receivers can skip
    /// slices they do not understand.
    Sliced,
}
