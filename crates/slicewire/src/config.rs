//! Codec configuration.

use serde::Deserialize;
use thiserror::Error;

use crate::version::{EncodingVersion, FormatType};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid codec configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("class_graph_depth_max must be at least 1")]
    ZeroDepth,
}

/// Tunables shared by every stream created from the same configuration.
///
/// ```
/// use slicewire::{CodecConfig, FormatType};
///
/// let cfg = CodecConfig::from_json(r#"{"default_format": "sliced", "class_graph_depth_max": 8}"#).unwrap();
/// assert_eq!(cfg.default_format, FormatType::Sliced);
/// assert_eq!(cfg.class_graph_depth_max, 8);
/// assert!(cfg.slice_values);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Longest chain of nested instances a single decode may follow.
    pub class_graph_depth_max: usize,
    /// Whether slices of unknown types may be skipped (and preserved).
    pub slice_values: bool,
    /// Encoding used outside of any explicit encapsulation.
    pub default_encoding: EncodingVersion,
    /// Instance format used when an encapsulation does not pick one.
    pub default_format: FormatType,
    /// Bodies smaller than this are never compressed.
    pub compression_min_size: usize,
    pub compression_level: i32,
    /// Upper bound on a decompressed body.
    pub message_size_max: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            class_graph_depth_max: 50,
            slice_values: true,
            default_encoding: EncodingVersion::default(),
            default_format: FormatType::Compact,
            compression_min_size: 100,
            compression_level: 1,
            message_size_max: 1024 * 1024,
        }
    }
}

impl CodecConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: CodecConfig = serde_json::from_str(json)?;
        if cfg.class_graph_depth_max == 0 {
            return Err(ConfigError::ZeroDepth);
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::ENCODING_1_0;

    #[test]
    fn empty_json_yields_defaults() {
        assert_eq!(CodecConfig::from_json("{}").unwrap(), CodecConfig::default());
    }

    #[test]
    fn parses_encoding_and_format() {
        let cfg = CodecConfig::from_json(
            r#"{"default_encoding": {"major": 1, "minor": 0}, "default_format": "compact", "slice_values": false}"#,
        )
        .unwrap();
        assert_eq!(cfg.default_encoding, ENCODING_1_0);
        assert!(!cfg.slice_values);
    }

    #[test]
    fn rejects_zero_depth_and_garbage() {
        assert!(matches!(
            CodecConfig::from_json(r#"{"class_graph_depth_max": 0}"#),
            Err(ConfigError::ZeroDepth)
        ));
        assert!(matches!(
            CodecConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
