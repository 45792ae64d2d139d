//! Optional whole-body compression.
//!
//! The engine never compresses on its own; an application installs a
//! [`Compressor`] and the helpers below decide when it applies.

use crate::config::CodecConfig;
use crate::error::{MarshalError, Result};

pub trait Compressor: Send + Sync {
    /// Returns `None` when the input cannot be compressed.
    fn compress(&self, bytes: &[u8], level: i32) -> Option<Vec<u8>>;

    fn decompress(&self, bytes: &[u8], max_size: usize) -> Result<Vec<u8>>;
}

/// Compresses `body` when a compressor is available, the body reaches the
/// configured minimum size and compression actually shrinks it. `None` means
/// "send uncompressed".
pub fn maybe_compress(
    body: &[u8],
    compressor: Option<&dyn Compressor>,
    config: &CodecConfig,
) -> Option<Vec<u8>> {
    let compressor = compressor?;
    if body.len() < config.compression_min_size {
        return None;
    }
    compressor
        .compress(body, config.compression_level)
        .filter(|out| out.len() < body.len())
}

pub fn decompress_body(
    body: &[u8],
    compressor: Option<&dyn Compressor>,
    config: &CodecConfig,
) -> Result<Vec<u8>> {
    let compressor = compressor
        .ok_or_else(|| MarshalError::Compression("no compressor installed".to_owned()))?;
    let out = compressor.decompress(body, config.message_size_max)?;
    if out.len() > config.message_size_max {
        return Err(MarshalError::Compression(format!(
            "decompressed size {} exceeds limit {}",
            out.len(),
            config.message_size_max
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run-length codec: pairs of (count, byte).
    struct Rle;

    impl Compressor for Rle {
        fn compress(&self, bytes: &[u8], _level: i32) -> Option<Vec<u8>> {
            let mut out = Vec::new();
            let mut iter = bytes.iter().peekable();
            while let Some(&b) = iter.next() {
                let mut n = 1u8;
                while n < u8::MAX && iter.peek() == Some(&&b) {
                    iter.next();
                    n += 1;
                }
                out.push(n);
                out.push(b);
            }
            Some(out)
        }

        fn decompress(&self, bytes: &[u8], max_size: usize) -> Result<Vec<u8>> {
            let mut out = Vec::new();
            for pair in bytes.chunks(2) {
                if let [n, b] = pair {
                    out.extend(std::iter::repeat(*b).take(*n as usize));
                }
                if out.len() > max_size {
                    return Err(MarshalError::Compression("too large".to_owned()));
                }
            }
            Ok(out)
        }
    }

    #[test]
    fn small_or_incompressible_bodies_stay_plain() {
        let cfg = CodecConfig::default();
        assert_eq!(maybe_compress(&[0; 10], Some(&Rle), &cfg), None);
        let noisy: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        assert_eq!(maybe_compress(&noisy, Some(&Rle), &cfg), None);
        assert_eq!(maybe_compress(&[0; 200], None, &cfg), None);
    }

    #[test]
    fn compressible_body_roundtrips() {
        let cfg = CodecConfig::default();
        let body = vec![7u8; 300];
        let packed = maybe_compress(&body, Some(&Rle), &cfg).unwrap();
        assert!(packed.len() < body.len());
        assert_eq!(decompress_body(&packed, Some(&Rle), &cfg).unwrap(), body);
    }

    #[test]
    fn decompress_without_compressor_fails() {
        let cfg = CodecConfig::default();
        assert!(matches!(
            decompress_body(&[1, 2], None, &cfg),
            Err(MarshalError::Compression(_))
        ));
    }
}
