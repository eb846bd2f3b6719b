//! Per-chunk compression schemes used inside region files.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use lz4_java_wrc::Lz4BlockInput;

use crate::error::{ImportError, ImportResult};

/// Chunk stored in a separate `c.X.Z.mcc` file.
pub const EXTERNAL_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionScheme {
    Gzip = 1,
    Zlib = 2,
    Uncompressed = 3,
    Lz4 = 4,
}

impl CompressionScheme {
    pub fn from_byte(b: u8) -> ImportResult<Self> {
        match b & !EXTERNAL_FLAG {
            1 => Ok(CompressionScheme::Gzip),
            2 => Ok(CompressionScheme::Zlib),
            3 => Ok(CompressionScheme::Uncompressed),
            4 => Ok(CompressionScheme::Lz4),
            other => Err(ImportError::invalid(format!("unknown compression type {other}"))),
        }
    }

    pub fn decompress(self, data: &[u8]) -> ImportResult<Vec<u8>> {
        let mut out = Vec::new();
        let result = match self {
            CompressionScheme::Gzip => GzDecoder::new(data).read_to_end(&mut out),
            CompressionScheme::Zlib => ZlibDecoder::new(data).read_to_end(&mut out),
            CompressionScheme::Uncompressed => {
                out.extend_from_slice(data);
                Ok(out.len())
            }
            CompressionScheme::Lz4 => Lz4BlockInput::new(data).read_to_end(&mut out),
        };
        result.map_err(|e| ImportError::invalid(format!("{self:?} chunk data is corrupt: {e}")))?;
        Ok(out)
    }

    /// Compresses with a deflate-family scheme. Lz4 output is not produced.
    pub fn compress(self, data: &[u8]) -> ImportResult<Vec<u8>> {
        let written = match self {
            CompressionScheme::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data).and_then(|_| encoder.finish())
            }
            CompressionScheme::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data).and_then(|_| encoder.finish())
            }
            CompressionScheme::Uncompressed => Ok(data.to_vec()),
            CompressionScheme::Lz4 => {
                return Err(ImportError::invalid("writing lz4 chunks is not supported"));
            }
        };
        written.map_err(|e| ImportError::invalid(format!("compression failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_type_values() {
        assert_eq!(CompressionScheme::from_byte(1).unwrap(), CompressionScheme::Gzip);
        assert_eq!(CompressionScheme::from_byte(2).unwrap(), CompressionScheme::Zlib);
        assert_eq!(CompressionScheme::from_byte(3).unwrap(), CompressionScheme::Uncompressed);
        assert_eq!(CompressionScheme::from_byte(4).unwrap(), CompressionScheme::Lz4);
        assert_eq!(CompressionScheme::from_byte(0x82).unwrap(), CompressionScheme::Zlib);
        assert!(CompressionScheme::from_byte(9).is_err());
    }

    #[test]
    fn test_deflate_schemes() {
        let payload = b"some chunk nbt".repeat(50);
        for scheme in [
            CompressionScheme::Gzip,
            CompressionScheme::Zlib,
            CompressionScheme::Uncompressed,
        ] {
            let packed = scheme.compress(&payload).unwrap();
            assert_eq!(scheme.decompress(&packed).unwrap(), payload);
        }
    }

    #[test]
    fn test_corrupt_zlib() {
        assert!(CompressionScheme::Zlib.decompress(&[1, 2, 3, 4]).is_err());
    }
}
