//! Compression family (`compression:<name>`).
//!
//! Every decompressor writes through a [`CappedWriter`] so a small
//! malicious stream cannot expand past the container size limit.

use std::io::{self, Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use harp_core::{limits, HarpError, HarpResult};
use weezl::BitOrder;

use crate::transformer::{TransformContext, Transformer};

const ZSTD_LEVEL: i32 = 3;
const LZW_CODE_SIZE: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Identity,
    Gzip,
    Zlib,
    Flate,
    LzwMsb,
    LzwLsb,
    Lz4,
    /// S2 reads and writes Snappy framing.
    S2,
    Snappy,
    Lzma,
    Xz,
    Zstd,
}

impl Compression {
    pub fn from_name(name: &str) -> HarpResult<Self> {
        let c = match name.to_ascii_lowercase().as_str() {
            "identity" => Self::Identity,
            "gzip" => Self::Gzip,
            "zlib" => Self::Zlib,
            "flate" | "deflate" => Self::Flate,
            "lzw" | "lzw-msb" => Self::LzwMsb,
            "lzw-lsb" => Self::LzwLsb,
            "lz4" => Self::Lz4,
            "s2" => Self::S2,
            "snappy" => Self::Snappy,
            "lzma" => Self::Lzma,
            "xz" => Self::Xz,
            "zstd" => Self::Zstd,
            other => {
                return Err(HarpError::UnsupportedPrimitive(format!(
                    "compression:{other}"
                )))
            }
        };
        Ok(c)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Zlib => "zlib",
            Self::Flate => "flate",
            Self::LzwMsb => "lzw-msb",
            Self::LzwLsb => "lzw-lsb",
            Self::Lz4 => "lz4",
            Self::S2 => "s2",
            Self::Snappy => "snappy",
            Self::Lzma => "lzma",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }

    pub fn compress(&self, input: &[u8]) -> HarpResult<Vec<u8>> {
        self.compress_inner(input)
            .map_err(|e| HarpError::input(format!("{} compression failed: {e}", self.name())))
    }

    fn compress_inner(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        let level = flate2::Compression::default();
        match self {
            Self::Identity => Ok(input.to_vec()),
            Self::Gzip => {
                let mut enc = GzEncoder::new(Vec::new(), level);
                enc.write_all(input)?;
                enc.finish()
            }
            Self::Zlib => {
                let mut enc = ZlibEncoder::new(Vec::new(), level);
                enc.write_all(input)?;
                enc.finish()
            }
            Self::Flate => {
                let mut enc = DeflateEncoder::new(Vec::new(), level);
                enc.write_all(input)?;
                enc.finish()
            }
            Self::LzwMsb | Self::LzwLsb => weezl::encode::Encoder::new(self.bit_order(), LZW_CODE_SIZE)
                .encode(input)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Self::Lz4 => {
                let mut enc = lz4_flex::frame::FrameEncoder::new(Vec::new());
                enc.write_all(input)?;
                enc.finish()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            }
            Self::S2 | Self::Snappy => {
                let mut enc = snap::write::FrameEncoder::new(Vec::new());
                enc.write_all(input)?;
                enc.into_inner()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "snappy frame flush failed"))
            }
            Self::Lzma => {
                let mut out = Vec::new();
                lzma_rs::lzma_compress(&mut &input[..], &mut out)?;
                Ok(out)
            }
            Self::Xz => {
                let mut out = Vec::new();
                lzma_rs::xz_compress(&mut &input[..], &mut out)?;
                Ok(out)
            }
            Self::Zstd => zstd::encode_all(input, ZSTD_LEVEL),
        }
    }

    /// Decompress, failing with `SizeLimitExceeded` past `limit` bytes.
    pub fn decompress_capped(&self, input: &[u8], limit: u64) -> HarpResult<Vec<u8>> {
        let mut sink = CappedWriter::new(limit);
        let result = self.decompress_into(input, &mut sink);
        if sink.exceeded {
            return Err(HarpError::SizeLimitExceeded {
                what: "decompressed value",
                actual: sink.attempted,
                limit,
            });
        }
        result.map_err(|e| HarpError::input(format!("corrupt {} stream: {e}", self.name())))?;
        Ok(sink.buf)
    }

    pub fn decompress(&self, input: &[u8]) -> HarpResult<Vec<u8>> {
        self.decompress_capped(input, limits::MAX_CONTAINER_SIZE)
    }

    fn decompress_into(&self, input: &[u8], sink: &mut CappedWriter) -> io::Result<()> {
        match self {
            Self::Identity => sink.write_all(input),
            Self::Gzip => copy(GzDecoder::new(input), sink),
            Self::Zlib => copy(ZlibDecoder::new(input), sink),
            Self::Flate => copy(DeflateDecoder::new(input), sink),
            Self::LzwMsb | Self::LzwLsb => {
                let mut dec = weezl::decode::Decoder::new(self.bit_order(), LZW_CODE_SIZE);
                dec.into_stream(&mut *sink).decode_all(input).status.map(|_| ())
            }
            Self::Lz4 => copy(lz4_flex::frame::FrameDecoder::new(input), sink),
            Self::S2 | Self::Snappy => copy(snap::read::FrameDecoder::new(input), sink),
            Self::Lzma => lzma_rs::lzma_decompress(&mut &input[..], sink)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}"))),
            Self::Xz => lzma_rs::xz_decompress(&mut &input[..], sink)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}"))),
            Self::Zstd => copy(zstd::stream::read::Decoder::new(input)?, sink),
        }
    }

    fn bit_order(&self) -> BitOrder {
        match self {
            Self::LzwLsb => BitOrder::Lsb,
            _ => BitOrder::Msb,
        }
    }
}

impl Transformer for Compression {
    fn to(&self, _ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        self.compress(input)
    }

    fn from(&self, _ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        self.decompress(input)
    }
}

fn copy<R: Read>(mut reader: R, sink: &mut CappedWriter) -> io::Result<()> {
    io::copy(&mut reader, sink).map(|_| ())
}

/// In-memory sink that refuses to grow past a byte limit.
struct CappedWriter {
    buf: Vec<u8>,
    limit: u64,
    attempted: u64,
    exceeded: bool,
}

impl CappedWriter {
    fn new(limit: u64) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            attempted: 0,
            exceeded: false,
        }
    }
}

impl Write for CappedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.attempted = self.attempted.saturating_add(data.len() as u64);
        if self.attempted > self.limit {
            self.exceeded = true;
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "decompressed size limit exceeded",
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [&str; 12] = [
        "identity", "gzip", "zlib", "flate", "lzw-msb", "lzw-lsb", "lz4", "s2", "snappy",
        "lzma", "xz", "zstd",
    ];

    #[test]
    fn test_roundtrip_all() {
        let data = b"harp harp harp harp secret container ".repeat(64);
        for name in ALL {
            let c = Compression::from_name(name).unwrap();
            let packed = c.compress(&data).unwrap();
            assert_eq!(c.decompress(&packed).unwrap(), data, "{name}");
        }
    }

    #[test]
    fn test_roundtrip_empty() {
        for name in ALL {
            let c = Compression::from_name(name).unwrap();
            let packed = c.compress(b"").unwrap();
            assert!(c.decompress(&packed).unwrap().is_empty(), "{name}");
        }
    }

    #[test]
    fn test_compressible_data_shrinks() {
        let data = vec![0u8; 100_000];
        let packed = Compression::Zstd.compress(&data).unwrap();
        assert!(packed.len() < data.len() / 10);
    }

    #[test]
    fn test_decompression_bomb_is_capped() {
        let data = vec![0u8; 64 * 1024];
        for c in [Compression::Gzip, Compression::Zstd, Compression::Xz, Compression::LzwMsb] {
            let packed = c.compress(&data).unwrap();
            let err = c.decompress_capped(&packed, 1024).unwrap_err();
            assert!(
                matches!(err, HarpError::SizeLimitExceeded { .. }),
                "{}: {err:?}",
                c.name()
            );
        }
    }

    #[test]
    fn test_corrupt_stream() {
        let err = Compression::Gzip.decompress(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, HarpError::InputValidation(_)));
    }

    #[test]
    fn test_unknown_name() {
        assert!(Compression::from_name("brotli").is_err());
    }

    proptest! {
        #[test]
        fn lz_family_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..=8192)) {
            for c in [Compression::Lz4, Compression::Snappy, Compression::LzwLsb, Compression::Zlib] {
                let packed = c.compress(&data).unwrap();
                prop_assert_eq!(c.decompress(&packed).unwrap(), data.clone(), "{}", c.name());
            }
        }
    }
}
