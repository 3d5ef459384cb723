//! Types of supported compression algorithms

use deku::prelude::*;
use tracing::instrument;

#[cfg(feature = "xz")]
use std::io::Read;

use crate::error::ForehandError;
use crate::lzo;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[rustfmt::skip]
pub enum Compressor {
    None = 0,
    Gzip = 1,
    Lzma = 2,
    Lzo  = 3,
    Xz   = 4,
    Lz4  = 5,
    Zstd = 6,
}

impl TryFrom<u16> for Compressor {
    type Error = ForehandError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(Compressor::None),
            1 => Ok(Compressor::Gzip),
            2 => Ok(Compressor::Lzma),
            3 => Ok(Compressor::Lzo),
            4 => Ok(Compressor::Xz),
            5 => Ok(Compressor::Lz4),
            6 => Ok(Compressor::Zstd),
            _ => Err(ForehandError::UnsupportedCompression(id)),
        }
    }
}

/// Per-codec options stored after the superblock
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CompressionOptions {
    Gzip(Gzip),
    Lzo(Lzo),
    Xz(Xz),
    Lz4(Lz4),
    Zstd(Zstd),
    Lzma,
}

impl CompressionOptions {
    /// Parse the options payload for `compressor`.
    pub(crate) fn parse(
        compressor: Compressor,
        bytes: &[u8],
    ) -> Result<CompressionOptions, ForehandError> {
        let options = match compressor {
            Compressor::Gzip => CompressionOptions::Gzip(Gzip::from_bytes((bytes, 0))?.1),
            Compressor::Lzo => CompressionOptions::Lzo(Lzo::from_bytes((bytes, 0))?.1),
            Compressor::Xz => CompressionOptions::Xz(Xz::from_bytes((bytes, 0))?.1),
            Compressor::Lz4 => CompressionOptions::Lz4(Lz4::from_bytes((bytes, 0))?.1),
            Compressor::Zstd => CompressionOptions::Zstd(Zstd::from_bytes((bytes, 0))?.1),
            Compressor::Lzma => CompressionOptions::Lzma,
            Compressor::None => return Err(ForehandError::InvalidArgument),
        };
        Ok(options)
    }
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "little")]
pub struct Gzip {
    pub compression_level: u32,
    pub window_size: u16,
    pub strategies: u16,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "little")]
pub struct Lzo {
    pub algorithm: u32,
    pub compression_level: u32,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "little")]
pub struct Xz {
    pub dictionary_size: u32,
    pub filters: u32,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "little")]
pub struct Lz4 {
    pub version: u32,
    pub flags: u32,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "little")]
pub struct Zstd {
    pub compression_level: u32,
}

/// Using the given compressor, decompress bytes into `out`.
///
/// `target_size` bounds the output: a block never decodes to more than
/// the block size it was cut from.
#[instrument(skip_all)]
pub(crate) fn decompress(
    bytes: &[u8],
    out: &mut Vec<u8>,
    compressor: Compressor,
    target_size: usize,
) -> Result<(), ForehandError> {
    match compressor {
        #[cfg(feature = "gzip")]
        Compressor::Gzip => {
            let mut decoder = flate2::Decompress::new(true);
            out.resize(target_size, 0);
            let status = decoder
                .decompress(bytes, out, flate2::FlushDecompress::Finish)
                .map_err(|_| ForehandError::CompressionDecompress)?;
            if status != flate2::Status::StreamEnd {
                return Err(ForehandError::CompressionDecompress);
            }
            out.truncate(decoder.total_out() as usize);
        }
        #[cfg(feature = "xz")]
        Compressor::Xz => {
            let mut decoder = xz2::read::XzDecoder::new(bytes);
            decoder
                .read_to_end(out)
                .map_err(|_| ForehandError::CompressionDecompress)?;
        }
        Compressor::Lzo => {
            lzo::decompress(bytes, out, target_size)?;
        }
        #[cfg(feature = "lz4")]
        Compressor::Lz4 => {
            *out = lz4_flex::block::decompress(bytes, target_size)
                .map_err(|_| ForehandError::CompressionDecompress)?;
        }
        #[cfg(feature = "zstd")]
        Compressor::Zstd => {
            let mut decoder =
                zstd::bulk::Decompressor::new().map_err(|_| ForehandError::CompressionInit)?;
            *out = decoder
                .decompress(bytes, target_size)
                .map_err(|_| ForehandError::CompressionDecompress)?;
        }
        _ => return Err(ForehandError::UnsupportedCompression(compressor as u16)),
    }
    if out.len() > target_size {
        return Err(ForehandError::CompressionDecompress);
    }
    Ok(())
}
