//! Errors

use std::io;

use thiserror::Error;

/// Errors generated from library
#[derive(Error, Debug)]
pub enum ForehandError {
    #[error("std io error: {0}")]
    StdIo(#[from] io::Error),

    #[error("deku error: {0:?}")]
    Deku(#[from] deku::DekuError),

    #[error("string error: {0:?}")]
    StrUtf8(#[from] std::str::Utf8Error),

    // Format errors
    #[error("source smaller than a superblock")]
    SuperblockTooSmall,

    #[error("wrong magic or unsupported version")]
    WrongMagic,

    #[error("block_size does not match block_log")]
    BlockSizeMismatch,

    #[error("size field disagrees with the archive")]
    SizeMismatch,

    #[error("unknown inode type: {0}")]
    UnknownInodeType(u16),

    #[error("metablock larger than 8 KiB")]
    MetablockTooBig,

    #[error("legacy check flag is set")]
    CheckFlagSet,

    // Compression errors
    #[error("unsupported compression id: {0}")]
    UnsupportedCompression(u16),

    #[error("decompressor failed to initialize")]
    CompressionInit,

    #[error("decompression failed")]
    CompressionDecompress,

    #[error("decompressor used after finish")]
    CompressionFinished,

    // Structure errors
    #[error("no such file or directory")]
    NoSuchFile,

    #[error("not a directory")]
    NotADirectory,

    #[error("not a regular file")]
    NotAFile,

    #[error("directory has no index")]
    NoExtendedDirectory,

    #[error("archive has no fragment table")]
    NoFragmentTable,

    #[error("archive has no export table")]
    NoExportTable,

    #[error("archive has no xattr table")]
    NoXattrTable,

    #[error("no such element")]
    NoSuchElement,

    #[error("index out of bounds")]
    IndexOutOfBounds,

    #[error("address out of bounds")]
    OutOfBounds,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("inode map is inconsistent")]
    InodeMapInconsistent,

    #[error("traversal exceeded the depth limit")]
    TooDeep,

    // Environment errors
    #[error("mapper failed to initialize")]
    MapperInit,

    #[error("mapper failed to map")]
    MapperMap,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("internal error")]
    Internal,

    #[error("not implemented")]
    Todo,
}

impl From<ForehandError> for io::Error {
    fn from(value: ForehandError) -> Self {
        use ForehandError::*;
        match value {
            StdIo(io) => io,
            e @ (NoSuchFile | NoSuchElement) => Self::new(io::ErrorKind::NotFound, e),
            e @ UnsupportedCompression(_) => Self::new(io::ErrorKind::Unsupported, e),
            e @ InvalidArgument => Self::new(io::ErrorKind::InvalidInput, e),
            e => Self::new(io::ErrorKind::InvalidData, e),
        }
    }
}

/// Poisoned manager locks have no recovery story inside the library.
pub(crate) fn lock_poisoned<T>(_: std::sync::PoisonError<T>) -> ForehandError {
    ForehandError::Internal
}
