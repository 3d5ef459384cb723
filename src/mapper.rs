//! Byte sources backing an archive
//!
//! A [`SourceMapper`] turns `(offset, size)` requests into bytes. The
//! map cache above it only ever asks for whole cache blocks, so
//! implementations stay dumb: no caching, no framing, no state.

use std::fs::File;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use crate::error::ForehandError;

/// Bytes returned by a mapper for one cache block.
///
/// `Shared` aliases memory the mapper already owns (zero-copy),
/// `Owned` carries bytes produced for this request.
pub enum MappedBlock {
    Shared(Arc<Vec<u8>>, Range<usize>),
    Owned(Vec<u8>),
}

impl MappedBlock {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            MappedBlock::Shared(data, range) => &data[range.clone()],
            MappedBlock::Owned(data) => data,
        }
    }
}

/// Provider of raw archive bytes
pub trait SourceMapper: Send + Sync {
    /// Total byte size of the source.
    fn size(&self) -> u64;

    /// Produce `size` bytes starting at `offset`.
    ///
    /// Callers guarantee `offset + size <= self.size()`.
    fn map(&self, offset: u64, size: usize) -> Result<MappedBlock, ForehandError>;
}

/// Mapper over caller-supplied memory
pub struct MemoryMapper {
    data: Arc<Vec<u8>>,
}

impl MemoryMapper {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Arc::new(data) }
    }
}

impl SourceMapper for MemoryMapper {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn map(&self, offset: u64, size: usize) -> Result<MappedBlock, ForehandError> {
        let start = usize::try_from(offset).map_err(|_| ForehandError::MapperMap)?;
        let end = start.checked_add(size).ok_or(ForehandError::IntegerOverflow)?;
        if end > self.data.len() {
            return Err(ForehandError::MapperMap);
        }
        Ok(MappedBlock::Shared(self.data.clone(), start..end))
    }
}

/// Mapper over an open file, positioned reads only
#[cfg(unix)]
pub struct FileMapper {
    file: File,
    size: u64,
}

#[cfg(unix)]
impl FileMapper {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ForehandError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

#[cfg(unix)]
impl SourceMapper for FileMapper {
    fn size(&self) -> u64 {
        self.size
    }

    fn map(&self, offset: u64, size: usize) -> Result<MappedBlock, ForehandError> {
        use std::os::unix::fs::FileExt;

        if offset.checked_add(size as u64).ok_or(ForehandError::IntegerOverflow)? > self.size {
            return Err(ForehandError::MapperMap);
        }
        let mut buf = vec![0u8; size];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(MappedBlock::Owned(buf))
    }
}

/// Byte source for [`Archive::new`](crate::Archive::new)
pub enum Source {
    /// Archive held in memory.
    Memory(Vec<u8>),
    /// Archive read from a file with positioned reads.
    #[cfg(unix)]
    File(std::path::PathBuf),
    /// Caller-supplied mapper.
    Mapper(Box<dyn SourceMapper>),
}

impl Source {
    pub(crate) fn into_mapper(self) -> Result<Box<dyn SourceMapper>, ForehandError> {
        match self {
            Source::Memory(data) => Ok(Box::new(MemoryMapper::new(data))),
            #[cfg(unix)]
            Source::File(path) => Ok(Box::new(FileMapper::open(path)?)),
            Source::Mapper(mapper) => Ok(mapper),
        }
    }
}

impl From<Vec<u8>> for Source {
    fn from(data: Vec<u8>) -> Self {
        Source::Memory(data)
    }
}

impl From<&[u8]> for Source {
    fn from(data: &[u8]) -> Self {
        Source::Memory(data.to_vec())
    }
}

#[cfg(unix)]
impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::File(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_mapper_round_trip() {
        let mapper = MemoryMapper::new((0u8..=255).collect());
        assert_eq!(mapper.size(), 256);
        let block = mapper.map(10, 6).unwrap();
        assert_eq!(block.as_slice(), &[10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn memory_mapper_rejects_overrun() {
        let mapper = MemoryMapper::new(vec![0u8; 16]);
        assert!(matches!(mapper.map(10, 7), Err(ForehandError::MapperMap)));
    }
}
