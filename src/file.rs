//! File contents
//!
//! [`FileIterator`] yields the blocks of a regular file in order:
//! stored blocks (decompressed on demand through the shared extract
//! cache), sparse runs served from a zero block, and the fragment
//! tail. [`FileReader`] wraps it in the generic cursor for random
//! `advance(offset, size)` access, and implements [`std::io::Read`]
//! for sequential consumption.

use std::io::Read;
use std::sync::Arc;

use tracing::trace;

use crate::archive::Archive;
use crate::data::DataSize;
use crate::error::ForehandError;
use crate::extract::ExtractBuffer;
use crate::inode::{Inode, NO_FRAGMENT};
use crate::map::MapReader;
use crate::reader::{Reader, SpanIterator};

/// Largest zero span exposed at once for sparse blocks
pub(crate) const ZERO_BLOCK_SIZE: usize = 16384;

static ZERO_BLOCK: [u8; ZERO_BLOCK_SIZE] = [0; ZERO_BLOCK_SIZE];

enum FileSpan<'a> {
    None,
    /// Zero bytes of the given length.
    Sparse(usize),
    /// Block stored uncompressed, exposed from the map.
    Mapped { reader: MapReader<'a>, len: usize },
    /// Decompressed block, truncated to `len`.
    Extracted { buffer: Arc<ExtractBuffer>, len: usize },
    /// This file's slice of its fragment block.
    Fragment { data: Vec<u8> },
}

pub struct FileIterator<'a> {
    archive: &'a Archive,
    block_sizes: &'a [DataSize],
    file_size: u64,
    frag_index: u32,
    frag_offset: u32,
    block_size: u64,
    /// Next block to decode.
    block_index: usize,
    /// Archive address of the next stored block.
    next_address: u64,
    /// Zero bytes still owed by the current sparse block.
    sparse_remaining: u64,
    fragment_done: bool,
    span: FileSpan<'a>,
}

impl<'a> FileIterator<'a> {
    fn new(inode: &'a Inode<'a>) -> Result<Self, ForehandError> {
        if !inode.kind().is_file() {
            return Err(ForehandError::NotAFile);
        }
        let archive = inode.archive();
        Ok(Self {
            archive,
            block_sizes: inode.block_sizes(),
            file_size: inode.file_size(),
            frag_index: inode.fragment_block_index(),
            frag_offset: inode.fragment_block_offset(),
            block_size: u64::from(archive.superblock().block_size()),
            block_index: 0,
            next_address: inode.blocks_start(),
            sparse_remaining: 0,
            fragment_done: false,
            span: FileSpan::None,
        })
    }

    /// Bytes block `index` contributes to the file.
    fn logical_size(&self, index: usize) -> u64 {
        let start = index as u64 * self.block_size;
        (self.file_size - start).min(self.block_size)
    }

    /// Length of the fragment tail, zero when the file has none.
    fn fragment_size(&self) -> u64 {
        if self.frag_index == NO_FRAGMENT {
            return 0;
        }
        self.file_size - self.block_sizes.len() as u64 * self.block_size
    }

    fn next_stored_block(&mut self, info: DataSize) -> Result<(), ForehandError> {
        let logical = self.logical_size(self.block_index);
        let stored = info.size() as usize;
        let mut reader = MapReader::new(
            self.archive.map_manager(),
            self.next_address,
            self.archive.superblock().bytes_used(),
        );
        reader.advance(0, stored)?;
        self.next_address += stored as u64;

        if info.uncompressed() {
            let len = stored.min(logical as usize);
            self.span = FileSpan::Mapped { reader, len };
        } else {
            let buffer = self.archive.data_extract_manager().uncompress(&reader)?;
            let len = buffer.data.len().min(logical as usize);
            self.span = FileSpan::Extracted { buffer, len };
        }
        Ok(())
    }

    fn next_fragment(&mut self) -> Result<(), ForehandError> {
        let tail = self.fragment_size() as usize;
        let fragment = self
            .archive
            .fragment_table()?
            .get(self.archive, self.frag_index)?;
        let info = fragment.size_info();
        trace!(start = fragment.start(), tail, "fragment block");

        let mut reader = MapReader::new(
            self.archive.map_manager(),
            fragment.start(),
            self.archive.superblock().bytes_used(),
        );
        reader.advance(0, info.size() as usize)?;

        let offset = self.frag_offset as usize;
        let data = if info.uncompressed() {
            let block = reader.data();
            if offset + tail > block.len() {
                return Err(ForehandError::SizeMismatch);
            }
            block[offset..offset + tail].to_vec()
        } else {
            let buffer = self.archive.data_extract_manager().uncompress(&reader)?;
            if offset + tail > buffer.data.len() {
                return Err(ForehandError::SizeMismatch);
            }
            buffer.data[offset..offset + tail].to_vec()
        };
        self.span = FileSpan::Fragment { data };
        Ok(())
    }
}

impl SpanIterator for FileIterator<'_> {
    fn next_span(&mut self, _desired_size: usize) -> Result<bool, ForehandError> {
        // finish an oversized sparse run first
        if self.sparse_remaining > 0 {
            let len = (self.sparse_remaining).min(ZERO_BLOCK_SIZE as u64) as usize;
            self.sparse_remaining -= len as u64;
            self.span = FileSpan::Sparse(len);
            return Ok(true);
        }

        if self.block_index < self.block_sizes.len() {
            let info = self.block_sizes[self.block_index];
            if info.is_sparse() {
                self.sparse_remaining = self.logical_size(self.block_index);
                self.block_index += 1;
                return self.next_span(_desired_size);
            }
            self.next_stored_block(info)?;
            self.block_index += 1;
            return Ok(true);
        }

        if !self.fragment_done && self.fragment_size() > 0 {
            self.fragment_done = true;
            self.next_fragment()?;
            return Ok(true);
        }

        self.span = FileSpan::None;
        Ok(false)
    }

    fn span(&self) -> &[u8] {
        match &self.span {
            FileSpan::None => &[],
            FileSpan::Sparse(len) => &ZERO_BLOCK[..*len],
            FileSpan::Mapped { reader, len } => &reader.data()[..*len],
            FileSpan::Extracted { buffer, len } => &buffer.data[..*len],
            FileSpan::Fragment { data } => data,
        }
    }
}

/// Random-access reader over one file's bytes
pub struct FileReader<'a> {
    reader: Reader<FileIterator<'a>>,
    file_size: u64,
    /// Sequential-read cursor state for the `Read` impl.
    consumed: usize,
    remaining: u64,
}

impl<'a> FileReader<'a> {
    pub(crate) fn new(inode: &'a Inode<'a>) -> Result<Self, ForehandError> {
        let iterator = FileIterator::new(inode)?;
        let file_size = iterator.file_size;
        Ok(Self {
            reader: Reader::new(iterator),
            file_size,
            consumed: 0,
            remaining: file_size,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Move the window to `[offset, offset + size)` relative to the
    /// current window start and return it.
    pub fn advance(&mut self, offset: usize, size: usize) -> Result<&[u8], ForehandError> {
        self.reader.advance(offset, size)?;
        Ok(self.reader.data())
    }

    pub fn data(&self) -> &[u8] {
        self.reader.data()
    }
}

impl Read for FileReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        self.reader.advance(self.consumed, want)?;
        buf[..want].copy_from_slice(self.reader.data());
        self.consumed = want;
        self.remaining -= want as u64;
        Ok(want)
    }
}

impl<'a> Inode<'a> {
    /// Iterator over this file's content blocks.
    pub fn file_iterator(&self) -> Result<FileIterator<'_>, ForehandError> {
        FileIterator::new(self)
    }

    /// Random-access reader over this file's contents.
    pub fn file_reader(&self) -> Result<FileReader<'_>, ForehandError> {
        FileReader::new(self)
    }

    /// Read the whole file into memory.
    pub fn read_to_vec(&self) -> Result<Vec<u8>, ForehandError> {
        let mut reader = self.file_reader()?;
        let mut out = Vec::with_capacity(reader.file_size() as usize);
        reader.read_to_end(&mut out)?;
        Ok(out)
    }
}
