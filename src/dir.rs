//! Directory listings
//!
//! A directory's listing is a run of fragments in the directory
//! table: a 12-byte header naming the inode metablock shared by the
//! entries that follow, then up to 256 entries sorted by name. The
//! iterator walks fragments until the listing size from the inode is
//! consumed. Extended directories carry a sparse index used to seek
//! straight to the fragment that can contain a name.

use deku::prelude::*;
use tracing::trace;

use crate::archive::Archive;
use crate::error::ForehandError;
use crate::inode::{Inode, InodeKind, InodeRef};
use crate::metablock::{MetablockReader, METABLOCK_SIZE};

/// Directory listing sizes include 3 virtual bytes for `.`/`..`.
const LISTING_BIAS: u64 = 3;

const HEADER_SIZE: usize = 12;

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
struct DirHeader {
    /// One less than the number of entries following.
    count: u32,
    /// Metablock start of the entries' inodes, relative to the inode
    /// table.
    start: u32,
    /// Base inode number; entries store signed deltas against it.
    inode_number: u32,
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "little")]
struct RawDirEntry {
    /// Offset into the decompressed inode metablock.
    offset: u16,
    inode_offset: i16,
    t: u16,
    /// One less than the name length.
    name_size: u16,
    #[deku(count = "*name_size + 1")]
    name: Vec<u8>,
}

/// Index record of an extended directory
#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct DirIndex {
    /// Byte offset into the uncompressed listing.
    pub(crate) index: u32,
    /// Metablock start relative to the directory table.
    pub(crate) start: u32,
    name_size: u32,
    #[deku(count = "*name_size + 1")]
    pub(crate) name: Vec<u8>,
}

impl DirIndex {
    pub fn name(&self) -> &[u8] {
        &self.name
    }
}

/// One directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    name: Vec<u8>,
    inode_ref: InodeRef,
    inode_number: u32,
    file_type: InodeKind,
}

impl DirEntry {
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn name_str(&self) -> Result<&str, ForehandError> {
        Ok(std::str::from_utf8(&self.name)?)
    }

    pub fn inode_ref(&self) -> InodeRef {
        self.inode_ref
    }

    pub fn inode_number(&self) -> u32 {
        self.inode_number
    }

    /// Entries always carry the basic type, even for extended inodes.
    pub fn file_type(&self) -> InodeKind {
        self.file_type
    }
}

pub struct DirIterator<'a> {
    archive: &'a Archive,
    reader: MetablockReader<'a>,
    remaining_bytes: u64,
    remaining_entries: u32,
    header: Option<DirHeader>,
    /// Size of the last exposed window.
    consumed: usize,
}

impl<'a> DirIterator<'a> {
    pub(crate) fn new(
        archive: &'a Archive,
        block_start: u32,
        block_offset: usize,
        listing_bytes: u64,
    ) -> Result<Self, ForehandError> {
        let start = archive
            .superblock()
            .dir_table_start()
            .checked_add(u64::from(block_start))
            .ok_or(ForehandError::IntegerOverflow)?;
        let mut reader = archive.metablock_reader(start)?;
        // empty window at the listing start
        reader.advance(block_offset, 0)?;
        Ok(Self {
            archive,
            reader,
            remaining_bytes: listing_bytes,
            remaining_entries: 0,
            header: None,
            consumed: 0,
        })
    }

    /// Decode the next entry, or `None` at the end of the listing.
    pub fn next(&mut self) -> Result<Option<DirEntry>, ForehandError> {
        while self.remaining_entries == 0 {
            if self.remaining_bytes < (HEADER_SIZE as u64) + 8 {
                return Ok(None);
            }
            let header: DirHeader = self.reader.parse(self.consumed, HEADER_SIZE)?;
            if header.count >= 256 {
                return Err(ForehandError::SizeMismatch);
            }
            trace!(?header, "directory fragment");
            self.remaining_entries = header.count + 1;
            self.remaining_bytes -= HEADER_SIZE as u64;
            self.header = Some(header);
            self.consumed = HEADER_SIZE;
        }
        let header = self.header.ok_or(ForehandError::Internal)?;

        // fixed part first to learn the name length
        self.reader.advance(self.consumed, 8)?;
        let data = self.reader.data();
        let name_size = usize::from(u16::from_le_bytes([data[6], data[7]]));
        let entry_size = 8 + name_size + 1;

        self.reader.advance(0, entry_size)?;
        let (_, raw) = RawDirEntry::from_bytes((self.reader.data(), 0))?;
        self.consumed = entry_size;
        if self.remaining_bytes < entry_size as u64 {
            return Err(ForehandError::SizeMismatch);
        }
        self.remaining_bytes -= entry_size as u64;
        self.remaining_entries -= 1;

        let inode_ref = InodeRef::new(u64::from(header.start), raw.offset);
        let inode_number = header
            .inode_number
            .wrapping_add(i32::from(raw.inode_offset) as u32);
        let entry = DirEntry {
            name: raw.name,
            inode_ref,
            inode_number,
            file_type: InodeKind::try_from(raw.t)?,
        };
        self.archive.inode_map_note(inode_number, inode_ref)?;
        Ok(Some(entry))
    }

    /// Find `name` in the remaining entries. Listings are sorted, so
    /// the scan stops at the first larger name.
    pub fn lookup(&mut self, name: &[u8]) -> Result<Option<DirEntry>, ForehandError> {
        while let Some(entry) = self.next()? {
            match entry.name().cmp(name) {
                std::cmp::Ordering::Equal => return Ok(Some(entry)),
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => {}
            }
        }
        Ok(None)
    }
}

impl<'a> Inode<'a> {
    /// Iterate this directory's entries from the beginning.
    pub fn dir(&self) -> Result<DirIterator<'a>, ForehandError> {
        if !self.kind().is_directory() {
            return Err(ForehandError::NotADirectory);
        }
        let listing_bytes = self.file_size().saturating_sub(LISTING_BIAS);
        DirIterator::new(
            self.archive(),
            self.dir_block_start(),
            usize::from(self.dir_block_offset()),
            listing_bytes,
        )
    }

    /// Iterator positioned on the fragment the directory index names
    /// as the best starting point for `name`.
    fn dir_from_index(&self, name: &[u8]) -> Result<DirIterator<'a>, ForehandError> {
        let mut best: Option<&DirIndex> = None;
        for record in self.dir_index() {
            if record.name() <= name {
                best = Some(record);
            } else {
                break;
            }
        }
        let Some(record) = best else {
            return self.dir();
        };

        let listing_bytes = self
            .file_size()
            .saturating_sub(LISTING_BIAS)
            .saturating_sub(u64::from(record.index));
        let offset =
            (usize::from(self.dir_block_offset()) + record.index as usize) % METABLOCK_SIZE;
        trace!(start = record.start, offset, "indexed directory seek");
        DirIterator::new(self.archive(), record.start, offset, listing_bytes)
    }

    /// Find a child by name, seeking through the directory index when
    /// one exists.
    pub fn lookup(&self, name: &[u8]) -> Result<Option<DirEntry>, ForehandError> {
        if !self.kind().is_directory() {
            return Err(ForehandError::NotADirectory);
        }
        let mut iter = if self.dir_index().is_empty() {
            self.dir()?
        } else {
            self.dir_from_index(name)?
        };
        iter.lookup(name)
    }
}
