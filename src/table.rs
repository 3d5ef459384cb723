//! Metablock-backed lookup tables
//!
//! The id, export, fragment, and xattr-id tables share one layout: the
//! superblock points at an array of absolute metablock addresses, one
//! per 8 KiB of table payload, so any element is reachable with a
//! single metablock load.

use std::marker::PhantomData;

use deku::DekuContainerRead;
use tracing::trace;

use crate::archive::Archive;
use crate::error::ForehandError;
use crate::fragment::Fragment;
use crate::inode::InodeRef;
use crate::map::MapReader;
use crate::metablock::METABLOCK_SIZE;

/// Fixed-size record of a lookup table
pub(crate) trait TableEntry: Sized {
    const SIZE: usize;
    fn parse(bytes: &[u8]) -> Result<Self, ForehandError>;
}

impl TableEntry for u32 {
    const SIZE: usize = 4;

    fn parse(bytes: &[u8]) -> Result<Self, ForehandError> {
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl TableEntry for u64 {
    const SIZE: usize = 8;

    fn parse(bytes: &[u8]) -> Result<Self, ForehandError> {
        let bytes: [u8; 8] = bytes[..8].try_into().map_err(|_| ForehandError::Internal)?;
        Ok(u64::from_le_bytes(bytes))
    }
}

impl TableEntry for Fragment {
    const SIZE: usize = Fragment::SIZE;

    fn parse(bytes: &[u8]) -> Result<Self, ForehandError> {
        Ok(Fragment::from_bytes((bytes, 0))?.1)
    }
}

pub(crate) struct Table<T> {
    /// Absolute metablock addresses, one per 8 KiB of payload.
    lookup: Vec<u64>,
    count: u32,
    _marker: PhantomData<T>,
}

impl<T: TableEntry> Table<T> {
    /// Load the metablock address array at `start` for `count`
    /// elements.
    pub fn new(archive: &Archive, start: u64, count: u32) -> Result<Self, ForehandError> {
        let byte_len = u64::from(count) * T::SIZE as u64;
        let metablock_count =
            ((byte_len + (METABLOCK_SIZE as u64 - 1)) / METABLOCK_SIZE as u64) as usize;
        trace!(start, count, metablock_count, "loading lookup table");

        let bytes_used = archive.superblock().bytes_used();
        let mut lookup = Vec::with_capacity(metablock_count);
        if metablock_count > 0 {
            let mut reader = MapReader::new(archive.map_manager(), start, bytes_used);
            let bytes = reader.load_all(metablock_count * 8)?;
            for chunk in bytes.chunks_exact(8) {
                let address = u64::from_le_bytes(chunk.try_into().unwrap());
                if address > bytes_used {
                    return Err(ForehandError::SizeMismatch);
                }
                lookup.push(address);
            }
        }
        Ok(Self { lookup, count, _marker: PhantomData })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Copy out element `index`.
    pub fn get(&self, archive: &Archive, index: u32) -> Result<T, ForehandError> {
        if index >= self.count {
            return Err(ForehandError::IndexOutOfBounds);
        }
        let byte = index as usize * T::SIZE;
        let metablock = byte / METABLOCK_SIZE;
        let offset = byte % METABLOCK_SIZE;

        let mut reader = archive.metablock_reader(self.lookup[metablock])?;
        reader.advance(offset, T::SIZE)?;
        T::parse(reader.data())
    }
}

/// uid/gid lookup table
pub(crate) struct IdTable {
    table: Table<u32>,
}

impl IdTable {
    pub fn new(archive: &Archive) -> Result<Self, ForehandError> {
        let superblock = archive.superblock();
        let table = Table::new(
            archive,
            superblock.id_table_start(),
            u32::from(superblock.id_count()),
        )?;
        Ok(Self { table })
    }

    pub fn get(&self, archive: &Archive, index: u16) -> Result<u32, ForehandError> {
        self.table.get(archive, u32::from(index))
    }
}

/// Inode-number to inode-reference table of exportable archives
pub(crate) struct ExportTable {
    table: Table<u64>,
}

impl ExportTable {
    pub fn new(archive: &Archive) -> Result<Self, ForehandError> {
        let superblock = archive.superblock();
        let table = Table::new(
            archive,
            superblock.export_table_start(),
            superblock.inode_count(),
        )?;
        Ok(Self { table })
    }

    /// Inode numbers are 1-based and dense; anything outside the
    /// archive's range names no file.
    pub fn resolve_inode(
        &self,
        archive: &Archive,
        inode_number: u32,
    ) -> Result<InodeRef, ForehandError> {
        if inode_number == 0 || inode_number > self.table.count() {
            return Err(ForehandError::NoSuchFile);
        }
        let raw = self.table.get(archive, inode_number - 1)?;
        Ok(InodeRef(raw))
    }
}

/// Fragment lookup table
pub(crate) struct FragmentTable {
    table: Table<Fragment>,
}

impl FragmentTable {
    pub fn new(archive: &Archive) -> Result<Self, ForehandError> {
        let superblock = archive.superblock();
        let table = Table::new(
            archive,
            superblock.fragment_table_start(),
            superblock.fragment_count(),
        )?;
        Ok(Self { table })
    }

    pub fn get(&self, archive: &Archive, index: u32) -> Result<Fragment, ForehandError> {
        self.table.get(archive, index)
    }
}
