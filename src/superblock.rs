//! Archive superblock
//!
//! Fixed 96-byte little-endian header at the archive offset. Parsing
//! validates everything the rest of the engine relies on: magic,
//! version, block-size geometry, and that no table lies past the end
//! of the archive.

use deku::prelude::*;
use tracing::trace;

use crate::compressor::Compressor;
use crate::error::ForehandError;
use crate::inode::InodeRef;

/// Size of the superblock on disk
pub const SUPERBLOCK_SIZE: usize = 96;

const MAGIC: u32 = 0x7371_7368;

/// Marker for an absent table
pub(crate) const NO_SEGMENT: u64 = 0xffff_ffff_ffff_ffff;

/// 4KiB
pub const MIN_BLOCK_SIZE: u32 = 0x1000;

/// 1MiB
pub const MAX_BLOCK_SIZE: u32 = 0x10_0000;

/// Contains important information about the archive, including the
/// locations of the other sections
#[derive(Debug, Copy, Clone, DekuRead, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct Superblock {
    magic: u32,
    /// The number of inodes stored in the archive.
    inode_count: u32,
    /// Last modification time of the archive, seconds since the epoch.
    mod_time: u32,
    /// The size of a data block in bytes. Must be a power of two
    /// between 4096 and 1048576.
    block_size: u32,
    /// The number of entries in the fragment table.
    frag_count: u32,
    /// Compressor id used for both data and metadata.
    compressor_id: u16,
    /// The log2 of the block size. If the two fields do not agree, the
    /// archive is considered corrupted.
    block_log: u16,
    /// Bit wise OR of the flag bits.
    flags: u16,
    /// The number of entries in the ID lookup table.
    id_count: u16,
    version_major: u16,
    version_minor: u16,
    /// A reference to the inode of the root directory.
    root_inode: u64,
    /// The number of bytes used by the archive. Because archives are
    /// padded to the device block size this can be less than the file
    /// size.
    bytes_used: u64,
    id_table: u64,
    xattr_table: u64,
    inode_table: u64,
    dir_table: u64,
    frag_table: u64,
    export_table: u64,
}

#[rustfmt::skip]
pub enum Flags {
    InodesStoredUncompressed    = 0b0000_0000_0000_0001,
    DataBlockStoredUncompressed = 0b0000_0000_0000_0010,
    Check                       = 0b0000_0000_0000_0100,
    FragmentsStoredUncompressed = 0b0000_0000_0000_1000,
    FragmentsAreNotUsed         = 0b0000_0000_0001_0000,
    FragmentsAreAlwaysGenerated = 0b0000_0000_0010_0000,
    DataHasBeenDeduplicated     = 0b0000_0000_0100_0000,
    NFSExportTableExists        = 0b0000_0000_1000_0000,
    XattrsAreStoredUncompressed = 0b0000_0001_0000_0000,
    NoXattrsInArchive           = 0b0000_0010_0000_0000,
    CompressorOptionsArePresent = 0b0000_0100_0000_0000,
    IdsStoredUncompressed       = 0b0000_1000_0000_0000,
}

impl Superblock {
    /// Parse and validate the header against a source of
    /// `archive_size` bytes.
    pub(crate) fn parse(bytes: &[u8], archive_size: u64) -> Result<Self, ForehandError> {
        if bytes.len() < SUPERBLOCK_SIZE {
            return Err(ForehandError::SuperblockTooSmall);
        }
        let (_, superblock) = Superblock::from_bytes((bytes, 0))?;
        trace!("{superblock:#x?}");

        if superblock.magic != MAGIC {
            return Err(ForehandError::WrongMagic);
        }
        if superblock.version_major != 4 || superblock.version_minor != 0 {
            return Err(ForehandError::WrongMagic);
        }
        if superblock.check_flag_set() {
            return Err(ForehandError::CheckFlagSet);
        }
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&superblock.block_size)
            || !superblock.block_size.is_power_of_two()
            || superblock.block_size != 1u32.checked_shl(superblock.block_log.into()).unwrap_or(0)
        {
            return Err(ForehandError::BlockSizeMismatch);
        }
        if superblock.bytes_used > archive_size {
            return Err(ForehandError::SizeMismatch);
        }
        for table in [
            superblock.id_table,
            superblock.xattr_table,
            superblock.inode_table,
            superblock.dir_table,
            superblock.frag_table,
            superblock.export_table,
        ] {
            if table != NO_SEGMENT && table > superblock.bytes_used {
                return Err(ForehandError::SizeMismatch);
            }
        }
        Ok(superblock)
    }

    pub fn inode_count(&self) -> u32 {
        self.inode_count
    }

    pub fn mod_time(&self) -> u32 {
        self.mod_time
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_log(&self) -> u16 {
        self.block_log
    }

    pub fn fragment_count(&self) -> u32 {
        self.frag_count
    }

    pub fn id_count(&self) -> u16 {
        self.id_count
    }

    pub fn compressor(&self) -> Result<Compressor, ForehandError> {
        Compressor::try_from(self.compressor_id)
    }

    pub fn root_inode_ref(&self) -> InodeRef {
        InodeRef(self.root_inode)
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    pub(crate) fn id_table_start(&self) -> u64 {
        self.id_table
    }

    pub(crate) fn xattr_table_start(&self) -> u64 {
        self.xattr_table
    }

    pub(crate) fn inode_table_start(&self) -> u64 {
        self.inode_table
    }

    pub(crate) fn dir_table_start(&self) -> u64 {
        self.dir_table
    }

    pub(crate) fn fragment_table_start(&self) -> u64 {
        self.frag_table
    }

    pub(crate) fn export_table_start(&self) -> u64 {
        self.export_table
    }

    /// flag value
    pub fn inodes_uncompressed(&self) -> bool {
        self.flags & Flags::InodesStoredUncompressed as u16 != 0
    }

    /// flag value
    pub fn data_block_stored_uncompressed(&self) -> bool {
        self.flags & Flags::DataBlockStoredUncompressed as u16 != 0
    }

    /// flag value
    pub(crate) fn check_flag_set(&self) -> bool {
        self.flags & Flags::Check as u16 != 0
    }

    /// flag value
    pub fn fragments_stored_uncompressed(&self) -> bool {
        self.flags & Flags::FragmentsStoredUncompressed as u16 != 0
    }

    /// flag value
    pub fn fragments_are_not_used(&self) -> bool {
        self.flags & Flags::FragmentsAreNotUsed as u16 != 0
    }

    /// flag value
    pub fn fragments_are_always_generated(&self) -> bool {
        self.flags & Flags::FragmentsAreAlwaysGenerated as u16 != 0
    }

    /// flag value
    pub fn duplicate_data_removed(&self) -> bool {
        self.flags & Flags::DataHasBeenDeduplicated as u16 != 0
    }

    /// flag value
    pub fn nfs_export_table_exists(&self) -> bool {
        self.flags & Flags::NFSExportTableExists as u16 != 0
    }

    /// flag value
    pub fn xattrs_are_stored_uncompressed(&self) -> bool {
        self.flags & Flags::XattrsAreStoredUncompressed as u16 != 0
    }

    /// flag value
    pub fn no_xattrs_in_archive(&self) -> bool {
        self.flags & Flags::NoXattrsInArchive as u16 != 0
    }

    /// flag value
    pub fn compressor_options_are_present(&self) -> bool {
        self.flags & Flags::CompressorOptionsArePresent as u16 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn raw_superblock() -> Vec<u8> {
        let mut b = Vec::with_capacity(SUPERBLOCK_SIZE);
        b.extend(MAGIC.to_le_bytes()); // magic
        b.extend(3u32.to_le_bytes()); // inode_count
        b.extend(0u32.to_le_bytes()); // mod_time
        b.extend(0x20000u32.to_le_bytes()); // block_size
        b.extend(0u32.to_le_bytes()); // frag_count
        b.extend(1u16.to_le_bytes()); // compressor (gzip)
        b.extend(17u16.to_le_bytes()); // block_log
        b.extend(0u16.to_le_bytes()); // flags
        b.extend(1u16.to_le_bytes()); // id_count
        b.extend(4u16.to_le_bytes()); // version_major
        b.extend(0u16.to_le_bytes()); // version_minor
        b.extend(0u64.to_le_bytes()); // root_inode
        b.extend(500u64.to_le_bytes()); // bytes_used
        b.extend(200u64.to_le_bytes()); // id_table
        b.extend(NO_SEGMENT.to_le_bytes()); // xattr_table
        b.extend(96u64.to_le_bytes()); // inode_table
        b.extend(150u64.to_le_bytes()); // dir_table
        b.extend(NO_SEGMENT.to_le_bytes()); // frag_table
        b.extend(NO_SEGMENT.to_le_bytes()); // export_table
        assert_eq!(b.len(), SUPERBLOCK_SIZE);
        b
    }

    #[test]
    fn parses_a_valid_header() {
        let sb = Superblock::parse(&raw_superblock(), 1000).unwrap();
        assert_eq!(sb.block_size(), 0x20000);
        assert_eq!(sb.inode_count(), 3);
        assert_eq!(sb.compressor().unwrap(), Compressor::Gzip);
        assert_eq!(sb.inode_table_start(), 96);
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(
            Superblock::parse(&raw_superblock()[..90], 1000),
            Err(ForehandError::SuperblockTooSmall)
        ));
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut raw = raw_superblock();
        raw[0] = b'x';
        assert!(matches!(
            Superblock::parse(&raw, 1000),
            Err(ForehandError::WrongMagic)
        ));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut raw = raw_superblock();
        raw[28] = 3; // version_major
        assert!(matches!(
            Superblock::parse(&raw, 1000),
            Err(ForehandError::WrongMagic)
        ));
    }

    #[test]
    fn rejects_block_log_disagreement() {
        let mut raw = raw_superblock();
        raw[22] = 16; // block_log for a 0x20000 block_size
        assert!(matches!(
            Superblock::parse(&raw, 1000),
            Err(ForehandError::BlockSizeMismatch)
        ));
    }

    #[test]
    fn rejects_check_flag() {
        let mut raw = raw_superblock();
        raw[24] |= Flags::Check as u16 as u8;
        assert!(matches!(
            Superblock::parse(&raw, 1000),
            Err(ForehandError::CheckFlagSet)
        ));
    }

    #[test]
    fn rejects_archive_larger_than_source() {
        assert!(matches!(
            Superblock::parse(&raw_superblock(), 400),
            Err(ForehandError::SizeMismatch)
        ));
    }

    #[test]
    fn rejects_table_past_the_end() {
        let mut raw = raw_superblock();
        raw[48..56].copy_from_slice(&600u64.to_le_bytes()); // id_table
        assert!(matches!(
            Superblock::parse(&raw, 1000),
            Err(ForehandError::SizeMismatch)
        ));
    }
}
