//! Index Node for files, directories and special nodes
//!
//! Inodes live in the inode table, addressed by [`InodeRef`]. The
//! 16-byte common header carries a type tag; the tail shape is fully
//! determined by it. An [`Inode`] handle parses header and tail into
//! owned data, so it stays valid independent of any reader.

use core::fmt;

use deku::prelude::*;

use crate::archive::Archive;
use crate::data::DataSize;
use crate::dir::DirIndex;
use crate::error::ForehandError;

/// Marker in `frag_index` for a file without a fragment
pub const NO_FRAGMENT: u32 = 0xffff_ffff;

/// Marker in `xattr_index` for a node without xattrs
pub const NO_XATTR: u32 = 0xffff_ffff;

/// Type tag plus common header
const HEADER_SIZE: usize = 16;

/// Packed 64-bit locator of an inode: byte offset of its metablock
/// relative to the inode table start, and byte offset inside the
/// decompressed metablock.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct InodeRef(pub u64);

impl InodeRef {
    pub fn new(outer_offset: u64, inner_offset: u16) -> Self {
        Self(outer_offset << 16 | u64::from(inner_offset))
    }

    /// Byte offset of the metablock, relative to the inode table.
    pub fn outer_offset(self) -> u64 {
        self.0 >> 16
    }

    /// Byte offset inside the decompressed metablock.
    pub fn inner_offset(self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl fmt::Debug for InodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InodeRef({:#x}:{:#x})",
            self.outer_offset(),
            self.inner_offset()
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[rustfmt::skip]
pub enum InodeKind {
    BasicDirectory          = 1,
    BasicFile               = 2,
    BasicSymlink            = 3,
    BasicBlockDevice        = 4,
    BasicCharacterDevice    = 5,
    BasicFifo               = 6,
    BasicSocket             = 7,
    ExtendedDirectory       = 8,
    ExtendedFile            = 9,
    ExtendedSymlink         = 10,
    ExtendedBlockDevice     = 11,
    ExtendedCharacterDevice = 12,
    ExtendedFifo            = 13,
    ExtendedSocket          = 14,
}

impl TryFrom<u16> for InodeKind {
    type Error = ForehandError;

    fn try_from(tag: u16) -> Result<Self, Self::Error> {
        use InodeKind::*;
        Ok(match tag {
            1 => BasicDirectory,
            2 => BasicFile,
            3 => BasicSymlink,
            4 => BasicBlockDevice,
            5 => BasicCharacterDevice,
            6 => BasicFifo,
            7 => BasicSocket,
            8 => ExtendedDirectory,
            9 => ExtendedFile,
            10 => ExtendedSymlink,
            11 => ExtendedBlockDevice,
            12 => ExtendedCharacterDevice,
            13 => ExtendedFifo,
            14 => ExtendedSocket,
            _ => return Err(ForehandError::UnknownInodeType(tag)),
        })
    }
}

impl InodeKind {
    pub fn is_directory(self) -> bool {
        matches!(self, InodeKind::BasicDirectory | InodeKind::ExtendedDirectory)
    }

    pub fn is_file(self) -> bool {
        matches!(self, InodeKind::BasicFile | InodeKind::ExtendedFile)
    }

    pub fn is_symlink(self) -> bool {
        matches!(self, InodeKind::BasicSymlink | InodeKind::ExtendedSymlink)
    }

    pub fn is_device(self) -> bool {
        use InodeKind::*;
        matches!(
            self,
            BasicBlockDevice | BasicCharacterDevice | ExtendedBlockDevice | ExtendedCharacterDevice
        )
    }

    pub fn is_ipc(self) -> bool {
        use InodeKind::*;
        matches!(self, BasicFifo | BasicSocket | ExtendedFifo | ExtendedSocket)
    }

    pub fn is_extended(self) -> bool {
        self as u16 >= 8
    }
}

/// Common header shared by every inode variant
#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct InodeHeader {
    pub permissions: u16,
    /// Index into the id table.
    pub uid: u16,
    /// Index into the id table.
    pub gid: u16,
    pub mtime: u32,
    pub inode_number: u32,
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct BasicDirectory {
    pub block_index: u32,
    pub link_count: u32,
    pub file_size: u16,
    pub block_offset: u16,
    pub parent_inode: u32,
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct ExtendedDirectory {
    pub link_count: u32,
    pub file_size: u32,
    pub block_index: u32,
    pub parent_inode: u32,
    pub index_count: u16,
    pub block_offset: u16,
    pub xattr_index: u32,
}

impl ExtendedDirectory {
    const SIZE: usize = 24;
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct BasicFile {
    pub blocks_start: u32,
    pub frag_index: u32,
    pub block_offset: u32,
    pub file_size: u32,
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct ExtendedFile {
    pub blocks_start: u64,
    pub file_size: u64,
    pub sparse: u64,
    pub link_count: u32,
    pub frag_index: u32,
    pub block_offset: u32,
    pub xattr_index: u32,
}

#[derive(DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct BasicSymlink {
    pub link_count: u32,
    pub target_size: u32,
    #[deku(count = "*target_size")]
    pub target_path: Vec<u8>,
}

impl fmt::Debug for BasicSymlink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicSymlink")
            .field("link_count", &self.link_count)
            .field("target_path", &String::from_utf8_lossy(&self.target_path))
            .finish()
    }
}

/// The trailing `xattr_index` sits after the target bytes; the layout
/// is load-bearing and must not be reordered.
#[derive(DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct ExtendedSymlink {
    pub link_count: u32,
    pub target_size: u32,
    #[deku(count = "*target_size")]
    pub target_path: Vec<u8>,
    pub xattr_index: u32,
}

impl fmt::Debug for ExtendedSymlink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedSymlink")
            .field("link_count", &self.link_count)
            .field("target_path", &String::from_utf8_lossy(&self.target_path))
            .field("xattr_index", &self.xattr_index)
            .finish()
    }
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct BasicDevice {
    pub link_count: u32,
    pub device_number: u32,
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct ExtendedDevice {
    pub link_count: u32,
    pub device_number: u32,
    pub xattr_index: u32,
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct BasicIpc {
    pub link_count: u32,
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct ExtendedIpc {
    pub link_count: u32,
    pub xattr_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeBody {
    BasicDirectory(BasicDirectory),
    ExtendedDirectory {
        dir: ExtendedDirectory,
        index: Vec<DirIndex>,
    },
    BasicFile {
        file: BasicFile,
        block_sizes: Vec<DataSize>,
    },
    ExtendedFile {
        file: ExtendedFile,
        block_sizes: Vec<DataSize>,
    },
    BasicSymlink(BasicSymlink),
    ExtendedSymlink(ExtendedSymlink),
    BasicDevice(BasicDevice),
    ExtendedDevice(ExtendedDevice),
    BasicIpc(BasicIpc),
    ExtendedIpc(ExtendedIpc),
}

fn block_count(block_size: u32, block_log: u16, frag_index: u32, file_size: u64) -> u64 {
    if frag_index == NO_FRAGMENT {
        (file_size + u64::from(block_size) - 1) >> block_log
    } else {
        file_size >> block_log
    }
}

/// One parsed inode
#[derive(Clone)]
pub struct Inode<'a> {
    archive: &'a Archive,
    inode_ref: InodeRef,
    kind: InodeKind,
    header: InodeHeader,
    body: InodeBody,
}

impl fmt::Debug for Inode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("inode_ref", &self.inode_ref)
            .field("kind", &self.kind)
            .field("header", &self.header)
            .field("body", &self.body)
            .finish()
    }
}

impl<'a> Inode<'a> {
    /// Open the inode behind `inode_ref`.
    pub(crate) fn read(archive: &'a Archive, inode_ref: InodeRef) -> Result<Self, ForehandError> {
        let superblock = archive.superblock();
        let start = superblock
            .inode_table_start()
            .checked_add(inode_ref.outer_offset())
            .ok_or(ForehandError::IntegerOverflow)?;
        let mut reader = archive.metablock_reader(start)?;
        reader.advance(usize::from(inode_ref.inner_offset()), HEADER_SIZE)?;

        let window = reader.data();
        let tag = u16::from_le_bytes([window[0], window[1]]);
        let kind = InodeKind::try_from(tag)?;
        let (_, header) = InodeHeader::from_bytes((&window[2..HEADER_SIZE], 0))?;

        let body = Self::read_body(archive, &mut reader, kind)?;
        Ok(Self { archive, inode_ref, kind, header, body })
    }

    fn read_body(
        archive: &Archive,
        reader: &mut crate::metablock::MetablockReader<'_>,
        kind: InodeKind,
    ) -> Result<InodeBody, ForehandError> {
        /// Grow the window to `HEADER_SIZE + size` body bytes and
        /// parse a `T` from the body start.
        fn body<T>(
            reader: &mut crate::metablock::MetablockReader<'_>,
            size: usize,
        ) -> Result<T, ForehandError>
        where
            T: for<'de> DekuContainerRead<'de>,
        {
            reader.advance(0, HEADER_SIZE + size)?;
            let (_, value) = T::from_bytes((&reader.data()[HEADER_SIZE..], 0))?;
            Ok(value)
        }

        let superblock = archive.superblock();
        Ok(match kind {
            InodeKind::BasicDirectory => InodeBody::BasicDirectory(body(reader, 16)?),
            InodeKind::ExtendedDirectory => {
                let dir: ExtendedDirectory = body(reader, ExtendedDirectory::SIZE)?;
                let index = Self::read_dir_index(reader, dir.index_count)?;
                InodeBody::ExtendedDirectory { dir, index }
            }
            InodeKind::BasicFile => {
                let file: BasicFile = body(reader, 16)?;
                let count = block_count(
                    superblock.block_size(),
                    superblock.block_log(),
                    file.frag_index,
                    u64::from(file.file_size),
                );
                let block_sizes = Self::read_block_sizes(reader, 16, count)?;
                InodeBody::BasicFile { file, block_sizes }
            }
            InodeKind::ExtendedFile => {
                let file: ExtendedFile = body(reader, 40)?;
                let count = block_count(
                    superblock.block_size(),
                    superblock.block_log(),
                    file.frag_index,
                    file.file_size,
                );
                let block_sizes = Self::read_block_sizes(reader, 40, count)?;
                InodeBody::ExtendedFile { file, block_sizes }
            }
            InodeKind::BasicSymlink => {
                let target_size = Self::peek_symlink_target_size(reader)?;
                InodeBody::BasicSymlink(body(reader, 8 + target_size)?)
            }
            InodeKind::ExtendedSymlink => {
                let target_size = Self::peek_symlink_target_size(reader)?;
                InodeBody::ExtendedSymlink(body(reader, 8 + target_size + 4)?)
            }
            InodeKind::BasicBlockDevice | InodeKind::BasicCharacterDevice => {
                InodeBody::BasicDevice(body(reader, 8)?)
            }
            InodeKind::ExtendedBlockDevice | InodeKind::ExtendedCharacterDevice => {
                InodeBody::ExtendedDevice(body(reader, 12)?)
            }
            InodeKind::BasicFifo | InodeKind::BasicSocket => InodeBody::BasicIpc(body(reader, 4)?),
            InodeKind::ExtendedFifo | InodeKind::ExtendedSocket => {
                InodeBody::ExtendedIpc(body(reader, 8)?)
            }
        })
    }

    /// Read `target_size` without committing to the full tail yet.
    fn peek_symlink_target_size(
        reader: &mut crate::metablock::MetablockReader<'_>,
    ) -> Result<usize, ForehandError> {
        reader.advance(0, HEADER_SIZE + 8)?;
        let data = reader.data();
        let target_size = u32::from_le_bytes([
            data[HEADER_SIZE + 4],
            data[HEADER_SIZE + 5],
            data[HEADER_SIZE + 6],
            data[HEADER_SIZE + 7],
        ]);
        Ok(target_size as usize)
    }

    fn read_block_sizes(
        reader: &mut crate::metablock::MetablockReader<'_>,
        fixed_size: usize,
        count: u64,
    ) -> Result<Vec<DataSize>, ForehandError> {
        let count = usize::try_from(count).map_err(|_| ForehandError::IntegerOverflow)?;
        let bytes = count
            .checked_mul(4)
            .ok_or(ForehandError::IntegerOverflow)?;
        reader.advance(0, HEADER_SIZE + fixed_size + bytes)?;
        let data = &reader.data()[HEADER_SIZE + fixed_size..];
        Ok(data
            .chunks_exact(4)
            .take(count)
            .map(|c| DataSize::new(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect())
    }

    fn read_dir_index(
        reader: &mut crate::metablock::MetablockReader<'_>,
        index_count: u16,
    ) -> Result<Vec<DirIndex>, ForehandError> {
        let mut index = Vec::with_capacity(usize::from(index_count));
        let mut consumed = ExtendedDirectory::SIZE;
        for _ in 0..index_count {
            // fixed part first to learn the name size
            reader.advance(0, HEADER_SIZE + consumed + 12)?;
            let data = reader.data();
            let at = HEADER_SIZE + consumed + 8;
            let name_size =
                u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]) as usize;

            let entry_size = 12 + name_size + 1;
            reader.advance(0, HEADER_SIZE + consumed + entry_size)?;
            let (_, entry) =
                DirIndex::from_bytes((&reader.data()[HEADER_SIZE + consumed..], 0))?;
            index.push(entry);
            consumed += entry_size;
        }
        Ok(index)
    }

    pub(crate) fn archive(&self) -> &'a Archive {
        self.archive
    }

    pub fn inode_ref(&self) -> InodeRef {
        self.inode_ref
    }

    pub fn kind(&self) -> InodeKind {
        self.kind
    }

    pub fn header(&self) -> &InodeHeader {
        &self.header
    }

    pub fn inode_number(&self) -> u32 {
        self.header.inode_number
    }

    pub fn body(&self) -> &InodeBody {
        &self.body
    }

    /// Owner uid, resolved through the id table.
    pub fn uid(&self) -> Result<u32, ForehandError> {
        self.archive.id(self.header.uid)
    }

    /// Owner gid, resolved through the id table.
    pub fn gid(&self) -> Result<u32, ForehandError> {
        self.archive.id(self.header.gid)
    }

    /// Payload size: file bytes, symlink target length, directory
    /// listing size. Zero for device and ipc nodes.
    pub fn file_size(&self) -> u64 {
        match &self.body {
            InodeBody::BasicDirectory(dir) => u64::from(dir.file_size),
            InodeBody::ExtendedDirectory { dir, .. } => u64::from(dir.file_size),
            InodeBody::BasicFile { file, .. } => u64::from(file.file_size),
            InodeBody::ExtendedFile { file, .. } => file.file_size,
            InodeBody::BasicSymlink(link) => u64::from(link.target_size),
            InodeBody::ExtendedSymlink(link) => u64::from(link.target_size),
            _ => 0,
        }
    }

    pub fn hard_link_count(&self) -> u32 {
        match &self.body {
            InodeBody::BasicDirectory(dir) => dir.link_count,
            InodeBody::ExtendedDirectory { dir, .. } => dir.link_count,
            InodeBody::BasicFile { .. } => 1,
            InodeBody::ExtendedFile { file, .. } => file.link_count,
            InodeBody::BasicSymlink(link) => link.link_count,
            InodeBody::ExtendedSymlink(link) => link.link_count,
            InodeBody::BasicDevice(dev) => dev.link_count,
            InodeBody::ExtendedDevice(dev) => dev.link_count,
            InodeBody::BasicIpc(ipc) => ipc.link_count,
            InodeBody::ExtendedIpc(ipc) => ipc.link_count,
        }
    }

    /// Archive address of the first data block; `u64::MAX` for
    /// non-files.
    pub fn blocks_start(&self) -> u64 {
        match &self.body {
            InodeBody::BasicFile { file, .. } => u64::from(file.blocks_start),
            InodeBody::ExtendedFile { file, .. } => file.blocks_start,
            _ => u64::MAX,
        }
    }

    /// Fragment table index; [`NO_FRAGMENT`] when absent or not a file.
    pub fn fragment_block_index(&self) -> u32 {
        match &self.body {
            InodeBody::BasicFile { file, .. } => file.frag_index,
            InodeBody::ExtendedFile { file, .. } => file.frag_index,
            _ => NO_FRAGMENT,
        }
    }

    /// Byte offset of this file's tail inside its fragment block;
    /// `u32::MAX` for non-files.
    pub fn fragment_block_offset(&self) -> u32 {
        match &self.body {
            InodeBody::BasicFile { file, .. } => file.block_offset,
            InodeBody::ExtendedFile { file, .. } => file.block_offset,
            _ => u32::MAX,
        }
    }

    pub fn block_sizes(&self) -> &[DataSize] {
        match &self.body {
            InodeBody::BasicFile { block_sizes, .. } => block_sizes,
            InodeBody::ExtendedFile { block_sizes, .. } => block_sizes,
            _ => &[],
        }
    }

    pub fn block_size_info(&self, index: usize) -> Option<DataSize> {
        self.block_sizes().get(index).copied()
    }

    pub fn symlink_target(&self) -> Option<&[u8]> {
        match &self.body {
            InodeBody::BasicSymlink(link) => Some(&link.target_path),
            InodeBody::ExtendedSymlink(link) => Some(&link.target_path),
            _ => None,
        }
    }

    /// Device id; `u32::MAX` for non-device nodes.
    pub fn device_number(&self) -> u32 {
        match &self.body {
            InodeBody::BasicDevice(dev) => dev.device_number,
            InodeBody::ExtendedDevice(dev) => dev.device_number,
            _ => u32::MAX,
        }
    }

    /// Index into the xattr id table; [`NO_XATTR`] when absent.
    pub fn xattr_index(&self) -> u32 {
        match &self.body {
            InodeBody::ExtendedDirectory { dir, .. } => dir.xattr_index,
            InodeBody::ExtendedFile { file, .. } => file.xattr_index,
            InodeBody::ExtendedSymlink(link) => link.xattr_index,
            InodeBody::ExtendedDevice(dev) => dev.xattr_index,
            InodeBody::ExtendedIpc(ipc) => ipc.xattr_index,
            _ => NO_XATTR,
        }
    }

    /// Metablock start of the directory listing, relative to the
    /// directory table; `u32::MAX` for non-directories.
    pub(crate) fn dir_block_start(&self) -> u32 {
        match &self.body {
            InodeBody::BasicDirectory(dir) => dir.block_index,
            InodeBody::ExtendedDirectory { dir, .. } => dir.block_index,
            _ => u32::MAX,
        }
    }

    pub(crate) fn dir_block_offset(&self) -> u16 {
        match &self.body {
            InodeBody::BasicDirectory(dir) => dir.block_offset,
            InodeBody::ExtendedDirectory { dir, .. } => dir.block_offset,
            _ => u16::MAX,
        }
    }

    pub fn parent_inode(&self) -> u32 {
        match &self.body {
            InodeBody::BasicDirectory(dir) => dir.parent_inode,
            InodeBody::ExtendedDirectory { dir, .. } => dir.parent_inode,
            _ => u32::MAX,
        }
    }

    /// Directory index records of an extended directory.
    pub(crate) fn dir_index(&self) -> &[DirIndex] {
        match &self.body {
            InodeBody::ExtendedDirectory { index, .. } => index,
            _ => &[],
        }
    }
}
