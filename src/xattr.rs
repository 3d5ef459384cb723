//! Extended attributes
//!
//! Xattrs are stored as key/value runs inside their own metablock
//! area. The per-inode lookup record `(xattr_ref, count, size)` is
//! found through the xattr id table; values marked indirect hold an
//! 8-byte metablock reference into the value area instead of inline
//! bytes, chased through a second metablock reader.

use deku::prelude::*;
use tracing::trace;

use crate::archive::Archive;
use crate::error::ForehandError;
use crate::inode::{Inode, InodeRef, NO_XATTR};
use crate::map::MapReader;
use crate::metablock::MetablockReader;
use crate::table::{Table, TableEntry};

/// High bit of the key type marks an out-of-line value
const XATTR_INDIRECT: u16 = 0x0100;

const KEY_HEADER_SIZE: usize = 4;
const VALUE_HEADER_SIZE: usize = 4;

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
struct XattrIdTableHeader {
    /// Archive address of the key/value metablock area.
    xattr_table_start: u64,
    xattr_ids: u32,
    unused: u32,
}

/// Per-inode lookup record
#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
pub(crate) struct XattrId {
    xattr_ref: u64,
    count: u32,
    size: u32,
}

impl TableEntry for XattrId {
    const SIZE: usize = 16;

    fn parse(bytes: &[u8]) -> Result<Self, ForehandError> {
        Ok(XattrId::from_bytes((bytes, 0))?.1)
    }
}

pub(crate) struct XattrTable {
    /// Start of the key/value area; all xattr references are relative
    /// to it.
    value_start: u64,
    lookup: Table<XattrId>,
}

impl XattrTable {
    pub fn new(archive: &Archive) -> Result<Self, ForehandError> {
        let start = archive.superblock().xattr_table_start();
        let mut reader = MapReader::new(
            archive.map_manager(),
            start,
            archive.superblock().bytes_used(),
        );
        let bytes = reader.load_all(16)?;
        let (_, header) = XattrIdTableHeader::from_bytes((&bytes, 0))?;
        trace!(?header, "xattr id table");

        let lookup = Table::new(archive, start + 16, header.xattr_ids)?;
        Ok(Self { value_start: header.xattr_table_start, lookup })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XattrKind {
    User,
    Trusted,
    Security,
}

impl XattrKind {
    fn from_type(key_type: u16) -> Result<Self, ForehandError> {
        match key_type & !XATTR_INDIRECT {
            0 => Ok(XattrKind::User),
            1 => Ok(XattrKind::Trusted),
            2 => Ok(XattrKind::Security),
            // placeholder like the original: unknown namespaces exist
            // only in corrupt archives
            _ => Err(ForehandError::Todo),
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            XattrKind::User => "user.",
            XattrKind::Trusted => "trusted.",
            XattrKind::Security => "security.",
        }
    }
}

/// One decoded xattr
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XattrEntry {
    kind: XattrKind,
    name: Vec<u8>,
    value: Vec<u8>,
    indirect: bool,
}

impl XattrEntry {
    pub fn kind(&self) -> XattrKind {
        self.kind
    }

    /// Name without the namespace prefix.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// `prefix.name`, the form userspace tools show.
    pub fn full_name(&self) -> Vec<u8> {
        let prefix = self.kind.prefix().as_bytes();
        let mut out = Vec::with_capacity(prefix.len() + self.name.len());
        out.extend_from_slice(prefix);
        out.extend_from_slice(&self.name);
        out
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Whether the value was stored out of line.
    pub fn is_indirect(&self) -> bool {
        self.indirect
    }
}

pub struct XattrIterator<'a> {
    archive: &'a Archive,
    /// Reader over the key area; `None` for inodes without xattrs.
    reader: Option<MetablockReader<'a>>,
    /// Start of the key/value area, base for indirect references.
    value_start: u64,
    remaining: u32,
    consumed: usize,
}

impl<'a> XattrIterator<'a> {
    fn empty(archive: &'a Archive) -> Self {
        Self { archive, reader: None, value_start: 0, remaining: 0, consumed: 0 }
    }

    fn new(archive: &'a Archive, xattr_index: u32) -> Result<Self, ForehandError> {
        let table = archive.xattr_table()?;
        let id = table.lookup.get(archive, xattr_index)?;
        trace!(?id, "xattr lookup record");

        let xattr_ref = InodeRef(id.xattr_ref);
        let start = table
            .value_start
            .checked_add(xattr_ref.outer_offset())
            .ok_or(ForehandError::IntegerOverflow)?;
        let mut reader = archive.metablock_reader(start)?;
        reader.advance(usize::from(xattr_ref.inner_offset()), 0)?;
        Ok(Self {
            archive,
            reader: Some(reader),
            value_start: table.value_start,
            remaining: id.count,
            consumed: 0,
        })
    }

    /// Chase an indirect value through the value area.
    fn load_indirect(&self, reference: InodeRef) -> Result<Vec<u8>, ForehandError> {
        let start = self
            .value_start
            .checked_add(reference.outer_offset())
            .ok_or(ForehandError::IntegerOverflow)?;
        let mut reader = self.archive.metablock_reader(start)?;
        reader.advance(usize::from(reference.inner_offset()), VALUE_HEADER_SIZE)?;
        let data = reader.data();
        let value_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

        reader.advance(0, VALUE_HEADER_SIZE + value_size)?;
        Ok(reader.data()[VALUE_HEADER_SIZE..].to_vec())
    }

    /// Decode the next xattr, or `None` when the inode has no more.
    pub fn next(&mut self) -> Result<Option<XattrEntry>, ForehandError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let consumed = self.consumed;
        let (kind, name, inline, indirect) = {
            let reader = self.reader.as_mut().ok_or(ForehandError::Internal)?;

            // key header
            reader.advance(consumed, KEY_HEADER_SIZE)?;
            let data = reader.data();
            let key_type = u16::from_le_bytes([data[0], data[1]]);
            let name_size = usize::from(u16::from_le_bytes([data[2], data[3]]));
            let kind = XattrKind::from_type(key_type)?;
            let indirect = key_type & XATTR_INDIRECT != 0;

            // name, then value header
            let mut size = KEY_HEADER_SIZE + name_size + VALUE_HEADER_SIZE;
            reader.advance(0, size)?;
            let data = reader.data();
            let name = data[KEY_HEADER_SIZE..KEY_HEADER_SIZE + name_size].to_vec();
            let at = KEY_HEADER_SIZE + name_size;
            let value_size =
                u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]) as usize;

            // inline value bytes
            size += value_size;
            reader.advance(0, size)?;
            self.consumed = size;
            self.remaining -= 1;

            let inline = reader.data()[at + VALUE_HEADER_SIZE..].to_vec();
            (kind, name, inline, indirect)
        };

        let value = if indirect {
            if inline.len() != 8 {
                return Err(ForehandError::SizeMismatch);
            }
            let reference = InodeRef(u64::from_le_bytes(
                inline[..8].try_into().map_err(|_| ForehandError::Internal)?,
            ));
            self.load_indirect(reference)?
        } else {
            inline
        };

        Ok(Some(XattrEntry { kind, name, value, indirect }))
    }

    /// Find an xattr by its prefixed name, e.g. `user.foo`.
    pub fn lookup(&mut self, full_name: &[u8]) -> Result<Option<XattrEntry>, ForehandError> {
        while let Some(entry) = self.next()? {
            if entry.full_name() == full_name {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

impl<'a> Inode<'a> {
    /// Iterate this inode's extended attributes.
    pub fn xattrs(&self) -> Result<XattrIterator<'a>, ForehandError> {
        let index = self.xattr_index();
        if index == NO_XATTR {
            return Ok(XattrIterator::empty(self.archive()));
        }
        XattrIterator::new(self.archive(), index)
    }
}
