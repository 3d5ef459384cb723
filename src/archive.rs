//! Archive facade
//!
//! [`Archive`] owns the map manager, the validated superblock, the two
//! extract caches, and the lazily constructed lookup tables. Tables
//! are built at most once under the facade mutex ("lock, test,
//! construct, publish, unlock"); the extract caches are created empty
//! at open so no table construction ever re-enters the facade lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{instrument, trace};

use crate::compressor::{CompressionOptions, Compressor};
use crate::config::Config;
use crate::error::{lock_poisoned, ForehandError};
use crate::extract::ExtractManager;
use crate::inode::{Inode, InodeRef};
use crate::map::{MapManager, MapReader};
use crate::mapper::Source;
use crate::metablock::{self, MetablockReader, METABLOCK_SIZE};
use crate::superblock::{Superblock, NO_SEGMENT, SUPERBLOCK_SIZE};
use crate::table::{ExportTable, FragmentTable, IdTable};
use crate::xattr::XattrTable;

#[derive(Default)]
struct LazyTables {
    id: Option<Arc<IdTable>>,
    export: Option<Arc<ExportTable>>,
    fragment: Option<Arc<FragmentTable>>,
    xattr: Option<Arc<XattrTable>>,
    inode_map: Option<Arc<InodeMap>>,
}

/// Handle to one SquashFS archive, usable from many threads
pub struct Archive {
    map: MapManager,
    superblock: Superblock,
    compressor: Compressor,
    compression_options: Option<CompressionOptions>,
    config: Config,
    metablock_extract: Arc<ExtractManager>,
    data_extract: Arc<ExtractManager>,
    tables: Mutex<LazyTables>,
}

impl Archive {
    /// Open an archive over `source`.
    #[instrument(skip_all)]
    pub fn new<S: Into<Source>>(source: S, config: Config) -> Result<Self, ForehandError> {
        let mapper = source.into().into_mapper()?;
        let map = MapManager::new(mapper, &config)?;

        let mut reader = MapReader::new(&map, 0, map.size());
        match reader.advance(0, SUPERBLOCK_SIZE) {
            Ok(()) => {}
            Err(ForehandError::OutOfBounds) => return Err(ForehandError::SuperblockTooSmall),
            Err(e) => return Err(e),
        }
        let superblock = Superblock::parse(reader.data(), map.size())?;
        let compressor = superblock.compressor()?;

        let compression_options =
            Self::read_compression_options(&map, &superblock, compressor)?;

        let metablock_extract = Arc::new(ExtractManager::new(
            compressor,
            METABLOCK_SIZE,
            config.compression_lru_size,
        ));
        let data_extract = Arc::new(ExtractManager::new(
            compressor,
            superblock.block_size() as usize,
            config.compression_lru_size,
        ));

        drop(reader);
        Ok(Self {
            map,
            superblock,
            compressor,
            compression_options,
            config,
            metablock_extract,
            data_extract,
            tables: Mutex::new(LazyTables::default()),
        })
    }

    /// The options metablock directly follows the superblock and is
    /// always stored uncompressed.
    fn read_compression_options(
        map: &MapManager,
        superblock: &Superblock,
        compressor: Compressor,
    ) -> Result<Option<CompressionOptions>, ForehandError> {
        if !superblock.compressor_options_are_present() || compressor == Compressor::None {
            return Ok(None);
        }
        let mut reader = MapReader::new(map, SUPERBLOCK_SIZE as u64, superblock.bytes_used());
        reader.advance(0, 2)?;
        let data = reader.data();
        let header = u16::from_le_bytes([data[0], data[1]]);
        if metablock::is_compressed(header) {
            return Err(ForehandError::CompressionInit);
        }
        let len = metablock::payload_len(header);
        reader.advance(2, len)?;
        let options = CompressionOptions::parse(compressor, reader.data())?;
        trace!(?options, "compression options");
        Ok(Some(options))
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn compressor(&self) -> Compressor {
        self.compressor
    }

    pub fn compression_options(&self) -> Option<&CompressionOptions> {
        self.compression_options.as_ref()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn map_manager(&self) -> &MapManager {
        &self.map
    }

    pub(crate) fn data_extract_manager(&self) -> &Arc<ExtractManager> {
        &self.data_extract
    }

    /// Reader over the metadata stream starting at `start_address`.
    pub(crate) fn metablock_reader(
        &self,
        start_address: u64,
    ) -> Result<MetablockReader<'_>, ForehandError> {
        Ok(MetablockReader::new(
            &self.map,
            self.metablock_extract.clone(),
            start_address,
            self.superblock.bytes_used(),
        ))
    }

    /// Open the root directory.
    pub fn root(&self) -> Result<Inode<'_>, ForehandError> {
        Inode::read(self, self.superblock.root_inode_ref())
    }

    /// Open the inode behind `inode_ref`.
    pub fn inode(&self, inode_ref: InodeRef) -> Result<Inode<'_>, ForehandError> {
        Inode::read(self, inode_ref)
    }

    /// Open an inode by its 1-based number, through the export table
    /// when the archive has one, else through the inode map.
    pub fn inode_by_number(&self, inode_number: u32) -> Result<Inode<'_>, ForehandError> {
        let inode_ref = self.inode_map()?.get(self, inode_number)?;
        Inode::read(self, inode_ref)
    }

    fn lazy<T, F>(&self, select: fn(&mut LazyTables) -> &mut Option<Arc<T>>, build: F) -> Result<Arc<T>, ForehandError>
    where
        F: FnOnce(&Self) -> Result<T, ForehandError>,
    {
        let mut tables = self.tables.lock().map_err(lock_poisoned)?;
        if let Some(existing) = select(&mut tables) {
            return Ok(existing.clone());
        }
        let built = Arc::new(build(self)?);
        *select(&mut tables) = Some(built.clone());
        Ok(built)
    }

    pub(crate) fn id_table(&self) -> Result<Arc<IdTable>, ForehandError> {
        if self.superblock.id_table_start() == NO_SEGMENT {
            return Err(ForehandError::NoSuchElement);
        }
        self.lazy(|t| &mut t.id, IdTable::new)
    }

    /// Resolve an id-table index to a uid/gid.
    pub fn id(&self, index: u16) -> Result<u32, ForehandError> {
        self.id_table()?.get(self, index)
    }

    pub(crate) fn export_table(&self) -> Result<Arc<ExportTable>, ForehandError> {
        if self.superblock.export_table_start() == NO_SEGMENT {
            return Err(ForehandError::NoExportTable);
        }
        self.lazy(|t| &mut t.export, ExportTable::new)
    }

    pub(crate) fn fragment_table(&self) -> Result<Arc<FragmentTable>, ForehandError> {
        if self.superblock.fragment_table_start() == NO_SEGMENT {
            return Err(ForehandError::NoFragmentTable);
        }
        self.lazy(|t| &mut t.fragment, FragmentTable::new)
    }

    pub(crate) fn xattr_table(&self) -> Result<Arc<XattrTable>, ForehandError> {
        if self.superblock.xattr_table_start() == NO_SEGMENT {
            return Err(ForehandError::NoXattrTable);
        }
        self.lazy(|t| &mut t.xattr, XattrTable::new)
    }

    pub(crate) fn inode_map(&self) -> Result<Arc<InodeMap>, ForehandError> {
        self.lazy(|t| &mut t.inode_map, |archive| {
            Ok(InodeMap::new(
                archive.superblock.inode_count(),
                archive.superblock.export_table_start() != NO_SEGMENT,
            ))
        })
    }

    /// Record a `(number, reference)` pair observed while iterating a
    /// directory. Only a contradiction with an earlier record is an
    /// error.
    pub(crate) fn inode_map_note(
        &self,
        inode_number: u32,
        inode_ref: InodeRef,
    ) -> Result<(), ForehandError> {
        match self.inode_map()?.set(inode_number, inode_ref) {
            Ok(()) | Err(ForehandError::OutOfBounds) | Err(ForehandError::InvalidArgument) => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

const EMPTY_INODE_REF: u64 = u64::MAX;

/// Dense inode-number to inode-reference map
///
/// Slots store the complement of the reference so the all-zeroes
/// initial state reads as the `u64::MAX` "empty" sentinel; `0` is a
/// valid reference and must stay representable. Reads are lock-free.
pub(crate) struct InodeMap {
    refs: Vec<AtomicU64>,
    /// Lookups delegate to the export table instead.
    delegate_export: bool,
    count: u32,
}

impl InodeMap {
    fn new(inode_count: u32, delegate_export: bool) -> Self {
        let refs = if delegate_export {
            Vec::new()
        } else {
            (0..inode_count).map(|_| AtomicU64::new(0)).collect()
        };
        Self { refs, delegate_export, count: inode_count }
    }

    pub fn get(&self, archive: &Archive, inode_number: u32) -> Result<InodeRef, ForehandError> {
        if inode_number == 0 || inode_number > self.count {
            return Err(ForehandError::OutOfBounds);
        }
        if self.delegate_export {
            return archive.export_table()?.resolve_inode(archive, inode_number);
        }
        let raw = !self.refs[inode_number as usize - 1].load(Ordering::Acquire);
        if raw == EMPTY_INODE_REF {
            return Err(ForehandError::NoSuchElement);
        }
        Ok(InodeRef(raw))
    }

    /// A slot may be set many times, but only ever to the same value.
    pub fn set(&self, inode_number: u32, inode_ref: InodeRef) -> Result<(), ForehandError> {
        if inode_ref.0 == EMPTY_INODE_REF {
            return Err(ForehandError::InvalidArgument);
        }
        if inode_number == 0 || inode_number > self.count {
            return Err(ForehandError::OutOfBounds);
        }
        if self.delegate_export {
            return Ok(());
        }
        let old = !self.refs[inode_number as usize - 1].swap(!inode_ref.0, Ordering::AcqRel);
        if old != EMPTY_INODE_REF && old != inode_ref.0 {
            return Err(ForehandError::InodeMapInconsistent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_map_complement_encoding() {
        let map = InodeMap::new(4, false);
        // reference 0 is valid and distinguishable from "empty"
        map.set(1, InodeRef(0)).unwrap();
        assert_eq!(map.refs[0].load(Ordering::Relaxed), u64::MAX);

        map.set(2, InodeRef::new(0x40, 0x10)).unwrap();
        assert_eq!(
            !map.refs[1].load(Ordering::Relaxed),
            InodeRef::new(0x40, 0x10).0
        );
    }

    #[test]
    fn inode_map_rejects_contradiction() {
        let map = InodeMap::new(4, false);
        map.set(3, InodeRef(7)).unwrap();
        // same value again is fine
        map.set(3, InodeRef(7)).unwrap();
        assert!(matches!(
            map.set(3, InodeRef(8)),
            Err(ForehandError::InodeMapInconsistent)
        ));
    }

    #[test]
    fn inode_map_bounds() {
        let map = InodeMap::new(2, false);
        assert!(matches!(
            map.set(0, InodeRef(1)),
            Err(ForehandError::OutOfBounds)
        ));
        assert!(matches!(
            map.set(3, InodeRef(1)),
            Err(ForehandError::OutOfBounds)
        ));
        assert!(matches!(
            map.set(1, InodeRef(u64::MAX)),
            Err(ForehandError::InvalidArgument)
        ));
    }
}
