//! Block-granular cache over the raw source
//!
//! [`MapManager`] presents the archive (past `archive_offset`) as a
//! sequence of fixed-size blocks. Blocks are produced on demand by the
//! configured [`SourceMapper`](crate::mapper::SourceMapper), shared by
//! reference count, and pinned by a small LRU after release so hot
//! blocks survive between readers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::config::Config;
use crate::error::{lock_poisoned, ForehandError};
use crate::mapper::{MappedBlock, SourceMapper};
use crate::reader::{Reader, SpanIterator};

pub(crate) struct MapBlock {
    data: MappedBlock,
}

impl MapBlock {
    fn as_slice(&self) -> &[u8] {
        self.data.as_slice()
    }
}

struct BlockCache {
    blocks: FxHashMap<u64, Weak<MapBlock>>,
    lru: VecDeque<Arc<MapBlock>>,
    lru_size: usize,
    sweep_at: usize,
}

impl BlockCache {
    /// Pin `block` in the LRU, evicting the oldest pin.
    fn touch(&mut self, block: &Arc<MapBlock>) {
        if self.lru_size == 0 {
            return;
        }
        self.lru.push_back(block.clone());
        if self.lru.len() > self.lru_size {
            self.lru.pop_front();
        }
    }

    /// Drop dead weak entries once the map outgrows its last sweep.
    fn sweep(&mut self) {
        if self.blocks.len() < self.sweep_at {
            return;
        }
        self.blocks.retain(|_, weak| weak.strong_count() > 0);
        self.sweep_at = (self.blocks.len() * 2).max(16);
    }
}

pub(crate) struct MapManager {
    mapper: Box<dyn SourceMapper>,
    archive_offset: u64,
    size: u64,
    block_size: usize,
    cache: Mutex<BlockCache>,
}

impl MapManager {
    pub fn new(mapper: Box<dyn SourceMapper>, config: &Config) -> Result<Self, ForehandError> {
        let source_size = mapper.size();
        if config.archive_offset > source_size {
            return Err(ForehandError::MapperInit);
        }
        if config.mapper_block_size == 0 {
            return Err(ForehandError::InvalidArgument);
        }
        Ok(Self {
            mapper,
            archive_offset: config.archive_offset,
            size: source_size - config.archive_offset,
            block_size: config.mapper_block_size,
            cache: Mutex::new(BlockCache {
                blocks: FxHashMap::default(),
                lru: VecDeque::new(),
                lru_size: config.mapper_lru_size,
                sweep_at: 16,
            }),
        })
    }

    /// Archive bytes available past the configured offset.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Fetch block `index`, from cache or the mapper.
    pub fn get(&self, index: u64) -> Result<Arc<MapBlock>, ForehandError> {
        let address = index
            .checked_mul(self.block_size as u64)
            .ok_or(ForehandError::IntegerOverflow)?;
        if address >= self.size {
            return Err(ForehandError::OutOfBounds);
        }

        {
            let mut cache = self.cache.lock().map_err(lock_poisoned)?;
            if let Some(block) = cache.blocks.get(&index).and_then(Weak::upgrade) {
                cache.touch(&block);
                return Ok(block);
            }
        }

        // map outside the lock; a concurrent miss may duplicate the
        // work, the first insert wins
        let len = (self.size - address).min(self.block_size as u64) as usize;
        trace!(index, len, "map block miss");
        let data = self.mapper.map(self.archive_offset + address, len)?;
        let block = Arc::new(MapBlock { data });

        let mut cache = self.cache.lock().map_err(lock_poisoned)?;
        let block = match cache.blocks.get(&index).and_then(Weak::upgrade) {
            Some(existing) => existing,
            None => {
                cache.blocks.insert(index, Arc::downgrade(&block));
                cache.sweep();
                block
            }
        };
        cache.touch(&block);
        Ok(block)
    }
}

/// Span iterator over consecutive map blocks of one address range.
pub(crate) struct MapIterator<'a> {
    manager: &'a MapManager,
    block: Option<Arc<MapBlock>>,
    /// Archive address where the next span begins.
    next_address: u64,
    upper_limit: u64,
    /// Current span, as a range into the current block.
    span_start: usize,
    span_len: usize,
}

impl<'a> MapIterator<'a> {
    fn new(manager: &'a MapManager, start_address: u64, upper_limit: u64) -> Self {
        Self {
            manager,
            block: None,
            next_address: start_address,
            upper_limit: upper_limit.min(manager.size()),
            span_start: 0,
            span_len: 0,
        }
    }
}

impl SpanIterator for MapIterator<'_> {
    fn next_span(&mut self, _desired_size: usize) -> Result<bool, ForehandError> {
        if self.next_address >= self.upper_limit {
            return Ok(false);
        }
        let block_size = self.manager.block_size() as u64;
        let index = self.next_address / block_size;
        let block = self.manager.get(index)?;

        let inner = (self.next_address % block_size) as usize;
        let block_end = (index + 1) * block_size;
        let span_end = self.upper_limit.min(block_end);
        let len = (span_end - self.next_address) as usize;
        if inner + len > block.as_slice().len() {
            return Err(ForehandError::MapperMap);
        }

        self.block = Some(block);
        self.span_start = inner;
        self.span_len = len;
        self.next_address = span_end;
        Ok(true)
    }

    fn span(&self) -> &[u8] {
        match &self.block {
            Some(block) => &block.as_slice()[self.span_start..self.span_start + self.span_len],
            None => &[],
        }
    }
}

/// Reader over an archive address range, bounded by `upper_limit`.
pub(crate) struct MapReader<'a> {
    reader: Reader<MapIterator<'a>>,
    /// Archive address of the current window start.
    position: u64,
}

impl<'a> MapReader<'a> {
    pub fn new(manager: &'a MapManager, start_address: u64, upper_limit: u64) -> Self {
        Self {
            reader: Reader::new(MapIterator::new(manager, start_address, upper_limit)),
            position: start_address,
        }
    }

    pub fn advance(&mut self, offset: usize, size: usize) -> Result<(), ForehandError> {
        self.reader.advance(offset, size)?;
        self.position += offset as u64;
        Ok(())
    }

    pub fn data(&self) -> &[u8] {
        self.reader.data()
    }

    /// Archive address of the current window start.
    pub fn address(&self) -> u64 {
        self.position
    }

    /// Pull a whole range into memory, for the small tables that are
    /// consumed in one piece.
    pub fn load_all(&mut self, size: usize) -> Result<Vec<u8>, ForehandError> {
        self.advance(0, size)?;
        Ok(self.data().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::MemoryMapper;

    fn manager(len: usize, block_size: usize, lru: usize) -> MapManager {
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        let config = Config {
            mapper_block_size: block_size,
            mapper_lru_size: lru,
            ..Config::default()
        };
        MapManager::new(Box::new(MemoryMapper::new(data)), &config).unwrap()
    }

    #[test]
    fn get_clips_the_tail_block() {
        let m = manager(100, 32, 4);
        assert_eq!(m.get(0).unwrap().as_slice().len(), 32);
        assert_eq!(m.get(3).unwrap().as_slice().len(), 4);
    }

    #[test]
    fn get_out_of_bounds() {
        let m = manager(100, 32, 4);
        assert!(matches!(m.get(4), Err(ForehandError::OutOfBounds)));
    }

    #[test]
    fn cached_block_is_shared() {
        let m = manager(100, 32, 4);
        let a = m.get(1).unwrap();
        let b = m.get(1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn released_blocks_survive_via_lru() {
        let m = manager(100, 32, 4);
        let ptr = Arc::as_ptr(&m.get(1).unwrap());
        // caller dropped its handle, the LRU still pins the block
        let again = m.get(1).unwrap();
        assert_eq!(Arc::as_ptr(&again), ptr);
    }

    #[test]
    fn held_blocks_are_never_duplicated() {
        let m = manager(256, 32, 1);
        let first = m.get(0).unwrap();
        // push block 0 out of the single-entry LRU
        m.get(1).unwrap();
        m.get(2).unwrap();
        // the caller still holds a reference, so the cache must
        // hand out the same mapping
        let again = m.get(0).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        drop(first);
        drop(again);
        // fully released and evicted, a fresh mapping still reads right
        assert_eq!(m.get(0).unwrap().as_slice()[3], 3);
    }

    #[test]
    fn map_reader_round_trip() {
        // bytes seen through the reader equal the source for any range
        let m = manager(100, 16, 4);
        for (offset, size) in [(0usize, 10usize), (14, 40), (90, 10), (31, 2)] {
            let mut reader = MapReader::new(&m, 0, m.size());
            reader.advance(offset, size).unwrap();
            let expect: Vec<u8> = (offset..offset + size).map(|i| i as u8).collect();
            assert_eq!(reader.data(), expect, "range {offset}+{size}");
            assert_eq!(reader.address(), offset as u64);
        }
    }

    #[test]
    fn map_reader_respects_upper_limit() {
        let m = manager(100, 16, 4);
        let mut reader = MapReader::new(&m, 10, 20);
        reader.advance(0, 10).unwrap();
        assert_eq!(reader.data()[0], 10);
        assert!(matches!(
            reader.advance(0, 11),
            Err(ForehandError::OutOfBounds)
        ));
    }
}
