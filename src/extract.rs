//! Dedup cache of decompressed blocks
//!
//! Compressed metablocks and data blocks are decoded at most once per
//! residency: [`ExtractManager`] keys decompressed output by the
//! compressed byte address, shares it by reference count, and pins
//! recently used buffers in an LRU. The manager lock is never held
//! across a codec call; when two threads race on the same address the
//! first insert wins and the loser's buffer is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::compressor::{self, Compressor};
use crate::error::{lock_poisoned, ForehandError};
use crate::map::MapReader;

/// One decompressed block, shared between views and the cache.
pub(crate) struct ExtractBuffer {
    pub data: Vec<u8>,
}

struct ExtractCache {
    entries: FxHashMap<u64, Weak<ExtractBuffer>>,
    lru: VecDeque<Arc<ExtractBuffer>>,
    lru_size: usize,
    sweep_at: usize,
}

impl ExtractCache {
    fn touch(&mut self, buffer: &Arc<ExtractBuffer>) {
        if self.lru_size == 0 {
            return;
        }
        self.lru.push_back(buffer.clone());
        if self.lru.len() > self.lru_size {
            self.lru.pop_front();
        }
    }

    fn sweep(&mut self) {
        if self.entries.len() < self.sweep_at {
            return;
        }
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        self.sweep_at = (self.entries.len() * 2).max(16);
    }
}

pub(crate) struct ExtractManager {
    compressor: Compressor,
    /// Upper bound on decompressed output, 8 KiB for metablocks or the
    /// archive block size for data blocks.
    target_size: usize,
    cache: Mutex<ExtractCache>,
}

impl ExtractManager {
    pub fn new(compressor: Compressor, target_size: usize, lru_size: usize) -> Self {
        Self {
            compressor,
            target_size,
            cache: Mutex::new(ExtractCache {
                entries: FxHashMap::default(),
                lru: VecDeque::new(),
                lru_size,
                sweep_at: 16,
            }),
        }
    }

    /// Decompress the reader's current window, or return the cached
    /// output for its address.
    pub fn uncompress(&self, reader: &MapReader) -> Result<Arc<ExtractBuffer>, ForehandError> {
        let address = reader.address();

        {
            let mut cache = self.cache.lock().map_err(lock_poisoned)?;
            if let Some(buffer) = cache.entries.get(&address).and_then(Weak::upgrade) {
                trace!(address, "extract hit");
                cache.touch(&buffer);
                return Ok(buffer);
            }
        }

        let mut data = Vec::with_capacity(self.target_size);
        compressor::decompress(reader.data(), &mut data, self.compressor, self.target_size)?;
        let buffer = Arc::new(ExtractBuffer { data });

        let mut cache = self.cache.lock().map_err(lock_poisoned)?;
        let buffer = match cache.entries.get(&address).and_then(Weak::upgrade) {
            // a concurrent caller won the race, keep its buffer
            Some(existing) => existing,
            None => {
                cache.entries.insert(address, Arc::downgrade(&buffer));
                cache.sweep();
                buffer
            }
        };
        cache.touch(&buffer);
        Ok(buffer)
    }
}
