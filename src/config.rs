//! Archive configuration

/// 128KiB, granularity of the map cache before the superblock is known
pub const DEFAULT_MAPPER_BLOCK_SIZE: usize = 0x20000;

/// Options recognized when opening an [`Archive`](crate::Archive).
///
/// The byte source and its size travel separately as a
/// [`Source`](crate::Source); everything else lives here.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes to skip at the start of the source before the superblock.
    pub archive_offset: u64,
    /// Block granularity of the map cache.
    pub mapper_block_size: usize,
    /// How many recently released map blocks stay pinned.
    pub mapper_lru_size: usize,
    /// How many decompressed blocks stay pinned per extract cache.
    pub compression_lru_size: usize,
    /// Symlink-follow cap in the path resolver.
    pub max_symlink_depth: usize,
    /// Depth cap for tree traversal.
    pub max_tree_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            archive_offset: 0,
            mapper_block_size: DEFAULT_MAPPER_BLOCK_SIZE,
            mapper_lru_size: 32,
            compression_lru_size: 16,
            max_symlink_depth: 100,
            max_tree_depth: 1024,
        }
    }
}
