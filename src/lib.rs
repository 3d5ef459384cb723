//! Read-only random access to [SquashFS](https://en.wikipedia.org/wiki/SquashFS)
//! 4.0 file systems.
//!
//! An [`Archive`] is opened over a byte [`Source`] (memory, a file, or
//! a custom [`SourceMapper`]) and hands out typed views: directory
//! iterators, file readers, xattr iterators, and a tree walker. The
//! archive is never mutated; every result is either a slice of mapped
//! input or an owned decompressed buffer, shared through internal
//! caches.
//!
//! ### Example
//! ```rust,no_run
//! # use std::io::Read;
//! # use forehand::{Archive, Config};
//! let archive = Archive::new(std::fs::read("image.squashfs").unwrap(), Config::default()).unwrap();
//!
//! // list the root
//! let root = archive.root().unwrap();
//! let mut dir = root.dir().unwrap();
//! while let Some(entry) = dir.next().unwrap() {
//!     println!("{}", entry.name_str().unwrap());
//! }
//!
//! // read a file through a path, following symlinks
//! let inode = archive.open("/etc/hostname").unwrap();
//! let contents = inode.read_to_vec().unwrap();
//! # let _ = contents;
//! ```

mod archive;
mod compressor;
mod config;
mod data;
mod dir;
mod error;
mod extract;
mod file;
mod fragment;
mod inode;
mod lzo;
mod map;
mod mapper;
mod metablock;
mod path;
mod reader;
mod superblock;
mod table;
mod tree;
mod xattr;

pub use crate::archive::Archive;
pub use crate::compressor::{CompressionOptions, Compressor, Gzip, Lz4, Lzo, Xz, Zstd};
pub use crate::config::Config;
pub use crate::data::DataSize;
pub use crate::dir::{DirEntry, DirIndex, DirIterator};
pub use crate::error::ForehandError;
pub use crate::file::{FileIterator, FileReader};
pub use crate::fragment::Fragment;
pub use crate::inode::{
    BasicDevice, BasicDirectory, BasicFile, BasicIpc, BasicSymlink, ExtendedDevice,
    ExtendedDirectory, ExtendedFile, ExtendedIpc, ExtendedSymlink, Inode, InodeBody, InodeHeader,
    InodeKind, InodeRef, NO_FRAGMENT, NO_XATTR,
};
pub use crate::mapper::{MappedBlock, MemoryMapper, Source, SourceMapper};
pub use crate::metablock::METABLOCK_SIZE;
pub use crate::path::PathResolver;
pub use crate::superblock::{Superblock, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, SUPERBLOCK_SIZE};
pub use crate::tree::{TreeWalker, WalkEvent};
pub use crate::xattr::{XattrEntry, XattrIterator, XattrKind};

#[cfg(unix)]
pub use crate::mapper::FileMapper;
