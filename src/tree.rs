//! Inorder tree traversal
//!
//! Depth-first walk over the directory tree. Every step reports one
//! event: entering a directory, one of its entries, or leaving it
//! again. The walker keeps the component stack; callers read the
//! current path between steps. Symlinks are reported, never followed,
//! so the walk always terminates; archives deeper than the configured
//! limit yield [`ForehandError::TooDeep`].

use crate::archive::Archive;
use crate::dir::{DirEntry, DirIterator};
use crate::error::ForehandError;
use crate::inode::{Inode, InodeRef};

/// One step of a tree walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEvent {
    /// Entering the directory named by the last path component
    /// (pre-order).
    EnterDirectory,
    /// One directory entry (in-order). Directories show up here and
    /// are entered on the following step.
    Entry(DirEntry),
    /// Leaving a directory (post-order); the walker is back at the
    /// parent.
    LeaveDirectory,
}

struct Level<'a> {
    iterator: DirIterator<'a>,
    name: Vec<u8>,
    inode_ref: InodeRef,
}

pub struct TreeWalker<'a> {
    archive: &'a Archive,
    stack: Vec<Level<'a>>,
    max_depth: usize,
    started: bool,
    /// Directory entry to descend into on the next step.
    descend: Option<(Vec<u8>, InodeRef)>,
}

impl<'a> TreeWalker<'a> {
    pub(crate) fn new(archive: &'a Archive) -> Self {
        Self {
            archive,
            stack: Vec::new(),
            max_depth: archive.config().max_tree_depth,
            started: false,
            descend: None,
        }
    }

    /// Path components of the current position, root first.
    pub fn path_components(&self) -> impl Iterator<Item = &[u8]> {
        self.stack
            .iter()
            .skip(1)
            .map(|level| level.name.as_slice())
    }

    /// Current path as a `/`-joined string, `/` at the root.
    pub fn path(&self) -> String {
        let mut out = String::new();
        for component in self.path_components() {
            out.push('/');
            out.push_str(&String::from_utf8_lossy(component));
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    /// Reference of the directory currently being walked.
    pub fn current_dir_ref(&self) -> Option<InodeRef> {
        self.stack.last().map(|level| level.inode_ref)
    }

    /// Open the directory currently being walked.
    pub fn current_dir(&self) -> Result<Inode<'a>, ForehandError> {
        let inode_ref = self.current_dir_ref().ok_or(ForehandError::NoSuchElement)?;
        Inode::read(self.archive, inode_ref)
    }

    fn push(&mut self, name: Vec<u8>, inode_ref: InodeRef) -> Result<(), ForehandError> {
        if self.stack.len() >= self.max_depth {
            return Err(ForehandError::TooDeep);
        }
        let inode = Inode::read(self.archive, inode_ref)?;
        self.stack.push(Level {
            iterator: inode.dir()?,
            name,
            inode_ref,
        });
        Ok(())
    }

    /// Produce the next event, or `None` when the walk is complete.
    pub fn next(&mut self) -> Result<Option<WalkEvent>, ForehandError> {
        if !self.started {
            self.started = true;
            let root = self.archive.superblock().root_inode_ref();
            self.push(Vec::new(), root)?;
            return Ok(Some(WalkEvent::EnterDirectory));
        }

        if let Some((name, inode_ref)) = self.descend.take() {
            self.push(name, inode_ref)?;
            return Ok(Some(WalkEvent::EnterDirectory));
        }

        let Some(level) = self.stack.last_mut() else {
            return Ok(None);
        };
        match level.iterator.next()? {
            Some(entry) => {
                if entry.file_type().is_directory() {
                    self.descend = Some((entry.name().to_vec(), entry.inode_ref()));
                }
                Ok(Some(WalkEvent::Entry(entry)))
            }
            None => {
                self.stack.pop();
                Ok(Some(WalkEvent::LeaveDirectory))
            }
        }
    }
}

impl Archive {
    /// Walk the whole directory tree depth-first.
    pub fn walk(&self) -> TreeWalker<'_> {
        TreeWalker::new(self)
    }
}
