//! Path resolution
//!
//! Walks slash-separated components from the root directory. `""` and
//! `"."` are no-ops, `".."` pops one level and stops at the root.
//! Symlink targets are pushed back onto the pending components in
//! reverse, absolute targets reset the walk to the root, and a depth
//! budget turns symlink cycles into [`ForehandError::TooDeep`] instead
//! of divergence.

use tracing::trace;

use crate::archive::Archive;
use crate::error::ForehandError;
use crate::inode::{Inode, InodeRef};

pub struct PathResolver<'a> {
    archive: &'a Archive,
    /// Directory chain from the root to the current directory.
    stack: Vec<InodeRef>,
    symlink_budget: usize,
}

impl<'a> PathResolver<'a> {
    pub fn new(archive: &'a Archive) -> Self {
        Self {
            archive,
            stack: vec![archive.superblock().root_inode_ref()],
            symlink_budget: archive.config().max_symlink_depth,
        }
    }

    fn current(&self) -> InodeRef {
        *self.stack.last().expect("stack holds at least the root")
    }

    fn to_root(&mut self) {
        self.stack.truncate(1);
    }

    /// Walk `path` from the current directory, following symlinks in
    /// intermediate components; the final component is followed only
    /// when `follow_symlinks` is set.
    pub fn resolve(
        &mut self,
        path: &str,
        follow_symlinks: bool,
    ) -> Result<Inode<'a>, ForehandError> {
        if path.starts_with('/') {
            self.to_root();
        }
        // components are consumed from the back so symlink targets can
        // be pushed in reverse
        let mut pending: Vec<Vec<u8>> = path
            .split('/')
            .rev()
            .map(|c| c.as_bytes().to_vec())
            .collect();

        while let Some(component) = pending.pop() {
            trace!(component = %String::from_utf8_lossy(&component), "resolving");
            match component.as_slice() {
                b"" | b"." => continue,
                b".." => {
                    if self.stack.len() > 1 {
                        self.stack.pop();
                    }
                    continue;
                }
                name => {
                    let dir = Inode::read(self.archive, self.current())?;
                    let entry = dir.lookup(name)?.ok_or(ForehandError::NoSuchFile)?;
                    let inode = Inode::read(self.archive, entry.inode_ref())?;

                    if inode.kind().is_symlink() && (follow_symlinks || !pending.is_empty()) {
                        self.follow_symlink(&inode, &mut pending)?;
                    } else if inode.kind().is_directory() {
                        self.stack.push(entry.inode_ref());
                    } else if !pending.iter().any(|c| !c.is_empty()) {
                        // nothing left to walk but empty components
                        return Ok(inode);
                    } else {
                        return Err(ForehandError::NotADirectory);
                    }
                }
            }
        }
        Inode::read(self.archive, self.current())
    }

    fn follow_symlink(
        &mut self,
        inode: &Inode<'a>,
        pending: &mut Vec<Vec<u8>>,
    ) -> Result<(), ForehandError> {
        if self.symlink_budget == 0 {
            return Err(ForehandError::TooDeep);
        }
        self.symlink_budget -= 1;

        let target = inode
            .symlink_target()
            .ok_or(ForehandError::Internal)?
            .to_vec();
        trace!(target = %String::from_utf8_lossy(&target), "following symlink");
        if target.first() == Some(&b'/') {
            self.to_root();
        }
        for component in target.split(|&b| b == b'/').rev() {
            pending.push(component.to_vec());
        }
        Ok(())
    }
}

impl Archive {
    /// Resolve `path` from the root, following symlinks.
    pub fn open(&self, path: &str) -> Result<Inode<'_>, ForehandError> {
        PathResolver::new(self).resolve(path, true)
    }

    /// Resolve `path` from the root without following a final
    /// symlink component.
    pub fn open_no_follow(&self, path: &str) -> Result<Inode<'_>, ForehandError> {
        PathResolver::new(self).resolve(path, false)
    }
}
