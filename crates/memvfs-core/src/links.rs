// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Directory link graph: named edges from directories to inodes
//!
//! Inodes live in an arena keyed by [`InodeId`]; directories hold the ids of
//! their children plus a weak index of their own parent for `..`. Link counts
//! are maintained here explicitly, reclamation is the caller's decision.

use std::collections::HashMap;

use crate::error::{FsError, FsResult};
use crate::inode::{Inode, InodeKind};
use crate::InodeId;

/// Child links of a directory inode
#[derive(Debug, Default)]
pub(crate) struct Directory {
    /// Weak upward index; `None` for the root and for detached directories
    pub(crate) parent: Option<InodeId>,
    entries: HashMap<String, InodeId>,
}

impl Directory {
    pub(crate) fn with_parent(parent: InodeId) -> Self {
        Self {
            parent: Some(parent),
            entries: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<InodeId> {
        self.entries.get(name).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by name
    pub(crate) fn sorted_entries(&self) -> Vec<(String, InodeId)> {
        let mut entries: Vec<_> =
            self.entries.iter().map(|(name, id)| (name.clone(), *id)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// Failure of a multi-step walk, carrying the index of the offending step
#[derive(Debug)]
pub(crate) struct StepError {
    pub(crate) index: usize,
    pub(crate) error: FsError,
}

impl From<StepError> for FsError {
    fn from(err: StepError) -> Self {
        err.error
    }
}

/// Ownership and mode applied to directories created by [`InodeTable::create_path`]
#[derive(Clone, Copy, Debug)]
pub(crate) struct NewDirAttrs {
    pub(crate) perm: u32,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
}

/// Arena of inodes forming the namespace tree
#[derive(Debug)]
pub(crate) struct InodeTable {
    inodes: HashMap<InodeId, Inode>,
    root: InodeId,
}

impl InodeTable {
    pub(crate) fn new(root_perm: u32, uid: u32, gid: u32) -> Self {
        let mut root = Inode::new(InodeKind::Directory(Directory::default()), root_perm, uid, gid);
        // the root is its own parent entry
        root.nlink = 2;
        let root_id = root.id;
        let mut inodes = HashMap::new();
        inodes.insert(root_id, root);
        Self {
            inodes,
            root: root_id,
        }
    }

    pub(crate) fn root(&self) -> InodeId {
        self.root
    }

    pub(crate) fn len(&self) -> usize {
        self.inodes.len()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Inode> {
        self.inodes.values()
    }

    pub(crate) fn get(&self, id: InodeId) -> FsResult<&Inode> {
        self.inodes.get(&id).ok_or(FsError::NotFound)
    }

    pub(crate) fn get_mut(&mut self, id: InodeId) -> FsResult<&mut Inode> {
        self.inodes.get_mut(&id).ok_or(FsError::NotFound)
    }

    /// Add an unlinked inode to the arena
    pub(crate) fn insert(&mut self, inode: Inode) -> InodeId {
        let id = inode.id;
        self.inodes.insert(id, inode);
        id
    }

    pub(crate) fn remove(&mut self, id: InodeId) -> Option<Inode> {
        if id == self.root {
            return None;
        }
        self.inodes.remove(&id)
    }

    pub(crate) fn dir(&self, id: InodeId) -> FsResult<&Directory> {
        match &self.get(id)?.kind {
            InodeKind::Directory(dir) => Ok(dir),
            _ => Err(FsError::NotADirectory),
        }
    }

    fn dir_mut(&mut self, id: InodeId) -> FsResult<&mut Directory> {
        match &mut self.get_mut(id)?.kind {
            InodeKind::Directory(dir) => Ok(dir),
            _ => Err(FsError::NotADirectory),
        }
    }

    pub(crate) fn get_child(&self, dir: InodeId, name: &str) -> FsResult<Option<InodeId>> {
        Ok(self.dir(dir)?.get(name))
    }

    /// Link `child` into `dir` under `name`
    pub(crate) fn set_child(&mut self, dir: InodeId, name: &str, child: InodeId) -> FsResult<()> {
        let child_is_dir = self.get(child)?.is_dir();
        let parent = self.dir_mut(dir)?;
        if parent.entries.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        parent.entries.insert(name.to_string(), child);

        let parent_inode = self.get_mut(dir)?;
        if child_is_dir {
            // the child's ".." entry
            parent_inode.nlink = parent_inode.nlink.saturating_add(1);
        }
        parent_inode.touch_content();

        let child_inode = self.get_mut(child)?;
        child_inode.nlink = child_inode.nlink.saturating_add(1);
        child_inode.touch_metadata();
        if let InodeKind::Directory(child_dir) = &mut child_inode.kind {
            child_dir.parent = Some(dir);
        }
        Ok(())
    }

    /// Unlink `name` from `dir`, returning the former child
    pub(crate) fn remove_child(&mut self, dir: InodeId, name: &str) -> FsResult<InodeId> {
        let child = self.dir_mut(dir)?.entries.remove(name).ok_or(FsError::NotFound)?;
        let child_is_dir = self.get(child)?.is_dir();

        let parent_inode = self.get_mut(dir)?;
        if child_is_dir {
            parent_inode.nlink = parent_inode.nlink.saturating_sub(1);
        }
        parent_inode.touch_content();

        let child_inode = self.get_mut(child)?;
        child_inode.nlink = child_inode.nlink.saturating_sub(1);
        child_inode.touch_metadata();
        if let InodeKind::Directory(child_dir) = &mut child_inode.kind {
            child_dir.parent = None;
        }
        Ok(child)
    }

    /// Walk `steps` from `start`, creating missing directories when `create` is set.
    ///
    /// `check` runs against every directory before it is descended into or
    /// written to. A missing step without `create` fails with `NotFound` and the
    /// index of that step.
    pub(crate) fn create_path<F>(
        &mut self,
        start: InodeId,
        steps: &[&str],
        create: bool,
        attrs: NewDirAttrs,
        mut check: F,
    ) -> Result<InodeId, StepError>
    where
        F: FnMut(&Inode, bool) -> FsResult<()>,
    {
        let mut current = start;
        for (index, step) in steps.iter().enumerate() {
            let at = |error: FsError| StepError { index, error };
            let existing = self.get_child(current, step).map_err(at)?;
            check(self.get(current).map_err(at)?, existing.is_none()).map_err(at)?;
            current = match existing {
                Some(child) => {
                    if !self.get(child).map_err(at)?.is_dir() {
                        return Err(at(FsError::NotADirectory));
                    }
                    child
                }
                None if create => {
                    let dir = Inode::new(
                        InodeKind::Directory(Directory::with_parent(current)),
                        attrs.perm,
                        attrs.uid,
                        attrs.gid,
                    );
                    let id = self.insert(dir);
                    self.set_child(current, step, id).map_err(at)?;
                    id
                }
                None => return Err(at(FsError::NotFound)),
            };
        }
        Ok(current)
    }

    /// Whether `ancestor` is `id` or lies above it on the parent chain
    pub(crate) fn is_ancestor(&self, ancestor: InodeId, id: InodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.dir(node).ok().and_then(|dir| dir.parent);
        }
        false
    }
}
