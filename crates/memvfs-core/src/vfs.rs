// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! FsCore: POSIX-style operations over the in-memory inode graph

use std::io::SeekFrom;
use std::sync::{Arc, Mutex};

use libc::{R_OK, W_OK, X_OK};
use tracing::{debug, trace};

use crate::config::FsConfig;
use crate::descriptor::DescriptorTable;
use crate::error::{FsError, FsResult};
use crate::events::{ChangeKind, ChangeListener, PendingNotifications, Watch};
use crate::fault::{FaultInjector, FaultOp};
use crate::inode::{Inode, InodeKind};
use crate::links::{Directory, InodeTable, NewDirAttrs};
use crate::lock::LockManager;
use crate::resolver::{
    join_components, parse_path, validate_name, ParentLookup, Resolver, TrailingLink,
};
use crate::{DirEntry, Fd, FsStats, InodeId, OpenOptions, Stat};

/// Everything guarded by the state mutex
struct FsState {
    inodes: InodeTable,
    fds: DescriptorTable,
    pending: PendingNotifications,
    track_events: bool,
}

impl FsState {
    fn notify(&mut self, id: InodeId, kind: ChangeKind) {
        if !self.track_events {
            return;
        }
        if let Ok(inode) = self.inodes.get(id) {
            self.pending.push_all(&inode.listeners, id, kind);
        }
    }

    /// Drop an inode once no name and no descriptor refers to it
    fn reclaim_if_unused(&mut self, id: InodeId) {
        let unlinked = self.inodes.get(id).map(|inode| inode.nlink() == 0).unwrap_or(false);
        if unlinked && !self.fds.is_open(id) && self.inodes.remove(id).is_some() {
            trace!(inode = %id, "inode reclaimed");
        }
    }

    /// Remove one name, emitting notifications and reclaiming the target
    fn unlink_child(&mut self, parent: InodeId, name: &str) -> FsResult<InodeId> {
        let child = self.inodes.remove_child(parent, name)?;
        let inode = self.inodes.get_mut(child)?;
        if inode.is_dir() {
            // the removed directory loses its "." link too
            inode.nlink = 0;
        }
        let kind = if inode.nlink() == 0 {
            ChangeKind::Deleted
        } else {
            ChangeKind::Modified
        };
        self.notify(child, kind);
        self.notify(parent, ChangeKind::Modified);
        self.reclaim_if_unused(child);
        Ok(child)
    }
}

/// The in-memory filesystem
pub struct FsCore {
    config: FsConfig,
    state: Mutex<FsState>,
    locks: LockManager,
    faults: FaultInjector,
}

impl Default for FsCore {
    fn default() -> Self {
        Self::new(FsConfig::default())
    }
}

impl std::fmt::Debug for FsCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsCore").field("config", &self.config).finish_non_exhaustive()
    }
}

impl FsCore {
    /// Create an empty filesystem whose root belongs to the configured identity
    pub fn new(config: FsConfig) -> Self {
        let security = &config.security;
        let state = FsState {
            inodes: InodeTable::new(0o755, security.uid, security.gid),
            fds: DescriptorTable::new(
                config.limits.descriptor_watermark,
                config.limits.max_open_handles,
            ),
            pending: PendingNotifications::default(),
            track_events: config.track_events,
        };
        debug!(uid = security.uid, gid = security.gid, "filesystem created");
        Self {
            config,
            state: Mutex::new(state),
            locks: LockManager::new(),
            faults: FaultInjector::new(),
        }
    }

    /// Shared handle, as needed by the capability-handle layer
    pub fn new_shared(config: FsConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Run `f` under the state lock, delivering collected notifications after release
    fn with_state<T>(&self, f: impl FnOnce(&mut FsState) -> FsResult<T>) -> FsResult<T> {
        let (result, pending) = {
            let mut state = self.state.lock().map_err(|_| FsError::Lock)?;
            let result = f(&mut *state);
            (result, std::mem::take(&mut state.pending))
        };
        if !pending.is_empty() {
            pending.deliver();
        }
        result
    }

    fn resolver<'a>(&'a self, inodes: &'a InodeTable) -> Resolver<'a> {
        Resolver::new(inodes, &self.config.security, self.config.limits.max_symlink_depth)
    }

    fn require(&self, inode: &Inode, mask: i32) -> FsResult<()> {
        if mask == 0 || self.config.security.permits(inode, mask) {
            Ok(())
        } else {
            Err(FsError::AccessDenied)
        }
    }

    fn require_owner(&self, inode: &Inode) -> FsResult<()> {
        if self.config.security.owns(inode) {
            Ok(())
        } else {
            Err(FsError::NotPermitted)
        }
    }

    /// Convert a requested end offset into an in-memory length within the size limit
    fn check_file_size(&self, end: Option<u64>) -> FsResult<usize> {
        match end {
            Some(end) if end <= self.config.limits.max_file_size => {
                usize::try_from(end).map_err(|_| FsError::FileTooLarge)
            }
            _ => Err(FsError::FileTooLarge),
        }
    }

    fn resolve_id(&self, st: &FsState, path: &str, trailing: TrailingLink) -> FsResult<InodeId> {
        Ok(self.resolver(&st.inodes).resolve(path, trailing)?.id)
    }

    /// Link a new inode of `kind` under the looked-up name
    fn create_node(
        &self,
        st: &mut FsState,
        lookup: &ParentLookup,
        kind: InodeKind,
        perm: u32,
    ) -> FsResult<InodeId> {
        self.require(st.inodes.get(lookup.parent)?, W_OK | X_OK)?;
        self.faults.check(FaultOp::Create)?;
        let security = &self.config.security;
        let id = st.inodes.insert(Inode::new(kind, perm, security.uid, security.gid));
        if let Err(err) = st.inodes.set_child(lookup.parent, &lookup.name, id) {
            st.inodes.remove(id);
            return Err(err);
        }
        st.notify(lookup.parent, ChangeKind::Modified);
        trace!(inode = %id, path = %lookup.child_path(), "node created");
        Ok(id)
    }

    /// Resolve or create the file an `open` refers to
    fn open_inode(
        &self,
        st: &mut FsState,
        path: &str,
        options: &OpenOptions,
        mode: u32,
    ) -> FsResult<(InodeId, String)> {
        let found = self.resolver(&st.inodes).resolve(path, TrailingLink::Follow);
        match found {
            Ok(resolved) => {
                if options.create && options.exclusive {
                    return Err(FsError::AlreadyExists);
                }
                let inode = st.inodes.get(resolved.id)?;
                if inode.is_dir() && (options.write || options.truncate) {
                    return Err(FsError::IsADirectory);
                }
                let mut mask = 0;
                if options.read {
                    mask |= R_OK;
                }
                if options.write {
                    mask |= W_OK;
                }
                self.require(inode, mask)?;
                if options.truncate && options.write && inode.size() > 0 {
                    self.faults.check(FaultOp::Truncate)?;
                    st.inodes.get_mut(resolved.id)?.truncate(0)?;
                    st.notify(resolved.id, ChangeKind::Modified);
                }
                Ok((resolved.id, resolved.path))
            }
            Err(FsError::NotFound) if options.create => {
                let lookup = self.resolver(&st.inodes).resolve_parent(path)?;
                if lookup.child.is_some() {
                    // the name exists but dangles through a symlink
                    return Err(if options.exclusive {
                        FsError::AlreadyExists
                    } else {
                        FsError::NotFound
                    });
                }
                if lookup.trailing_slash {
                    return Err(FsError::IsADirectory);
                }
                let perm = self.config.security.apply_umask(mode);
                let id = self.create_node(st, &lookup, InodeKind::File, perm)?;
                Ok((id, lookup.child_path()))
            }
            Err(err) => Err(err),
        }
    }

    // Descriptor operations

    pub fn open(&self, path: &str, options: &OpenOptions, mode: u32) -> FsResult<Fd> {
        self.with_state(|st| {
            let (inode, canonical) = self.open_inode(st, path, options, mode)?;
            let fd = match st.fds.allocate(inode, options.clone(), mode, canonical) {
                Ok(fd) => fd,
                Err(err) => {
                    st.reclaim_if_unused(inode);
                    return Err(err);
                }
            };
            debug!(%fd, path, inode = %inode, "opened");
            Ok(fd)
        })
    }

    pub fn close(&self, fd: Fd) -> FsResult<()> {
        self.with_state(|st| {
            let file = st.fds.release(fd)?;
            debug!(%fd, path = %file.path, "closed");
            st.reclaim_if_unused(file.inode);
            Ok(())
        })
    }

    /// Read into `buf[offset..]`; without `position` the descriptor's cursor is used and advanced
    pub fn read(
        &self,
        fd: Fd,
        buf: &mut [u8],
        offset: usize,
        length: usize,
        position: Option<u64>,
    ) -> FsResult<usize> {
        self.faults.check(FaultOp::Read)?;
        self.with_state(|st| {
            let file = st.fds.get_mut(fd)?;
            if !file.options.read {
                return Err(FsError::BadFileDescriptor);
            }
            let inode = st.inodes.get_mut(file.inode)?;
            if inode.is_dir() {
                return Err(FsError::IsADirectory);
            }
            let at = position.unwrap_or(file.position);
            let count = inode.read(buf, offset, length, at as usize);
            inode.touch_accessed();
            if position.is_none() {
                file.position = at + count as u64;
            }
            trace!(%fd, at, count, "read");
            Ok(count)
        })
    }

    /// Write from `buf[offset..offset + length]`; append mode always writes at the end
    pub fn write(
        &self,
        fd: Fd,
        buf: &[u8],
        offset: usize,
        length: usize,
        position: Option<u64>,
    ) -> FsResult<usize> {
        self.faults.check(FaultOp::Write)?;
        self.with_state(|st| {
            let file = st.fds.get_mut(fd)?;
            if !file.options.write {
                return Err(FsError::BadFileDescriptor);
            }
            let inode_id = file.inode;
            let inode = st.inodes.get_mut(inode_id)?;
            let at = if file.options.append {
                inode.size() as u64
            } else {
                position.unwrap_or(file.position)
            };
            let wanted = length.min(buf.len().saturating_sub(offset));
            if wanted == 0 {
                return Ok(0);
            }
            self.check_file_size(at.checked_add(wanted as u64))?;
            let count = inode.write(buf, offset, length, at as usize)?;
            if position.is_none() {
                file.position = at + count as u64;
            }
            trace!(%fd, at, count, "write");
            st.notify(inode_id, ChangeKind::Modified);
            Ok(count)
        })
    }

    pub fn seek(&self, fd: Fd, pos: SeekFrom) -> FsResult<u64> {
        self.with_state(|st| {
            let file = st.fds.get_mut(fd)?;
            let size = st.inodes.get(file.inode)?.size() as u64;
            let target = match pos {
                SeekFrom::Start(n) => Some(n),
                SeekFrom::Current(delta) => file.position.checked_add_signed(delta),
                SeekFrom::End(delta) => size.checked_add_signed(delta),
            };
            file.position = target.ok_or(FsError::InvalidArgument)?;
            Ok(file.position)
        })
    }

    pub fn fstat(&self, fd: Fd) -> FsResult<Stat> {
        self.with_state(|st| {
            let file = st.fds.get(fd)?;
            Ok(st.inodes.get(file.inode)?.stat())
        })
    }

    pub fn ftruncate(&self, fd: Fd, len: u64) -> FsResult<()> {
        let len = self.check_file_size(Some(len))?;
        self.faults.check(FaultOp::Truncate)?;
        self.with_state(|st| {
            let file = st.fds.get(fd)?;
            if !file.options.write {
                return Err(FsError::BadFileDescriptor);
            }
            let id = file.inode;
            st.inodes.get_mut(id)?.truncate(len)?;
            st.notify(id, ChangeKind::Modified);
            Ok(())
        })
    }

    // Path queries

    pub fn stat(&self, path: &str) -> FsResult<Stat> {
        self.with_state(|st| {
            let id = self.resolve_id(st, path, TrailingLink::Follow)?;
            Ok(st.inodes.get(id)?.stat())
        })
    }

    /// Like `stat`, but a final symlink is reported itself
    pub fn lstat(&self, path: &str) -> FsResult<Stat> {
        self.with_state(|st| {
            let id = self.resolve_id(st, path, TrailingLink::Preserve)?;
            Ok(st.inodes.get(id)?.stat())
        })
    }

    /// True when `stat` would succeed; only a poisoned state lock is an error
    pub fn exists(&self, path: &str) -> FsResult<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(FsError::Lock) => Err(FsError::Lock),
            Err(_) => Ok(false),
        }
    }

    /// `access(2)`: `mask` is `F_OK` or a combination of `R_OK`, `W_OK`, `X_OK`
    pub fn access(&self, path: &str, mask: i32) -> FsResult<()> {
        self.with_state(|st| {
            let id = self.resolve_id(st, path, TrailingLink::Follow)?;
            self.require(st.inodes.get(id)?, mask & (R_OK | W_OK | X_OK))
        })
    }

    /// Canonical absolute path with every symlink substituted
    pub fn realpath(&self, path: &str) -> FsResult<String> {
        self.with_state(|st| {
            Ok(self.resolver(&st.inodes).resolve(path, TrailingLink::Follow)?.path)
        })
    }

    // Namespace operations

    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        if parse_path(path)?.is_root() {
            return Err(FsError::AlreadyExists);
        }
        self.with_state(|st| {
            let lookup = self.resolver(&st.inodes).resolve_parent(path)?;
            if lookup.child.is_some() {
                return Err(FsError::AlreadyExists);
            }
            let perm = self.config.security.apply_umask(mode);
            let dir = InodeKind::Directory(Directory::with_parent(lookup.parent));
            self.create_node(st, &lookup, dir, perm)?;
            debug!(path = %lookup.child_path(), "directory created");
            Ok(())
        })
    }

    /// Create `path` and any missing ancestors; an existing directory is fine
    pub fn mkdir_all(&self, path: &str, mode: u32) -> FsResult<()> {
        let parsed = parse_path(path)?;
        self.with_state(|st| {
            // deepest existing prefix
            let mut base = None;
            for depth in (0..=parsed.components.len()).rev() {
                let prefix = join_components(&parsed.components[..depth]);
                let found = self.resolver(&st.inodes).resolve(&prefix, TrailingLink::Follow);
                match found {
                    Ok(resolved) => {
                        base = Some((depth, resolved.id));
                        break;
                    }
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return Err(err),
                }
            }
            let (depth, base) = base.ok_or(FsError::NotFound)?;
            if !st.inodes.get(base)?.is_dir() {
                return Err(if depth == parsed.components.len() {
                    FsError::AlreadyExists
                } else {
                    FsError::NotADirectory
                });
            }

            let steps: Vec<&str> = parsed.components[depth..].iter().map(String::as_str).collect();
            if steps.is_empty() {
                return Ok(());
            }
            for step in &steps {
                validate_name(step)?;
            }
            self.faults.check(FaultOp::Create)?;
            let security = &self.config.security;
            let attrs = NewDirAttrs {
                perm: security.apply_umask(mode),
                uid: security.uid,
                gid: security.gid,
            };
            st.inodes
                .create_path(base, &steps, true, attrs, |dir, creating| {
                    let mask = if creating { W_OK | X_OK } else { X_OK };
                    if security.permits(dir, mask) {
                        Ok(())
                    } else {
                        Err(FsError::AccessDenied)
                    }
                })
                .map_err(FsError::from)?;
            st.notify(base, ChangeKind::Modified);
            debug!(path, created = steps.len(), "directories created");
            Ok(())
        })
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        if parse_path(path)?.is_root() {
            return Err(FsError::Busy);
        }
        self.with_state(|st| {
            let lookup = self.resolver(&st.inodes).resolve_parent(path)?;
            let child = lookup.child.ok_or(FsError::NotFound)?;
            if !st.inodes.dir(child)?.is_empty() {
                return Err(FsError::DirectoryNotEmpty);
            }
            self.require(st.inodes.get(lookup.parent)?, W_OK | X_OK)?;
            st.unlink_child(lookup.parent, &lookup.name)?;
            debug!(path, "directory removed");
            Ok(())
        })
    }

    /// Remove `path` and everything below it; a missing path is not an error
    pub fn remove_all(&self, path: &str) -> FsResult<()> {
        if parse_path(path)?.is_root() {
            return Err(FsError::Busy);
        }
        self.with_state(|st| {
            let found = self.resolver(&st.inodes).resolve_parent(path);
            let lookup = match found {
                Ok(lookup) => lookup,
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(err),
            };
            if lookup.child.is_none() {
                return Ok(());
            }
            self.remove_tree(st, lookup.parent, &lookup.name)?;
            debug!(path, "tree removed");
            Ok(())
        })
    }

    fn remove_tree(&self, st: &mut FsState, parent: InodeId, name: &str) -> FsResult<()> {
        self.require(st.inodes.get(parent)?, W_OK | X_OK)?;
        let child = st.inodes.get_child(parent, name)?.ok_or(FsError::NotFound)?;
        if st.inodes.get(child)?.is_dir() {
            for (entry, _) in st.inodes.dir(child)?.sorted_entries() {
                self.remove_tree(st, child, &entry)?;
            }
        }
        st.unlink_child(parent, name)?;
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        self.with_state(|st| {
            let lookup = self.resolver(&st.inodes).resolve_parent(path)?;
            let child = lookup.child.ok_or(FsError::NotFound)?;
            if st.inodes.get(child)?.is_dir() {
                return Err(FsError::IsADirectory);
            }
            self.require(st.inodes.get(lookup.parent)?, W_OK | X_OK)?;
            st.unlink_child(lookup.parent, &lookup.name)?;
            debug!(path, "unlinked");
            Ok(())
        })
    }

    /// Move a link; content is never copied
    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        if parse_path(from)?.is_root() || parse_path(to)?.is_root() {
            return Err(FsError::Busy);
        }
        self.with_state(|st| {
            let src = self.resolver(&st.inodes).resolve_parent(from)?;
            let dst = self.resolver(&st.inodes).resolve_parent(to)?;
            let moved = src.child.ok_or(FsError::NotFound)?;
            let moved_is_dir = st.inodes.get(moved)?.is_dir();

            if moved_is_dir && st.inodes.is_ancestor(moved, dst.parent) {
                return Err(FsError::InvalidArgument);
            }
            if let Some(existing) = dst.child {
                if existing == moved {
                    return Ok(());
                }
                let existing_is_dir = st.inodes.get(existing)?.is_dir();
                match (moved_is_dir, existing_is_dir) {
                    (false, true) => return Err(FsError::IsADirectory),
                    (true, false) => return Err(FsError::NotADirectory),
                    (true, true) if !st.inodes.dir(existing)?.is_empty() => {
                        return Err(FsError::DirectoryNotEmpty)
                    }
                    _ => {}
                }
            }
            self.require(st.inodes.get(src.parent)?, W_OK | X_OK)?;
            self.require(st.inodes.get(dst.parent)?, W_OK | X_OK)?;

            if dst.child.is_some() {
                st.unlink_child(dst.parent, &dst.name)?;
            }
            st.inodes.remove_child(src.parent, &src.name)?;
            st.inodes.set_child(dst.parent, &dst.name, moved)?;
            st.notify(moved, ChangeKind::Modified);
            st.notify(src.parent, ChangeKind::Modified);
            if dst.parent != src.parent {
                st.notify(dst.parent, ChangeKind::Modified);
            }
            debug!(from, to, "renamed");
            Ok(())
        })
    }

    /// Add a hard link `new_path` to the node at `existing`
    pub fn link(&self, existing: &str, new_path: &str) -> FsResult<()> {
        self.with_state(|st| {
            let target = self.resolve_id(st, existing, TrailingLink::Preserve)?;
            if st.inodes.get(target)?.is_dir() {
                return Err(FsError::NotPermitted);
            }
            let lookup = self.resolver(&st.inodes).resolve_parent(new_path)?;
            if lookup.child.is_some() {
                return Err(FsError::AlreadyExists);
            }
            self.require(st.inodes.get(lookup.parent)?, W_OK | X_OK)?;
            st.inodes.set_child(lookup.parent, &lookup.name, target)?;
            st.notify(target, ChangeKind::Modified);
            st.notify(lookup.parent, ChangeKind::Modified);
            debug!(existing, new_path, "hard link created");
            Ok(())
        })
    }

    pub fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        if target.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        if target.contains('\0') {
            return Err(FsError::InvalidName);
        }
        self.with_state(|st| {
            let lookup = self.resolver(&st.inodes).resolve_parent(path)?;
            if lookup.child.is_some() {
                return Err(FsError::AlreadyExists);
            }
            let link = InodeKind::Symlink {
                target: target.to_string(),
            };
            self.create_node(st, &lookup, link, 0o777)?;
            debug!(target, path, "symlink created");
            Ok(())
        })
    }

    pub fn readlink(&self, path: &str) -> FsResult<String> {
        self.with_state(|st| {
            let id = self.resolve_id(st, path, TrailingLink::Preserve)?;
            st.inodes
                .get(id)?
                .symlink_target()
                .map(str::to_string)
                .ok_or(FsError::InvalidArgument)
        })
    }

    /// Entries of a directory, sorted by name
    pub fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        self.with_state(|st| {
            let id = self.resolve_id(st, path, TrailingLink::Follow)?;
            let dir = st.inodes.dir(id)?;
            self.require(st.inodes.get(id)?, R_OK)?;
            let entries = dir
                .sorted_entries()
                .into_iter()
                .map(|(name, ino)| {
                    Ok(DirEntry {
                        name,
                        kind: st.inodes.get(ino)?.kind(),
                        ino,
                    })
                })
                .collect::<FsResult<Vec<_>>>()?;
            st.inodes.get_mut(id)?.touch_accessed();
            Ok(entries)
        })
    }

    // Content and metadata operations

    pub fn truncate(&self, path: &str, len: u64) -> FsResult<()> {
        let len = self.check_file_size(Some(len))?;
        self.faults.check(FaultOp::Truncate)?;
        self.with_state(|st| {
            let id = self.resolve_id(st, path, TrailingLink::Follow)?;
            let inode = st.inodes.get(id)?;
            if inode.is_dir() {
                return Err(FsError::IsADirectory);
            }
            self.require(inode, W_OK)?;
            st.inodes.get_mut(id)?.truncate(len)?;
            st.notify(id, ChangeKind::Modified);
            Ok(())
        })
    }

    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.with_state(|st| {
            let id = self.resolve_id(st, path, TrailingLink::Follow)?;
            self.require_owner(st.inodes.get(id)?)?;
            st.inodes.get_mut(id)?.chmod(mode);
            st.notify(id, ChangeKind::Modified);
            Ok(())
        })
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.with_state(|st| {
            let id = self.resolve_id(st, path, TrailingLink::Follow)?;
            self.require_owner(st.inodes.get(id)?)?;
            st.inodes.get_mut(id)?.chown(uid, gid);
            st.notify(id, ChangeKind::Modified);
            Ok(())
        })
    }

    /// Set access and modification times, in milliseconds since the epoch
    pub fn utimes(&self, path: &str, atime: i64, mtime: i64) -> FsResult<()> {
        self.with_state(|st| {
            let id = self.resolve_id(st, path, TrailingLink::Follow)?;
            self.require_owner(st.inodes.get(id)?)?;
            st.inodes.get_mut(id)?.set_times(atime, mtime);
            st.notify(id, ChangeKind::Modified);
            Ok(())
        })
    }

    // Convenience operations

    pub fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        self.faults.check(FaultOp::Read)?;
        self.with_state(|st| {
            let id = self.resolve_id(st, path, TrailingLink::Follow)?;
            let inode = st.inodes.get_mut(id)?;
            if inode.is_dir() {
                return Err(FsError::IsADirectory);
            }
            self.require(inode, R_OK)?;
            inode.touch_accessed();
            Ok(inode.contents())
        })
    }

    /// Replace the content of `path`, creating it with mode 0o666 (before umask) if missing
    pub fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        self.write_file_with_mode(path, data, 0o666)
    }

    fn write_file_with_mode(&self, path: &str, data: &[u8], mode: u32) -> FsResult<()> {
        let options = OpenOptions {
            write: true,
            create: true,
            ..OpenOptions::default()
        };
        self.check_file_size(Some(data.len() as u64))?;
        self.faults.check(FaultOp::Write)?;
        self.with_state(|st| {
            let (id, _) = self.open_inode(st, path, &options, mode)?;
            st.inodes.get_mut(id)?.set_contents(data)?;
            st.notify(id, ChangeKind::Modified);
            trace!(path, len = data.len(), "file written");
            Ok(())
        })
    }

    /// Copy content and permission bits of `from` into `to`
    pub fn copy_file(&self, from: &str, to: &str) -> FsResult<()> {
        let data = self.read_file(from)?;
        let perm = self.stat(from)?.permissions();
        self.write_file_with_mode(to, &data, perm)
    }

    pub fn watch(&self, path: &str, listener: Arc<dyn ChangeListener>) -> FsResult<Watch> {
        self.with_state(|st| {
            let inode = self.resolve_id(st, path, TrailingLink::Follow)?;
            let listener = st.inodes.get_mut(inode)?.listeners.subscribe(listener);
            Ok(Watch { inode, listener })
        })
    }

    /// Returns false when the watch was already gone
    pub fn unwatch(&self, watch: Watch) -> FsResult<bool> {
        self.with_state(|st| match st.inodes.get_mut(watch.inode) {
            Ok(inode) => Ok(inode.listeners.unsubscribe(watch.listener)),
            Err(_) => Ok(false),
        })
    }

    pub fn stats(&self) -> FsResult<FsStats> {
        let held_locks = self.locks.held()?;
        self.with_state(|st| {
            Ok(FsStats {
                inodes: st.inodes.len(),
                open_descriptors: st.fds.len(),
                bytes_in_memory: st.inodes.values().map(|inode| inode.capacity() as u64).sum(),
                held_locks,
            })
        })
    }
}
