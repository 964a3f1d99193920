// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Inodes: file content and metadata, independent of any name

use crate::error::{FsError, FsResult};
use crate::events::Listeners;
use crate::links::Directory;
use crate::types::current_timestamp;
use crate::{FileKind, FileTimes, InodeId, Stat};

/// Smallest buffer allocated for file content
pub(crate) const MIN_CAPACITY: usize = 64;

const BLOCK_SIZE: u32 = 4096;

/// Node payload
#[derive(Debug)]
pub(crate) enum InodeKind {
    File,
    Directory(Directory),
    Symlink { target: String },
}

/// In-memory inode
///
/// `buf.len()` is the allocated capacity; only `buf[..size]` is content.
/// Bytes between `size` and capacity may be stale after a shrinking
/// truncate and are zeroed before the size grows over them again.
#[derive(Debug)]
pub struct Inode {
    pub(crate) id: InodeId,
    pub(crate) kind: InodeKind,
    pub(crate) mode: u32,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    pub(crate) times: FileTimes,
    pub(crate) nlink: u32,
    pub(crate) listeners: Listeners,
    buf: Vec<u8>,
    size: usize,
}

impl Inode {
    pub(crate) fn new(kind: InodeKind, perm: u32, uid: u32, gid: u32) -> Self {
        let file_kind = match &kind {
            InodeKind::File => FileKind::File,
            InodeKind::Directory(_) => FileKind::Directory,
            InodeKind::Symlink { .. } => FileKind::Symlink,
        };
        Self {
            id: InodeId::next(),
            // a directory links to itself through "."
            nlink: if file_kind == FileKind::Directory { 1 } else { 0 },
            kind,
            mode: file_kind.type_bits() | (perm & 0o7777),
            uid,
            gid,
            times: FileTimes::now(),
            listeners: Listeners::default(),
            buf: Vec::new(),
            size: 0,
        }
    }

    pub fn id(&self) -> InodeId {
        self.id
    }

    pub fn kind(&self) -> FileKind {
        match self.kind {
            InodeKind::File => FileKind::File,
            InodeKind::Directory(_) => FileKind::Directory,
            InodeKind::Symlink { .. } => FileKind::Symlink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, InodeKind::Directory(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, InodeKind::File)
    }

    pub fn symlink_target(&self) -> Option<&str> {
        match &self.kind {
            InodeKind::Symlink { target } => Some(target),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn nlink(&self) -> u32 {
        self.nlink
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Copy `buf[offset..offset + length]` to `position`, growing and zero-filling as needed.
    ///
    /// Returns the number of bytes written, clamped to what the source buffer holds.
    pub fn write(
        &mut self,
        buf: &[u8],
        offset: usize,
        length: usize,
        position: usize,
    ) -> FsResult<usize> {
        let offset = offset.min(buf.len());
        let length = length.min(buf.len() - offset);
        if length == 0 {
            return Ok(0);
        }

        let end = position.checked_add(length).ok_or(FsError::FileTooLarge)?;
        if end > self.buf.len() {
            self.grow(end)?;
        }
        if position > self.size {
            self.buf[self.size..position].fill(0);
        }
        self.buf[position..end].copy_from_slice(&buf[offset..offset + length]);
        self.size = self.size.max(end);
        self.touch_content();
        Ok(length)
    }

    /// Copy up to `length` bytes starting at `position` into `buf[offset..]`.
    ///
    /// Never reads beyond `size`, whatever the capacity.
    pub fn read(&self, buf: &mut [u8], offset: usize, length: usize, position: usize) -> usize {
        if position >= self.size {
            return 0;
        }
        let offset = offset.min(buf.len());
        let count = length.min(self.size - position).min(buf.len() - offset);
        buf[offset..offset + count].copy_from_slice(&self.buf[position..position + count]);
        count
    }

    /// Resize the logical content, zero-filling any growth
    pub fn truncate(&mut self, len: usize) -> FsResult<()> {
        if len > self.buf.len() {
            self.grow(len)?;
        }
        if len > self.size {
            self.buf[self.size..len].fill(0);
        }
        self.size = len;
        self.touch_content();
        Ok(())
    }

    /// Defensive copy of the used region
    pub fn contents(&self) -> Vec<u8> {
        self.buf[..self.size].to_vec()
    }

    /// Replace the whole content
    pub fn set_contents(&mut self, data: &[u8]) -> FsResult<()> {
        if data.len() > self.buf.len() {
            self.grow(data.len())?;
        }
        self.size = 0;
        if data.is_empty() {
            self.touch_content();
        } else {
            self.write(data, 0, data.len(), 0)?;
        }
        Ok(())
    }

    /// Reallocation failure is reported instead of aborting
    fn grow(&mut self, min_len: usize) -> FsResult<()> {
        let mut capacity = self.buf.len().max(MIN_CAPACITY);
        while capacity < min_len {
            capacity = capacity.checked_mul(2).unwrap_or(min_len);
        }
        self.buf
            .try_reserve_exact(capacity - self.buf.len())
            .map_err(|_| FsError::NoSpace)?;
        self.buf.resize(capacity, 0);
        Ok(())
    }

    pub fn can_read(&self, uid: u32, gid: u32) -> bool {
        self.permission_bits(uid, gid) & 0o4 != 0
    }

    pub fn can_write(&self, uid: u32, gid: u32) -> bool {
        self.permission_bits(uid, gid) & 0o2 != 0
    }

    pub fn can_execute(&self, uid: u32, gid: u32) -> bool {
        self.permission_bits(uid, gid) & 0o1 != 0
    }

    /// rwx bits of the first matching category: owner, then group, then other
    fn permission_bits(&self, uid: u32, gid: u32) -> u32 {
        if uid == self.uid {
            (self.mode >> 6) & 0o7
        } else if gid == self.gid {
            (self.mode >> 3) & 0o7
        } else {
            self.mode & 0o7
        }
    }

    pub(crate) fn chmod(&mut self, perm: u32) {
        self.mode = (self.mode & libc::S_IFMT as u32) | (perm & 0o7777);
        self.touch_metadata();
    }

    pub(crate) fn chown(&mut self, uid: u32, gid: u32) {
        self.uid = uid;
        self.gid = gid;
        // ownership changes drop setuid/setgid
        self.mode &= !0o6000;
        self.touch_metadata();
    }

    pub(crate) fn set_times(&mut self, atime: i64, mtime: i64) {
        self.times.atime = atime;
        self.times.mtime = mtime;
        self.touch_metadata();
    }

    pub(crate) fn touch_content(&mut self) {
        let now = current_timestamp();
        self.times.mtime = now;
        self.times.ctime = now;
    }

    pub(crate) fn touch_metadata(&mut self) {
        self.times.ctime = current_timestamp();
    }

    pub(crate) fn touch_accessed(&mut self) {
        self.times.atime = current_timestamp();
    }

    pub fn stat(&self) -> Stat {
        let size = match &self.kind {
            InodeKind::File => self.size as u64,
            InodeKind::Directory(dir) => dir.len() as u64,
            InodeKind::Symlink { target } => target.len() as u64,
        };
        Stat {
            ino: self.id,
            mode: self.mode,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            size,
            blksize: BLOCK_SIZE,
            blocks: size.div_ceil(512),
            atime: self.times.atime,
            mtime: self.times.mtime,
            ctime: self.times.ctime,
            birthtime: self.times.birthtime,
        }
    }
}
