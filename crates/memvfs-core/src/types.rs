// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for the in-memory filesystem

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Process-unique inode identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeId(pub u64);

static NEXT_INODE_ID: AtomicU64 = AtomicU64::new(1);

impl InodeId {
    /// Allocate the next id; ids are monotonic across every filesystem in the process
    pub(crate) fn next() -> Self {
        Self(NEXT_INODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for InodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Open file descriptor number
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub i32);

impl std::fmt::Display for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type of a filesystem node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

impl FileKind {
    /// The `S_IFMT` bits for this kind
    pub fn type_bits(self) -> u32 {
        match self {
            FileKind::File => libc::S_IFREG as u32,
            FileKind::Directory => libc::S_IFDIR as u32,
            FileKind::Symlink => libc::S_IFLNK as u32,
        }
    }

    pub fn from_mode(mode: u32) -> Option<Self> {
        let bits = mode & libc::S_IFMT as u32;
        if bits == libc::S_IFREG as u32 {
            Some(FileKind::File)
        } else if bits == libc::S_IFDIR as u32 {
            Some(FileKind::Directory)
        } else if bits == libc::S_IFLNK as u32 {
            Some(FileKind::Symlink)
        } else {
            None
        }
    }
}

/// File timestamps, in milliseconds since the Unix epoch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileTimes {
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub birthtime: i64,
}

impl FileTimes {
    pub(crate) fn now() -> Self {
        let now = current_timestamp();
        Self {
            atime: now,
            mtime: now,
            ctime: now,
            birthtime: now,
        }
    }
}

pub(crate) fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Result of `stat`/`lstat`/`fstat`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    pub ino: InodeId,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blksize: u32,
    pub blocks: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub birthtime: i64,
}

impl Stat {
    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode)
    }

    pub fn is_file(&self) -> bool {
        self.kind() == Some(FileKind::File)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == Some(FileKind::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        self.kind() == Some(FileKind::Symlink)
    }

    /// Permission bits (including setuid/setgid/sticky)
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Directory entry information
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
    pub ino: InodeId,
}

/// File open options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub exclusive: bool,
    pub truncate: bool,
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }

    /// `O_WRONLY | O_CREAT | O_TRUNC`
    pub fn create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    /// Decode POSIX `open(2)` flag bits
    pub fn from_flags(flags: i32) -> Self {
        let (read, write) = match flags & libc::O_ACCMODE {
            libc::O_WRONLY => (false, true),
            libc::O_RDWR => (true, true),
            _ => (true, false),
        };
        Self {
            read,
            write,
            append: flags & libc::O_APPEND != 0,
            create: flags & libc::O_CREAT != 0,
            exclusive: flags & libc::O_EXCL != 0,
            truncate: flags & libc::O_TRUNC != 0,
        }
    }
}

/// Filesystem statistics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsStats {
    pub inodes: usize,
    pub open_descriptors: usize,
    pub bytes_in_memory: u64,
    pub held_locks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_posix_open_flags() {
        let opts = OpenOptions::from_flags(libc::O_RDWR | libc::O_CREAT | libc::O_EXCL);
        assert!(opts.read && opts.write && opts.create && opts.exclusive);
        assert!(!opts.truncate && !opts.append);

        let opts = OpenOptions::from_flags(libc::O_WRONLY | libc::O_APPEND);
        assert!(!opts.read && opts.write && opts.append);

        assert_eq!(OpenOptions::from_flags(libc::O_RDONLY), OpenOptions::read_only());
    }

    #[test]
    fn kind_round_trips_through_mode_bits() {
        for kind in [FileKind::File, FileKind::Directory, FileKind::Symlink] {
            assert_eq!(FileKind::from_mode(kind.type_bits() | 0o644), Some(kind));
        }
        assert_eq!(FileKind::from_mode(0o644), None);
    }

    #[test]
    fn inode_ids_are_monotonic() {
        let a = InodeId::next();
        let b = InodeId::next();
        assert!(b > a);
    }
}
