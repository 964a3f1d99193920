// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Open file descriptor table

use std::collections::HashMap;

use crate::error::{FsError, FsResult};
use crate::{Fd, InodeId, OpenOptions};

/// State behind one open descriptor
#[derive(Clone, Debug)]
pub(crate) struct OpenFile {
    pub(crate) inode: InodeId,
    pub(crate) options: OpenOptions,
    /// Mode the file was created with, when `open` created it
    pub(crate) mode: u32,
    pub(crate) position: u64,
    pub(crate) path: String,
}

/// Descriptor allocator owned by one filesystem instance
///
/// Fresh ids count down from a high watermark so they never collide with
/// the host's own small descriptors; released ids are reused LIFO.
#[derive(Debug)]
pub(crate) struct DescriptorTable {
    open: HashMap<Fd, OpenFile>,
    free: Vec<Fd>,
    next: i32,
    limit: usize,
}

impl DescriptorTable {
    pub(crate) fn new(watermark: i32, limit: usize) -> Self {
        Self {
            open: HashMap::new(),
            free: Vec::new(),
            next: watermark,
            limit,
        }
    }

    pub(crate) fn allocate(
        &mut self,
        inode: InodeId,
        options: OpenOptions,
        mode: u32,
        path: String,
    ) -> FsResult<Fd> {
        if self.open.len() >= self.limit {
            return Err(FsError::TooManyOpenFiles);
        }
        let fd = match self.free.pop() {
            Some(fd) => fd,
            None => {
                if self.next < 0 {
                    return Err(FsError::TooManyOpenFiles);
                }
                let fd = Fd(self.next);
                self.next -= 1;
                fd
            }
        };
        self.open.insert(
            fd,
            OpenFile {
                inode,
                options,
                mode,
                position: 0,
                path,
            },
        );
        Ok(fd)
    }

    pub(crate) fn get(&self, fd: Fd) -> FsResult<&OpenFile> {
        self.open.get(&fd).ok_or(FsError::BadFileDescriptor)
    }

    pub(crate) fn get_mut(&mut self, fd: Fd) -> FsResult<&mut OpenFile> {
        self.open.get_mut(&fd).ok_or(FsError::BadFileDescriptor)
    }

    pub(crate) fn release(&mut self, fd: Fd) -> FsResult<OpenFile> {
        let file = self.open.remove(&fd).ok_or(FsError::BadFileDescriptor)?;
        self.free.push(fd);
        Ok(file)
    }

    /// Whether any descriptor still references `inode`
    pub(crate) fn is_open(&self, inode: InodeId) -> bool {
        self.open.values().any(|file| file.inode == inode)
    }

    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }
}
