// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Exclusive synchronous read/write access to one file

use std::sync::Arc;

use crate::error::{FsError, FsResult};
use crate::vfs::FsCore;
use crate::{Fd, OpenOptions};

/// Direct, immediately visible I/O on a file while holding its advisory lock
///
/// Mutually exclusive with writable streams and other sync handles on the
/// same file. The lock is released by `close`, or on drop.
#[derive(Debug)]
pub struct SyncAccessHandle {
    fs: Arc<FsCore>,
    path: String,
    fd: Option<Fd>,
    cursor: u64,
}

impl SyncAccessHandle {
    pub(crate) fn open(fs: Arc<FsCore>, path: &str) -> FsResult<Self> {
        let path = fs.realpath(path)?;
        if fs.stat(&path)?.is_dir() {
            return Err(FsError::IsADirectory);
        }
        if !fs.lock_manager().acquire_lock(&path)? {
            tracing::debug!(%path, "sync access refused: entry is locked");
            return Err(FsError::NotModificationAllowed);
        }
        let fd = match fs.open(&path, &OpenOptions::read_write(), 0) {
            Ok(fd) => fd,
            Err(err) => {
                fs.lock_manager().release_lock(&path)?;
                return Err(err);
            }
        };
        tracing::debug!(%path, %fd, "sync access handle opened");
        Ok(Self {
            fs,
            path,
            fd: Some(fd),
            cursor: 0,
        })
    }

    fn fd(&self) -> FsResult<Fd> {
        self.fd.ok_or(FsError::InvalidState)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read at `at`, or at the cursor; the cursor moves past the bytes read
    pub fn read(&mut self, buf: &mut [u8], at: Option<u64>) -> FsResult<usize> {
        let fd = self.fd()?;
        let position = at.unwrap_or(self.cursor);
        let count = self.fs.read(fd, buf, 0, buf.len(), Some(position))?;
        self.cursor = position + count as u64;
        Ok(count)
    }

    /// Write at `at`, or at the cursor; the cursor moves past the bytes written
    pub fn write(&mut self, buf: &[u8], at: Option<u64>) -> FsResult<usize> {
        let fd = self.fd()?;
        let position = at.unwrap_or(self.cursor);
        let count = self.fs.write(fd, buf, 0, buf.len(), Some(position))?;
        self.cursor = position + count as u64;
        Ok(count)
    }

    pub fn truncate(&mut self, size: u64) -> FsResult<()> {
        self.fs.ftruncate(self.fd()?, size)?;
        self.cursor = self.cursor.min(size);
        Ok(())
    }

    pub fn get_size(&self) -> FsResult<u64> {
        Ok(self.fs.fstat(self.fd()?)?.size)
    }

    /// Writes are already visible; only checks the handle is open
    pub fn flush(&self) -> FsResult<()> {
        self.fd().map(|_| ())
    }

    /// Release the file; closing twice is harmless
    pub fn close(&mut self) -> FsResult<()> {
        let Some(fd) = self.fd.take() else {
            return Ok(());
        };
        let closed = self.fs.close(fd);
        self.fs.lock_manager().release_lock(&self.path)?;
        tracing::debug!(path = %self.path, "sync access handle closed");
        closed
    }
}

impl Drop for SyncAccessHandle {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(path = %self.path, error = %err, "failed to close sync access handle");
        }
    }
}
