// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Atomic write transactions committed through a swap file

use std::sync::Arc;

use libc::W_OK;

use crate::bridge::CreateWritableOptions;
use crate::error::{FsError, FsResult};
use crate::fault::FaultOp;
use crate::vfs::FsCore;
use crate::{Fd, OpenOptions};

const SHADOW_SUFFIX: &str = ".crswap";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Active,
    Closed,
    Aborted,
}

/// One step of a writable stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteCommand {
    /// Write at `position`, or at the cursor (advancing it) when `None`
    Write { data: Vec<u8>, position: Option<u64> },
    Seek { position: u64 },
    /// Resize immediately, zero-filling growth and clamping the cursor
    Truncate { size: u64 },
}

impl From<Vec<u8>> for WriteCommand {
    fn from(data: Vec<u8>) -> Self {
        WriteCommand::Write {
            data,
            position: None,
        }
    }
}

impl From<&[u8]> for WriteCommand {
    fn from(data: &[u8]) -> Self {
        data.to_vec().into()
    }
}

impl From<&str> for WriteCommand {
    fn from(data: &str) -> Self {
        data.as_bytes().into()
    }
}

/// Writes go to `<target>.crswap`; `close` copies them onto the target in one step
///
/// The advisory locks on the target and on its swap file are held from
/// `start` until the stream is closed, aborted or dropped.
#[derive(Debug)]
pub struct WritableFileStream {
    fs: Arc<FsCore>,
    target: String,
    shadow: String,
    fd: Option<Fd>,
    cursor: u64,
    state: StreamState,
}

impl WritableFileStream {
    pub(crate) fn start(
        fs: Arc<FsCore>,
        path: &str,
        options: CreateWritableOptions,
    ) -> FsResult<Self> {
        let target = fs.realpath(path)?;
        if fs.stat(&target)?.is_dir() {
            return Err(FsError::IsADirectory);
        }
        fs.access(&target, W_OK)?;
        let shadow = format!("{target}{SHADOW_SUFFIX}");
        if !fs.lock_manager().acquire_lock(&target)? {
            tracing::debug!(path = %target, "writable stream refused: entry is locked");
            return Err(FsError::NotModificationAllowed);
        }
        // the shadow name is reserved too, so no other transaction can write through it
        match fs.lock_manager().acquire_lock(&shadow) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(%shadow, "writable stream refused: swap file is locked");
                release(&fs, &target);
                return Err(FsError::NotModificationAllowed);
            }
            Err(err) => {
                release(&fs, &target);
                return Err(err);
            }
        }

        match Self::create_shadow(&fs, &target, &shadow, options.keep_existing_data) {
            Ok(fd) => {
                tracing::debug!(
                    path = %target,
                    keep = options.keep_existing_data,
                    "writable stream started"
                );
                Ok(Self {
                    fs,
                    target,
                    shadow,
                    fd: Some(fd),
                    cursor: 0,
                    state: StreamState::Active,
                })
            }
            Err(err) => {
                release(&fs, &shadow);
                release(&fs, &target);
                Err(err)
            }
        }
    }

    /// Create the swap file exclusively; an existing entry with that name is never touched
    fn create_shadow(fs: &FsCore, target: &str, shadow: &str, keep: bool) -> FsResult<Fd> {
        let options = OpenOptions {
            read: true,
            write: true,
            create: true,
            exclusive: true,
            ..OpenOptions::default()
        };
        let fd = fs.open(shadow, &options, 0o666)?;
        if keep {
            let seeded = fs
                .read_file(target)
                .and_then(|data| fs.write(fd, &data, 0, data.len(), Some(0)));
            if let Err(err) = seeded {
                if let Err(close_err) = fs.close(fd) {
                    tracing::warn!(%fd, error = %close_err, "failed to close shadow descriptor");
                }
                discard_shadow(fs, shadow);
                return Err(err);
            }
        }
        Ok(fd)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn shadow_path(&self) -> &str {
        &self.shadow
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Apply one command; any failure aborts the whole transaction
    pub fn write(&mut self, command: impl Into<WriteCommand>) -> FsResult<()> {
        let fd = self.active_fd()?;
        if let Err(err) = self.apply(fd, command.into()) {
            tracing::warn!(path = %self.target, error = %err, "write failed, aborting stream");
            self.abort_inner();
            return Err(err);
        }
        Ok(())
    }

    pub fn seek(&mut self, position: u64) -> FsResult<()> {
        self.write(WriteCommand::Seek { position })
    }

    pub fn truncate(&mut self, size: u64) -> FsResult<()> {
        self.write(WriteCommand::Truncate { size })
    }

    fn active_fd(&self) -> FsResult<Fd> {
        match (self.state, self.fd) {
            (StreamState::Active, Some(fd)) => Ok(fd),
            _ => Err(FsError::InvalidState),
        }
    }

    fn apply(&mut self, fd: Fd, command: WriteCommand) -> FsResult<()> {
        match command {
            WriteCommand::Write { data, position } => {
                let at = position.unwrap_or(self.cursor);
                let written = self.fs.write(fd, &data, 0, data.len(), Some(at))?;
                if position.is_none() {
                    self.cursor = at + written as u64;
                }
            }
            WriteCommand::Seek { position } => self.cursor = position,
            WriteCommand::Truncate { size } => {
                self.fs.ftruncate(fd, size)?;
                self.cursor = self.cursor.min(size);
            }
        }
        Ok(())
    }

    /// Commit the shadow onto the target; a no-op once finished
    pub fn close(&mut self) -> FsResult<()> {
        if self.state != StreamState::Active {
            return Ok(());
        }
        match self.commit() {
            Ok(()) => {
                self.state = StreamState::Closed;
                release(&self.fs, &self.shadow);
                release(&self.fs, &self.target);
                tracing::debug!(path = %self.target, "writable stream committed");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(path = %self.target, error = %err, "commit failed, aborting stream");
                self.abort_inner();
                Err(err)
            }
        }
    }

    fn commit(&mut self) -> FsResult<()> {
        self.fs.faults().check(FaultOp::Commit)?;
        if let Some(fd) = self.fd.take() {
            self.fs.close(fd)?;
        }
        let data = self.fs.read_file(&self.shadow)?;
        // same inode: hard links and watchers of the target see the new content
        self.fs.write_file(&self.target, &data)?;
        self.fs.unlink(&self.shadow)?;
        Ok(())
    }

    /// Discard every write; the target is left as it was. A no-op once finished.
    pub fn abort(&mut self) -> FsResult<()> {
        if self.state == StreamState::Active {
            self.abort_inner();
            tracing::debug!(path = %self.target, "writable stream aborted");
        }
        Ok(())
    }

    fn abort_inner(&mut self) {
        if let Some(fd) = self.fd.take() {
            if let Err(err) = self.fs.close(fd) {
                tracing::warn!(%fd, error = %err, "failed to close shadow descriptor");
            }
        }
        discard_shadow(&self.fs, &self.shadow);
        self.state = StreamState::Aborted;
        release(&self.fs, &self.shadow);
        release(&self.fs, &self.target);
    }
}

impl Drop for WritableFileStream {
    fn drop(&mut self) {
        if self.state == StreamState::Active {
            tracing::debug!(path = %self.target, "dropping active writable stream");
            self.abort_inner();
        }
    }
}

fn discard_shadow(fs: &FsCore, shadow: &str) {
    match fs.unlink(shadow) {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {}
        Err(err) => tracing::warn!(%shadow, error = %err, "failed to remove shadow file"),
    }
}

fn release(fs: &FsCore, target: &str) {
    if let Err(err) = fs.lock_manager().release_lock(target) {
        tracing::warn!(path = %target, error = %err, "failed to release advisory lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsConfig;

    fn fs_with(path: &str, content: &[u8]) -> Arc<FsCore> {
        let fs = FsCore::new_shared(FsConfig::default());
        fs.write_file(path, content).unwrap();
        fs
    }

    fn start(fs: &Arc<FsCore>, path: &str, keep: bool) -> FsResult<WritableFileStream> {
        WritableFileStream::start(
            Arc::clone(fs),
            path,
            CreateWritableOptions {
                keep_existing_data: keep,
            },
        )
    }

    #[test]
    fn test_keep_existing_data_seek_and_write() {
        let fs = fs_with("/f", b"...");
        let mut stream = start(&fs, "/f", true).unwrap();
        stream.seek(1).unwrap();
        stream.write("1").unwrap();
        stream.write("2").unwrap();
        assert_eq!(fs.read_file("/f").unwrap(), b"...".to_vec());
        assert_eq!(fs.read_file("/f.crswap").unwrap(), b".12".to_vec());

        stream.close().unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(fs.read_file("/f").unwrap(), b".12".to_vec());
        assert!(!fs.exists("/f.crswap").unwrap());
        assert!(!fs.lock_manager().is_locked("/f").unwrap());
    }

    #[test]
    fn test_without_keep_starts_empty() {
        let fs = fs_with("/f", b"old content");
        let mut stream = start(&fs, "/f", false).unwrap();
        stream.write(b"new".as_slice()).unwrap();
        stream.close().unwrap();
        assert_eq!(fs.read_file("/f").unwrap(), b"new".to_vec());
    }

    #[test]
    fn test_explicit_position_does_not_move_cursor() {
        let fs = fs_with("/f", b"");
        let mut stream = start(&fs, "/f", false).unwrap();
        stream.write("abc").unwrap();
        stream
            .write(WriteCommand::Write {
                data: b"Z".to_vec(),
                position: Some(0),
            })
            .unwrap();
        assert_eq!(stream.cursor(), 3);
        stream.write("d").unwrap();
        stream.close().unwrap();
        assert_eq!(fs.read_file("/f").unwrap(), b"Zbcd".to_vec());
    }

    #[test]
    fn test_truncate_clamps_cursor_and_zero_fills() {
        let fs = fs_with("/f", b"abcdef");
        let mut stream = start(&fs, "/f", true).unwrap();
        stream.seek(5).unwrap();
        stream.truncate(2).unwrap();
        assert_eq!(stream.cursor(), 2);
        stream.truncate(4).unwrap();
        stream.close().unwrap();
        assert_eq!(fs.read_file("/f").unwrap(), b"ab\0\0".to_vec());
    }

    #[test]
    fn test_second_stream_is_refused_until_finished() {
        let fs = fs_with("/f", b"x");
        let mut first = start(&fs, "/f", false).unwrap();
        let err = start(&fs, "/f", false).unwrap_err();
        assert!(matches!(err, FsError::NotModificationAllowed));

        first.abort().unwrap();
        let mut second = start(&fs, "/f", false).unwrap();
        second.close().unwrap();
        start(&fs, "/f", false).unwrap().close().unwrap();
    }

    #[test]
    fn test_abort_leaves_target_unchanged() {
        let fs = fs_with("/f", b"original");
        let mut stream = start(&fs, "/f", true).unwrap();
        stream.write("garbage").unwrap();
        stream.abort().unwrap();
        stream.abort().unwrap();
        stream.close().unwrap();

        assert_eq!(stream.state(), StreamState::Aborted);
        assert_eq!(fs.read_file("/f").unwrap(), b"original".to_vec());
        assert!(!fs.exists("/f.crswap").unwrap());
        assert!(matches!(stream.write("late"), Err(FsError::InvalidState)));
    }

    #[test]
    fn test_drop_aborts_active_stream() {
        let fs = fs_with("/f", b"original");
        {
            let mut stream = start(&fs, "/f", false).unwrap();
            stream.write("temp").unwrap();
        }
        assert_eq!(fs.read_file("/f").unwrap(), b"original".to_vec());
        assert!(!fs.lock_manager().is_locked("/f").unwrap());
        assert_eq!(fs.stats().unwrap().open_descriptors, 0);
    }

    #[test]
    fn test_existing_swap_file_is_never_touched() {
        let fs = fs_with("/f", b"target");
        fs.write_file("/f.crswap", b"USER DATA").unwrap();

        for keep in [false, true] {
            assert!(matches!(start(&fs, "/f", keep), Err(FsError::AlreadyExists)));
            assert_eq!(fs.read_file("/f.crswap").unwrap(), b"USER DATA".to_vec());
            assert!(!fs.lock_manager().is_locked("/f").unwrap());
            assert!(!fs.lock_manager().is_locked("/f.crswap").unwrap());
        }
        assert_eq!(fs.read_file("/f").unwrap(), b"target".to_vec());
    }

    #[test]
    fn test_swap_file_is_reserved_while_active() {
        let fs = fs_with("/f", b"x");
        let mut stream = start(&fs, "/f", false).unwrap();
        stream.write("in flight").unwrap();
        assert!(matches!(start(&fs, "/f.crswap", false), Err(FsError::NotModificationAllowed)));
        assert_eq!(fs.read_file("/f.crswap").unwrap(), b"in flight".to_vec());

        stream.close().unwrap();
        assert_eq!(fs.read_file("/f").unwrap(), b"in flight".to_vec());
        assert_eq!(fs.lock_manager().held().unwrap(), 0);
    }

    #[test]
    fn test_read_only_target_is_refused_before_locking() {
        let fs = FsCore::new_shared(FsConfig::default().with_identity(1000, 1000));
        fs.write_file("/ro", b"keep").unwrap();
        fs.chmod("/ro", 0o444).unwrap();

        assert!(matches!(start(&fs, "/ro", true), Err(FsError::AccessDenied)));
        assert!(!fs.lock_manager().is_locked("/ro").unwrap());
        assert!(!fs.exists("/ro.crswap").unwrap());
        assert_eq!(fs.read_file("/ro").unwrap(), b"keep".to_vec());
    }

    #[test]
    fn test_directory_target_is_rejected() {
        let fs = FsCore::new_shared(FsConfig::default());
        fs.mkdir("/d", 0o755).unwrap();
        assert!(matches!(start(&fs, "/d", false), Err(FsError::IsADirectory)));
        assert!(!fs.lock_manager().is_locked("/d").unwrap());
    }
}
