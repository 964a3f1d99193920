// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Capability-handle surface over [`FsCore`]
//!
//! Handles name an entry by path inside one filesystem instance. Mutating
//! transactions ([`WritableFileStream`], [`SyncAccessHandle`]) hold the
//! entry's advisory lock for their whole lifetime, which makes them mutually
//! exclusive per file; plain POSIX calls are not affected by these locks.

mod sync_access;
mod writable;

pub use sync_access::SyncAccessHandle;
pub use writable::{StreamState, WritableFileStream, WriteCommand};

use std::sync::Arc;

use libc::{R_OK, W_OK};

use crate::error::{FsError, FsResult};
use crate::resolver::validate_name;
use crate::vfs::FsCore;
use crate::{FileKind, OpenOptions};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleKind {
    File,
    Directory,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GetHandleOptions {
    pub create: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemoveEntryOptions {
    pub recursive: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CreateWritableOptions {
    /// Start the shadow copy from the current content instead of empty
    pub keep_existing_data: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionMode {
    Read,
    ReadWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
}

/// Point-in-time copy of a file's content
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSnapshot {
    pub name: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub last_modified: i64,
    pub data: Vec<u8>,
}

/// Behavior shared by file and directory handles
pub trait FileSystemHandle {
    fn kind(&self) -> HandleKind;

    /// Final path component; empty for the root
    fn name(&self) -> &str;

    fn path(&self) -> &str;

    fn filesystem(&self) -> &Arc<FsCore>;

    /// Same filesystem instance, same kind, same path
    fn is_same_entry(&self, other: &dyn FileSystemHandle) -> bool {
        Arc::ptr_eq(self.filesystem(), other.filesystem())
            && self.kind() == other.kind()
            && self.path() == other.path()
    }

    fn query_permission(&self, mode: PermissionMode) -> FsResult<PermissionState> {
        let mask = match mode {
            PermissionMode::Read => R_OK,
            PermissionMode::ReadWrite => R_OK | W_OK,
        };
        match self.filesystem().access(self.path(), mask) {
            Ok(()) => Ok(PermissionState::Granted),
            Err(FsError::AccessDenied) => Ok(PermissionState::Denied),
            Err(err) => Err(err),
        }
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

fn final_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or_default().to_string()
}

#[derive(Clone, Debug)]
pub struct DirectoryHandle {
    fs: Arc<FsCore>,
    path: String,
}

impl DirectoryHandle {
    pub fn root(fs: Arc<FsCore>) -> Self {
        Self {
            fs,
            path: "/".to_string(),
        }
    }

    /// Handle to an existing directory
    pub fn open(fs: Arc<FsCore>, path: &str) -> FsResult<Self> {
        let path = fs.realpath(path)?;
        if !fs.stat(&path)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(Self { fs, path })
    }

    pub fn get_file_handle(&self, name: &str, options: GetHandleOptions) -> FsResult<FileHandle> {
        validate_name(name)?;
        let path = join(&self.path, name);
        match self.fs.stat(&path) {
            Ok(stat) if stat.is_dir() => return Err(FsError::IsADirectory),
            Ok(_) => {}
            Err(err) if err.is_not_found() && options.create => {
                let create = OpenOptions {
                    write: true,
                    create: true,
                    ..OpenOptions::default()
                };
                let fd = self.fs.open(&path, &create, 0o666)?;
                self.fs.close(fd)?;
            }
            Err(err) => return Err(err),
        }
        Ok(FileHandle {
            path: self.fs.realpath(&path)?,
            fs: Arc::clone(&self.fs),
        })
    }

    pub fn get_directory_handle(
        &self,
        name: &str,
        options: GetHandleOptions,
    ) -> FsResult<DirectoryHandle> {
        validate_name(name)?;
        let path = join(&self.path, name);
        match self.fs.stat(&path) {
            Ok(stat) if !stat.is_dir() => return Err(FsError::NotADirectory),
            Ok(_) => {}
            Err(err) if err.is_not_found() && options.create => self.fs.mkdir(&path, 0o777)?,
            Err(err) => return Err(err),
        }
        Ok(DirectoryHandle {
            path: self.fs.realpath(&path)?,
            fs: Arc::clone(&self.fs),
        })
    }

    pub fn remove_entry(&self, name: &str, options: RemoveEntryOptions) -> FsResult<()> {
        validate_name(name)?;
        let path = join(&self.path, name);
        let stat = self.fs.lstat(&path)?;
        let locks = self.fs.lock_manager();
        if stat.is_dir() {
            if locks.any_locked_under(&path)? {
                return Err(FsError::NotModificationAllowed);
            }
            if options.recursive {
                self.fs.remove_all(&path)
            } else {
                self.fs.rmdir(&path)
            }
        } else {
            if locks.is_locked(&path)? {
                tracing::debug!(%path, "refusing to remove locked entry");
                return Err(FsError::NotModificationAllowed);
            }
            self.fs.unlink(&path)
        }
    }

    /// Children sorted by name; dangling symlinks are skipped
    pub fn entries(&self) -> FsResult<Vec<Handle>> {
        let mut handles = Vec::new();
        for entry in self.fs.readdir(&self.path)? {
            let mut path = join(&self.path, &entry.name);
            let is_dir = match entry.kind {
                FileKind::Directory => true,
                FileKind::File => false,
                FileKind::Symlink => match self.fs.stat(&path) {
                    Ok(stat) => {
                        path = self.fs.realpath(&path)?;
                        stat.is_dir()
                    }
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return Err(err),
                },
            };
            let fs = Arc::clone(&self.fs);
            handles.push(if is_dir {
                Handle::Directory(DirectoryHandle { fs, path })
            } else {
                Handle::File(FileHandle { fs, path })
            });
        }
        Ok(handles)
    }

    /// Path components leading from this directory to `descendant`
    pub fn resolve(&self, descendant: &dyn FileSystemHandle) -> Option<Vec<String>> {
        if !Arc::ptr_eq(&self.fs, descendant.filesystem()) {
            return None;
        }
        let rest = if self.path == "/" {
            descendant.path().strip_prefix('/')?
        } else if descendant.path() == self.path {
            ""
        } else {
            descendant.path().strip_prefix(self.path.as_str())?.strip_prefix('/')?
        };
        Some(rest.split('/').filter(|c| !c.is_empty()).map(str::to_string).collect())
    }
}

impl FileSystemHandle for DirectoryHandle {
    fn kind(&self) -> HandleKind {
        HandleKind::Directory
    }

    fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn filesystem(&self) -> &Arc<FsCore> {
        &self.fs
    }
}

#[derive(Clone, Debug)]
pub struct FileHandle {
    fs: Arc<FsCore>,
    path: String,
}

impl FileHandle {
    pub fn get_file(&self) -> FsResult<FileSnapshot> {
        let stat = self.fs.stat(&self.path)?;
        let data = self.fs.read_file(&self.path)?;
        Ok(FileSnapshot {
            name: final_name(&self.path),
            size: data.len() as u64,
            last_modified: stat.mtime,
            data,
        })
    }

    pub fn create_writable(&self, options: CreateWritableOptions) -> FsResult<WritableFileStream> {
        WritableFileStream::start(Arc::clone(&self.fs), &self.path, options)
    }

    pub fn create_sync_access_handle(&self) -> FsResult<SyncAccessHandle> {
        SyncAccessHandle::open(Arc::clone(&self.fs), &self.path)
    }
}

impl FileSystemHandle for FileHandle {
    fn kind(&self) -> HandleKind {
        HandleKind::File
    }

    fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn filesystem(&self) -> &Arc<FsCore> {
        &self.fs
    }
}

/// Either kind of handle, as yielded by [`DirectoryHandle::entries`]
#[derive(Clone, Debug)]
pub enum Handle {
    File(FileHandle),
    Directory(DirectoryHandle),
}

impl Handle {
    pub fn as_dyn(&self) -> &dyn FileSystemHandle {
        match self {
            Handle::File(file) => file,
            Handle::Directory(dir) => dir,
        }
    }

    pub fn name(&self) -> &str {
        self.as_dyn().name()
    }

    pub fn kind(&self) -> HandleKind {
        self.as_dyn().kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsConfig;

    fn root() -> DirectoryHandle {
        DirectoryHandle::root(FsCore::new_shared(FsConfig::default()))
    }

    #[test]
    fn test_get_handles_create_and_type_checks() {
        let root = root();
        assert!(root.get_file_handle("f.txt", GetHandleOptions::default()).unwrap_err().is_not_found());

        let create = GetHandleOptions { create: true };
        let file = root.get_file_handle("f.txt", create).unwrap();
        assert_eq!(file.name(), "f.txt");
        assert_eq!(file.path(), "/f.txt");
        let dir = root.get_directory_handle("d", create).unwrap();
        assert_eq!(dir.name(), "d");

        assert!(matches!(root.get_directory_handle("f.txt", create), Err(FsError::NotADirectory)));
        assert!(matches!(root.get_file_handle("d", create), Err(FsError::IsADirectory)));
        assert!(matches!(root.get_file_handle("a/b", create), Err(FsError::InvalidName)));
        assert!(matches!(root.get_file_handle("..", create), Err(FsError::InvalidName)));
        assert!(matches!(root.get_directory_handle("", create), Err(FsError::InvalidName)));
    }

    #[test]
    fn test_get_file_handle_keeps_existing_content() {
        let root = root();
        root.filesystem().write_file("/keep", b"data").unwrap();
        let file = root.get_file_handle("keep", GetHandleOptions { create: true }).unwrap();
        assert_eq!(file.get_file().unwrap().data, b"data".to_vec());
    }

    #[test]
    fn test_entries_and_resolve() {
        let root = root();
        let create = GetHandleOptions { create: true };
        let sub = root.get_directory_handle("sub", create).unwrap();
        let nested = sub.get_file_handle("n.txt", create).unwrap();
        root.get_file_handle("a.txt", create).unwrap();

        let names: Vec<_> = root
            .entries()
            .unwrap()
            .iter()
            .map(|handle| (handle.name().to_string(), handle.kind()))
            .collect();
        assert_eq!(
            names,
            vec![("a.txt".to_string(), HandleKind::File), ("sub".to_string(), HandleKind::Directory)]
        );

        assert_eq!(root.resolve(&nested), Some(vec!["sub".to_string(), "n.txt".to_string()]));
        assert_eq!(sub.resolve(&nested), Some(vec!["n.txt".to_string()]));
        assert_eq!(sub.resolve(&sub), Some(vec![]));
        let sibling = root.get_directory_handle("subway", create).unwrap();
        assert_eq!(sub.resolve(&sibling), None);

        let other = DirectoryHandle::root(FsCore::new_shared(FsConfig::default()));
        assert_eq!(other.resolve(&nested), None);
    }

    #[test]
    fn test_remove_entry() {
        let root = root();
        let create = GetHandleOptions { create: true };
        let dir = root.get_directory_handle("d", create).unwrap();
        dir.get_file_handle("inner", create).unwrap();

        assert!(matches!(
            root.remove_entry("d", RemoveEntryOptions::default()),
            Err(FsError::DirectoryNotEmpty)
        ));
        root.remove_entry("d", RemoveEntryOptions { recursive: true }).unwrap();
        assert!(root.remove_entry("d", RemoveEntryOptions::default()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_locked_entry_is_refused() {
        let root = root();
        let file = root.get_file_handle("busy", GetHandleOptions { create: true }).unwrap();
        let stream = file.create_writable(CreateWritableOptions::default()).unwrap();
        assert!(matches!(
            root.remove_entry("busy", RemoveEntryOptions::default()),
            Err(FsError::NotModificationAllowed)
        ));
        drop(stream);
        root.remove_entry("busy", RemoveEntryOptions::default()).unwrap();
    }

    #[test]
    fn test_same_entry_and_permissions() {
        let fs = FsCore::new_shared(FsConfig::default().with_identity(1000, 1000));
        let root = DirectoryHandle::root(Arc::clone(&fs));
        let a = root.get_file_handle("x", GetHandleOptions { create: true }).unwrap();
        let b = root.get_file_handle("x", GetHandleOptions::default()).unwrap();
        assert!(a.is_same_entry(&b));
        assert!(!a.is_same_entry(&root));

        assert_eq!(a.query_permission(PermissionMode::ReadWrite).unwrap(), PermissionState::Granted);
        fs.chmod("/x", 0o400).unwrap();
        assert_eq!(a.query_permission(PermissionMode::Read).unwrap(), PermissionState::Granted);
        assert_eq!(a.query_permission(PermissionMode::ReadWrite).unwrap(), PermissionState::Denied);
    }

    #[test]
    fn test_symlinked_directory_reaches_same_entry() {
        let fs = FsCore::new_shared(FsConfig::default());
        fs.mkdir("/real", 0o755).unwrap();
        fs.write_file("/real/x", b"").unwrap();
        fs.symlink("/real", "/alias").unwrap();
        let root = DirectoryHandle::root(Arc::clone(&fs));

        let direct = root
            .get_directory_handle("real", GetHandleOptions::default())
            .unwrap()
            .get_file_handle("x", GetHandleOptions::default())
            .unwrap();
        let alias = root.get_directory_handle("alias", GetHandleOptions::default()).unwrap();
        let through = alias.get_file_handle("x", GetHandleOptions::default()).unwrap();
        assert_eq!(alias.path(), "/real");
        assert_eq!(through.path(), "/real/x");
        assert!(direct.is_same_entry(&through));
        assert_eq!(root.resolve(&through), Some(vec!["real".to_string(), "x".to_string()]));

        // both handles contend for the same lock
        let _stream = direct.create_writable(CreateWritableOptions::default()).unwrap();
        assert!(matches!(
            through.create_writable(CreateWritableOptions::default()),
            Err(FsError::NotModificationAllowed)
        ));

        let linked_dirs: Vec<_> = root
            .entries()
            .unwrap()
            .iter()
            .map(|handle| handle.as_dyn().path().to_string())
            .collect();
        assert_eq!(linked_dirs, vec!["/real".to_string(), "/real".to_string()]);
    }

    #[test]
    fn test_open_requires_directory() {
        let fs = FsCore::new_shared(FsConfig::default());
        fs.mkdir_all("/x/y", 0o755).unwrap();
        fs.write_file("/x/f", b"").unwrap();
        assert_eq!(DirectoryHandle::open(Arc::clone(&fs), "/x/y/").unwrap().path(), "/x/y");
        assert!(matches!(
            DirectoryHandle::open(Arc::clone(&fs), "/x/f"),
            Err(FsError::NotADirectory)
        ));
    }
}
