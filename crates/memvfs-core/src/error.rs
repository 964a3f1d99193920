// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the in-memory filesystem

use std::io;

/// Core filesystem error type
///
/// Every failure is a distinct kind so callers can branch on semantics
/// (for example "create if missing" logic must tell `NotFound` from
/// `AccessDenied`) instead of comparing messages.
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("parent directory not found")]
    ParentNotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("already exists")]
    AlreadyExists,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("access denied")]
    AccessDenied,
    #[error("name not allowed")]
    InvalidName,
    #[error("modification not allowed: entry is locked")]
    NotModificationAllowed,
    #[error("too many levels of symbolic links")]
    TooManyLinks,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid state")]
    InvalidState,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("busy")]
    Busy,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("file too large")]
    FileTooLarge,
    #[error("no space left for file content")]
    NoSpace,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("filesystem state lock poisoned")]
    Lock,
}

impl FsError {
    /// POSIX errno equivalent of this error kind
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound | FsError::ParentNotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::BadFileDescriptor => libc::EBADF,
            FsError::AccessDenied => libc::EACCES,
            FsError::InvalidName | FsError::InvalidArgument | FsError::InvalidState => {
                libc::EINVAL
            }
            FsError::NotModificationAllowed | FsError::Busy => libc::EBUSY,
            FsError::TooManyLinks => libc::ELOOP,
            FsError::DirectoryNotEmpty => libc::ENOTEMPTY,
            FsError::NotPermitted => libc::EPERM,
            FsError::TooManyOpenFiles => libc::EMFILE,
            FsError::FileTooLarge => libc::EFBIG,
            FsError::NoSpace => libc::ENOSPC,
            FsError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            FsError::Lock => libc::EIO,
        }
    }

    /// True for both the final-segment and the intermediate-segment miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound | FsError::ParentNotFound)
    }

    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, FsError::NotADirectory | FsError::IsADirectory)
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Io(inner) => inner,
            other => io::Error::from_raw_os_error(other.errno()),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
