// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! memvfs core — in-memory POSIX-style virtual filesystem
//!
//! Inodes live in an arena and are linked into a directory tree by name.
//! [`FsCore`] exposes descriptor-based POSIX operations over that tree; the
//! [`bridge`] module layers capability handles on top, with advisory locks
//! and atomic write transactions committed through a swap file.

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod fault;
pub mod lock;
pub mod store;
pub mod types;
pub mod vfs;

mod descriptor;
mod inode;
mod links;
mod resolver;

pub use config::{FsConfig, FsLimits, SecurityPolicy};
pub use error::{FsError, FsResult};
pub use events::{ChangeKind, ChangeListener, ListenerId, Watch};
pub use fault::{FaultErrno, FaultInjector, FaultOp, FaultPolicy, FaultRule};
pub use inode::Inode;
pub use lock::LockManager;
pub use store::{Listing, PutOptions, ResourceInfo, ResourceKind, ResourceStore, ThrowIf};
pub use types::{DirEntry, Fd, FileKind, FileTimes, FsStats, InodeId, OpenOptions, Stat};
pub use vfs::FsCore;
