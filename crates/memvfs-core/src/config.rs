// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration types for the in-memory filesystem

use serde::{Deserialize, Serialize};

use crate::inode::Inode;

/// Top-level filesystem configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub security: SecurityPolicy,
    pub limits: FsLimits,
    /// Deliver change notifications to watchers
    pub track_events: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            security: SecurityPolicy::default(),
            limits: FsLimits::default(),
            track_events: true,
        }
    }
}

impl FsConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Same configuration acting as another user
    pub fn with_identity(mut self, uid: u32, gid: u32) -> Self {
        self.security.uid = uid;
        self.security.gid = gid;
        self
    }
}

/// Permission policy and the effective identity of the caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub enforce_posix_permissions: bool,
    pub root_bypass_permissions: bool,
    /// Effective uid used for permission checks and new-node ownership
    pub uid: u32,
    /// Effective gid used for permission checks and new-node ownership
    pub gid: u32,
    pub umask: u32,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            enforce_posix_permissions: true,
            root_bypass_permissions: true,
            uid: 0,
            gid: 0,
            umask: 0o022,
        }
    }
}

impl SecurityPolicy {
    /// Check an `access(2)`-style mask (`R_OK | W_OK | X_OK`) against a node
    pub(crate) fn permits(&self, inode: &Inode, mask: i32) -> bool {
        if !self.enforce_posix_permissions {
            return true;
        }
        if self.root_bypass_permissions && self.uid == 0 {
            return true;
        }
        let allow_r = mask & libc::R_OK == 0 || inode.can_read(self.uid, self.gid);
        let allow_w = mask & libc::W_OK == 0 || inode.can_write(self.uid, self.gid);
        let allow_x = mask & libc::X_OK == 0 || inode.can_execute(self.uid, self.gid);
        allow_r && allow_w && allow_x
    }

    /// Owner-only metadata changes (chmod, utimes)
    pub(crate) fn owns(&self, inode: &Inode) -> bool {
        !self.enforce_posix_permissions
            || (self.root_bypass_permissions && self.uid == 0)
            || inode.uid == self.uid
    }

    pub(crate) fn apply_umask(&self, mode: u32) -> u32 {
        mode & !self.umask & 0o7777
    }
}

/// Resource limits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsLimits {
    pub max_open_handles: usize,
    /// First descriptor handed out; later ones count downward from here
    pub descriptor_watermark: i32,
    pub max_symlink_depth: u32,
    /// Largest size a regular file may grow to, in bytes
    pub max_file_size: u64,
}

impl Default for FsLimits {
    fn default() -> Self {
        Self {
            max_open_handles: 10_000,
            descriptor_watermark: 0x7fff_ffff,
            max_symlink_depth: 40,
            max_file_size: 4 << 30,
        }
    }
}
