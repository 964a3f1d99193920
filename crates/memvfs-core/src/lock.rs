// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Advisory exclusive locks keyed by canonical path

use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::{FsError, FsResult};

/// Path lock table shared by every handle of one filesystem
///
/// Not re-entrant: a second acquire of a held path fails until released.
#[derive(Debug, Default)]
pub struct LockManager {
    held: Mutex<HashSet<String>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock; `false` when it is already held
    pub fn acquire_lock(&self, path: &str) -> FsResult<bool> {
        let mut held = self.held.lock().map_err(|_| FsError::Lock)?;
        let acquired = held.insert(path.to_string());
        if acquired {
            tracing::trace!(path, "advisory lock acquired");
        } else {
            tracing::debug!(path, "advisory lock already held");
        }
        Ok(acquired)
    }

    /// Release the lock; releasing an unheld path does nothing
    pub fn release_lock(&self, path: &str) -> FsResult<()> {
        let mut held = self.held.lock().map_err(|_| FsError::Lock)?;
        if held.remove(path) {
            tracing::trace!(path, "advisory lock released");
        }
        Ok(())
    }

    pub fn is_locked(&self, path: &str) -> FsResult<bool> {
        Ok(self.held.lock().map_err(|_| FsError::Lock)?.contains(path))
    }

    /// Whether `dir` itself or any path below it is locked
    pub fn any_locked_under(&self, dir: &str) -> FsResult<bool> {
        let held = self.held.lock().map_err(|_| FsError::Lock)?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(held.iter().any(|path| path == dir || path.starts_with(&prefix)))
    }

    /// Release every held lock
    pub fn clear(&self) -> FsResult<()> {
        self.held.lock().map_err(|_| FsError::Lock)?.clear();
        Ok(())
    }

    pub fn held(&self) -> FsResult<usize> {
        Ok(self.held.lock().map_err(|_| FsError::Lock)?.len())
    }
}
