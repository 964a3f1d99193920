// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared helpers for memvfs-core integration tests

use std::sync::{Arc, Mutex};

use memvfs_core::{ChangeKind, ChangeListener, FsConfig, FsCore, InodeId};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber honoring `RUST_LOG`; later calls are no-ops
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

pub fn new_fs() -> Arc<FsCore> {
    init_tracing();
    FsCore::new_shared(FsConfig::default())
}

/// Listener that records every notification it receives
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<(InodeId, ChangeKind)>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<(InodeId, ChangeKind)> {
        self.events.lock().unwrap().clone()
    }
}

impl ChangeListener for Recorder {
    fn on_change(&self, inode: InodeId, kind: ChangeKind) {
        self.events.lock().unwrap().push((inode, kind));
    }
}
