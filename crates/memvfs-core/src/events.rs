// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-inode change notification

use std::sync::Arc;

use crate::InodeId;

/// What happened to an inode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// Content or metadata changed
    Modified,
    /// Last link removed
    Deleted,
}

/// Receiver of inode change notifications
#[cfg_attr(test, mockall::automock)]
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, inode: InodeId, kind: ChangeKind);
}

/// Opaque listener identifier, unique within one inode's listener list
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Registration returned by `FsCore::watch`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Watch {
    pub inode: InodeId,
    pub listener: ListenerId,
}

/// Observer list composed into every inode
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Arc<dyn ChangeListener>)>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("count", &self.entries.len()).finish()
    }
}

impl Listeners {
    pub fn subscribe(&mut self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push((id, listener));
        id
    }

    /// Returns false when the id was not subscribed
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChangeListener>> {
        self.entries.iter().map(|(_, listener)| listener)
    }
}

/// Notifications collected while the state lock is held, delivered after release
#[derive(Default)]
pub(crate) struct PendingNotifications {
    items: Vec<(Arc<dyn ChangeListener>, InodeId, ChangeKind)>,
}

impl PendingNotifications {
    pub(crate) fn push_all(&mut self, listeners: &Listeners, inode: InodeId, kind: ChangeKind) {
        for listener in listeners.iter() {
            self.items.push((Arc::clone(listener), inode, kind));
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn deliver(self) {
        for (listener, inode, kind) in self.items {
            tracing::trace!(%inode, ?kind, "delivering change notification");
            listener.on_change(inode, kind);
        }
    }
}
