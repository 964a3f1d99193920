// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Resource store: collections of named resources kept under one directory
//!
//! A collection is a directory and a resource a regular file. Collections
//! are written as `/`-separated names relative to the store's base and are
//! created on demand by [`ResourceStore::put`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};
use crate::resolver::validate_name;
use crate::vfs::FsCore;
use crate::FileKind;

/// Precondition checked by [`ResourceStore::put`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrowIf {
    /// Fail with `AlreadyExists` when the resource is present
    Exists,
    /// Fail with `NotFound` when the resource is absent
    Missing,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub throw_if: Option<ThrowIf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Resource,
    Collection,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    pub kind: ResourceKind,
    pub id: String,
    pub size: u64,
}

/// Children of a collection, each list sorted by name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    pub resources: Vec<String>,
    pub collections: Vec<String>,
}

pub struct ResourceStore {
    fs: Arc<FsCore>,
    base: String,
}

impl ResourceStore {
    /// Open a store rooted at `base`, creating the directory if needed
    pub fn new(fs: Arc<FsCore>, base: &str) -> FsResult<Self> {
        fs.mkdir_all(base, 0o777)?;
        let base = fs.realpath(base)?;
        tracing::debug!(%base, "resource store opened");
        Ok(Self { fs, base })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn collection_path(&self, collection: &str) -> FsResult<String> {
        let mut path = self.base.trim_end_matches('/').to_string();
        for name in collection.split('/').filter(|name| !name.is_empty()) {
            validate_name(name)?;
            path.push('/');
            path.push_str(name);
        }
        if path.is_empty() {
            path.push('/');
        }
        Ok(path)
    }

    fn resource_path(&self, collection: &str, id: &str) -> FsResult<String> {
        validate_name(id)?;
        let dir = self.collection_path(collection)?;
        Ok(format!("{}/{}", dir.trim_end_matches('/'), id))
    }

    /// Store `data` as `collection/id`, creating nested collections on the way
    pub fn put(
        &self,
        collection: &str,
        id: &str,
        data: &[u8],
        options: PutOptions,
    ) -> FsResult<()> {
        let path = self.resource_path(collection, id)?;
        self.fs
            .mkdir_all(&self.collection_path(collection)?, 0o777)
            .map_err(|err| match err {
                // a resource sits where a collection is needed
                FsError::AlreadyExists => FsError::NotADirectory,
                other => other,
            })?;

        let existing = match self.fs.stat(&path) {
            Ok(stat) => Some(stat),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };
        match (options.throw_if, &existing) {
            (Some(ThrowIf::Exists), Some(_)) => return Err(FsError::AlreadyExists),
            (Some(ThrowIf::Missing), None) => return Err(FsError::NotFound),
            _ => {}
        }
        if existing.is_some_and(|stat| stat.is_dir()) {
            return Err(FsError::IsADirectory);
        }
        self.fs.write_file(&path, data)?;
        tracing::trace!(%path, len = data.len(), "resource stored");
        Ok(())
    }

    pub fn get(&self, collection: &str, id: &str) -> FsResult<Vec<u8>> {
        self.fs.read_file(&self.resource_path(collection, id)?)
    }

    pub fn del(&self, collection: &str, id: &str) -> FsResult<()> {
        self.fs.unlink(&self.resource_path(collection, id)?)
    }

    pub fn info(&self, collection: &str, id: &str) -> FsResult<ResourceInfo> {
        let stat = self.fs.stat(&self.resource_path(collection, id)?)?;
        let kind = if stat.is_dir() {
            ResourceKind::Collection
        } else {
            ResourceKind::Resource
        };
        Ok(ResourceInfo {
            kind,
            id: id.to_string(),
            size: if stat.is_dir() { 0 } else { stat.size },
        })
    }

    pub fn list(&self, collection: &str) -> FsResult<Listing> {
        let mut listing = Listing::default();
        for entry in self.fs.readdir(&self.collection_path(collection)?)? {
            match entry.kind {
                FileKind::Directory => listing.collections.push(entry.name),
                FileKind::File => listing.resources.push(entry.name),
                FileKind::Symlink => {}
            }
        }
        Ok(listing)
    }

    /// Remove a collection and everything in it; the store's base cannot be dropped
    pub fn drop_collection(&self, collection: &str) -> FsResult<()> {
        if collection.split('/').all(str::is_empty) {
            return Err(FsError::InvalidName);
        }
        let path = self.collection_path(collection)?;
        if !self.fs.stat(&path)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        self.fs.remove_all(&path)?;
        tracing::debug!(%path, "collection dropped");
        Ok(())
    }
}
