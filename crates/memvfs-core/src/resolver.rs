// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path resolution over the link graph
//!
//! Walks from the root one component at a time, substituting symlinks as they
//! are met. Structural failures (missing or mistyped components) are returned
//! as soon as they are found; a missing search permission is only remembered
//! and reported once the walk has otherwise succeeded, so that callers see the
//! more specific error first.

use std::collections::VecDeque;

use crate::config::SecurityPolicy;
use crate::error::{FsError, FsResult};
use crate::links::InodeTable;
use crate::InodeId;

/// A path split into components, `.` and empty segments removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedPath {
    pub(crate) components: Vec<String>,
    pub(crate) trailing_slash: bool,
}

impl ParsedPath {
    pub(crate) fn is_root(&self) -> bool {
        self.components.is_empty()
    }
}

/// Normalize separators and split. Relative paths are taken from the root.
pub(crate) fn parse_path(path: &str) -> FsResult<ParsedPath> {
    if path.is_empty() || path.contains('\0') {
        return Err(FsError::InvalidName);
    }
    let normalized = path.replace('\\', "/");
    let components: Vec<String> = normalized
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string)
        .collect();
    let trailing_slash = !components.is_empty() && normalized.ends_with('/');
    Ok(ParsedPath {
        components,
        trailing_slash,
    })
}

/// Validate a single entry name used for creation
pub(crate) fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

pub(crate) fn join_components(components: &[String]) -> String {
    format!("/{}", components.join("/"))
}

/// Whether a symlink in the final position is substituted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TrailingLink {
    Follow,
    Preserve,
}

/// Successful resolution of a full path
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    pub(crate) id: InodeId,
    /// Canonical absolute path, symlinks substituted
    pub(crate) path: String,
}

/// The directory that holds (or would hold) a path's final component
#[derive(Debug, Clone)]
pub(crate) struct ParentLookup {
    pub(crate) parent: InodeId,
    pub(crate) parent_path: String,
    pub(crate) name: String,
    /// The existing entry, not followed if it is a symlink
    pub(crate) child: Option<InodeId>,
    pub(crate) trailing_slash: bool,
}

impl ParentLookup {
    pub(crate) fn child_path(&self) -> String {
        if self.parent_path == "/" {
            format!("/{}", self.name)
        } else {
            format!("{}/{}", self.parent_path, self.name)
        }
    }
}

struct Walk {
    id: InodeId,
    canonical: Vec<String>,
    denied: bool,
}

pub(crate) struct Resolver<'a> {
    table: &'a InodeTable,
    policy: &'a SecurityPolicy,
    max_depth: u32,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(table: &'a InodeTable, policy: &'a SecurityPolicy, max_depth: u32) -> Self {
        Self {
            table,
            policy,
            max_depth,
        }
    }

    pub(crate) fn resolve(&self, path: &str, trailing: TrailingLink) -> FsResult<Resolved> {
        let parsed = parse_path(path)?;
        let follow_final = trailing == TrailingLink::Follow || parsed.trailing_slash;
        let walk = self.walk(parsed.components.into(), follow_final, false)?;
        if parsed.trailing_slash && !self.table.get(walk.id)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if walk.denied {
            return Err(FsError::AccessDenied);
        }
        Ok(Resolved {
            id: walk.id,
            path: join_components(&walk.canonical),
        })
    }

    pub(crate) fn resolve_parent(&self, path: &str) -> FsResult<ParentLookup> {
        let mut parsed = parse_path(path)?;
        let name = parsed.components.pop().ok_or(FsError::InvalidName)?;
        validate_name(&name)?;

        let walk = self.walk(parsed.components.into(), true, true)?;
        let parent = self.table.get(walk.id)?;
        if !parent.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let child = self.table.get_child(walk.id, &name)?;
        if walk.denied || !self.policy.permits(parent, libc::X_OK) {
            return Err(FsError::AccessDenied);
        }
        Ok(ParentLookup {
            parent: walk.id,
            parent_path: join_components(&walk.canonical),
            name,
            child,
            trailing_slash: parsed.trailing_slash,
        })
    }

    /// Core walk. With `prefix_only` every miss is a missing parent.
    fn walk(
        &self,
        mut pending: VecDeque<String>,
        follow_final: bool,
        prefix_only: bool,
    ) -> FsResult<Walk> {
        let root = self.table.root();
        let mut current = root;
        let mut canonical: Vec<String> = Vec::new();
        let mut denied = false;
        let mut links = 0u32;

        while let Some(component) = pending.pop_front() {
            if component == ".." {
                current = self.table.dir(current)?.parent.unwrap_or(root);
                canonical.pop();
                continue;
            }

            let dir = self.table.get(current)?;
            if !self.policy.permits(dir, libc::X_OK) {
                denied = true;
            }

            let is_last = pending.is_empty();
            let child = match self.table.get_child(current, &component)? {
                Some(child) => child,
                None if is_last && !prefix_only => return Err(FsError::NotFound),
                None => return Err(FsError::ParentNotFound),
            };
            let inode = self.table.get(child)?;

            if let Some(target) = inode.symlink_target() {
                if !is_last || follow_final {
                    links += 1;
                    if links > self.max_depth {
                        return Err(FsError::TooManyLinks);
                    }
                    if target_is_absolute(target) {
                        current = root;
                        canonical.clear();
                    }
                    for step in parse_path(target)?.components.into_iter().rev() {
                        pending.push_front(step);
                    }
                    continue;
                }
            } else if !is_last && !inode.is_dir() {
                return Err(FsError::NotADirectory);
            }

            current = child;
            canonical.push(component);
        }

        Ok(Walk {
            id: current,
            canonical,
            denied,
        })
    }
}

fn target_is_absolute(target: &str) -> bool {
    target.starts_with('/') || target.starts_with('\\')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::{Inode, InodeKind};
    use crate::links::NewDirAttrs;

    const ATTRS: NewDirAttrs = NewDirAttrs {
        perm: 0o755,
        uid: 0,
        gid: 0,
    };

    fn mkdirs(table: &mut InodeTable, steps: &[&str]) -> InodeId {
        let root = table.root();
        table.create_path(root, steps, true, ATTRS, |_, _| Ok(())).expect("mkdirs")
    }

    fn add(table: &mut InodeTable, dir: InodeId, name: &str, kind: InodeKind) -> InodeId {
        let id = table.insert(Inode::new(kind, 0o644, 0, 0));
        table.set_child(dir, name, id).expect("set_child");
        id
    }

    fn symlink(target: &str) -> InodeKind {
        InodeKind::Symlink {
            target: target.to_string(),
        }
    }

    fn root_policy() -> SecurityPolicy {
        SecurityPolicy::default()
    }

    #[test]
    fn test_parse_path_normalizes_separators() {
        let parsed = parse_path("\\a//b/./c/").unwrap();
        assert_eq!(parsed.components, vec!["a", "b", "c"]);
        assert!(parsed.trailing_slash);
        assert!(parse_path("/").unwrap().is_root());
        assert!(!parse_path("/").unwrap().trailing_slash);
        assert!(matches!(parse_path(""), Err(FsError::InvalidName)));
        assert!(matches!(parse_path("/a\0b"), Err(FsError::InvalidName)));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("ok.txt").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "a\0"] {
            assert!(matches!(validate_name(bad), Err(FsError::InvalidName)), "{bad:?}");
        }
    }

    #[test]
    fn test_intermediate_symlink_is_substituted() {
        let mut table = InodeTable::new(0o755, 0, 0);
        let a = mkdirs(&mut table, &["a"]);
        let c = mkdirs(&mut table, &["c"]);
        let index = add(&mut table, c, "index.js", InodeKind::File);
        add(&mut table, a, "b", symlink("/c"));

        let policy = root_policy();
        let resolver = Resolver::new(&table, &policy, 40);
        let resolved = resolver.resolve("/a/b/index.js", TrailingLink::Preserve).unwrap();
        assert_eq!(resolved.id, index);
        assert_eq!(resolved.path, "/c/index.js");
    }

    #[test]
    fn test_relative_symlink_continues_from_link_directory() {
        let mut table = InodeTable::new(0o755, 0, 0);
        let x = mkdirs(&mut table, &["x"]);
        let target = add(&mut table, x, "real.txt", InodeKind::File);
        add(&mut table, x, "alias", symlink("real.txt"));
        let up = mkdirs(&mut table, &["x", "sub"]);
        add(&mut table, up, "parent", symlink("../real.txt"));

        let policy = root_policy();
        let resolver = Resolver::new(&table, &policy, 40);
        assert_eq!(resolver.resolve("/x/alias", TrailingLink::Follow).unwrap().id, target);
        assert_eq!(resolver.resolve("/x/sub/parent", TrailingLink::Follow).unwrap().id, target);
        assert_eq!(
            resolver.resolve("/x/sub/parent", TrailingLink::Follow).unwrap().path,
            "/x/real.txt"
        );
    }

    #[test]
    fn test_final_symlink_follow_or_preserve() {
        let mut table = InodeTable::new(0o755, 0, 0);
        let root = table.root();
        let file = add(&mut table, root, "f", InodeKind::File);
        let link = add(&mut table, root, "l", symlink("/f"));

        let policy = root_policy();
        let resolver = Resolver::new(&table, &policy, 40);
        assert_eq!(resolver.resolve("/l", TrailingLink::Follow).unwrap().id, file);
        assert_eq!(resolver.resolve("/l", TrailingLink::Preserve).unwrap().id, link);
    }

    #[test]
    fn test_symlink_loop_is_bounded() {
        let mut table = InodeTable::new(0o755, 0, 0);
        let root = table.root();
        add(&mut table, root, "a", symlink("/b"));
        add(&mut table, root, "b", symlink("/a"));

        let policy = root_policy();
        let resolver = Resolver::new(&table, &policy, 40);
        assert!(matches!(resolver.resolve("/a", TrailingLink::Follow), Err(FsError::TooManyLinks)));
        assert!(matches!(resolver.resolve("/a/x", TrailingLink::Preserve), Err(FsError::TooManyLinks)));
        // lstat never substitutes the final link
        assert!(resolver.resolve("/a", TrailingLink::Preserve).is_ok());
    }

    #[test]
    fn test_dotdot_uses_physical_parent() {
        let mut table = InodeTable::new(0o755, 0, 0);
        let a = mkdirs(&mut table, &["a"]);
        mkdirs(&mut table, &["a", "b"]);
        let policy = root_policy();
        let resolver = Resolver::new(&table, &policy, 40);
        let resolved = resolver.resolve("/a/b/..", TrailingLink::Follow).unwrap();
        assert_eq!(resolved.id, a);
        assert_eq!(resolved.path, "/a");
        assert_eq!(resolver.resolve("/../..", TrailingLink::Follow).unwrap().id, table.root());
    }

    #[test]
    fn test_missing_segments_report_parent_or_final() {
        let mut table = InodeTable::new(0o755, 0, 0);
        mkdirs(&mut table, &["a"]);
        let policy = root_policy();
        let resolver = Resolver::new(&table, &policy, 40);
        assert!(matches!(resolver.resolve("/a/missing", TrailingLink::Follow), Err(FsError::NotFound)));
        assert!(matches!(
            resolver.resolve("/missing/x", TrailingLink::Follow),
            Err(FsError::ParentNotFound)
        ));
        assert!(matches!(resolver.resolve_parent("/missing/x/y"), Err(FsError::ParentNotFound)));
        let lookup = resolver.resolve_parent("/a/new").unwrap();
        assert!(lookup.child.is_none());
        assert_eq!(lookup.child_path(), "/a/new");
    }

    #[test]
    fn test_files_cannot_be_traversed() {
        let mut table = InodeTable::new(0o755, 0, 0);
        let root = table.root();
        add(&mut table, root, "f", InodeKind::File);
        let policy = root_policy();
        let resolver = Resolver::new(&table, &policy, 40);
        assert!(matches!(resolver.resolve("/f/x", TrailingLink::Follow), Err(FsError::NotADirectory)));
        assert!(matches!(resolver.resolve("/f/", TrailingLink::Preserve), Err(FsError::NotADirectory)));
        assert!(matches!(resolver.resolve_parent("/f/x"), Err(FsError::NotADirectory)));
    }

    #[test]
    fn test_search_permission_is_reported_after_structure() {
        let mut table = InodeTable::new(0o755, 0, 0);
        let locked = mkdirs(&mut table, &["locked"]);
        table.get_mut(locked).unwrap().chmod(0o600);
        add(&mut table, locked, "file", InodeKind::File);

        let policy = SecurityPolicy {
            uid: 1000,
            gid: 1000,
            ..SecurityPolicy::default()
        };
        let resolver = Resolver::new(&table, &policy, 40);
        assert!(matches!(
            resolver.resolve("/locked/file", TrailingLink::Follow),
            Err(FsError::AccessDenied)
        ));
        // a structural failure takes precedence over the denial
        assert!(matches!(
            resolver.resolve("/locked/missing", TrailingLink::Follow),
            Err(FsError::NotFound)
        ));
        assert!(matches!(
            resolver.resolve("/locked/file/x", TrailingLink::Follow),
            Err(FsError::NotADirectory)
        ));
        assert!(matches!(resolver.resolve("", TrailingLink::Follow), Err(FsError::InvalidName)));
    }
}
