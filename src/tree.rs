//! In-memory change trees.
//!
//! Each side of a sync run (local and remote) is condensed into a tree of
//! per-path verdicts before the planner merges them. A node records what
//! the path is (file or directory), what happened to it since the last run
//! and the metadata needed to act on that verdict.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::path::{join_name, segments};

/// What happened to a path since the last sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangeKind {
    /// No change detected (or the path only appears as a container for
    /// changed descendants).
    #[default]
    Unknown,
    /// The path did not exist at the last run.
    Created,
    /// The path existed and its content changed.
    Changed,
    /// The path existed and is gone.
    Deleted,
}

/// The kind of filesystem object a node describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeKind {
    #[default]
    Invalid,
    Directory,
    File,
}

/// One node of a [`ChangeTree`].
///
/// The meaning of `modified` and `sync_attribute` depends on the change:
/// for locally created/changed entries `modified` is the new local mtime;
/// for remotely created/changed entries `sync_attribute` is the new remote
/// attribute; for deleted entries both carry the previously stored values.
#[derive(Debug, Clone, Default)]
pub struct ChangeNode {
    pub kind: NodeKind,
    pub change: ChangeKind,
    pub modified: Option<DateTime<Utc>>,
    pub sync_attribute: String,
    pub children: BTreeMap<String, ChangeNode>,
}

impl ChangeNode {
    /// BFS over the subtree (including `self`) for the first node matching
    /// the filter.
    pub fn find(&self, filter: impl Fn(&ChangeNode) -> bool) -> Option<&ChangeNode> {
        let mut queue = VecDeque::new();
        queue.push_back(self);
        while let Some(node) = queue.pop_front() {
            if filter(node) {
                return Some(node);
            }
            queue.extend(node.children.values());
        }
        None
    }

    /// Whether the subtree contains a node with the given change.
    pub fn has_change(&self, change: ChangeKind) -> bool {
        self.find(|n| n.change == change).is_some()
    }

    /// Whether the subtree contains any change at all.
    pub fn has_any_change(&self) -> bool {
        self.find(|n| n.change != ChangeKind::Unknown).is_some()
    }

    fn normalize(&mut self) {
        let mut has_child_changes = false;
        for child in self.children.values_mut() {
            child.normalize();
            if matches!(child.change, ChangeKind::Created | ChangeKind::Changed) {
                has_child_changes = true;
            }
        }
        // A subtree with live descendants cannot itself be absent.
        if has_child_changes
            && matches!(self.change, ChangeKind::Deleted | ChangeKind::Unknown)
        {
            self.change = ChangeKind::Changed;
        }
    }

    fn dump_into(&self, name: &str, indent: usize, out: &mut String) {
        let kind = match self.kind {
            NodeKind::Invalid => ' ',
            NodeKind::Directory => 'D',
            NodeKind::File => 'F',
        };
        let change = match self.change {
            ChangeKind::Unknown => '?',
            ChangeKind::Created => 'N',
            ChangeKind::Changed => 'U',
            ChangeKind::Deleted => 'D',
        };
        let mtime = self
            .modified
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        out.push_str(&format!(
            "{}{} {} {} {} {}\n",
            " ".repeat(indent),
            kind,
            change,
            name,
            mtime,
            self.sync_attribute
        ));
        for (child_name, child) in &self.children {
            child.dump_into(child_name, indent + 4, out);
        }
    }
}

/// A tree of per-path change verdicts for one side of a sync run.
#[derive(Debug, Clone)]
pub struct ChangeTree {
    root: ChangeNode,
}

impl Default for ChangeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTree {
    pub fn new() -> Self {
        Self {
            root: ChangeNode {
                kind: NodeKind::Directory,
                ..ChangeNode::default()
            },
        }
    }

    pub fn root(&self) -> &ChangeNode {
        &self.root
    }

    /// Look up the node at a canonical path.
    pub fn node(&self, path: &str) -> Option<&ChangeNode> {
        let mut node = &self.root;
        for part in segments(path) {
            node = node.children.get(&part)?;
        }
        Some(node)
    }

    /// Look up the node at a canonical path, creating it (and directory
    /// nodes for all intermediate segments) if missing.
    pub fn node_mut(&mut self, path: &str) -> &mut ChangeNode {
        let parts = segments(path);
        let last = parts.len().saturating_sub(1);
        let mut node = &mut self.root;
        for (index, part) in parts.into_iter().enumerate() {
            node = node.children.entry(part).or_default();
            if index < last {
                node.kind = NodeKind::Directory;
            }
        }
        node
    }

    /// Propagate the normalization invariant: no node stays marked deleted
    /// or unknown while a descendant is created or changed.
    pub fn normalize(&mut self) {
        self.root.normalize();
    }

    /// Union of two nodes' child names, each prefixed with the parent path.
    /// Either node may be absent.
    pub fn merged_child_names(
        first: Option<&ChangeNode>,
        second: Option<&ChangeNode>,
        prefix: &str,
    ) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for node in [first, second].into_iter().flatten() {
            for name in node.children.keys() {
                names.insert(join_name(prefix, name));
            }
        }
        names
    }

    /// Log the tree at trace level. Debug aid for writing tests against
    /// the planner.
    pub fn dump(&self, label: &str) {
        if tracing::enabled!(tracing::Level::TRACE) {
            let mut out = String::new();
            for (name, child) in &self.root.children {
                child.dump_into(name, 0, &mut out);
            }
            tracing::trace!("{label}:\n{out}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_mut_creates_directory_intermediates() {
        let mut tree = ChangeTree::new();
        let node = tree.node_mut("/a/b/c.txt");
        node.kind = NodeKind::File;
        node.change = ChangeKind::Created;

        let a = tree.node("/a").unwrap();
        assert_eq!(a.kind, NodeKind::Directory);
        let c = tree.node("/a/b/c.txt").unwrap();
        assert_eq!(c.kind, NodeKind::File);
        assert_eq!(c.change, ChangeKind::Created);
    }

    #[test]
    fn node_returns_none_for_missing_paths() {
        let tree = ChangeTree::new();
        assert!(tree.node("/missing").is_none());
    }

    #[test]
    fn normalize_promotes_deleted_ancestor_of_created_node() {
        let mut tree = ChangeTree::new();
        tree.node_mut("/dir").change = ChangeKind::Deleted;
        tree.node_mut("/dir/new.txt").change = ChangeKind::Created;

        tree.normalize();

        assert_eq!(tree.node("/dir").unwrap().change, ChangeKind::Changed);
    }

    #[test]
    fn normalize_keeps_deleted_leafs() {
        let mut tree = ChangeTree::new();
        tree.node_mut("/dir").change = ChangeKind::Deleted;
        tree.node_mut("/dir/old.txt").change = ChangeKind::Deleted;

        tree.normalize();

        assert_eq!(tree.node("/dir").unwrap().change, ChangeKind::Deleted);
    }

    #[test]
    fn has_change_searches_subtree() {
        let mut tree = ChangeTree::new();
        tree.node_mut("/a/deep/file").change = ChangeKind::Created;

        let a = tree.node("/a").unwrap();
        assert!(a.has_change(ChangeKind::Created));
        assert!(!a.has_change(ChangeKind::Deleted));
        assert!(a.has_any_change());
    }

    #[test]
    fn merged_child_names_unions_both_sides() {
        let mut local = ChangeTree::new();
        local.node_mut("/a").change = ChangeKind::Created;
        let mut remote = ChangeTree::new();
        remote.node_mut("/b").change = ChangeKind::Created;

        let names =
            ChangeTree::merged_child_names(Some(local.root()), Some(remote.root()), "/");
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["/a".to_string(), "/b".to_string()]
        );
    }
}
