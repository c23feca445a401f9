//! Changesets between two adjacent cumulative trees.

use serde::{Deserialize, Serialize};

use crate::tree::{FileNode, FileType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub change_kind: ChangeKind,
    pub size: u64,
}

/// Walks two cumulative trees and reports added, modified, and deleted
/// entries. A `None` side treats every entry of the other side as added or
/// deleted respectively.
pub fn compute_diff(prev: Option<&FileNode>, curr: Option<&FileNode>) -> Vec<DiffEntry> {
    let mut diffs = Vec::new();
    match (prev, curr) {
        (None, None) => {}
        (None, Some(c)) => collect_all(c, ChangeKind::Added, &mut diffs),
        (Some(p), None) => collect_all(p, ChangeKind::Deleted, &mut diffs),
        (Some(p), Some(c)) => diff_walk(p, c, &mut diffs),
    }
    diffs
}

fn diff_walk(prev: &FileNode, curr: &FileNode, diffs: &mut Vec<DiffEntry>) {
    // Additions and modifications, driven by the curr side
    for cn in &curr.children {
        let Some(pn) = prev.children.iter().find(|p| p.name == cn.name) else {
            collect_all(cn, ChangeKind::Added, diffs);
            continue;
        };
        if cn.file_type != pn.file_type || cn.size != pn.size || cn.link_target != pn.link_target {
            diffs.push(DiffEntry {
                path: cn.path.clone(),
                file_type: cn.file_type,
                change_kind: ChangeKind::Modified,
                size: cn.size,
            });
        }
        if cn.file_type == FileType::Dir && pn.file_type == FileType::Dir {
            diff_walk(pn, cn, diffs);
        }
    }

    // Deletions, driven by the prev side
    for pn in &prev.children {
        if !curr.children.iter().any(|c| c.name == pn.name) {
            collect_all(pn, ChangeKind::Deleted, diffs);
        }
    }
}

fn collect_all(node: &FileNode, kind: ChangeKind, diffs: &mut Vec<DiffEntry>) {
    if node.path != "/" {
        diffs.push(DiffEntry {
            path: node.path.clone(),
            file_type: node.file_type,
            change_kind: kind,
            size: node.size,
        });
    }
    for child in &node.children {
        collect_all(child, kind, diffs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, path: &str, size: u64) -> FileNode {
        FileNode {
            name: name.into(),
            path: path.into(),
            file_type: FileType::File,
            size,
            link_target: String::new(),
            children: Vec::new(),
        }
    }

    fn dir(name: &str, path: &str, children: Vec<FileNode>) -> FileNode {
        FileNode {
            name: name.into(),
            path: path.into(),
            file_type: FileType::Dir,
            size: 0,
            link_target: String::new(),
            children,
        }
    }

    fn root_with(children: Vec<FileNode>) -> FileNode {
        let mut root = FileNode::root();
        root.children = children;
        root
    }

    #[test]
    fn missing_prev_means_everything_added() {
        let curr = root_with(vec![file("a", "/a", 1)]);
        let diffs = compute_diff(None, Some(&curr));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].change_kind, ChangeKind::Added);
        assert_eq!(diffs[0].path, "/a");
    }

    #[test]
    fn reports_added_modified_and_deleted() {
        let prev = root_with(vec![
            file("same", "/same", 10),
            file("mod", "/mod", 5),
            file("gone", "/gone", 3),
        ]);
        let curr = root_with(vec![
            file("same", "/same", 10),
            file("mod", "/mod", 99),
            file("new", "/new", 7),
        ]);
        let diffs = compute_diff(Some(&prev), Some(&curr));
        let count = |kind| diffs.iter().filter(|d| d.change_kind == kind).count();
        assert_eq!(count(ChangeKind::Added), 1);
        assert_eq!(count(ChangeKind::Modified), 1);
        assert_eq!(count(ChangeKind::Deleted), 1);
    }

    #[test]
    fn recurses_into_shared_directories() {
        let prev = root_with(vec![dir("d", "/d", vec![file("f", "/d/f", 1)])]);
        let curr = root_with(vec![dir(
            "d",
            "/d",
            vec![file("f", "/d/f", 1), file("g", "/d/g", 2)],
        )]);
        let diffs = compute_diff(Some(&prev), Some(&curr));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "/d/g");
        assert_eq!(diffs[0].change_kind, ChangeKind::Added);
    }

    #[test]
    fn identical_trees_produce_no_diff() {
        let tree = root_with(vec![file("x", "/x", 1)]);
        assert!(compute_diff(Some(&tree), Some(&tree)).is_empty());
    }

    #[test]
    fn link_target_change_is_a_modification() {
        let mut a = file("l", "/l", 0);
        a.file_type = FileType::Symlink;
        a.link_target = "/old".into();
        let mut b = a.clone();
        b.link_target = "/new".into();
        let diffs = compute_diff(Some(&root_with(vec![a])), Some(&root_with(vec![b])));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].change_kind, ChangeKind::Modified);
    }

    #[test]
    fn deleted_directory_reports_descendants() {
        let prev = root_with(vec![dir("d", "/d", vec![file("f", "/d/f", 1)])]);
        let curr = FileNode::root();
        let diffs = compute_diff(Some(&prev), Some(&curr));
        let paths: Vec<&str> = diffs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["/d", "/d/f"]);
        assert!(diffs.iter().all(|d| d.change_kind == ChangeKind::Deleted));
    }
}
