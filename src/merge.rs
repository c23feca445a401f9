//! Merging an overlay layer tree onto a base cumulative tree.
//!
//! Whiteout markers use the OverlayFS naming convention: `.wh.X` deletes `X`
//! at the same directory level, and the sentinel `.wh..wh..opq` clears every
//! inherited entry in its directory before the rest of the overlay applies.

use crate::tree::{sort_tree, FileNode, FileType};

/// Prefix marking a deletion of the suffixed name.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Sentinel clearing all inherited entries in the containing directory.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Produces a new cumulative tree from `base` with `overlay` applied on top.
/// Neither input is mutated.
pub fn merge_trees(base: &FileNode, overlay: &FileNode) -> FileNode {
    let mut merged = base.clone();
    apply_overlay(&mut merged, overlay);
    sort_tree(&mut merged);
    merged
}

fn apply_overlay(base: &mut FileNode, overlay: &FileNode) {
    if overlay.children.iter().any(|c| c.name == OPAQUE_WHITEOUT) {
        base.children.clear();
    }

    for oc in &overlay.children {
        if oc.name == OPAQUE_WHITEOUT {
            continue;
        }

        // Individual whiteout: .wh.NAME deletes NAME, marker itself dropped
        if let Some(target) = oc.name.strip_prefix(WHITEOUT_PREFIX) {
            base.children.retain(|c| c.name != target);
            continue;
        }

        match base.children.iter_mut().find(|c| c.name == oc.name) {
            None => base.children.push(oc.clone()),
            Some(existing) => {
                if existing.file_type == FileType::Dir && oc.file_type == FileType::Dir {
                    apply_overlay(existing, oc);
                } else {
                    // File over file, or any type mismatch: overlay wins
                    *existing = oc.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, path: &str, file_type: FileType, size: u64) -> FileNode {
        FileNode {
            name: name.into(),
            path: path.into(),
            file_type,
            size,
            link_target: String::new(),
            children: Vec::new(),
        }
    }

    fn root_with(children: Vec<FileNode>) -> FileNode {
        let mut root = FileNode::root();
        root.children = children;
        root
    }

    #[test]
    fn opaque_whiteout_clears_base_level() {
        let base = root_with(vec![
            node("a", "/a", FileType::File, 1),
            node("b", "/b", FileType::File, 2),
        ]);
        let overlay = root_with(vec![
            node(OPAQUE_WHITEOUT, "/.wh..wh..opq", FileType::File, 0),
            node("c", "/c", FileType::File, 3),
        ]);
        let merged = merge_trees(&base, &overlay);
        assert_eq!(merged.children.len(), 1);
        assert_eq!(merged.children[0].name, "c");
    }

    #[test]
    fn individual_whiteout_removes_named_child() {
        let base = root_with(vec![
            node("keep", "/keep", FileType::File, 0),
            node("remove", "/remove", FileType::File, 0),
        ]);
        let overlay = root_with(vec![node(".wh.remove", "/.wh.remove", FileType::File, 0)]);
        let merged = merge_trees(&base, &overlay);
        assert_eq!(merged.children.len(), 1);
        assert_eq!(merged.children[0].name, "keep");
    }

    #[test]
    fn matching_directories_merge_recursively() {
        let mut base_dir = node("dir", "/dir", FileType::Dir, 0);
        base_dir.children = vec![node("old", "/dir/old", FileType::File, 0)];
        let mut overlay_dir = node("dir", "/dir", FileType::Dir, 0);
        overlay_dir.children = vec![node("new", "/dir/new", FileType::File, 0)];

        let merged = merge_trees(&root_with(vec![base_dir]), &root_with(vec![overlay_dir]));
        assert_eq!(merged.children[0].children.len(), 2);
    }

    #[test]
    fn overlay_file_replaces_base_directory() {
        let mut base_dir = node("x", "/x", FileType::Dir, 0);
        base_dir.children = vec![node("child", "/x/child", FileType::File, 0)];
        let overlay = root_with(vec![node("x", "/x", FileType::File, 99)]);

        let merged = merge_trees(&root_with(vec![base_dir]), &overlay);
        assert_eq!(merged.children[0].file_type, FileType::File);
        assert_eq!(merged.children[0].size, 99);
        assert!(merged.children[0].children.is_empty());
    }

    #[test]
    fn new_overlay_entries_append() {
        let base = FileNode::root();
        let overlay = root_with(vec![node("new", "/new", FileType::File, 10)]);
        let merged = merge_trees(&base, &overlay);
        assert_eq!(merged.children.len(), 1);
        assert_eq!(merged.children[0].name, "new");
    }

    #[test]
    fn inputs_survive_merging() {
        let base = root_with(vec![node("a", "/a", FileType::File, 1)]);
        let overlay = root_with(vec![node(".wh.a", "/.wh.a", FileType::File, 0)]);
        let _ = merge_trees(&base, &overlay);
        assert_eq!(base.children.len(), 1);
        assert_eq!(overlay.children.len(), 1);
    }
}
