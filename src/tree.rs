//! Filesystem trees built from layer tar streams.
//!
//! A [`FileNode`] tree represents the contents of a single layer or the
//! cumulative filesystem after merging several layers. Trees are built once,
//! sorted, and never mutated afterwards.

use std::collections::HashMap;
use std::io::Read;

use serde::{Deserialize, Serialize};
use tar::Archive;

use crate::error::{AnalysisError, Result};

/// Default hop budget for [`resolve_symlink`].
pub const DEFAULT_MAX_HOPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Dir,
    Symlink,
}

/// A single node in a layer or cumulative filesystem tree.
///
/// Every non-root node's `path` is `join(parent.path, name)`. Directory
/// children are uniquely keyed by name and sorted directories-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link_target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
}

impl FileNode {
    /// The empty root directory node (`name="/"`, `path="/"`).
    pub fn root() -> Self {
        FileNode {
            name: "/".to_string(),
            path: "/".to_string(),
            file_type: FileType::Dir,
            size: 0,
            link_target: String::new(),
            children: Vec::new(),
        }
    }

    fn dir(name: &str, path: &str) -> Self {
        FileNode {
            name: name.to_string(),
            path: path.to_string(),
            file_type: FileType::Dir,
            size: 0,
            link_target: String::new(),
            children: Vec::new(),
        }
    }
}

/// Cleans a tar header name into an absolute canonical path: `.` and `..`
/// resolve textually, repeated slashes collapse, and the result always starts
/// with `/`. Idempotent.
pub fn canonicalize_path(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Returns the parent directory of a canonical absolute path.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) if path.len() > 1 => &path[i + 1..],
        _ => "/",
    }
}

/// Reads one uncompressed layer tar and builds its [`FileNode`] tree.
///
/// Entries that are not regular files, directories, or symlinks are skipped.
/// Whiteout markers are kept verbatim as regular files; the merger interprets
/// them. A later entry for an already-seen path replaces the earlier node in
/// place.
pub fn build_layer_tree<R: Read>(reader: R) -> Result<FileNode> {
    let mut root = FileNode::root();
    let mut archive = Archive::new(reader);

    for entry in archive.entries()? {
        let entry = entry?;

        let entry_type = entry.header().entry_type();
        let file_type = if entry_type.is_dir() {
            FileType::Dir
        } else if entry_type.is_symlink() {
            FileType::Symlink
        } else if entry_type.is_file() {
            FileType::File
        } else {
            continue;
        };

        let clean = canonicalize_path(&entry.path()?.to_string_lossy());
        if clean == "/" {
            continue;
        }

        let link_target = entry
            .link_name()?
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        let node = FileNode {
            name: base_name(&clean).to_string(),
            path: clean,
            file_type,
            size: if file_type == FileType::File {
                entry.size()
            } else {
                0
            },
            link_target,
            children: Vec::new(),
        };

        insert_node(&mut root, node);
    }

    sort_tree(&mut root);
    Ok(root)
}

/// Inserts `node` under `root`, synthesizing missing ancestor directories.
fn insert_node(root: &mut FileNode, node: FileNode) {
    let parent = ensure_parents(root, &node.path);
    match parent.children.iter_mut().find(|c| c.name == node.name) {
        // Duplicate path within one layer: later entry wins, same position
        Some(existing) => *existing = node,
        None => parent.children.push(node),
    }
}

fn ensure_parents<'a>(root: &'a mut FileNode, path: &str) -> &'a mut FileNode {
    let dir = parent_path(path);
    let mut current = root;
    if dir == "/" {
        return current;
    }

    let mut prefix = String::new();
    for segment in dir[1..].split('/') {
        prefix.push('/');
        prefix.push_str(segment);
        let idx = match current.children.iter().position(|c| c.name == segment) {
            Some(i) => i,
            None => {
                current.children.push(FileNode::dir(segment, &prefix));
                current.children.len() - 1
            }
        };
        current = &mut current.children[idx];
    }
    current
}

/// Recursively sorts every directory's children: directories first, then
/// files, lexicographic within each group.
pub fn sort_tree(node: &mut FileNode) {
    node.children.sort_by(|a, b| {
        let a_dir = a.file_type == FileType::Dir;
        let b_dir = b.file_type == FileType::Dir;
        b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
    });
    for child in &mut node.children {
        sort_tree(child);
    }
}

/// Builds a transient path → node index over the whole tree.
pub fn build_path_lookup(root: &FileNode) -> HashMap<&str, &FileNode> {
    fn walk<'a>(node: &'a FileNode, lookup: &mut HashMap<&'a str, &'a FileNode>) {
        lookup.insert(node.path.as_str(), node);
        for child in &node.children {
            walk(child, lookup);
        }
    }

    let mut lookup = HashMap::new();
    walk(root, &mut lookup);
    lookup
}

/// Follows symlink chains starting at `file_path`, returning the first
/// non-symlink path reached. A path with no node fails as dangling; more than
/// `max_hops` hops (0 means [`DEFAULT_MAX_HOPS`]) fails as a cycle.
pub fn resolve_symlink(root: &FileNode, file_path: &str, max_hops: usize) -> Result<String> {
    let max_hops = if max_hops == 0 {
        DEFAULT_MAX_HOPS
    } else {
        max_hops
    };
    let lookup = build_path_lookup(root);

    let mut current = file_path.to_string();
    for _ in 0..max_hops {
        let node = lookup
            .get(current.as_str())
            .ok_or_else(|| AnalysisError::DanglingSymlink(current.clone()))?;
        if node.file_type != FileType::Symlink {
            return Ok(current);
        }
        let target = if node.link_target.starts_with('/') {
            node.link_target.clone()
        } else {
            format!("{}/{}", parent_path(&current), node.link_target)
        };
        current = canonicalize_path(&target);
    }

    Err(AnalysisError::SymlinkCycle {
        path: file_path.to_string(),
        max_hops,
    })
}
