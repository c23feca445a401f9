//! Bulk image analysis: correlates history with content layers, builds the
//! cumulative tree at every history index, and computes per-layer diffs.
//!
//! The resulting [`Image`] is immutable and safe for unbounded concurrent
//! readers; only [`Image::read_file`] touches the layer blobs again.

use std::fmt::Write as _;
use std::io::Read;
use std::sync::Arc;

use tar::Archive;

use crate::diff::{compute_diff, DiffEntry};
use crate::error::{AnalysisError, Result};
use crate::extracted_image::{ExtractedImage, LayerHandle};
use crate::merge::merge_trees;
use crate::metadata::{config_from_oci, FileContent, ImageInfo, LayerInfo};
use crate::tree::{build_layer_tree, canonicalize_path, FileNode};

/// Text content is cut at 1 MiB.
pub const MAX_TEXT_BYTES: usize = 1 << 20;
/// Binary content is cut at 16 KiB before hex encoding.
pub const MAX_BINARY_BYTES: usize = 16 << 10;

const BINARY_SNIFF_BYTES: usize = 8192;

/// A fully analyzed image. Trees and diffs are indexed by history slot;
/// empty slots share the previous slot's tree by `Arc` identity.
pub struct Image {
    info: ImageInfo,
    layers: Vec<LayerInfo>,
    trees: Vec<Option<Arc<FileNode>>>,
    diffs: Vec<Vec<DiffEntry>>,
    source: ExtractedImage,
}

/// Runs the whole analysis pipeline over a loaded image.
pub fn analyze(source: ExtractedImage, reference: &str) -> Result<Image> {
    let config = source.config_file();
    let handles = source.layers();

    let (layer_infos, empty_flags) = correlate_history(&source, handles);

    let trees = build_cumulative_trees(handles, &empty_flags)?;

    let mut diffs = Vec::with_capacity(trees.len());
    for i in 0..trees.len() {
        let prev = if i == 0 {
            None
        } else {
            trees[i - 1].as_deref()
        };
        diffs.push(compute_diff(prev, trees[i].as_deref()));
    }

    let info = ImageInfo {
        reference: reference.to_string(),
        digest: source.digest().to_string(),
        arch: config.architecture().to_string(),
        os: config.os().to_string(),
        config: config_from_oci(config),
        layer_count: layer_infos.len(),
    };

    Ok(Image {
        info,
        layers: layer_infos,
        trees,
        diffs,
        source,
    })
}

/// Aligns history entries with content layers using a two-pointer walk.
///
/// History entries flagged empty consume no content layer. Entries past the
/// end of the content list (a malformed image) are promoted to empty. An
/// image with no history at all gets one synthetic non-empty entry per
/// content layer.
fn correlate_history(
    source: &ExtractedImage,
    handles: &[LayerHandle],
) -> (Vec<LayerInfo>, Vec<bool>) {
    let history = source.config_file().history().clone().unwrap_or_default();

    let mut layer_infos = Vec::new();
    let mut empty_flags = Vec::new();
    let mut content_idx = 0;

    for (i, h) in history.iter().enumerate() {
        let mut info = LayerInfo {
            index: i,
            diff_id: String::new(),
            size: 0,
            command: h.created_by().clone().unwrap_or_default(),
            empty: h.empty_layer().unwrap_or(false),
        };
        if info.empty {
            empty_flags.push(true);
        } else if content_idx < handles.len() {
            info.diff_id = handles[content_idx].diff_id().to_string();
            info.size = handles[content_idx].size();
            empty_flags.push(false);
            content_idx += 1;
        } else {
            info.empty = true;
            empty_flags.push(true);
        }
        layer_infos.push(info);
    }

    if history.is_empty() {
        for (i, handle) in handles.iter().enumerate() {
            layer_infos.push(LayerInfo {
                index: i,
                diff_id: handle.diff_id().to_string(),
                size: handle.size(),
                command: String::new(),
                empty: false,
            });
            empty_flags.push(false);
        }
    }

    (layer_infos, empty_flags)
}

/// Builds the cumulative filesystem tree for each history slot. Empty slots
/// (and slots past the last content layer) alias the previous tree.
fn build_cumulative_trees(
    handles: &[LayerHandle],
    empty_flags: &[bool],
) -> Result<Vec<Option<Arc<FileNode>>>> {
    let mut trees = Vec::with_capacity(empty_flags.len());
    let mut prev: Option<Arc<FileNode>> = None;
    let mut layer_idx = 0;

    for &empty in empty_flags {
        if empty || layer_idx >= handles.len() {
            trees.push(prev.clone());
            continue;
        }
        let built = build_layer_tree(handles[layer_idx].uncompressed()?)?;
        let merged = match &prev {
            None => built,
            Some(base) => merge_trees(base, &built),
        };
        let tree = Arc::new(merged);
        prev = Some(tree.clone());
        trees.push(Some(tree));
        layer_idx += 1;
    }

    Ok(trees)
}

impl Image {
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn layers(&self) -> &[LayerInfo] {
        &self.layers
    }

    /// The cumulative tree at history index `idx`. `None` for leading empty
    /// slots that precede any content layer.
    pub fn tree(&self, idx: usize) -> Result<Option<&Arc<FileNode>>> {
        self.check_index(idx)?;
        Ok(self.trees[idx].as_ref())
    }

    /// The changeset between history index `idx` and its predecessor.
    pub fn diff(&self, idx: usize) -> Result<&[DiffEntry]> {
        self.check_index(idx)?;
        Ok(&self.diffs[idx])
    }

    /// Reads file content as visible at history index `layer_idx`, searching
    /// backward through content layers for the most recent entry at `path`.
    ///
    /// The backward scan does not consult whiteouts; a path deleted by a
    /// higher layer still resolves to the shadowed bytes. Callers that need
    /// tree-visible semantics should check [`Image::tree`] first.
    pub fn read_file(&self, layer_idx: usize, path: &str) -> Result<FileContent> {
        self.check_index(layer_idx)?;

        let clean = canonicalize_path(path);
        let handles = self.source.layers();

        // Translate the history index to a content layer index
        let mut content_idx: isize = -1;
        for info in &self.layers[..=layer_idx] {
            if !info.empty {
                content_idx += 1;
            }
        }

        let mut ci = content_idx;
        while ci >= 0 {
            match scan_layer_tar(&handles[ci as usize], &clean)? {
                TarHit::Found { data, size } => return Ok(frame_content(clean, data, size)),
                TarHit::NotARegularFile => return Err(AnalysisError::NotARegularFile(clean)),
                TarHit::Missing => ci -= 1,
            }
        }

        Err(AnalysisError::FileNotFound(path.to_string()))
    }

    fn check_index(&self, idx: usize) -> Result<()> {
        if idx >= self.layers.len() {
            return Err(AnalysisError::LayerOutOfRange {
                index: idx,
                count: self.layers.len(),
            });
        }
        Ok(())
    }
}

enum TarHit {
    Found { data: Vec<u8>, size: u64 },
    NotARegularFile,
    Missing,
}

/// Scans one layer tar for an entry whose canonical name equals `path`.
fn scan_layer_tar(handle: &LayerHandle, path: &str) -> Result<TarHit> {
    let mut archive = Archive::new(handle.uncompressed()?);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let clean = canonicalize_path(&entry.path()?.to_string_lossy());
        if clean != path {
            continue;
        }
        if !entry.header().entry_type().is_file() {
            return Ok(TarHit::NotARegularFile);
        }
        let size = entry.size();
        let mut data = Vec::with_capacity(size as usize);
        entry.read_to_end(&mut data)?;
        return Ok(TarHit::Found { data, size });
    }
    Ok(TarHit::Missing)
}

/// Classifies and truncates raw bytes into a displayable [`FileContent`].
fn frame_content(path: String, mut data: Vec<u8>, size: u64) -> FileContent {
    let is_binary = is_binary(&data);
    let mut truncated = false;

    let content = if is_binary {
        if data.len() > MAX_BINARY_BYTES {
            data.truncate(MAX_BINARY_BYTES);
            truncated = true;
        }
        hex_encode(&data)
    } else {
        if data.len() > MAX_TEXT_BYTES {
            data.truncate(MAX_TEXT_BYTES);
            truncated = true;
        }
        String::from_utf8_lossy(&data).into_owned()
    };

    FileContent {
        path,
        size,
        is_binary,
        truncated,
        content,
    }
}

/// A NUL byte within the first 8 KiB marks the content as binary.
fn is_binary(data: &[u8]) -> bool {
    data.iter().take(BINARY_SNIFF_BYTES).any(|&b| b == 0)
}

fn hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_byte_marks_binary() {
        assert!(is_binary(b"ab\x00cd"));
        assert!(!is_binary(b"plain text\n"));
    }

    #[test]
    fn nul_byte_past_sniff_window_is_ignored() {
        let mut data = vec![b'a'; BINARY_SNIFF_BYTES];
        data.push(0);
        assert!(!is_binary(&data));
    }

    #[test]
    fn text_content_is_passed_through() {
        let fc = frame_content("/etc/hello".into(), b"hello\n".to_vec(), 6);
        assert!(!fc.is_binary);
        assert!(!fc.truncated);
        assert_eq!(fc.content, "hello\n");
        assert_eq!(fc.size, 6);
    }

    #[test]
    fn binary_content_is_hex_encoded() {
        let fc = frame_content("/bin/app".into(), vec![0x00, 0xff, 0x10], 3);
        assert!(fc.is_binary);
        assert_eq!(fc.content, "00ff10");
    }

    #[test]
    fn long_binary_content_truncates_at_limit() {
        let data = vec![0u8; MAX_BINARY_BYTES + 100];
        let size = data.len() as u64;
        let fc = frame_content("/blob".into(), data, size);
        assert!(fc.truncated);
        assert_eq!(fc.content.len(), MAX_BINARY_BYTES * 2);
        assert_eq!(fc.size, size);
    }

    #[test]
    fn long_text_content_truncates_at_limit() {
        let data = vec![b'x'; MAX_TEXT_BYTES + 1];
        let fc = frame_content("/big.txt".into(), data, (MAX_TEXT_BYTES + 1) as u64);
        assert!(fc.truncated);
        assert!(!fc.is_binary);
        assert_eq!(fc.content.len(), MAX_TEXT_BYTES);
    }
}
