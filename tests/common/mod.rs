//! Helpers for fabricating synthetic docker-save image tarballs.

use std::path::{Path, PathBuf};

use serde_json::json;
use sha2::{Digest, Sha256};
use tar::{Builder, EntryType, Header};

pub struct TarEntry {
    name: String,
    entry_type: EntryType,
    data: Vec<u8>,
    link: String,
}

pub fn file(name: &str, data: &[u8]) -> TarEntry {
    TarEntry {
        name: name.to_string(),
        entry_type: EntryType::Regular,
        data: data.to_vec(),
        link: String::new(),
    }
}

pub fn dir(name: &str) -> TarEntry {
    TarEntry {
        name: name.to_string(),
        entry_type: EntryType::Directory,
        data: Vec::new(),
        link: String::new(),
    }
}

pub fn symlink(name: &str, target: &str) -> TarEntry {
    TarEntry {
        name: name.to_string(),
        entry_type: EntryType::Symlink,
        data: Vec::new(),
        link: target.to_string(),
    }
}

/// Builds one uncompressed layer tar in memory.
pub fn layer_tar(entries: &[TarEntry]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for entry in entries {
        let mut header = Header::new_gnu();
        header.set_entry_type(entry.entry_type);
        header.set_mode(if entry.entry_type == EntryType::Directory {
            0o755
        } else {
            0o644
        });
        header.set_size(entry.data.len() as u64);
        if entry.entry_type == EntryType::Symlink {
            builder
                .append_link(&mut header, &entry.name, &entry.link)
                .unwrap();
        } else {
            builder
                .append_data(&mut header, &entry.name, entry.data.as_slice())
                .unwrap();
        }
    }
    builder.into_inner().unwrap()
}

/// Writes a docker-save-style image tarball into `dir` and returns its path.
///
/// `history` pairs a `created_by` command with an `empty_layer` flag; the
/// non-empty slots must match `layers` in order. An empty `history` slice
/// omits the history field entirely.
pub fn write_image_tarball(dir: &Path, layers: &[Vec<u8>], history: &[(&str, bool)]) -> PathBuf {
    let diff_ids: Vec<String> = layers
        .iter()
        .map(|l| format!("sha256:{:x}", Sha256::digest(l)))
        .collect();

    let mut config = json!({
        "architecture": "amd64",
        "os": "linux",
        "config": {
            "Env": ["A=1"],
            "Cmd": ["/app"],
        },
        "rootfs": {"type": "layers", "diff_ids": diff_ids},
    });
    if !history.is_empty() {
        config["history"] = history
            .iter()
            .map(|(created_by, empty)| json!({"created_by": created_by, "empty_layer": empty}))
            .collect();
    }
    let config_bytes = serde_json::to_vec(&config).unwrap();

    let layer_names: Vec<String> = (0..layers.len())
        .map(|i| format!("{i}/layer.tar"))
        .collect();
    let manifest = json!([{
        "Config": "config.json",
        "Layers": layer_names,
        "RepoTags": ["test:latest"],
    }]);
    let manifest_bytes = serde_json::to_vec(&manifest).unwrap();

    let tarball_path = dir.join("image.tar");
    let mut builder = Builder::new(std::fs::File::create(&tarball_path).unwrap());
    append(&mut builder, "config.json", &config_bytes);
    for (name, data) in layer_names.iter().zip(layers) {
        append(&mut builder, name, data);
    }
    append(&mut builder, "manifest.json", &manifest_bytes);
    builder.finish().unwrap();

    tarball_path
}

fn append<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, name, data).unwrap();
}
