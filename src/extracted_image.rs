//! The loader handle: a docker-save or OCI-layout tarball extracted to a
//! temp directory, with the manifest, configuration, and layer blobs resolved.
//!
//! [`ExtractedImage`] is eager: everything except layer tar *contents* is
//! read at construction time, so the accessors are infallible and cheap.
//! Layer contents stay on disk and are re-opened per scan through
//! [`LayerHandle::uncompressed`].

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use oci_spec::image::ImageConfiguration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tar::Archive;
use tempfile::TempDir;

use crate::error::{AnalysisError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One entry of a docker-save `manifest.json`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DockerManifestEntry {
    #[serde(rename = "Config")]
    pub config: String,
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Vec<String>,
}

#[derive(Deserialize)]
struct OciIndex {
    manifests: Vec<OciDescriptor>,
}

#[derive(Deserialize)]
struct OciDescriptor {
    digest: String,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize)]
struct OciManifest {
    config: OciDescriptor,
    layers: Vec<OciDescriptor>,
}

/// Handle onto one content layer blob on disk.
#[derive(Debug, Clone)]
pub struct LayerHandle {
    blob_path: PathBuf,
    diff_id: String,
    size: u64,
}

impl LayerHandle {
    /// Opens the layer tar, transparently decompressing gzip blobs.
    pub fn uncompressed(&self) -> std::io::Result<Box<dyn Read + Send>> {
        let mut detect = File::open(&self.blob_path)?;
        let mut magic = [0u8; 2];
        let is_gzip = detect
            .read_exact(&mut magic)
            .map(|_| magic == GZIP_MAGIC)
            .unwrap_or(false);

        let file = BufReader::new(File::open(&self.blob_path)?);
        if is_gzip {
            Ok(Box::new(GzDecoder::new(file)))
        } else {
            Ok(Box::new(file))
        }
    }

    /// Content digest of the uncompressed layer tar.
    pub fn diff_id(&self) -> &str {
        &self.diff_id
    }

    /// Stored blob size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug)]
pub struct ExtractedImage {
    _temp_dir: TempDir,
    config: ImageConfiguration,
    digest: String,
    layers: Vec<LayerHandle>,
}

impl ExtractedImage {
    /// Extracts an image tarball and resolves its metadata, auto-detecting
    /// docker-save (`manifest.json`) vs OCI layout (`index.json`).
    pub fn from_tarball<P: AsRef<Path>>(tarball_path: P) -> Result<Self> {
        let tarball_path = tarball_path.as_ref();
        log::debug!("extracting image tarball {}", tarball_path.display());

        let temp_dir = tempfile::tempdir()?;
        let extract_dir = temp_dir.path().join("extracted");
        fs::create_dir_all(&extract_dir)?;
        extract_tar_file(tarball_path, &extract_dir)?;

        let (config, digest, layers) = if extract_dir.join("manifest.json").exists() {
            load_docker_layout(&extract_dir)?
        } else if extract_dir.join("index.json").exists() {
            load_oci_layout(&extract_dir)?
        } else {
            return Err(AnalysisError::ConfigRead(
                "no manifest.json or index.json in archive".to_string(),
            ));
        };

        log::debug!(
            "loaded image {} with {} content layers",
            digest,
            layers.len()
        );

        Ok(ExtractedImage {
            _temp_dir: temp_dir,
            config,
            digest,
            layers,
        })
    }

    /// The parsed OCI image configuration (architecture, os, history, config).
    pub fn config_file(&self) -> &ImageConfiguration {
        &self.config
    }

    /// The image digest string.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Content layer handles in application order.
    pub fn layers(&self) -> &[LayerHandle] {
        &self.layers
    }
}

/// Unpacks a tarball (plain or gzipped, detected by magic bytes).
fn extract_tar_file(tar_path: &Path, extract_dir: &Path) -> Result<()> {
    let mut detect = File::open(tar_path)?;
    let mut magic = [0u8; 2];
    let is_gzip = detect
        .read_exact(&mut magic)
        .map(|_| magic == GZIP_MAGIC)
        .unwrap_or(false);

    let file = BufReader::new(File::open(tar_path)?);
    if is_gzip {
        Archive::new(GzDecoder::new(file)).unpack(extract_dir)?;
    } else {
        Archive::new(file).unpack(extract_dir)?;
    }
    Ok(())
}

fn load_docker_layout(
    extract_dir: &Path,
) -> Result<(ImageConfiguration, String, Vec<LayerHandle>)> {
    let manifest_raw = fs::read_to_string(extract_dir.join("manifest.json"))?;
    let manifest: Vec<DockerManifestEntry> = serde_json::from_str(&manifest_raw)
        .map_err(|e| AnalysisError::ConfigRead(format!("parse manifest.json: {e}")))?;
    let entry = manifest
        .into_iter()
        .next()
        .ok_or_else(|| AnalysisError::ConfigRead("empty manifest.json".to_string()))?;

    let config_bytes = fs::read(extract_dir.join(&entry.config))?;
    let config: ImageConfiguration = serde_json::from_slice(&config_bytes)
        .map_err(|e| AnalysisError::ConfigRead(format!("parse {}: {e}", entry.config)))?;

    let digest = derive_digest(&entry.config, &config_bytes);

    let diff_ids = config.rootfs().diff_ids();
    if diff_ids.len() != entry.layers.len() {
        return Err(AnalysisError::LayersRead(format!(
            "{} diff ids but {} layer blobs",
            diff_ids.len(),
            entry.layers.len()
        )));
    }

    let mut layers = Vec::with_capacity(entry.layers.len());
    for (rel_path, diff_id) in entry.layers.iter().zip(diff_ids) {
        let blob_path = extract_dir.join(rel_path);
        let size = fs::metadata(&blob_path)
            .map_err(|e| AnalysisError::LayersRead(format!("stat {rel_path}: {e}")))?
            .len();
        layers.push(LayerHandle {
            blob_path,
            diff_id: diff_id.clone(),
            size,
        });
    }

    Ok((config, digest, layers))
}

fn load_oci_layout(extract_dir: &Path) -> Result<(ImageConfiguration, String, Vec<LayerHandle>)> {
    let index_raw = fs::read_to_string(extract_dir.join("index.json"))?;
    let index: OciIndex = serde_json::from_str(&index_raw)
        .map_err(|e| AnalysisError::ConfigRead(format!("parse index.json: {e}")))?;
    let manifest_desc = index
        .manifests
        .first()
        .ok_or_else(|| AnalysisError::ConfigRead("no manifests in index.json".to_string()))?;

    let manifest_bytes = fs::read(blob_path(extract_dir, &manifest_desc.digest)?)?;
    let manifest: OciManifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| AnalysisError::ConfigRead(format!("parse manifest blob: {e}")))?;

    let config_bytes = fs::read(blob_path(extract_dir, &manifest.config.digest)?)?;
    let config: ImageConfiguration = serde_json::from_slice(&config_bytes)
        .map_err(|e| AnalysisError::ConfigRead(format!("parse config blob: {e}")))?;

    let diff_ids = config.rootfs().diff_ids();
    if diff_ids.len() != manifest.layers.len() {
        return Err(AnalysisError::LayersRead(format!(
            "{} diff ids but {} layer blobs",
            diff_ids.len(),
            manifest.layers.len()
        )));
    }

    let mut layers = Vec::with_capacity(manifest.layers.len());
    for (desc, diff_id) in manifest.layers.iter().zip(diff_ids) {
        layers.push(LayerHandle {
            blob_path: blob_path(extract_dir, &desc.digest)?,
            diff_id: diff_id.clone(),
            size: desc.size,
        });
    }

    Ok((config, manifest_desc.digest.clone(), layers))
}

fn blob_path(extract_dir: &Path, digest: &str) -> Result<PathBuf> {
    let hash = digest
        .strip_prefix("sha256:")
        .ok_or_else(|| AnalysisError::DigestRead(format!("unsupported digest {digest}")))?;
    Ok(extract_dir.join("blobs/sha256").join(hash))
}

/// Derives the image digest from the config path when it is digest-shaped
/// (`blobs/sha256/<hash>` or `<hash>.json`), falling back to hashing the
/// config bytes.
fn derive_digest(config_rel_path: &str, config_bytes: &[u8]) -> String {
    if let Some(hash) = config_rel_path.strip_prefix("blobs/sha256/") {
        return format!("sha256:{hash}");
    }
    if let Some(stem) = config_rel_path.strip_suffix(".json") {
        if stem.len() == 64 && stem.chars().all(|c| c.is_ascii_hexdigit()) {
            return format!("sha256:{stem}");
        }
    }
    format!("sha256:{:x}", Sha256::digest(config_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn digest_from_blob_style_config_path() {
        let hash = "a".repeat(64);
        assert_eq!(
            derive_digest(&format!("blobs/sha256/{hash}"), b"{}"),
            format!("sha256:{hash}")
        );
    }

    #[test]
    fn digest_from_json_style_config_path() {
        let hash = "b".repeat(64);
        assert_eq!(
            derive_digest(&format!("{hash}.json"), b"{}"),
            format!("sha256:{hash}")
        );
    }

    #[test]
    fn digest_falls_back_to_hashing_config() {
        let digest = derive_digest("config.json", b"{}");
        assert_eq!(digest, format!("sha256:{:x}", Sha256::digest(b"{}")));
    }

    #[test]
    fn layer_handle_decompresses_gzip_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"layer bytes").unwrap();
        fs::write(&path, encoder.finish().unwrap()).unwrap();

        let handle = LayerHandle {
            blob_path: path,
            diff_id: "sha256:x".into(),
            size: 0,
        };
        let mut out = Vec::new();
        handle.uncompressed().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"layer bytes");
    }

    #[test]
    fn layer_handle_passes_plain_blobs_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, b"plain tar bytes").unwrap();

        let handle = LayerHandle {
            blob_path: path,
            diff_id: "sha256:x".into(),
            size: 15,
        };
        let mut out = Vec::new();
        handle.uncompressed().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"plain tar bytes");
        assert_eq!(handle.size(), 15);
    }

    #[test]
    fn rejects_archives_without_manifest_or_index() {
        let dir = tempfile::tempdir().unwrap();
        let tarball = dir.path().join("bogus.tar");
        let mut builder = tar::Builder::new(File::create(&tarball).unwrap());
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "random.txt", &b"hi"[..])
            .unwrap();
        builder.finish().unwrap();
        drop(builder);

        let err = ExtractedImage::from_tarball(&tarball).unwrap_err();
        assert!(matches!(err, AnalysisError::ConfigRead(_)));
    }
}
