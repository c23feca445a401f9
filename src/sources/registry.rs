//! Registry implementation of the [`Source`] trait: pulls the manifest,
//! config, and layer blobs from an OCI-compliant registry and repacks them
//! as a docker-save-style tarball.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use oci_client::client::{ClientConfig, ImageData};
use oci_client::manifest::{
    ImageIndexEntry, IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE, IMAGE_DOCKER_LAYER_TAR_MEDIA_TYPE,
    IMAGE_LAYER_GZIP_MEDIA_TYPE, IMAGE_LAYER_MEDIA_TYPE,
};
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};
use sha2::{Digest, Sha256};
use tar::{Builder, Header};
use tempfile::TempDir;

use super::{Platform, Source};
use crate::extracted_image::DockerManifestEntry;

pub struct RegistrySource;

impl RegistrySource {
    pub fn new() -> Self {
        Self
    }

    async fn pull_image_async(
        &self,
        image_ref: &Reference,
        platform: &Platform,
    ) -> Result<(PathBuf, TempDir)> {
        log::info!("pulling {image_ref} ({platform}) from registry");

        let client = Client::new(ClientConfig {
            platform_resolver: Some(Box::new(platform_resolver(platform.clone()))),
            ..Default::default()
        });

        let data = client
            .pull(
                image_ref,
                &RegistryAuth::Anonymous,
                vec![
                    IMAGE_LAYER_MEDIA_TYPE,
                    IMAGE_LAYER_GZIP_MEDIA_TYPE,
                    IMAGE_DOCKER_LAYER_TAR_MEDIA_TYPE,
                    IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE,
                ],
            )
            .await
            .context("Failed to pull image from registry")?;

        log::info!("pulled {} layers from registry", data.layers.len());

        let temp_dir = TempDir::new().context("Failed to create temporary directory")?;
        let tarball_path = temp_dir.path().join("image.tar");
        write_save_tarball(&tarball_path, &data, image_ref)?;

        Ok((tarball_path, temp_dir))
    }
}

impl Default for RegistrySource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for RegistrySource {
    fn name(&self) -> &str {
        "registry"
    }

    fn get_image_tarball(
        &self,
        reference: &str,
        platform: &Platform,
    ) -> Result<(PathBuf, Option<TempDir>)> {
        let image_ref = Reference::try_from(reference)
            .with_context(|| format!("Failed to parse image reference: {reference}"))?;

        let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
        let (tarball_path, temp_dir) = rt.block_on(self.pull_image_async(&image_ref, platform))?;

        Ok((tarball_path, Some(temp_dir)))
    }
}

/// Selects the index entry matching the requested platform.
fn platform_resolver(
    platform: Platform,
) -> impl Fn(&[ImageIndexEntry]) -> Option<String> + Send + Sync {
    move |entries| {
        entries
            .iter()
            .find(|e| {
                e.platform
                    .as_ref()
                    .is_some_and(|p| p.os == platform.os && p.architecture == platform.arch)
            })
            .map(|e| e.digest.clone())
    }
}

/// Writes the pulled blobs as a docker-save-style tarball: `manifest.json`,
/// a digest-named config, and one `layer.tar` per content layer (blobs may
/// still be gzipped; the loader detects that per blob).
fn write_save_tarball(path: &std::path::Path, data: &ImageData, image_ref: &Reference) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create tarball file {}", path.display()))?;
    let mut builder = Builder::new(file);

    let config_name = format!("{:x}.json", Sha256::digest(&data.config.data));
    append_entry(&mut builder, &config_name, &data.config.data)?;

    let mut layer_names = Vec::with_capacity(data.layers.len());
    for (i, layer) in data.layers.iter().enumerate() {
        let name = format!("{i}/layer.tar");
        append_entry(&mut builder, &name, &layer.data)?;
        layer_names.push(name);
    }

    let manifest = vec![DockerManifestEntry {
        config: config_name,
        layers: layer_names,
        repo_tags: vec![image_ref.whole()],
    }];
    let manifest_bytes = serde_json::to_vec(&manifest).context("Failed to encode manifest")?;
    append_entry(&mut builder, "manifest.json", &manifest_bytes)?;

    builder.finish().context("Failed to finish tarball")?;
    Ok(())
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, name, data)
        .with_context(|| format!("Failed to write {name} into tarball"))?;
    Ok(())
}
