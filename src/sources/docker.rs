//! Docker implementation of the [`Source`] trait: exports the image through
//! `docker save`, pulling it first when the daemon does not have it locally.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use tempfile::TempDir;

use super::{Platform, Source};

pub struct DockerSource;

impl DockerSource {
    pub fn new() -> Self {
        Self
    }

    fn run_command(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("docker")
            .args(args)
            .output()
            .context(format!("Failed to execute docker command: {args:?}"))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Docker command failed: {}", error.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn image_exists(&self, reference: &str) -> bool {
        self.run_command(&["image", "inspect", reference]).is_ok()
    }

    fn pull_image(&self, reference: &str) -> Result<()> {
        log::info!("pulling {reference} via docker");
        self.run_command(&["pull", reference])?;
        Ok(())
    }
}

impl Default for DockerSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for DockerSource {
    fn name(&self) -> &str {
        "docker"
    }

    fn get_image_tarball(
        &self,
        reference: &str,
        _platform: &Platform,
    ) -> Result<(PathBuf, Option<TempDir>)> {
        // Daemon images are host-platform; a specific platform request is
        // served correctly by the registry source instead
        if !self.image_exists(reference) {
            self.pull_image(reference)
                .with_context(|| format!("Image '{reference}' not available locally"))?;
        }

        let temp_dir = TempDir::new().context("Failed to create temporary directory")?;
        let tarball_path = temp_dir.path().join("image.tar");

        log::info!("exporting {reference} via docker save");
        self.run_command(&[
            "save",
            reference,
            "-o",
            &tarball_path.display().to_string(),
        ])
        .with_context(|| format!("Failed to export image '{reference}'"))?;

        if !tarball_path.exists() {
            return Err(anyhow!(
                "docker save produced no tarball at {}",
                tarball_path.display()
            ));
        }

        Ok((tarball_path, Some(temp_dir)))
    }
}
