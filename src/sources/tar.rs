//! Tarball implementation of the [`Source`] trait for images already
//! exported to disk.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tempfile::TempDir;

use super::{looks_like_archive, Platform, Source};

pub struct TarballSource;

impl TarballSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TarballSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for TarballSource {
    fn name(&self) -> &str {
        "tar"
    }

    fn get_image_tarball(
        &self,
        reference: &str,
        _platform: &Platform,
    ) -> Result<(PathBuf, Option<TempDir>)> {
        let tarball_path = PathBuf::from(reference);

        if !tarball_path.exists() {
            return Err(anyhow!(
                "Tarball file does not exist: {}",
                tarball_path.display()
            ));
        }
        if !tarball_path.is_file() {
            return Err(anyhow!("Path is not a file: {}", tarball_path.display()));
        }
        if !looks_like_archive(reference) {
            log::warn!(
                "{} does not have a tar extension, proceeding anyway",
                tarball_path.display()
            );
        }

        // The file is used in place, no temp dir needed
        Ok((tarball_path, None))
    }
}
