//! Pluggable image acquisition: every source resolves a reference to an
//! image tarball on disk, which the loader then extracts.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::ValueEnum;
use tempfile::TempDir;

use crate::error::{self, AnalysisError};

pub mod docker;
pub mod registry;
pub mod tar;

pub use self::docker::DockerSource;
pub use self::registry::RegistrySource;
pub use self::tar::TarballSource;

/// Target platform for multi-arch images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Parses an `os/arch` selector. Empty input defaults to linux on the host
/// architecture.
pub fn parse_platform(s: &str) -> error::Result<Platform> {
    if s.is_empty() {
        return Ok(Platform {
            os: "linux".to_string(),
            arch: host_arch().to_string(),
        });
    }
    match s.split_once('/') {
        Some((os, arch)) if !os.is_empty() && !arch.is_empty() => Ok(Platform {
            os: os.to_string(),
            arch: arch.to_string(),
        }),
        _ => Err(AnalysisError::InvalidPlatform(s.to_string())),
    }
}

/// The host architecture in OCI naming.
fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// How to acquire the image.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    /// Tar path if the reference is a file, otherwise docker then registry
    Auto,
    /// `docker save` via the local daemon
    Docker,
    /// Pull from an OCI registry
    Registry,
    /// An image tarball already on disk
    Tar,
}

/// Source trait for getting image tarballs from different backends.
pub trait Source {
    /// Returns the name of the source for identification purposes.
    fn name(&self) -> &str;

    /// Resolves a reference (image name or filesystem path) to an image
    /// tarball, returning its path along with a temp directory that must
    /// stay alive while the tarball is in use.
    fn get_image_tarball(
        &self,
        reference: &str,
        platform: &Platform,
    ) -> Result<(PathBuf, Option<TempDir>)>;
}

/// Resolves `reference` to a tarball using the selected engine. `Auto` takes
/// a tar-file path directly, otherwise tries the docker daemon first and
/// falls back to the registry.
pub fn fetch_image_tarball(
    engine: Engine,
    reference: &str,
    platform: &Platform,
) -> error::Result<(PathBuf, Option<TempDir>)> {
    if !matches!(engine, Engine::Tar) && !looks_like_archive(reference) {
        oci_client::Reference::try_from(reference)
            .map_err(|_| AnalysisError::InvalidReference(reference.to_string()))?;
    }

    let result = match engine {
        Engine::Tar => TarballSource::new().get_image_tarball(reference, platform),
        Engine::Docker => DockerSource::new().get_image_tarball(reference, platform),
        Engine::Registry => RegistrySource::new().get_image_tarball(reference, platform),
        Engine::Auto => {
            if looks_like_archive(reference) {
                TarballSource::new().get_image_tarball(reference, platform)
            } else {
                match DockerSource::new().get_image_tarball(reference, platform) {
                    Ok(found) => Ok(found),
                    Err(e) => {
                        log::info!("docker daemon unavailable ({e:#}), trying registry");
                        RegistrySource::new().get_image_tarball(reference, platform)
                    }
                }
            }
        }
    };

    result.map_err(|e| AnalysisError::LoadFailed {
        reference: reference.to_string(),
        detail: format!("{e:#}"),
    })
}

/// Whether the reference names a tar archive rather than an image.
pub fn looks_like_archive(reference: &str) -> bool {
    let p = Path::new(reference);
    matches!(
        p.extension().and_then(|e| e.to_str()),
        Some("tar" | "gz" | "tgz")
    ) || reference.ends_with(".tar.gz")
}
