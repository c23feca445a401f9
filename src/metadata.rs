//! Wire types served by the HTTP layer, plus the conversion from the OCI
//! image configuration.

use std::collections::HashMap;

use oci_spec::image::ImageConfiguration;
use serde::{Deserialize, Serialize};

/// Top-level image metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    #[serde(rename = "ref")]
    pub reference: String,
    pub digest: String,
    pub arch: String,
    pub os: String,
    pub config: ImageConfig,
    pub layer_count: usize,
}

/// Runtime configuration recorded in the image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    pub env: Vec<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub labels: HashMap<String, String>,
}

/// Metadata for one history slot, content-bearing or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerInfo {
    pub index: usize,
    #[serde(rename = "diffID")]
    pub diff_id: String,
    pub size: u64,
    pub command: String,
    pub empty: bool,
}

/// File bytes framed for display: UTF-8 text, or hex when binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub path: String,
    pub size: u64,
    pub is_binary: bool,
    pub truncated: bool,
    pub content: String,
}

/// Extracts the runtime configuration from an OCI image configuration.
pub fn config_from_oci(config: &ImageConfiguration) -> ImageConfig {
    let c = config.config().as_ref();
    ImageConfig {
        env: c.map(|c| c.env().clone().unwrap_or_default()).unwrap_or_default(),
        entrypoint: c.and_then(|c| c.entrypoint().clone()).unwrap_or_default(),
        cmd: c.and_then(|c| c.cmd().clone()).unwrap_or_default(),
        working_dir: c.and_then(|c| c.working_dir().clone()).unwrap_or_default(),
        user: c.and_then(|c| c.user().clone()).unwrap_or_default(),
        labels: c.and_then(|c| c.labels().clone()).unwrap_or_default(),
    }
}
