//! Error kinds produced by the analysis core.
//!
//! Acquisition code (the `sources` module) reports failures through `anyhow`;
//! everything from the loader handle inward uses [`AnalysisError`] so the HTTP
//! layer can translate each kind to a status code.

use std::io;

/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The image reference could not be parsed.
    #[error("invalid reference {0:?}")]
    InvalidReference(String),

    /// No source could resolve the image.
    #[error("failed to load {reference}: {detail}")]
    LoadFailed { reference: String, detail: String },

    /// Failure reading the image configuration from the loader handle.
    #[error("read image config: {0}")]
    ConfigRead(String),

    /// Failure reading the image digest from the loader handle.
    #[error("read image digest: {0}")]
    DigestRead(String),

    /// Failure enumerating layers from the loader handle.
    #[error("read image layers: {0}")]
    LayersRead(String),

    /// Corrupt or unreadable tar during tree building or file reads.
    #[error("read tar: {0}")]
    TarRead(#[from] io::Error),

    /// Layer index outside the history range.
    #[error("layer index {index} out of range [0, {count})")]
    LayerOutOfRange { index: usize, count: usize },

    /// Read path absent from every searched layer.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The path matched a directory or symlink entry instead of a file.
    #[error("not a regular file: {0}")]
    NotARegularFile(String),

    /// Symlink resolution reached a path with no node.
    #[error("dangling symlink: {0} not found")]
    DanglingSymlink(String),

    /// Symlink resolution did not terminate within the hop budget.
    #[error("symlink cycle: exceeded {max_hops} hops from {path}")]
    SymlinkCycle { path: String, max_hops: usize },

    /// Malformed platform selector string.
    #[error("invalid platform {0:?}, expected os/arch")]
    InvalidPlatform(String),
}

impl AnalysisError {
    /// Whether this error describes a missing resource (as opposed to a
    /// malformed request or an internal failure).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AnalysisError::LayerOutOfRange { .. }
                | AnalysisError::FileNotFound(_)
                | AnalysisError::NotARegularFile(_)
                | AnalysisError::DanglingSymlink(_)
        )
    }
}
