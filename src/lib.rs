pub mod analyzer;
pub mod assets;
pub mod diff;
pub mod error;
pub mod extracted_image;
pub mod merge;
pub mod metadata;
pub mod server;
pub mod sources;
pub mod tree;

// Re-exports for easy access
pub use analyzer::{analyze, Image};
pub use diff::{ChangeKind, DiffEntry};
pub use error::AnalysisError;
pub use extracted_image::ExtractedImage;
pub use metadata::{FileContent, ImageConfig, ImageInfo, LayerInfo};
pub use server::ServerState;
pub use sources::{Engine, Platform, Source};
pub use tree::{FileNode, FileType};
