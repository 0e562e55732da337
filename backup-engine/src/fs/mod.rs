//! Source tree traversal and file metadata.

pub mod metadata;
pub mod walker;

pub use metadata::{apply_to_path, FileMetadata};
pub use walker::{walk_directory, FileInfo};
