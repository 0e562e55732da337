//! Progress reporting and chunked byte transfer.

pub mod copy;
pub mod progress;

pub use copy::{copy_file, CHUNK_SIZE};
pub use progress::{ProgressCallback, ProgressEvent, ProgressFn, ProgressReporter, Stage};
