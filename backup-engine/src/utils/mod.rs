//! Shared helpers for the backup engine.

pub mod errors;

pub use errors::{EngineError, Result};
