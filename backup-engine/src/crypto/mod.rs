//! Encryption codec: PBKDF2-derived AES-256-CBC over a self-describing container.
//!
//! Salt, IV and iteration count travel in the container header, so an
//! artifact can be opened with nothing but its passphrase.

pub mod container;
pub mod header;
pub mod key_derivation;

pub use container::{decrypt_file, encrypt_file};
pub use header::{ContainerHeader, FORMAT_VERSION, MAGIC};
pub use key_derivation::DEFAULT_ITERATIONS;
