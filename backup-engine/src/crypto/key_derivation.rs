//! PBKDF2-HMAC-SHA256 key derivation.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use super::header::{IV_LEN, SALT_LEN};

/// Default iteration count for new plans.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// A derived 256-bit AES key, zeroed on drop.
pub struct DerivedKey {
    key: [u8; 32],
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.key.iter_mut().for_each(|b| *b = 0);
    }
}

/// Derive an AES-256 key from a passphrase.
///
/// CPU-bound for realistic iteration counts; async callers run this on
/// the blocking pool.
pub fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> DerivedKey {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key);
    DerivedKey { key }
}

/// Fresh random salt and IV for one encryption call.
pub fn generate_salt_and_iv() -> (Vec<u8>, [u8; IV_LEN]) {
    let mut rng = rand::rng();
    let mut salt = vec![0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);
    (salt, iv)
}
