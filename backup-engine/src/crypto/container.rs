//! Streaming AES-256-CBC container encryption.
//!
//! Inputs are processed in 1 MiB chunks so memory stays flat for
//! multi-gigabyte archives. Only the final chunk is padded (PKCS#7).

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::header::ContainerHeader;
use super::key_derivation::{derive_key, generate_salt_and_iv, DerivedKey};
use crate::transfer::progress::{percent_of, ProgressFn};
use crate::transfer::CHUNK_SIZE;
use crate::utils::{EngineError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BLOCK: usize = 16;

/// Encrypt `input` into a self-describing container at `output`.
///
/// On cancellation the partial output is left in place for the caller to
/// remove.
pub async fn encrypt_file(
    input: &Path,
    output: &Path,
    passphrase: &str,
    iterations: u32,
    progress: &ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<()> {
    if iterations == 0 {
        return Err(EngineError::Config("encryption iterations must be positive".into()));
    }

    let (salt, iv) = generate_salt_and_iv();
    let key = derive_blocking(passphrase, &salt, iterations).await?;
    let header = ContainerHeader::new(iterations, salt, iv);

    let mut reader = File::open(input).await?;
    let total = reader.metadata().await?.len();
    let mut writer = BufWriter::new(File::create(output).await?);
    header.write_to(&mut writer).await?;

    let mut cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &header.iv)
        .map_err(|e| EngineError::Config(format!("cipher init: {}", e)))?;

    // One spare block so the final chunk can take its padding in place.
    let mut buf = vec![0u8; CHUNK_SIZE + BLOCK];
    let mut read_total = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let n = read_full(&mut reader, &mut buf[..CHUNK_SIZE]).await?;
        read_total += n as u64;

        if n < CHUNK_SIZE {
            let sealed = cipher
                .encrypt_padded_mut::<Pkcs7>(&mut buf, n)
                .map_err(|_| EngineError::Config("padding buffer too small".into()))?;
            writer.write_all(sealed).await?;
            if n > 0 {
                progress(percent_of(read_total, total));
            }
            break;
        }

        for block in buf[..CHUNK_SIZE].chunks_exact_mut(BLOCK) {
            cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        writer.write_all(&buf[..CHUNK_SIZE]).await?;
        progress(percent_of(read_total, total));
    }

    writer.flush().await?;
    writer.get_mut().sync_all().await?;
    debug!(input = %input.display(), bytes = read_total, "Encrypted container written");
    Ok(())
}

/// Decrypt a container at `input` into `output`.
///
/// A wrong passphrase surfaces as a padding failure on the last block and
/// is reported as [`EngineError::DecryptionFailed`]; the partial output is
/// removed so no garbage file survives.
pub async fn decrypt_file(
    input: &Path,
    output: &Path,
    passphrase: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut reader = File::open(input).await?;
    let header = ContainerHeader::read_from(&mut reader).await?;
    let key = derive_blocking(passphrase, &header.salt, header.iterations).await?;

    let result = decrypt_stream(&mut reader, output, &key, &header, cancel).await;
    if let Err(e) = &result {
        if matches!(e, EngineError::DecryptionFailed(_)) {
            warn!(input = %input.display(), "Decryption failed, removing partial output");
        }
        let _ = tokio::fs::remove_file(output).await;
    }
    result
}

async fn decrypt_stream<R: AsyncRead + Unpin>(
    reader: &mut R,
    output: &Path,
    key: &DerivedKey,
    header: &ContainerHeader,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), &header.iv)
        .map_err(|e| EngineError::Config(format!("cipher init: {}", e)))?;
    let mut writer = BufWriter::new(File::create(output).await?);

    // Read one chunk ahead: the last chunk must be held back for unpadding.
    let mut current = vec![0u8; CHUNK_SIZE];
    let mut next = vec![0u8; CHUNK_SIZE];
    let mut current_len = read_full(reader, &mut current).await?;

    if current_len == 0 {
        return Err(EngineError::DecryptionFailed("container has no ciphertext".into()));
    }

    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if current_len % BLOCK != 0 {
            return Err(EngineError::DecryptionFailed(
                "ciphertext is not block aligned".into(),
            ));
        }

        let next_len = if current_len == CHUNK_SIZE {
            read_full(reader, &mut next).await?
        } else {
            0
        };

        if next_len == 0 {
            let plain = cipher
                .decrypt_padded_mut::<Pkcs7>(&mut current[..current_len])
                .map_err(|_| {
                    EngineError::DecryptionFailed("invalid padding (wrong passphrase?)".into())
                })?;
            writer.write_all(plain).await?;
            break;
        }

        for block in current[..current_len].chunks_exact_mut(BLOCK) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        writer.write_all(&current[..current_len]).await?;

        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
    }

    writer.flush().await?;
    writer.get_mut().sync_all().await?;
    Ok(())
}

async fn derive_blocking(passphrase: &str, salt: &[u8], iterations: u32) -> Result<DerivedKey> {
    let passphrase = passphrase.to_string();
    let salt = salt.to_vec();
    tokio::task::spawn_blocking(move || derive_key(&passphrase, &salt, iterations))
        .await
        .map_err(|e| EngineError::Config(format!("key derivation task failed: {}", e)))
}

/// Fill `buf` as far as the stream allows; returns bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
