//! Self-describing container header.
//!
//! Layout, all integers little-endian:
//!
//! | Field            | Size        |
//! |------------------|-------------|
//! | magic `SBAK`     | 4           |
//! | format version   | 1           |
//! | iteration count  | 4 (u32)     |
//! | salt length      | 4 (u32)     |
//! | salt             | salt length |
//! | IV length        | 4 (u32)     |
//! | IV               | IV length   |
//!
//! The ciphertext stream follows immediately.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::utils::{EngineError, Result};

pub const MAGIC: &[u8; 4] = b"SBAK";
pub const FORMAT_VERSION: u8 = 1;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 16;

/// Upper bound accepted for a stored salt; anything larger is a misparse.
const MAX_SALT_LEN: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u8,
    pub iterations: u32,
    pub salt: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

impl ContainerHeader {
    pub fn new(iterations: u32, salt: Vec<u8>, iv: [u8; IV_LEN]) -> Self {
        Self {
            version: FORMAT_VERSION,
            iterations,
            salt,
            iv,
        }
    }

    /// Serialized size in bytes.
    pub fn encoded_len(&self) -> usize {
        MAGIC.len() + 1 + 4 + 4 + self.salt.len() + 4 + self.iv.len()
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(MAGIC);
        buf.push(self.version);
        buf.extend_from_slice(&self.iterations.to_le_bytes());
        buf.extend_from_slice(&(self.salt.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.salt);
        buf.extend_from_slice(&(self.iv.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.iv);
        writer.write_all(&buf).await?;
        Ok(())
    }

    /// Read the header fields in their fixed order.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        read_exact(reader, &mut magic, "magic").await?;
        if &magic != MAGIC {
            return Err(EngineError::CorruptHeader("magic tag mismatch".into()));
        }

        let mut version = [0u8; 1];
        read_exact(reader, &mut version, "version").await?;
        if version[0] != FORMAT_VERSION {
            return Err(EngineError::UnsupportedVersion(version[0]));
        }

        let iterations = read_u32(reader, "iteration count").await?;
        if iterations == 0 {
            return Err(EngineError::CorruptHeader("iteration count is zero".into()));
        }

        let salt_len = read_u32(reader, "salt length").await?;
        if salt_len == 0 || salt_len > MAX_SALT_LEN {
            return Err(EngineError::CorruptHeader(format!(
                "salt length {} out of range",
                salt_len
            )));
        }
        let mut salt = vec![0u8; salt_len as usize];
        read_exact(reader, &mut salt, "salt").await?;

        let iv_len = read_u32(reader, "IV length").await?;
        if iv_len as usize != IV_LEN {
            return Err(EngineError::CorruptHeader(format!(
                "IV length {} (expected {})",
                iv_len, IV_LEN
            )));
        }
        let mut iv = [0u8; IV_LEN];
        read_exact(reader, &mut iv, "IV").await?;

        Ok(Self {
            version: version[0],
            iterations,
            salt,
            iv,
        })
    }
}

async fn read_exact<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8], field: &str) -> Result<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(EngineError::CorruptHeader(
            format!("stream ended while reading {}", field),
        )),
        Err(e) => Err(e.into()),
    }
}

async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R, field: &str) -> Result<u32> {
    let mut raw = [0u8; 4];
    read_exact(reader, &mut raw, field).await?;
    Ok(u32::from_le_bytes(raw))
}
