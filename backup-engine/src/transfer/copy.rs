//! Chunked file copy with progress ticks and cooperative cancellation.

use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::progress::{percent_of, ProgressFn};
use crate::utils::{EngineError, Result};

/// Chunk size shared by every streaming stage (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Copy `src` to `dst` in [`CHUNK_SIZE`] chunks, overwriting `dst`.
///
/// Progress is reported after each chunk; a zero-length source reports
/// nothing. Returns the number of bytes copied.
pub async fn copy_file(
    src: &Path,
    dst: &Path,
    progress: &ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut reader = File::open(src).await?;
    let total = reader.metadata().await?.len();
    let mut writer = File::create(dst).await?;

    let copied = copy_stream(&mut reader, &mut writer, total, progress, cancel).await?;
    writer.flush().await?;
    writer.sync_all().await?;
    Ok(copied)
}

/// Stream `reader` into `writer`, reporting against `total`.
pub async fn copy_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    total: u64,
    progress: &ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<u64>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
        progress(percent_of(copied, total));
    }

    Ok(copied)
}

/// Blocking twin of [`copy_stream`] for stages that run on the blocking pool.
pub fn copy_blocking<R, W>(
    reader: &mut R,
    writer: &mut W,
    cancel: &CancellationToken,
    mut on_chunk: impl FnMut(u64),
) -> Result<u64>
where
    R: std::io::Read + ?Sized,
    W: std::io::Write + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buf[..n])?;
        copied += n as u64;
        on_chunk(copied);
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_file_reports_completion() -> Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        std::fs::write(&src, vec![7u8; CHUNK_SIZE + 10])?;

        let last = Arc::new(AtomicU8::new(0));
        let sink = Arc::clone(&last);
        let progress = move |p: u8| sink.store(p, Ordering::Relaxed);

        let copied = copy_file(&src, &dst, &progress, &CancellationToken::new()).await?;
        assert_eq!(copied, (CHUNK_SIZE + 10) as u64);
        assert_eq!(std::fs::read(&dst)?, std::fs::read(&src)?);
        assert_eq!(last.load(Ordering::Relaxed), 100);
        Ok(())
    }

    #[tokio::test]
    async fn test_copy_file_honours_cancellation() -> Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"data")?;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = copy_file(&src, &dir.path().join("dst.bin"), &|_| {}, &cancel).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
        Ok(())
    }

    #[test]
    fn test_copy_blocking_counts_bytes() -> Result<()> {
        let mut reader = std::io::Cursor::new(vec![1u8; 3000]);
        let mut out = Vec::new();
        let mut ticks = 0;
        let copied = copy_blocking(&mut reader, &mut out, &CancellationToken::new(), |_| ticks += 1)?;
        assert_eq!(copied, 3000);
        assert_eq!(out.len(), 3000);
        assert!(ticks >= 1);
        Ok(())
    }
}
