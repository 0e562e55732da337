//! SFTP storage backend.
//!
//! libssh2 is blocking, so every call opens its own session on the blocking
//! pool. Progress ticks are forwarded to the async caller over a channel.

use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::fs::File;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{check_object_name, Storage, PARTIAL_SUFFIX};
use crate::transfer::copy::copy_blocking;
use crate::transfer::progress::percent_of;
use crate::transfer::ProgressFn;
use crate::utils::{EngineError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SESSION_TIMEOUT_MS: u32 = 120_000;

#[derive(Clone)]
pub struct SftpStorage {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
    private_key: Option<PathBuf>,
    remote_dir: String,
}

type Fail = fn(String) -> EngineError;

impl SftpStorage {
    pub fn new(
        host: String,
        port: u16,
        username: String,
        password: Option<String>,
        private_key: Option<PathBuf>,
        remote_dir: String,
    ) -> Self {
        Self {
            host,
            port,
            username,
            password,
            private_key,
            remote_dir,
        }
    }

    /// Remote path of object `name` inside the configured directory.
    pub fn remote_path(&self, name: &str) -> PathBuf {
        let dir = self.remote_dir.trim_end_matches('/');
        if dir.is_empty() && !self.remote_dir.starts_with('/') {
            PathBuf::from(name)
        } else {
            PathBuf::from(format!("{}/{}", dir, name))
        }
    }

    fn remote_dir_path(&self) -> PathBuf {
        if self.remote_dir.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.remote_dir)
        }
    }

    fn connect(&self, fail: Fail) -> Result<(Session, Sftp)> {
        let addr = format!("{}:{}", self.host, self.port);
        let socket = std::net::ToSocketAddrs::to_socket_addrs(&addr)
            .map_err(|e| fail(format!("resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| fail(format!("resolve {}: no address", addr)))?;
        let tcp = TcpStream::connect_timeout(&socket, CONNECT_TIMEOUT)
            .map_err(|e| fail(format!("connect {}: {}", addr, e)))?;

        let mut sess = Session::new().map_err(|e| fail(e.to_string()))?;
        sess.set_tcp_stream(tcp);
        sess.set_timeout(SESSION_TIMEOUT_MS);
        sess.handshake()
            .map_err(|e| fail(format!("handshake with {}: {}", addr, e)))?;

        match (&self.private_key, &self.password) {
            (Some(key), passphrase) => sess
                .userauth_pubkey_file(&self.username, None, key, passphrase.as_deref())
                .map_err(|e| fail(format!("SSH key authentication failed: {}", e)))?,
            (None, Some(password)) => sess
                .userauth_password(&self.username, password)
                .map_err(|e| fail(format!("SSH authentication failed: {}", e)))?,
            (None, None) => {
                return Err(EngineError::Config(format!(
                    "sftp target {}: no credentials configured",
                    self.host
                )))
            }
        }
        if !sess.authenticated() {
            return Err(fail("SSH authentication failed".into()));
        }

        let sftp = sess.sftp().map_err(|e| fail(e.to_string()))?;
        Ok((sess, sftp))
    }

    /// Run `op` on the blocking pool, relaying its progress ticks.
    async fn run_blocking<T, F>(&self, progress: &ProgressFn<'_>, fail: Fail, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SftpStorage, &(dyn Fn(u8) + Send + Sync)) -> Result<T> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let this = self.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let report = move |pct: u8| {
                let _ = tx.send(pct);
            };
            op(&this, &report)
        });

        while let Some(pct) = rx.recv().await {
            progress(pct);
        }

        handle
            .await
            .map_err(|e| fail(format!("sftp worker failed: {}", e)))?
    }
}

fn ensure_remote_dir(sftp: &Sftp, dir: &Path) -> std::result::Result<(), ssh2::Error> {
    let mut current = PathBuf::new();
    for part in dir.components() {
        current.push(part);
        if current.as_os_str().is_empty() || current == Path::new("/") {
            continue;
        }
        if sftp.stat(&current).is_err() {
            sftp.mkdir(&current, 0o755)?;
        }
    }
    Ok(())
}

/// Keep `Cancelled` and `Config`, wrap local I/O failures in the op's variant.
fn wrap(err: EngineError, fail: Fail) -> EngineError {
    match err {
        EngineError::Io(io) => fail(io.to_string()),
        other => other,
    }
}

#[async_trait]
impl Storage for SftpStorage {
    fn describe(&self) -> String {
        format!("sftp://{}@{}:{}/{}", self.username, self.host, self.port, self.remote_dir.trim_start_matches('/'))
    }

    async fn upload(
        &self,
        local: &Path,
        name: &str,
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_object_name(name, EngineError::UploadFailed)?;
        let local = local.to_path_buf();
        let name = name.to_string();
        let cancel = cancel.clone();
        info!(object = %name, target = %self.describe(), "Uploading via SFTP");

        self.run_blocking(progress, EngineError::UploadFailed, move |this, report| {
            let fail: Fail = EngineError::UploadFailed;
            let mut source = File::open(&local).map_err(|e| fail(format!("{}: {}", local.display(), e)))?;
            let total = source.metadata().map_err(|e| fail(e.to_string()))?.len();

            let (_sess, sftp) = this.connect(fail)?;
            if !this.remote_dir.is_empty() {
                ensure_remote_dir(&sftp, &this.remote_dir_path())
                    .map_err(|e| fail(format!("create {}: {}", this.remote_dir, e)))?;
            }

            let target = this.remote_path(&name);
            let partial = this.remote_path(&format!("{}{}", name, PARTIAL_SUFFIX));
            let mut remote = sftp
                .create(&partial)
                .map_err(|e| fail(format!("create {}: {}", partial.display(), e)))?;

            let copied = copy_blocking(&mut source, &mut remote, &cancel, |done| {
                report(percent_of(done, total))
            });
            drop(remote);
            if let Err(e) = copied {
                let _ = sftp.unlink(&partial);
                return Err(wrap(e, fail));
            }

            // Most servers refuse to rename over an existing file.
            let _ = sftp.unlink(&target);
            if let Err(e) = sftp.rename(&partial, &target, None) {
                let _ = sftp.unlink(&partial);
                return Err(fail(format!("rename {}: {}", target.display(), e)));
            }
            debug!(object = %name, bytes = total, "SFTP upload complete");
            Ok(())
        })
        .await
    }

    async fn download(
        &self,
        name: &str,
        local: &Path,
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_object_name(name, EngineError::DownloadFailed)?;
        let local = local.to_path_buf();
        let name = name.to_string();
        let cancel = cancel.clone();

        self.run_blocking(progress, EngineError::DownloadFailed, move |this, report| {
            let fail: Fail = EngineError::DownloadFailed;
            let (_sess, sftp) = this.connect(fail)?;
            let remote_path = this.remote_path(&name);
            let total = sftp
                .stat(&remote_path)
                .map_err(|e| fail(format!("{}: {}", remote_path.display(), e)))?
                .size
                .unwrap_or(0);
            let mut remote = sftp
                .open(&remote_path)
                .map_err(|e| fail(format!("open {}: {}", remote_path.display(), e)))?;
            let mut out = File::create(&local).map_err(|e| fail(format!("{}: {}", local.display(), e)))?;

            if let Err(e) = copy_blocking(&mut remote, &mut out, &cancel, |done| {
                report(percent_of(done, total))
            }) {
                drop(out);
                let _ = std::fs::remove_file(&local);
                return Err(wrap(e, fail));
            }
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.run_blocking(&|_| {}, EngineError::ListFailed, |this, _| {
            let fail: Fail = EngineError::ListFailed;
            let (_sess, sftp) = this.connect(fail)?;
            let dir = this.remote_dir_path();
            let entries = sftp
                .readdir(&dir)
                .map_err(|e| fail(format!("{}: {}", dir.display(), e)))?;

            let mut names: Vec<String> = entries
                .into_iter()
                .filter(|(_, stat)| stat.is_file())
                .filter_map(|(path, _)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
                .filter(|name| !name.ends_with(PARTIAL_SUFFIX))
                .collect();
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        check_object_name(name, EngineError::DeleteFailed)?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let name = name.to_string();
        self.run_blocking(&|_| {}, EngineError::DeleteFailed, move |this, _| {
            let fail: Fail = EngineError::DeleteFailed;
            let (_sess, sftp) = this.connect(fail)?;
            let path = this.remote_path(&name);
            sftp.unlink(&path)
                .map_err(|e| fail(format!("{}: {}", path.display(), e)))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(remote_dir: &str, port: u16) -> SftpStorage {
        SftpStorage::new(
            "127.0.0.1".into(),
            port,
            "backup".into(),
            Some("secret".into()),
            None,
            remote_dir.into(),
        )
    }

    #[test]
    fn test_remote_path() {
        assert_eq!(
            storage("/srv/backups/", 22).remote_path("a.zip"),
            PathBuf::from("/srv/backups/a.zip")
        );
        assert_eq!(storage("", 22).remote_path("a.zip"), PathBuf::from("a.zip"));
        assert_eq!(storage("/", 22).remote_path("a.zip"), PathBuf::from("/a.zip"));
        assert_eq!(storage("nested", 22).remote_path("a.zip"), PathBuf::from("nested/a.zip"));
    }

    #[test]
    fn test_describe_hides_password() {
        let described = storage("/srv", 2222).describe();
        assert!(described.contains("backup@127.0.0.1:2222"));
        assert!(!described.contains("secret"));
    }

    #[tokio::test]
    async fn test_unreachable_host_maps_to_operation_error() {
        // Port 1 is essentially never listening on loopback.
        let sftp = storage("/srv", 1);
        assert!(matches!(sftp.list().await, Err(EngineError::ListFailed(_))));
        assert!(matches!(
            sftp.delete("a.zip", &CancellationToken::new()).await,
            Err(EngineError::DeleteFailed(_))
        ));
    }
}
