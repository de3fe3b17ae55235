//! Verified persistence of certificate/key pairs.
//!
//! The final directory may be a network or volume mount, so pairs are never renamed into
//! place. Each file is written to a staging directory, flushed, synced and length checked,
//! then copied into the final directory, synced and length checked again. A failure at any
//! stage removes what was written and puts back the previously deployed pair, if there was one.

use crate::error::Error;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Final locations of a written pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPair {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CertStoreWriter {
    staging_dir: PathBuf,
    final_dir: PathBuf,
}

struct Artifact<'a> {
    payload: &'a [u8],
    staged: PathBuf,
    target: PathBuf,
    private: bool,
}

impl CertStoreWriter {
    #[must_use]
    pub fn new(staging_dir: impl Into<PathBuf>, final_dir: impl Into<PathBuf>) -> Self {
        CertStoreWriter {
            staging_dir: staging_dir.into(),
            final_dir: final_dir.into(),
        }
    }

    #[must_use]
    pub fn cert_path(&self, domain: &str) -> PathBuf {
        self.final_dir.join(format!("{domain}.crt"))
    }

    #[must_use]
    pub fn key_path(&self, domain: &str) -> PathBuf {
        self.final_dir.join(format!("{domain}.key"))
    }

    /// Write `<domain>.crt` and `<domain>.key` into the final directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] if a written file doesn't match its payload length and
    /// [`Error::IO`] for any filesystem failure. In both cases no partially written pair is
    /// left at the final paths.
    pub async fn write_pair(
        &self,
        domain: &str,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<StoredPair, Error> {
        fs::create_dir_all(&self.staging_dir).await?;
        fs::create_dir_all(&self.final_dir).await?;

        let stamp = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let artifacts = [
            Artifact {
                payload: cert_pem,
                staged: self
                    .staging_dir
                    .join(format!("proxycrab-{domain}-{stamp}.crt")),
                target: self.cert_path(domain),
                private: false,
            },
            Artifact {
                payload: key_pem,
                staged: self
                    .staging_dir
                    .join(format!("proxycrab-{domain}-{stamp}.key")),
                target: self.key_path(domain),
                private: true,
            },
        ];

        let result = self.stage_and_deploy(&artifacts).await;
        for artifact in &artifacts {
            remove_if_present(&artifact.staged).await;
        }
        result?;

        debug!("stored certificate pair for {domain}");
        Ok(StoredPair {
            cert_path: artifacts[0].target.clone(),
            key_path: artifacts[1].target.clone(),
        })
    }

    async fn stage_and_deploy(&self, artifacts: &[Artifact<'_>]) -> Result<(), Error> {
        for artifact in artifacts {
            write_synced(&artifact.staged, artifact.payload, artifact.private).await?;
            verify_len(&artifact.staged, artifact.payload.len()).await?;
        }

        let mut previous = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            previous.push(fs::read(&artifact.target).await.ok());
        }

        for (deployed, artifact) in artifacts.iter().enumerate() {
            if let Err(err) = deploy(artifact).await {
                warn!(
                    "deploying {} failed, rolling back: {err}",
                    artifact.target.display()
                );
                for (rollback, prior) in artifacts.iter().zip(&previous).take(deployed + 1) {
                    restore(rollback, prior.as_deref()).await;
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

async fn deploy(artifact: &Artifact<'_>) -> Result<(), Error> {
    fs::copy(&artifact.staged, &artifact.target).await?;
    File::open(&artifact.target).await?.sync_all().await?;
    if artifact.private {
        restrict_permissions(&artifact.target).await?;
    }
    verify_len(&artifact.target, artifact.payload.len()).await
}

async fn restore(artifact: &Artifact<'_>, prior: Option<&[u8]>) {
    match prior {
        Some(bytes) => {
            if let Err(err) = write_synced(&artifact.target, bytes, artifact.private).await {
                warn!(
                    "failed to restore {}: {err}",
                    artifact.target.display()
                );
                remove_if_present(&artifact.target).await;
            }
        }
        None => remove_if_present(&artifact.target).await,
    }
}

async fn write_synced(path: &Path, payload: &[u8], private: bool) -> Result<(), Error> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        if private {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(path).await?;
    file.write_all(payload).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// Compare the on-disk length of `path` with the payload that was written to it.
pub(crate) async fn verify_len(path: &Path, expected: usize) -> Result<(), Error> {
    let actual = fs::metadata(path).await?.len();
    let expected = expected as u64;
    if actual != expected {
        return Err(Error::Integrity {
            path: path.display().to_string(),
            actual,
            expected,
        });
    }
    Ok(())
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), Error> {
    Ok(())
}

async fn remove_if_present(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove {}: {err}", path.display()),
    }
}
