//! Artifact download, verification and unpacking.
//!
//! The artifact origin is authenticated: a service-account credential
//! file holds a token endpoint and client secret, exchanged for a
//! bearer token before the download. Everything downstream of the
//! download is pure filesystem work: hash verification against the
//! trusted index, promotion to a stable path, and zip extraction with
//! a traversal guard.

use std::fs;
use std::io::Read;
use std::path::Path;

use lumen_common::UpdateError;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zip::ZipArchive;

/// Seam for fetching the artifact, so the pipeline can be exercised
/// without a network or a token service.
pub trait ArtifactFetcher {
    fn fetch(
        &self,
        remote_path: &str,
        dest: &Path,
    ) -> impl std::future::Future<Output = Result<(), UpdateError>> + Send;
}

/// Service-account credential file for the artifact origin.
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    token_uri: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Authenticated HTTP fetcher: client-credentials token exchange, then
/// a streamed GET with the bearer token.
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
    credentials_file: std::path::PathBuf,
}

impl HttpArtifactFetcher {
    pub fn new<P: Into<std::path::PathBuf>>(credentials_file: P) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(format!("lumend/{}", env!("CARGO_PKG_VERSION")))
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            credentials_file: credentials_file.into(),
        }
    }

    async fn access_token(&self) -> Result<String, UpdateError> {
        let raw = fs::read_to_string(&self.credentials_file).map_err(|e| {
            UpdateError::Download(format!(
                "failed to read credential file {}: {}",
                self.credentials_file.display(),
                e
            ))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)
            .map_err(|e| UpdateError::Download(format!("bad credential file: {}", e)))?;

        let resp = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", key.client_id.as_str()),
                ("client_secret", key.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| UpdateError::Download(format!("token exchange failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(UpdateError::Download(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| UpdateError::Download(format!("bad token response: {}", e)))?;
        Ok(token.access_token)
    }
}

impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, remote_path: &str, dest: &Path) -> Result<(), UpdateError> {
        let token = self.access_token().await?;

        let mut resp = self
            .client
            .get(remote_path)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| UpdateError::Download(format!("request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(UpdateError::Download(format!(
                "artifact origin returned {}",
                resp.status()
            )));
        }

        use tokio::io::AsyncWriteExt;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| UpdateError::Download(format!("read failed: {}", e)))?
        {
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;

        info!("downloaded {} ({} bytes)", dest.display(), written);
        Ok(())
    }
}

/// SHA-256 of a file, as lowercase hex, read in chunks.
pub fn compute_sha256(path: &Path) -> Result<String, UpdateError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// The integrity gate: the staged artifact's hash must equal the one
/// the trusted index records, byte-for-byte hex. Unconditional - no
/// install happens past a mismatch.
pub fn verify_artifact(path: &Path, expected_sha256: &str) -> Result<(), UpdateError> {
    let actual = compute_sha256(path)?;
    if actual != expected_sha256 {
        return Err(UpdateError::Integrity {
            expected: expected_sha256.to_string(),
            actual,
        });
    }
    debug!("artifact hash verified ({})", expected_sha256);
    Ok(())
}

/// Mark the verified artifact executable and move it to its stable
/// destination (same filesystem, so the rename is atomic).
pub fn promote(staging: &Path, dest: &Path) -> Result<(), UpdateError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(staging, fs::Permissions::from_mode(0o755))
            .map_err(|e| UpdateError::Install(format!("chmod failed: {}", e)))?;
    }
    fs::rename(staging, dest)
        .map_err(|e| UpdateError::Install(format!("failed to promote artifact: {}", e)))?;
    Ok(())
}

/// Extract the archive into `dest_dir`, refusing any entry whose
/// resolved path would land outside it.
pub fn unpack(archive: &Path, dest_dir: &Path) -> Result<(), UpdateError> {
    let file = fs::File::open(archive)
        .map_err(|e| UpdateError::Install(format!("failed to open archive: {}", e)))?;
    let mut zip = ZipArchive::new(file)
        .map_err(|e| UpdateError::Install(format!("failed to read archive: {}", e)))?;

    fs::create_dir_all(dest_dir)?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| UpdateError::Install(format!("bad archive entry: {}", e)))?;

        let rel = match entry.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => {
                return Err(UpdateError::Install(format!(
                    "illegal path in archive: {}",
                    entry.name()
                )));
            }
        };
        let out = dest_dir.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::File::create(&out)?;
        std::io::copy(&mut entry, &mut f)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(())
}
