//! Tunnel binary fetching.

use std::path::{Path, PathBuf};

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Errors that can occur while ensuring the tunnel binary is present.
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Server returned {0}")]
    HttpStatus(StatusCode),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Tunnel binary fetcher.
///
/// Guarantees a file exists at the destination path, downloading it on cache
/// miss. Presence alone counts as a hit; no integrity or staleness check is
/// performed. Concurrent calls for the same destination may both download.
pub struct TunnelFetcher {
    client: Client,
}

impl TunnelFetcher {
    /// Create a fetcher with a download-sized request timeout.
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }

    /// Return `dest` once a file exists there, downloading `url` if needed.
    ///
    /// Missing parent directories are created. A failed download never leaves
    /// a partial file behind; after an error the destination path is absent.
    pub async fn ensure_local(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        if dest.exists() {
            log::debug!("Tunnel binary already present at {:?}", dest);
            return Ok(dest.to_path_buf());
        }

        log::info!("{:?} not present; downloading from {}", dest, url);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match self.download(url, dest).await {
            Ok(()) => Ok(dest.to_path_buf()),
            Err(e) => {
                // Leave clean absence, never a truncated artifact.
                let _ = tokio::fs::remove_file(dest).await;
                Err(e)
            }
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status()));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(())
    }
}

impl Default for TunnelFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP response with the given status and body, then close.
    async fn serve_once(status_line: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let header = format!(
                    "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status_line,
                    body.len()
                );
                let _ = sock.write_all(header.as_bytes()).await;
                let _ = sock.write_all(body).await;
            }
        });

        format!("http://{}/cbttunnel.jar", addr)
    }

    #[tokio::test]
    async fn test_existing_file_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cbttunnel.jar");
        std::fs::write(&dest, b"cached").unwrap();

        // The URL is unreachable: a cache hit must not touch the network.
        let fetcher = TunnelFetcher::new();
        let got = fetcher
            .ensure_local("http://127.0.0.1:1/nope.jar", &dest)
            .await
            .unwrap();

        assert_eq!(got, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"cached");
    }

    #[tokio::test]
    async fn test_downloads_on_miss_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bin").join("cbttunnel.jar");
        let url = serve_once("HTTP/1.1 200 OK", b"jar-bytes").await;

        let fetcher = TunnelFetcher::new();
        let got = fetcher.ensure_local(&url, &dest).await.unwrap();

        assert_eq!(got, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"jar-bytes");
    }

    #[tokio::test]
    async fn test_unreachable_server_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cbttunnel.jar");

        // Bind then drop so the port is free and the connection refused.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = TunnelFetcher::new();
        let result = fetcher
            .ensure_local(&format!("http://{}/x.jar", addr), &dest)
            .await;

        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_aborted_transfer_cleans_up_partial_file() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Advertise far more bytes than we send, then close mid-body.
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let header =
                    "HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\nConnection: close\r\n\r\n";
                let _ = sock.write_all(header.as_bytes()).await;
                let _ = sock.write_all(b"partial").await;
                let _ = sock.shutdown().await;
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cbttunnel.jar");

        let fetcher = TunnelFetcher::new();
        let result = fetcher
            .ensure_local(&format!("http://{}/x.jar", addr), &dest)
            .await;

        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cbttunnel.jar");
        let url = serve_once("HTTP/1.1 404 Not Found", b"missing").await;

        let fetcher = TunnelFetcher::new();
        let result = fetcher.ensure_local(&url, &dest).await;

        assert!(matches!(
            result,
            Err(FetchError::HttpStatus(s)) if s.as_u16() == 404
        ));
        assert!(!dest.exists());
    }
}
