//! Tunnel configuration and defaults.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default download URL for the tunnel binary.
pub const DEFAULT_TUNNEL_BIN_URL: &str = "http://crossbrowsertesting.com/cbttunnel.jar";

const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 1000 * 60 * 2;

/// Errors raised while validating a [`TunnelConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No auth key was provided
    #[error("auth key is required but missing")]
    MissingAuthKey,
}

/// Configuration for one tunnel invocation.
///
/// Every field except `auth_key` has a usable default.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Local path of the tunnel binary; downloaded here on cache miss.
    pub tunnel_bin_path: PathBuf,
    /// URL the tunnel binary is downloaded from.
    pub tunnel_bin_url: String,
    /// How long to wait for the tunnel to report a connection.
    pub tunnel_startup_timeout: Duration,
    /// CBT API auth key, passed to the tunnel process at startup. Required.
    pub auth_key: String,
    /// Java runtime used to run the jar.
    pub java_bin: PathBuf,
}

impl TunnelConfig {
    /// Create a configuration with defaults for everything but the auth key.
    pub fn new(auth_key: impl Into<String>) -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("cbt");

        Self {
            tunnel_bin_path: cache_dir.join("cbttunnel.jar"),
            tunnel_bin_url: DEFAULT_TUNNEL_BIN_URL.to_string(),
            tunnel_startup_timeout: Duration::from_millis(DEFAULT_STARTUP_TIMEOUT_MS),
            auth_key: auth_key.into(),
            java_bin: PathBuf::from("java"),
        }
    }

    /// Reject configurations that cannot launch a tunnel.
    ///
    /// Runs before any network or process activity, so a bad configuration
    /// leaves no side effects behind.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_key.trim().is_empty() {
            return Err(ConfigError::MissingAuthKey);
        }
        Ok(())
    }
}
