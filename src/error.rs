//! Error types for cbt-tunnel.

use thiserror::Error;

/// cbt-tunnel error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration rejected before any network or process activity
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Tunnel binary fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] crate::tunnel::fetch::FetchError),

    /// Tunnel process lifecycle error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] crate::tunnel::lifecycle::TunnelError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for cbt-tunnel operations.
pub type Result<T> = std::result::Result<T, Error>;
