//! cbt-tunnel - managed lifecycle for the CrossBrowserTesting tunnel binary.
//!
//! Downloads `cbttunnel.jar` on first use, spawns it as a child process with
//! an auth key, and waits for it to report a live connection before handing
//! the running process back to the caller. The returned handle guarantees the
//! tunnel is terminated on release, on any error path, and when the host
//! process exits without releasing it.

pub mod config;
pub mod error;
pub mod tunnel;

pub use error::{Error, Result};

pub use config::{ConfigError, TunnelConfig};

pub use tunnel::fetch::{FetchError, TunnelFetcher};
pub use tunnel::lifecycle::{Tunnel, TunnelError, TunnelHandle, READY_TOKEN};
pub use tunnel::lines::LineBuffer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
