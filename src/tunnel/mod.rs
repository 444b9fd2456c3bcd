//! Tunnel management for the CBT tunnel binary.
//!
//! This module provides:
//! - Binary fetching (`fetch`)
//! - Process lifecycle and readiness detection (`lifecycle`)
//! - Line splitting over the child's chunked stdout (`lines`)
//! - Host-process exit cleanup (`process`)

pub mod fetch;
pub mod lifecycle;
pub mod lines;
pub mod process;

pub use fetch::{FetchError, TunnelFetcher};
pub use lifecycle::{Tunnel, TunnelError, TunnelHandle};
pub use lines::LineBuffer;
