//! Tunnel process lifecycle management.
//!
//! Provides the `Tunnel` struct which manages:
//! - Binary fetch on cache miss
//! - Tunnel process spawning
//! - Readiness detection on stdout, raced against a startup deadline
//! - Idempotent termination, including host-exit cleanup

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use crate::config::TunnelConfig;
use crate::tunnel::fetch::TunnelFetcher;
use crate::tunnel::lines::LineBuffer;
use crate::tunnel::process;

/// The line token the tunnel prints once its connection is live.
pub const READY_TOKEN: &str = "CONNECTED";

/// How long termination paths wait for the process to actually exit.
const EXIT_WAIT: Duration = Duration::from_secs(5);

/// Errors that can occur during tunnel lifecycle management.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The tunnel process could not be created
    #[error("Failed to spawn tunnel process: {0}")]
    Spawn(#[source] std::io::Error),

    /// No readiness token was observed within the deadline
    #[error("Timed out waiting for tunnel to connect after {timeout_ms}ms")]
    StartupTimeout { timeout_ms: u64 },

    /// The tunnel exited before reporting a connection
    #[error("Tunnel process exited before reporting a connection")]
    Disconnected,

    /// Readiness was already awaited for this handle
    #[error("Tunnel stdout already consumed")]
    StdoutTaken,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;

/// State shared between a [`TunnelHandle`] and the host-exit cleanup hook.
///
/// The hook only ever reads the pid and the terminated flag; it never makes
/// control decisions.
pub(crate) struct HandleShared {
    pid: u32,
    terminated: AtomicBool,
}

impl HandleShared {
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Handle to a spawned tunnel process.
///
/// Exclusively owned by the caller once readiness resolves; the host-exit
/// hook keeps only a weak reference. Dropping the handle terminates the
/// tunnel.
pub struct TunnelHandle {
    shared: Arc<HandleShared>,
    child: Mutex<Option<Child>>,
    stdout: Mutex<Option<ChildStdout>>,
}

impl TunnelHandle {
    fn new(pid: u32, child: Child, stdout: Option<ChildStdout>) -> Self {
        Self {
            shared: Arc::new(HandleShared {
                pid,
                terminated: AtomicBool::new(false),
            }),
            child: Mutex::new(Some(child)),
            stdout: Mutex::new(stdout),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<HandleShared> {
        &self.shared
    }

    /// OS process id of the tunnel.
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    /// Whether `terminate` has been issued for this handle.
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated()
    }

    fn take_stdout(&self) -> Option<ChildStdout> {
        self.stdout.lock().ok().and_then(|mut guard| guard.take())
    }

    /// Send the kill signal to the tunnel process.
    ///
    /// Idempotent: the first call signals, every later call is a no-op. Safe
    /// to call on a process that already exited.
    pub fn terminate(&self) {
        if self.shared.terminated.swap(true, Ordering::SeqCst) {
            return;
        }

        log::debug!("Terminating tunnel process {}", self.shared.pid);
        if let Ok(mut guard) = self.child.lock() {
            if let Some(child) = guard.as_mut() {
                if let Err(e) = child.start_kill() {
                    // Reported when the child already exited.
                    log::debug!(
                        "Kill signal for tunnel pid {} not delivered: {}",
                        self.shared.pid,
                        e
                    );
                }
            }
        }
    }

    /// Wait until the tunnel process has actually exited, up to `timeout`.
    ///
    /// Returns true once the exit status has been collected.
    pub async fn wait_exited(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let Ok(mut guard) = self.child.lock() else {
                    return false;
                };
                match guard.as_mut() {
                    None => return true, // already reaped
                    Some(child) => match child.try_wait() {
                        Ok(Some(status)) => {
                            log::debug!(
                                "Tunnel pid {} exited with {:?}",
                                self.shared.pid,
                                status.code()
                            );
                            *guard = None;
                            return true;
                        }
                        Ok(None) => {}
                        Err(_) => return false,
                    },
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        // Discarding the handle releases the tunnel.
        self.terminate();
    }
}

/// Manages the CBT tunnel process lifecycle.
///
/// One invocation is the sequential pipeline fetch -> spawn -> await-ready;
/// each stage either produces the next stage's input or a terminal error.
pub struct Tunnel {
    config: TunnelConfig,
    fetcher: TunnelFetcher,
}

impl Tunnel {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            fetcher: TunnelFetcher::new(),
        }
    }

    /// Download the tunnel binary if needed, spawn it, and wait for it to
    /// report a live connection.
    ///
    /// On success the returned handle is live and owned by the caller. On any
    /// failure the spawned process (if any) has been terminated.
    pub async fn run(&self) -> crate::error::Result<TunnelHandle> {
        self.config.validate()?;

        let artifact = self
            .fetcher
            .ensure_local(&self.config.tunnel_bin_url, &self.config.tunnel_bin_path)
            .await?;
        let handle = self.spawn_tunnel(&artifact)?;
        let handle = self.await_ready(handle).await?;

        Ok(handle)
    }

    /// Spawn the tunnel process from a local binary.
    ///
    /// The invocation shape is `<java> -jar <artifact> -authkey <key>`. The
    /// handle is registered with the host-exit hook so an unreleased tunnel
    /// cannot outlive the host process.
    pub fn spawn_tunnel(&self, artifact: &Path) -> Result<TunnelHandle> {
        log::info!("Spawning tunnel process from {:?}", artifact);

        let mut child = Command::new(&self.config.java_bin)
            .arg("-jar")
            .arg(artifact)
            .arg("-authkey")
            .arg(&self.config.auth_key)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TunnelError::Spawn)?;

        let pid = child.id().ok_or_else(|| {
            TunnelError::Spawn(std::io::Error::other(
                "tunnel process exited before a pid was assigned",
            ))
        })?;

        // Drain stderr so the OS pipe buffer cannot fill and stall the child.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("tunnel stderr: {}", line);
                }
            });
        }

        let stdout = child.stdout.take();
        let handle = TunnelHandle::new(pid, child, stdout);
        process::register_active(handle.shared());

        Ok(handle)
    }

    /// Wait for the tunnel to print a line containing [`READY_TOKEN`].
    ///
    /// Races the stdout scan against the configured startup deadline; exactly
    /// one side wins. On timeout or early exit the process is terminated
    /// before the error is returned, so no failure path leaks a process.
    pub async fn await_ready(&self, handle: TunnelHandle) -> Result<TunnelHandle> {
        let timeout = self.config.tunnel_startup_timeout;
        let stdout = handle.take_stdout().ok_or(TunnelError::StdoutTaken)?;

        log::info!("Waiting for tunnel to report a connection...");

        match tokio::time::timeout(timeout, scan_for_ready(stdout)).await {
            Ok(Ok(stdout)) => {
                // The deadline future is gone before the caller sees Ready,
                // so it can no longer fire for this invocation.
                drain_stdout(stdout);
                log::info!("CBT tunnel started");
                log::info!(
                    "Visit http://app.crossbrowsertesting.com/selenium to view test progress"
                );
                log::warn!(
                    "Stop all tests after a run completes; timed-out connections keep consuming account minutes"
                );
                Ok(handle)
            }
            Ok(Err(e)) => {
                handle.terminate();
                handle.wait_exited(EXIT_WAIT).await;
                Err(e)
            }
            Err(_elapsed) => {
                handle.terminate();
                handle.wait_exited(EXIT_WAIT).await;
                Err(TunnelError::StartupTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Read stdout chunks until a non-empty line containing [`READY_TOKEN`]
/// appears, then hand the stream back so remaining output can be drained.
///
/// Resolution is one-shot by construction: the first matching line returns,
/// so later token lines in the same batch are never inspected.
async fn scan_for_ready<R>(mut stdout: R) -> Result<R>
where
    R: AsyncRead + Unpin,
{
    let mut lines = LineBuffer::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stdout.read(&mut chunk).await?;
        if n == 0 {
            // Child closed stdout without ever connecting.
            return Err(TunnelError::Disconnected);
        }

        for line in lines.push(&chunk[..n]) {
            if line.is_empty() {
                continue;
            }
            log::debug!("tunnel stdout: {}", line);
            if line.contains(READY_TOKEN) {
                return Ok(stdout);
            }
        }
    }
}

/// Keep consuming tunnel output after readiness so the pipe never fills.
fn drain_stdout(stdout: ChildStdout) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("tunnel stdout: {}", line);
        }
    });
}
