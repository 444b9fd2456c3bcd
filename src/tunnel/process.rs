//! Host-process coordination for spawned tunnels.
//!
//! Provides process liveness checks and the last-resort cleanup hook that
//! kills the active tunnel if the host process exits without releasing it.

use std::sync::{Arc, Mutex, Weak};

use crate::tunnel::lifecycle::HandleShared;

/// Check if a process is still alive.
pub fn pid_is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        // Signal 0 sends nothing but reports whether the process exists.
        let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if result == 0 {
            return true;
        }
        // EPERM: it exists but is not ours to signal.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        true // Non-Unix: can't check liveness, assume running
    }
}

/// The one tunnel (at most) currently pending or live in this process.
static ACTIVE_TUNNEL: Mutex<Option<Weak<HandleShared>>> = Mutex::new(None);

#[cfg(unix)]
static EXIT_HOOK: std::sync::Once = std::sync::Once::new();

/// Register `shared` as the process-wide active tunnel.
///
/// The slot holds a weak reference only; ownership stays with the caller's
/// handle. The exit hook is installed once per process and is a no-op when no
/// tunnel is active or the handle was already terminated.
pub(crate) fn register_active(shared: &Arc<HandleShared>) {
    if let Ok(mut slot) = ACTIVE_TUNNEL.lock() {
        *slot = Some(Arc::downgrade(shared));
    }

    #[cfg(unix)]
    EXIT_HOOK.call_once(|| unsafe {
        libc::atexit(kill_active_on_exit);
    });
}

#[cfg(unix)]
extern "C" fn kill_active_on_exit() {
    let Ok(slot) = ACTIVE_TUNNEL.lock() else {
        return;
    };
    if let Some(shared) = slot.as_ref().and_then(Weak::upgrade) {
        if !shared.terminated() {
            unsafe {
                libc::kill(shared.pid() as libc::pid_t, libc::SIGKILL);
            }
        }
    }
}
