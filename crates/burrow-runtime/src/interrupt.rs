//! Launcher shutdown on `SIGINT`, `SIGTERM`, and `SIGHUP`.
//!
//! The container process is pid 1 of its pid namespace, so it ignores every
//! catchable signal sent from the host. When the launcher itself is told to
//! stop, it kills the container with `SIGKILL` instead of dying, which lets
//! the lifecycle reap it and tear its resources down as usual.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use burrow_common::error::{BurrowError, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// Shared stop request, set from the signal handler thread.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<State>,
}

#[derive(Debug, Default)]
struct State {
    triggered: AtomicBool,
    target: AtomicU32,
}

impl Interrupt {
    /// Creates an interrupt that nothing has triggered yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `SIGINT`, `SIGTERM`, and `SIGHUP` of this process to
    /// [`trigger`](Self::trigger). Can be installed once per process.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Signal`] if the handler cannot be installed.
    pub fn install(&self) -> Result<()> {
        let interrupt = self.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("stop requested, killing container");
            interrupt.trigger();
        })
        .map_err(|e| BurrowError::Signal {
            message: e.to_string(),
        })
    }

    /// Marks the interrupt and kills the armed process, if any.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        let pid = self.inner.target.load(Ordering::SeqCst);
        if pid != 0 {
            kill_target(pid);
        }
    }

    /// Returns whether a stop was requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Makes `pid` the process a later [`trigger`](Self::trigger) kills.
    ///
    /// Returns `true` if a stop was already requested; the caller then owns
    /// stopping the process.
    pub(crate) fn arm(&self, pid: u32) -> bool {
        self.inner.target.store(pid, Ordering::SeqCst);
        self.is_triggered()
    }

    /// Forgets the armed process. Called before its pid can be reused.
    pub(crate) fn disarm(&self) {
        self.inner.target.store(0, Ordering::SeqCst);
    }
}

fn kill_target(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::error!(pid, error = %e, "failed to kill container process"),
    }
}
