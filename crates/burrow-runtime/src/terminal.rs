//! Interactive terminal bridging.
//!
//! In [`TerminalMode::Pty`] the container gets a fresh pseudo-terminal as
//! its controlling terminal, and the launcher copies bytes between its own
//! stdio and the pty master while the host terminal sits in raw mode.
//! Raw mode and window size come from `crossterm`; the pty itself from
//! `nix`.

use std::fs::File;
use std::io::{self, IsTerminal};
use std::os::fd::{AsRawFd, OwnedFd};
use std::thread::JoinHandle;

use burrow_common::error::{BurrowError, Result};

/// How the container's stdio is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalMode {
    /// Allocate a pseudo-terminal and bridge it to the launcher's stdio.
    Pty,
    /// Share the launcher's stdin, stdout, and stderr.
    Inherit,
}

impl TerminalMode {
    /// Picks [`Pty`](Self::Pty) when stdin is a terminal.
    #[must_use]
    pub fn detect() -> Self {
        if io::stdin().is_terminal() {
            Self::Pty
        } else {
            Self::Inherit
        }
    }
}

/// Both ends of a freshly opened pseudo-terminal.
#[derive(Debug)]
pub struct Pty {
    /// Launcher side.
    pub master: OwnedFd,
    /// Container side; becomes the child's controlling terminal.
    pub slave: OwnedFd,
}

/// Opens a pseudo-terminal sized like the launcher's terminal, if any.
///
/// # Errors
///
/// Returns an error if no pty can be allocated.
pub fn open_pty() -> Result<Pty> {
    let size = window_size();
    let pty = nix::pty::openpty(size.as_ref(), None)
        .map_err(|e| BurrowError::syscall("openpty", "/dev/ptmx", e))?;
    for fd in [&pty.master, &pty.slave] {
        set_cloexec(fd)?;
    }
    Ok(Pty {
        master: pty.master,
        slave: pty.slave,
    })
}

fn window_size() -> Option<nix::pty::Winsize> {
    if !io::stdin().is_terminal() {
        return None;
    }
    let (cols, rows) = crossterm::terminal::size().ok()?;
    Some(nix::pty::Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    })
}

fn set_cloexec(fd: &OwnedFd) -> Result<()> {
    // SAFETY: F_SETFD only changes descriptor flags of a descriptor we own.
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(BurrowError::syscall("fcntl", "", io::Error::last_os_error()));
    }
    Ok(())
}

/// Restores the host terminal's cooked mode when dropped.
#[derive(Debug)]
pub struct RawModeGuard(());

impl RawModeGuard {
    /// Puts the host terminal into raw mode, or returns `None` when stdin
    /// is no terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal attributes cannot be changed.
    pub fn enable() -> Result<Option<Self>> {
        if !io::stdin().is_terminal() {
            return Ok(None);
        }
        crossterm::terminal::enable_raw_mode().map_err(|e| BurrowError::io("/dev/tty", e))?;
        Ok(Some(Self(())))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

/// Copies the launcher's stdio to and from a pty master.
#[derive(Debug)]
pub struct TerminalBridge {
    output: Option<JoinHandle<()>>,
    _raw: Option<RawModeGuard>,
}

impl TerminalBridge {
    /// Starts copying in both directions.
    ///
    /// # Errors
    ///
    /// Returns an error if the master cannot be duplicated, raw mode cannot
    /// be entered, or a copy thread cannot be started.
    pub fn start(master: OwnedFd) -> Result<Self> {
        let output_master = File::from(master);
        let mut input_master = output_master
            .try_clone()
            .map_err(|e| BurrowError::io("/dev/ptmx", e))?;
        let raw = RawModeGuard::enable()?;

        // The input thread blocks on stdin and is left behind when the
        // container exits; it dies with the launcher.
        let _input = std::thread::Builder::new()
            .name("pty-input".into())
            .spawn(move || {
                let _ = io::copy(&mut io::stdin(), &mut input_master);
            })
            .map_err(|e| BurrowError::io("pty-input", e))?;

        let output = std::thread::Builder::new()
            .name("pty-output".into())
            .spawn(move || {
                let mut master = output_master;
                // Reading the master fails with EIO once the last slave
                // holder exits; that is the normal end of the stream.
                let _ = io::copy(&mut master, &mut io::stdout());
            })
            .map_err(|e| BurrowError::io("pty-output", e))?;

        Ok(Self {
            output: Some(output),
            _raw: raw,
        })
    }

    /// Waits for the container's output to drain, then restores the host
    /// terminal.
    pub fn finish(mut self) {
        if self.output.take().is_some_and(|output| output.join().is_err()) {
            tracing::warn!("pty output thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn pty_ends_are_connected() {
        let Ok(pty) = open_pty() else {
            // No /dev/ptmx in minimal sandboxes.
            return;
        };
        let mut master = File::from(pty.master);
        let mut slave = File::from(pty.slave);
        slave.write_all(b"ping\n").unwrap();

        let mut buf = [0u8; 4];
        master.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn pty_ends_are_close_on_exec() {
        let Ok(pty) = open_pty() else {
            return;
        };
        for fd in [&pty.master, &pty.slave] {
            // SAFETY: querying descriptor flags has no side effects.
            let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
            assert_eq!(flags & libc::FD_CLOEXEC, libc::FD_CLOEXEC);
        }
    }

    #[test]
    fn raw_mode_is_skipped_without_terminal() {
        if io::stdin().is_terminal() {
            return;
        }
        assert!(RawModeGuard::enable().unwrap().is_none());
    }
}
