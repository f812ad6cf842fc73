//! Start handshake between the launcher and the container process.
//!
//! The launcher creates a pipe before spawning. The child receives the read
//! end as [`SYNC_FD`] and blocks on it before touching its root filesystem;
//! the launcher writes a single byte once the overlay is mounted and the
//! child sits in its cgroups. If the launcher fails first it drops the write
//! end unwritten, the child reads end-of-file, and the target never starts.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use burrow_common::constants::{SYNC_FD, SYNC_FD_ENV};
use burrow_common::error::{BurrowError, Result};
use nix::fcntl::OFlag;

const START_BYTE: u8 = b'1';

/// Launcher side of the handshake.
#[derive(Debug)]
pub struct StartSignal {
    writer: Option<File>,
}

impl StartSignal {
    /// Releases the waiting child. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Sync`] if the byte cannot be written, which
    /// usually means the child already exited.
    pub fn send(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.write_all(&[START_BYTE]).map_err(|e| BurrowError::Sync {
            message: format!("cannot release container process: {e}"),
        })
    }

    /// Drops the write end without releasing the child.
    pub fn abandon(&mut self) {
        self.writer = None;
    }
}

/// Creates the handshake pipe, returning the child's read end and the
/// launcher's [`StartSignal`]. Both ends are close-on-exec.
///
/// # Errors
///
/// Returns an error if the pipe cannot be created.
pub fn channel() -> Result<(OwnedFd, StartSignal)> {
    let (reader, writer) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| BurrowError::syscall("pipe2", "", e))?;
    Ok((
        reader,
        StartSignal {
            writer: Some(File::from(writer)),
        },
    ))
}

/// Blocks until the launcher releases this process.
///
/// The descriptor is taken from `BURROW_SYNC_FD`; when the variable is
/// absent nothing is waited for.
///
/// # Errors
///
/// Returns [`BurrowError::Sync`] if the variable is malformed or the
/// launcher closed the pipe without releasing.
pub fn wait_for_start() -> Result<()> {
    let Ok(value) = std::env::var(SYNC_FD_ENV) else {
        tracing::warn!("{SYNC_FD_ENV} not set, starting without launcher handshake");
        return Ok(());
    };
    let fd: RawFd = value.parse().map_err(|_| BurrowError::Sync {
        message: format!("{SYNC_FD_ENV} is not a descriptor: {value:?}"),
    })?;
    if fd != SYNC_FD {
        tracing::debug!(fd, "start pipe not on the default descriptor");
    }
    // SAFETY: the launcher installed this descriptor for us alone and nothing
    // else in this process refers to it; the `File` closes it after reading.
    let reader = unsafe { File::from_raw_fd(fd) };
    wait_on(reader)
}

fn wait_on(mut reader: impl Read) -> Result<()> {
    let mut byte = [0u8; 1];
    match reader.read_exact(&mut byte) {
        Ok(()) if byte[0] == START_BYTE => Ok(()),
        Ok(()) => Err(BurrowError::Sync {
            message: format!("unexpected start byte {:#04x}", byte[0]),
        }),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(BurrowError::Sync {
            message: "launcher aborted before releasing the container".into(),
        }),
        Err(e) => Err(BurrowError::Sync {
            message: format!("cannot read start signal: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_releases_reader() {
        let (reader, mut signal) = channel().unwrap();
        signal.send().unwrap();
        wait_on(File::from(reader)).unwrap();
    }

    #[test]
    fn abandoned_signal_reads_as_abort() {
        let (reader, mut signal) = channel().unwrap();
        signal.abandon();
        let err = wait_on(File::from(reader)).unwrap_err();
        assert!(err.to_string().contains("launcher aborted"));
    }

    #[test]
    fn dropped_signal_reads_as_abort() {
        let (reader, signal) = channel().unwrap();
        drop(signal);
        assert!(matches!(wait_on(File::from(reader)), Err(BurrowError::Sync { .. })));
    }

    #[test]
    fn send_is_idempotent() {
        let (reader, mut signal) = channel().unwrap();
        signal.send().unwrap();
        signal.send().unwrap();
        let mut reader = File::from(reader);
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, [START_BYTE]);
    }

    #[test]
    fn garbage_byte_is_rejected() {
        assert!(wait_on(&b"x"[..]).is_err());
    }

    #[test]
    fn channel_ends_are_close_on_exec() {
        use std::os::fd::AsRawFd;

        let (reader, _signal) = channel().unwrap();
        // SAFETY: querying descriptor flags has no side effects.
        let flags = unsafe { libc::fcntl(reader.as_raw_fd(), libc::F_GETFD) };
        assert_eq!(flags & libc::FD_CLOEXEC, libc::FD_CLOEXEC);
    }
}
