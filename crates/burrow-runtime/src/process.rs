//! Spawning the container process.
//!
//! The launcher clones a child straight into the requested namespaces, so
//! the child is pid 1 of its pid namespace, and the child immediately
//! re-executes this binary as `burrow init <name> -- <command...>`. The
//! init phase then waits on the start pipe (see [`crate::sync`]) before it
//! activates the root filesystem and execs the target, keeping its pid.

use std::ffi::{CString, c_char};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use burrow_common::config::RuntimeConfig;
use burrow_common::constants::{
    CONFIG_ENV, INIT_SUBCOMMAND, PROMPT_ENV, PROMPT_VALUE, SYNC_FD, SYNC_FD_ENV,
};
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::ContainerName;
use burrow_core::namespace::Isolate;
use nix::sched::CloneFlags;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

use crate::backend::ContainerChild;
use crate::container::ExitStatus;
use crate::sync::{self, StartSignal};
use crate::terminal::{self, TerminalBridge, TerminalMode};

const CHILD_STACK_SIZE: usize = 1024 * 1024;
const EXEC_FAILED: &[u8] = b"burrow: cannot re-execute launcher binary\n";

/// Description of the init process to clone.
#[derive(Debug, Clone)]
pub struct InitProcess {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    clone_flags: CloneFlags,
}

impl Isolate for InitProcess {
    fn add_clone_flags(&mut self, flags: CloneFlags) {
        self.clone_flags |= flags;
    }
}

impl InitProcess {
    /// Describes `<program> init <name> -- <command...>` with the launcher's
    /// environment plus the prompt, the serialized configuration, and the
    /// start pipe descriptor. No namespaces are requested yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn new(
        program: impl Into<PathBuf>,
        name: &ContainerName,
        command: &[String],
        config: &RuntimeConfig,
    ) -> Result<Self> {
        let mut args = vec![
            INIT_SUBCOMMAND.to_string(),
            name.to_string(),
            "--".to_string(),
        ];
        args.extend(command.iter().cloned());

        let mut env: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| key != PROMPT_ENV && key != CONFIG_ENV && key != SYNC_FD_ENV)
            .collect();
        env.push((PROMPT_ENV.to_string(), PROMPT_VALUE.to_string()));
        env.push((CONFIG_ENV.to_string(), config.to_json()?));
        env.push((SYNC_FD_ENV.to_string(), SYNC_FD.to_string()));

        Ok(Self {
            program: program.into(),
            args,
            env,
            clone_flags: CloneFlags::empty(),
        })
    }

    /// Returns the binary the child executes.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Returns the arguments following the program name.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the value of an environment variable passed to the child.
    #[must_use]
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the namespace flags the child is cloned with.
    #[must_use]
    pub const fn clone_flags(&self) -> CloneFlags {
        self.clone_flags
    }

    /// Clones the child and starts the terminal bridge.
    ///
    /// The child blocks in its init phase until
    /// [`ContainerChild::release`] is called on the returned handle.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument contains a NUL byte, or if the pipe,
    /// pty, clone, or bridge setup fails. No child is left running on error.
    pub fn spawn(&self, mode: TerminalMode) -> Result<SpawnedInit> {
        let exec = ExecImage::new(&self.program, &self.args, &self.env)?;
        let (sync_reader, start) = sync::channel()?;
        let pty = match mode {
            TerminalMode::Pty => Some(terminal::open_pty()?),
            TerminalMode::Inherit => None,
        };

        let child_fds = ChildFds {
            sync: sync_reader.as_raw_fd(),
            tty: pty.as_ref().map(|p| p.slave.as_raw_fd()),
        };
        let mut stack = vec![0u8; CHILD_STACK_SIZE];
        let callback = Box::new(|| child_main(&exec, child_fds));

        // SAFETY: the callback only makes async-signal-safe libc calls on
        // data prepared before the clone, then execs or exits.
        let pid = unsafe {
            nix::sched::clone(
                callback,
                &mut stack,
                self.clone_flags,
                Some(Signal::SIGCHLD as libc::c_int),
            )
        }
        .map_err(|e| BurrowError::syscall("clone", &self.program, e))?;
        drop(sync_reader);

        let mut child = SpawnedInit {
            pid,
            start,
            bridge: None,
            reaped: false,
        };
        tracing::debug!(pid = pid.as_raw(), flags = ?self.clone_flags, "init process cloned");

        if let Some(pty) = pty {
            drop(pty.slave);
            match TerminalBridge::start(pty.master) {
                Ok(bridge) => child.bridge = Some(bridge),
                Err(e) => {
                    let _ = child.kill();
                    return Err(e);
                }
            }
        }
        Ok(child)
    }
}

/// NUL-terminated argv and envp built before cloning.
struct ExecImage {
    _strings: Vec<CString>,
    path: *const c_char,
    argv: Vec<*const c_char>,
    envp: Vec<*const c_char>,
}

impl ExecImage {
    fn new(program: &Path, args: &[String], env: &[(String, String)]) -> Result<Self> {
        let cstring = |s: String| {
            CString::new(s).map_err(|e| BurrowError::Config {
                message: format!("argument contains a NUL byte: {e}"),
            })
        };

        let program = cstring(program.to_string_lossy().into_owned())?;
        let argv_strings = std::iter::once(Ok(program.clone()))
            .chain(args.iter().map(|a| cstring(a.clone())))
            .collect::<Result<Vec<_>>>()?;
        let env_strings = env
            .iter()
            .map(|(k, v)| cstring(format!("{k}={v}")))
            .collect::<Result<Vec<_>>>()?;

        let argv = argv_strings
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        let envp = env_strings
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        let path = program.as_ptr();

        let mut strings = argv_strings;
        strings.extend(env_strings);
        strings.push(program);
        Ok(Self {
            _strings: strings,
            path,
            argv,
            envp,
        })
    }
}

#[derive(Clone, Copy)]
struct ChildFds {
    sync: libc::c_int,
    tty: Option<libc::c_int>,
}

/// Runs in the cloned child. Never returns on success.
fn child_main(exec: &ExecImage, fds: ChildFds) -> isize {
    // SAFETY: raw libc calls on descriptors owned by this (single-threaded)
    // child and on pointers kept alive by `exec` until execve.
    unsafe {
        if let Some(tty) = fds.tty {
            if libc::setsid() < 0 || libc::ioctl(tty, libc::TIOCSCTTY, 0) < 0 {
                return 126;
            }
            for target in 0..3 {
                if libc::dup2(tty, target) < 0 {
                    return 126;
                }
            }
        }

        let installed = if fds.sync == SYNC_FD {
            libc::fcntl(SYNC_FD, libc::F_SETFD, 0)
        } else {
            libc::dup2(fds.sync, SYNC_FD)
        };
        if installed < 0 {
            return 126;
        }

        let _ = libc::execve(exec.path, exec.argv.as_ptr(), exec.envp.as_ptr());
        let _ = libc::write(2, EXEC_FAILED.as_ptr().cast(), EXEC_FAILED.len());
    }
    127
}

/// Handle to the cloned init process.
#[derive(Debug)]
pub struct SpawnedInit {
    pid: Pid,
    start: StartSignal,
    bridge: Option<TerminalBridge>,
    reaped: bool,
}

impl SpawnedInit {
    fn reap(&mut self) -> Result<ExitStatus> {
        let status = loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => break ExitStatus::Code(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => break ExitStatus::Signaled(signal as i32),
                Ok(_) | Err(nix::errno::Errno::EINTR) => {}
                Err(e) => return Err(BurrowError::syscall("waitpid", "", e)),
            }
        };
        self.reaped = true;
        if let Some(bridge) = self.bridge.take() {
            bridge.finish();
        }
        Ok(status)
    }
}

impl ContainerChild for SpawnedInit {
    fn pid(&self) -> u32 {
        self.pid.as_raw().unsigned_abs()
    }

    fn release(&mut self) -> Result<()> {
        self.start.send()
    }

    fn wait(&mut self) -> Result<ExitStatus> {
        self.reap()
    }

    fn kill(&mut self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        self.start.abandon();
        match kill(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => return Err(BurrowError::syscall("kill", "", e)),
        }
        let status = self.reap()?;
        tracing::debug!(pid = self.pid.as_raw(), status = %status, "killed container process reaped");
        Ok(())
    }
}

impl Drop for SpawnedInit {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.kill();
        }
    }
}
