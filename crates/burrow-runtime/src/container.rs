//! Container lifecycle state machine.
//!
//! ```text
//! Created -> RootFsPrepared -> Spawned -> LimitsApplied -> Running -> Exited -> TornDown
//! ```
//!
//! Any failure moves the container to `Failed`. Once the root filesystem
//! was prepared, teardown runs on every path, and a failure after spawn
//! kills and reaps the child first.

use std::fmt;

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::{ContainerName, ContainerState, ResourceLimits};

use crate::backend::{Backend, ContainerChild};
use crate::interrupt::Interrupt;

/// How the container process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited normally with this code.
    Code(i32),
    /// Killed by this signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// Returns the shell-style exit code: the code itself, or `128 + signal`.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Code(code) => code,
            Self::Signaled(signal) => 128 + signal,
        }
    }

    /// Returns whether the process exited with code zero.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signaled(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// A container instance with its configuration and lifecycle state.
#[derive(Debug)]
pub struct Container {
    /// Name keying every per-container host resource.
    pub name: ContainerName,
    /// Command executed inside the container.
    pub command: Vec<String>,
    /// Resource limits applied to the container's cgroups.
    pub limits: ResourceLimits,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// Host pid of the container process, once spawned.
    pub pid: Option<u32>,
    interrupt: Interrupt,
}

impl Container {
    /// Creates a new container in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Config`] if `command` is empty.
    pub fn new(name: ContainerName, command: Vec<String>, limits: ResourceLimits) -> Result<Self> {
        if command.is_empty() {
            return Err(BurrowError::Config {
                message: format!("no command given for container {name}"),
            });
        }
        Ok(Self {
            name,
            command,
            limits,
            state: ContainerState::Created,
            pid: None,
            interrupt: Interrupt::new(),
        })
    }

    /// Stops the container with `SIGKILL` once `interrupt` is triggered.
    ///
    /// A trigger before the process was released aborts the start with
    /// [`BurrowError::Interrupted`]; a later one ends the wait with the
    /// kill signal as exit status. Teardown runs either way.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Runs the whole lifecycle and returns how the container exited.
    ///
    /// Blocks until the container process terminates and its resources
    /// have been removed.
    ///
    /// # Errors
    ///
    /// Returns the first lifecycle error. When only teardown failed, the
    /// [`BurrowError::Teardown`] error is returned instead of the exit
    /// status; when both failed, the lifecycle error wins and the teardown
    /// error is logged.
    pub fn run<B: Backend>(&mut self, backend: &B) -> Result<ExitStatus> {
        if self.state != ContainerState::Created {
            return Err(BurrowError::Config {
                message: format!("container {} cannot start from state {}", self.name, self.state),
            });
        }

        if let Err(e) = backend.prepare_rootfs(&self.name) {
            self.state = ContainerState::Failed;
            return Err(e);
        }
        self.state = ContainerState::RootFsPrepared;

        let outcome = self.supervise(backend);
        if outcome.is_err() {
            self.state = ContainerState::Failed;
        }

        let teardown = teardown(backend, &self.name);
        match (outcome, teardown) {
            (Ok(status), Ok(())) => {
                self.state = ContainerState::TornDown;
                tracing::info!(name = %self.name, status = %status, "container finished");
                Ok(status)
            }
            (Ok(status), Err(e)) => {
                tracing::warn!(name = %self.name, status = %status, "container exited but teardown failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_err)) => {
                tracing::error!(name = %self.name, error = %teardown_err, "teardown after failure incomplete");
                Err(e)
            }
        }
    }

    fn supervise<B: Backend>(&mut self, backend: &B) -> Result<ExitStatus> {
        if self.interrupt.is_triggered() {
            return Err(self.interrupted());
        }
        let mut child = backend.spawn(&self.name, &self.command)?;
        let pid = child.pid();
        self.pid = Some(pid);
        self.state = ContainerState::Spawned;
        tracing::info!(name = %self.name, pid, "container process spawned");

        let started = if self.interrupt.arm(pid) {
            Err(self.interrupted())
        } else {
            self.start(backend, &mut child, pid)
        };
        if let Err(e) = started {
            self.interrupt.disarm();
            abort(&mut child, pid);
            return Err(e);
        }

        let waited = child.wait();
        self.interrupt.disarm();
        match waited {
            Ok(status) => {
                self.state = ContainerState::Exited;
                tracing::info!(name = %self.name, pid, status = %status, "container process exited");
                Ok(status)
            }
            Err(e) => {
                abort(&mut child, pid);
                Err(e)
            }
        }
    }

    fn start<B: Backend>(&mut self, backend: &B, child: &mut B::Child, pid: u32) -> Result<()> {
        backend.apply_limits(pid, &self.name, &self.limits)?;
        self.state = ContainerState::LimitsApplied;
        if self.interrupt.is_triggered() {
            return Err(self.interrupted());
        }
        child.release()?;
        self.state = ContainerState::Running;
        tracing::info!(name = %self.name, pid, "container running");
        Ok(())
    }

    fn interrupted(&self) -> BurrowError {
        tracing::warn!(name = %self.name, "start interrupted");
        BurrowError::Interrupted {
            name: self.name.to_string(),
        }
    }
}

fn abort<C: ContainerChild>(child: &mut C, pid: u32) {
    if let Err(e) = child.kill() {
        tracing::error!(pid, error = %e, "failed to kill container process");
    }
}

/// Removes the cgroups and root filesystem of a container.
///
/// Both steps always run; their failures are merged into one
/// [`BurrowError::Teardown`].
///
/// # Errors
///
/// Returns [`BurrowError::Teardown`] listing every failed step.
pub fn teardown<B: Backend>(backend: &B, name: &ContainerName) -> Result<()> {
    let mut failures = Vec::new();
    for result in [backend.release_limits(name), backend.teardown_rootfs(name)] {
        match result {
            Ok(()) => {}
            Err(BurrowError::Teardown { failures: steps }) => failures.extend(steps),
            Err(e) => failures.push(e.to_string()),
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(BurrowError::Teardown { failures })
    }
}

/// Kills whatever still runs in the container's cgroups, then tears its
/// resources down. Recovers from a launcher that died without tearing down.
///
/// # Errors
///
/// Returns [`BurrowError::Teardown`] listing every failed step.
pub fn cleanup<B: Backend>(backend: &B, name: &ContainerName) -> Result<()> {
    let evicted = backend.evict(name);
    let torn_down = teardown(backend, name);
    match (evicted, torn_down) {
        (Ok(_), result) => result,
        (Err(e), Ok(())) => Err(BurrowError::Teardown {
            failures: vec![e.to_string()],
        }),
        (Err(e), Err(BurrowError::Teardown { mut failures })) => {
            failures.insert(0, e.to_string());
            Err(BurrowError::Teardown { failures })
        }
        (Err(e), Err(other)) => Err(BurrowError::Teardown {
            failures: vec![e.to_string(), other.to_string()],
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    type Log = Rc<RefCell<Vec<String>>>;

    #[derive(Default)]
    struct FakeBackend {
        log: Log,
        fail_at: Option<&'static str>,
        exit: Option<ExitStatus>,
    }

    impl FakeBackend {
        fn failing_at(step: &'static str) -> Self {
            Self {
                fail_at: Some(step),
                ..Self::default()
            }
        }

        fn step(&self, step: &'static str) -> Result<()> {
            self.log.borrow_mut().push(step.to_string());
            if self.fail_at == Some(step) {
                return Err(BurrowError::Config {
                    message: format!("{step} failed"),
                });
            }
            Ok(())
        }

        fn steps(&self) -> Vec<String> {
            self.log.borrow().clone()
        }
    }

    struct FakeChild {
        log: Log,
        fail_at: Option<&'static str>,
        exit: ExitStatus,
    }

    impl FakeChild {
        fn step(&self, step: &'static str) -> Result<()> {
            self.log.borrow_mut().push(step.to_string());
            if self.fail_at == Some(step) {
                return Err(BurrowError::Sync {
                    message: format!("{step} failed"),
                });
            }
            Ok(())
        }
    }

    impl ContainerChild for FakeChild {
        fn pid(&self) -> u32 {
            4242
        }

        fn release(&mut self) -> Result<()> {
            self.step("release")
        }

        fn wait(&mut self) -> Result<ExitStatus> {
            self.step("wait")?;
            Ok(self.exit)
        }

        fn kill(&mut self) -> Result<()> {
            self.step("kill")
        }
    }

    impl Backend for FakeBackend {
        type Child = FakeChild;

        fn prepare_rootfs(&self, _name: &ContainerName) -> Result<()> {
            self.step("prepare")
        }

        fn spawn(&self, _name: &ContainerName, _command: &[String]) -> Result<FakeChild> {
            self.step("spawn")?;
            Ok(FakeChild {
                log: Rc::clone(&self.log),
                fail_at: self.fail_at,
                exit: self.exit.unwrap_or(ExitStatus::Code(0)),
            })
        }

        fn apply_limits(&self, pid: u32, _name: &ContainerName, _limits: &ResourceLimits) -> Result<()> {
            assert_eq!(pid, 4242);
            self.step("apply")
        }

        fn release_limits(&self, _name: &ContainerName) -> Result<()> {
            self.step("release_limits")
        }

        fn teardown_rootfs(&self, _name: &ContainerName) -> Result<()> {
            self.step("teardown")
        }
    }

    fn container() -> Container {
        Container::new(
            ContainerName::new("demo").unwrap(),
            vec!["/bin/sh".into()],
            ResourceLimits::default(),
        )
        .unwrap()
    }

    #[test]
    fn new_container_has_created_state() {
        let c = container();
        assert_eq!(c.state, ContainerState::Created);
        assert!(c.pid.is_none());
    }

    #[test]
    fn new_container_requires_a_command() {
        let err = Container::new(ContainerName::new("demo").unwrap(), vec![], ResourceLimits::default())
            .unwrap_err();
        assert!(matches!(err, BurrowError::Config { .. }));
    }

    #[test]
    fn run_follows_lifecycle_order() {
        let backend = FakeBackend {
            exit: Some(ExitStatus::Code(3)),
            ..FakeBackend::default()
        };
        let mut c = container();

        let status = c.run(&backend).unwrap();
        assert_eq!(status, ExitStatus::Code(3));
        assert_eq!(c.state, ContainerState::TornDown);
        assert_eq!(c.pid, Some(4242));
        assert_eq!(
            backend.steps(),
            ["prepare", "spawn", "apply", "release", "wait", "release_limits", "teardown"]
        );
    }

    #[test]
    fn failed_prepare_touches_nothing_else() {
        let backend = FakeBackend::failing_at("prepare");
        let mut c = container();
        assert!(c.run(&backend).is_err());
        assert_eq!(c.state, ContainerState::Failed);
        assert_eq!(backend.steps(), ["prepare"]);
    }

    #[test]
    fn failed_spawn_tears_down_prepared_rootfs() {
        let backend = FakeBackend::failing_at("spawn");
        let mut c = container();
        assert!(c.run(&backend).is_err());
        assert_eq!(c.state, ContainerState::Failed);
        assert_eq!(backend.steps(), ["prepare", "spawn", "release_limits", "teardown"]);
    }

    #[test]
    fn failed_apply_kills_child_before_teardown() {
        let backend = FakeBackend::failing_at("apply");
        let mut c = container();
        let err = c.run(&backend).unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: apply failed");
        assert_eq!(c.state, ContainerState::Failed);
        assert_eq!(
            backend.steps(),
            ["prepare", "spawn", "apply", "kill", "release_limits", "teardown"]
        );
    }

    #[test]
    fn failed_release_never_waits_on_child() {
        let backend = FakeBackend::failing_at("release");
        let mut c = container();
        assert!(matches!(c.run(&backend), Err(BurrowError::Sync { .. })));
        assert_eq!(
            backend.steps(),
            ["prepare", "spawn", "apply", "release", "kill", "release_limits", "teardown"]
        );
    }

    #[test]
    fn teardown_failure_is_not_swallowed() {
        let backend = FakeBackend::failing_at("teardown");
        let mut c = container();
        match c.run(&backend) {
            Err(BurrowError::Teardown { failures }) => {
                assert_eq!(failures, ["invalid configuration: teardown failed"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(c.state, ContainerState::Exited);
    }

    #[test]
    fn primary_error_wins_over_teardown_error() {
        struct Both(FakeBackend);
        impl Backend for Both {
            type Child = FakeChild;
            fn prepare_rootfs(&self, name: &ContainerName) -> Result<()> {
                self.0.prepare_rootfs(name)
            }
            fn spawn(&self, name: &ContainerName, command: &[String]) -> Result<FakeChild> {
                self.0.spawn(name, command)
            }
            fn apply_limits(&self, pid: u32, name: &ContainerName, limits: &ResourceLimits) -> Result<()> {
                self.0.apply_limits(pid, name, limits)
            }
            fn release_limits(&self, _name: &ContainerName) -> Result<()> {
                Err(BurrowError::Teardown {
                    failures: vec!["cgroup busy".into()],
                })
            }
            fn teardown_rootfs(&self, name: &ContainerName) -> Result<()> {
                self.0.teardown_rootfs(name)
            }
        }

        let backend = Both(FakeBackend::failing_at("apply"));
        let mut c = container();
        let err = c.run(&backend).unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: apply failed");
    }

    #[test]
    fn run_twice_is_rejected() {
        let backend = FakeBackend::default();
        let mut c = container();
        let _ = c.run(&backend).unwrap();
        assert!(matches!(c.run(&backend), Err(BurrowError::Config { .. })));
    }

    #[test]
    fn teardown_merges_failures_from_both_steps() {
        struct Broken;
        impl Backend for Broken {
            type Child = FakeChild;
            fn prepare_rootfs(&self, _: &ContainerName) -> Result<()> {
                Ok(())
            }
            fn spawn(&self, _: &ContainerName, _: &[String]) -> Result<FakeChild> {
                unreachable!()
            }
            fn apply_limits(&self, _: u32, _: &ContainerName, _: &ResourceLimits) -> Result<()> {
                Ok(())
            }
            fn release_limits(&self, _: &ContainerName) -> Result<()> {
                Err(BurrowError::Teardown {
                    failures: vec!["cpu busy".into(), "memory busy".into()],
                })
            }
            fn teardown_rootfs(&self, _: &ContainerName) -> Result<()> {
                Err(BurrowError::NotFound {
                    kind: "mount",
                    id: "demo".into(),
                })
            }
        }

        match teardown(&Broken, &ContainerName::new("demo").unwrap()) {
            Err(BurrowError::Teardown { failures }) => {
                assert_eq!(failures, ["cpu busy", "memory busy", "mount not found: demo"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn interrupt_before_spawn_still_tears_down() {
        let backend = FakeBackend::default();
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let mut c = container().with_interrupt(interrupt);

        let err = c.run(&backend).unwrap_err();
        assert!(matches!(err, BurrowError::Interrupted { .. }));
        assert_eq!(c.state, ContainerState::Failed);
        assert_eq!(backend.steps(), ["prepare", "release_limits", "teardown"]);
    }

    #[test]
    fn cleanup_evicts_then_tears_down() {
        struct Evicting(FakeBackend);
        impl Backend for Evicting {
            type Child = FakeChild;
            fn prepare_rootfs(&self, name: &ContainerName) -> Result<()> {
                self.0.prepare_rootfs(name)
            }
            fn spawn(&self, name: &ContainerName, command: &[String]) -> Result<FakeChild> {
                self.0.spawn(name, command)
            }
            fn apply_limits(&self, pid: u32, name: &ContainerName, limits: &ResourceLimits) -> Result<()> {
                self.0.apply_limits(pid, name, limits)
            }
            fn release_limits(&self, name: &ContainerName) -> Result<()> {
                self.0.release_limits(name)
            }
            fn evict(&self, _name: &ContainerName) -> Result<usize> {
                self.0.step("evict")?;
                Ok(1)
            }
            fn teardown_rootfs(&self, name: &ContainerName) -> Result<()> {
                self.0.teardown_rootfs(name)
            }
        }

        let backend = Evicting(FakeBackend::default());
        cleanup(&backend, &ContainerName::new("demo").unwrap()).unwrap();
        assert_eq!(backend.0.steps(), ["evict", "release_limits", "teardown"]);

        let backend = Evicting(FakeBackend::failing_at("evict"));
        match cleanup(&backend, &ContainerName::new("demo").unwrap()) {
            Err(BurrowError::Teardown { failures }) => {
                assert_eq!(failures, ["invalid configuration: evict failed"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(backend.0.steps(), ["evict", "release_limits", "teardown"]);
    }

    #[test]
    fn exit_status_maps_signals_to_shell_codes() {
        assert_eq!(ExitStatus::Code(0).code(), 0);
        assert!(ExitStatus::Code(0).success());
        assert_eq!(ExitStatus::Signaled(9).code(), 137);
        assert!(!ExitStatus::Signaled(9).success());
        assert_eq!(ExitStatus::Signaled(15).to_string(), "signal 15");
    }
}
