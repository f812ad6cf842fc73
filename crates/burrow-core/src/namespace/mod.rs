//! Linux namespace selection for container isolation.
//!
//! A [`NamespaceSet`] describes which isolation domains a process receives
//! when it is created. Nothing touches the kernel here: the set is turned
//! into `clone(2)` flags and handed to a not-yet-started process through the
//! [`Isolate`] seam, and the namespaces come into existence at spawn time.

pub mod uts;

use nix::sched::CloneFlags;

/// A single kernel isolation domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Hostname and domain name.
    Uts,
    /// Process id tree; the first process becomes pid 1.
    Pid,
    /// Mount table.
    Mount,
    /// Network stack (interfaces, routes, firewall).
    Network,
    /// System V IPC objects and POSIX message queues.
    Ipc,
}

impl Namespace {
    /// Every namespace a container can be isolated in.
    pub const ALL: [Self; 5] = [Self::Uts, Self::Pid, Self::Mount, Self::Network, Self::Ipc];

    /// Returns the `clone(2)` flag creating a fresh instance of this namespace.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Network => CloneFlags::CLONE_NEWNET,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
        }
    }
}

/// Configuration for which namespaces a spawned process receives.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceSet {
    /// Isolate UTS (hostname) namespace.
    pub uts: bool,
    /// Isolate PID namespace.
    pub pid: bool,
    /// Isolate mount namespace.
    pub mount: bool,
    /// Isolate network namespace.
    pub network: bool,
    /// Isolate IPC namespace.
    pub ipc: bool,
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self {
            uts: true,
            pid: true,
            mount: true,
            network: true,
            ipc: true,
        }
    }
}

impl NamespaceSet {
    /// Returns a set with no isolation at all.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            uts: false,
            pid: false,
            mount: false,
            network: false,
            ipc: false,
        }
    }

    /// Returns whether `ns` is part of this set.
    #[must_use]
    pub const fn contains(&self, ns: Namespace) -> bool {
        match ns {
            Namespace::Uts => self.uts,
            Namespace::Pid => self.pid,
            Namespace::Mount => self.mount,
            Namespace::Network => self.network,
            Namespace::Ipc => self.ipc,
        }
    }

    /// Returns the combined `clone(2)` flags for every selected namespace.
    #[must_use]
    pub fn clone_flags(&self) -> CloneFlags {
        Namespace::ALL
            .into_iter()
            .filter(|ns| self.contains(*ns))
            .fold(CloneFlags::empty(), |flags, ns| flags | ns.clone_flag())
    }
}

/// A process descriptor that can be placed into new namespaces at creation.
pub trait Isolate {
    /// Adds `flags` to the flags the process will be created with.
    fn add_clone_flags(&mut self, flags: CloneFlags);
}

/// Configures `process` so that it is created inside fresh instances of
/// every namespace in `set`.
///
/// Only in-memory state changes; the kernel is involved once the process
/// is actually spawned, which is also where any failure surfaces.
pub fn set_namespace_isolation<P: Isolate + ?Sized>(process: &mut P, set: &NamespaceSet) {
    let flags = set.clone_flags();
    tracing::debug!(?flags, "namespace isolation configured");
    process.add_clone_flags(flags);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Descriptor {
        flags: Option<CloneFlags>,
    }

    impl Isolate for Descriptor {
        fn add_clone_flags(&mut self, flags: CloneFlags) {
            self.flags = Some(self.flags.unwrap_or_else(CloneFlags::empty) | flags);
        }
    }

    #[test]
    fn default_set_isolates_all_five_namespaces() {
        let flags = NamespaceSet::default().clone_flags();
        assert_eq!(
            flags,
            CloneFlags::CLONE_NEWUTS
                | CloneFlags::CLONE_NEWPID
                | CloneFlags::CLONE_NEWNS
                | CloneFlags::CLONE_NEWNET
                | CloneFlags::CLONE_NEWIPC
        );
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
    }

    #[test]
    fn empty_set_has_no_flags() {
        assert!(NamespaceSet::empty().clone_flags().is_empty());
    }

    #[test]
    fn partial_set_only_contains_selected_flags() {
        let set = NamespaceSet {
            network: false,
            ..NamespaceSet::default()
        };
        let flags = set.clone_flags();
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
    }

    #[test]
    fn isolation_is_applied_to_descriptor() {
        let mut desc = Descriptor::default();
        set_namespace_isolation(&mut desc, &NamespaceSet::default());
        assert_eq!(desc.flags, Some(NamespaceSet::default().clone_flags()));
    }
}
