//! Domain primitive types used across the burrow workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CPU_QUOTA_US, DEFAULT_MEMORY_LIMIT, MAX_NAME_LEN, RESERVED_CGROUP_FILES,
    RESERVED_CGROUP_PREFIXES,
};
use crate::error::{BurrowError, Result};

/// Caller-supplied container name.
///
/// The name is the only key from which per-container paths (overlay layers,
/// cgroup directories) are derived, so it must be safe to use as a single
/// path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerName(String);

impl ContainerName {
    /// Validates and wraps a container name.
    ///
    /// Accepts 1 to 64 characters from `[A-Za-z0-9_.-]`, rejecting `.`,
    /// `..`, names starting with `-`, and names of cgroup control files
    /// (`tasks`, `cgroup.procs`, `cpu.max`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::InvalidName`] if the name is not path-safe.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("name is empty")
        } else if name.len() > MAX_NAME_LEN {
            Some("name is longer than 64 characters")
        } else if name == "." || name == ".." {
            Some("name is a relative path component")
        } else if name.starts_with('-') {
            Some("name starts with '-'")
        } else if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            Some("name may only contain ASCII letters, digits, '_', '.', and '-'")
        } else if is_cgroup_control_file(&name) {
            Some("name is reserved for a cgroup control file")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(BurrowError::InvalidName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_cgroup_control_file(name: &str) -> bool {
    RESERVED_CGROUP_FILES.contains(&name)
        || name
            .split_once('.')
            .is_some_and(|(prefix, _)| RESERVED_CGROUP_PREFIXES.contains(&prefix))
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContainerName {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContainerName {
    type Error = BurrowError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ContainerName> for String {
    fn from(name: ContainerName) -> Self {
        name.0
    }
}

impl AsRef<std::path::Path> for ContainerName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

/// Memory limit as written to the kernel: a byte count with an optional
/// `k`, `m`, or `g` suffix.
///
/// The original text is preserved so that the value read back from the
/// controller file matches what the caller supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemoryLimit {
    text: String,
    bytes: u64,
}

impl MemoryLimit {
    /// Parses a memory limit such as `268435456`, `256m`, or `1G`.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Config`] if the value is not a positive byte
    /// count with an optional unit suffix.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (digits, multiplier) = match text.char_indices().last() {
            Some((idx, 'k' | 'K')) => (&text[..idx], 1u64 << 10),
            Some((idx, 'm' | 'M')) => (&text[..idx], 1 << 20),
            Some((idx, 'g' | 'G')) => (&text[..idx], 1 << 30),
            _ => (text, 1),
        };
        let bytes = digits
            .parse::<u64>()
            .ok()
            .filter(|n| *n > 0)
            .and_then(|n| n.checked_mul(multiplier))
            .ok_or_else(|| BurrowError::Config {
                message: format!("invalid memory limit: {text:?}"),
            })?;
        Ok(Self {
            text: text.to_string(),
            bytes,
        })
    }

    /// Returns the limit exactly as supplied.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns the limit in bytes.
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for MemoryLimit {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MemoryLimit {
    type Error = BurrowError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<MemoryLimit> for String {
    fn from(limit: MemoryLimit) -> Self {
        limit.text
    }
}

/// Resource limits for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time allowed per period, in microseconds.
    pub cpu_quota_us: u64,
    /// Memory limit.
    pub memory: MemoryLimit,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_quota_us: DEFAULT_CPU_QUOTA_US,
            memory: MemoryLimit {
                text: DEFAULT_MEMORY_LIMIT.to_string(),
                bytes: 256 << 20,
            },
        }
    }
}

/// Control group hierarchy flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupVersion {
    /// Detect from the mounted hierarchy.
    #[default]
    Auto,
    /// One hierarchy per controller (`cpu/`, `memory/`).
    V1,
    /// Unified hierarchy.
    V2,
}

impl FromStr for CgroupVersion {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "v1" | "1" => Ok(Self::V1),
            "v2" | "2" => Ok(Self::V2),
            other => Err(BurrowError::Config {
                message: format!("unknown cgroup version: {other}"),
            }),
        }
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// Container has been described but nothing exists on the host yet.
    Created,
    /// Overlay root filesystem is mounted.
    RootFsPrepared,
    /// Init process exists in its new namespaces.
    Spawned,
    /// Init process is attached to its cgroups.
    LimitsApplied,
    /// Init process has been released and runs the target command.
    Running,
    /// Container process has terminated.
    Exited,
    /// Layers and cgroups have been removed.
    TornDown,
    /// Lifecycle aborted before the container ran.
    Failed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::RootFsPrepared => write!(f, "rootfs-prepared"),
            Self::Spawned => write!(f, "spawned"),
            Self::LimitsApplied => write!(f, "limits-applied"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::TornDown => write!(f, "torn-down"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
