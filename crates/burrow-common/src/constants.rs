//! System-wide constants and default paths.

/// Default base directory for burrow data (image and runtime layers).
pub const DEFAULT_DATA_DIR: &str = "/var/lib/burrow";

/// Subdirectory of the data directory holding the shared base image.
pub const IMAGE_DIR: &str = "image";

/// Subdirectory of the data directory holding per-container layers.
pub const RUNTIME_DIR: &str = "runtime";

/// Runtime subdirectory of merged overlay mount points.
pub const MOUNT_LAYER_DIR: &str = "mnt";

/// Runtime subdirectory of overlay work directories.
pub const WORK_LAYER_DIR: &str = "work";

/// Runtime subdirectory of writable upper layers.
pub const WRITE_LAYER_DIR: &str = "write";

/// Name of the transient directory receiving the old root during `pivot_root`.
pub const OLD_ROOT_DIR: &str = ".old";

/// Control group filesystem mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Project name under which per-container cgroups are grouped.
pub const PROJECT_NAME: &str = "burrow";

/// Default CPU quota in microseconds per period (50% of one CPU).
pub const DEFAULT_CPU_QUOTA_US: u64 = 50_000;

/// CPU bandwidth period in microseconds used with the quota.
pub const CPU_PERIOD_US: u64 = 100_000;

/// Default memory limit.
pub const DEFAULT_MEMORY_LIMIT: &str = "256m";

/// Maximum length of a container name.
pub const MAX_NAME_LEN: usize = 64;

/// Cgroup control file names a container name may not take, since
/// per-container cgroups sit next to them in the project directory.
pub const RESERVED_CGROUP_FILES: &[&str] = &["tasks", "notify_on_release", "release_agent"];

/// Controller prefixes of cgroup control files (`cpu.max`, `memory.high`).
/// Names of the form `<prefix>.<anything>` are reserved.
pub const RESERVED_CGROUP_PREFIXES: &[&str] = &[
    "cgroup", "cpu", "cpuacct", "cpuset", "memory", "io", "blkio", "pids", "devices",
    "freezer", "hugetlb", "misc", "net_cls", "net_prio", "perf_event", "rdma",
];

/// Argument selecting the child-side phase of the two-phase launcher.
pub const INIT_SUBCOMMAND: &str = "init";

/// File descriptor number on which the init phase receives the start signal.
pub const SYNC_FD: i32 = 3;

/// Environment variable announcing the sync descriptor to the init phase.
pub const SYNC_FD_ENV: &str = "BURROW_SYNC_FD";

/// Environment variable carrying the serialized runtime configuration.
pub const CONFIG_ENV: &str = "BURROW_CONFIG";

/// Prompt variable set in the container environment.
pub const PROMPT_ENV: &str = "PS1";

/// Shell prompt shown inside containers.
pub const PROMPT_VALUE: &str = "-[container]- # ";

/// Attempts made when removing a cgroup that is still busy.
pub const CGROUP_REMOVE_ATTEMPTS: u32 = 10;

/// Delay between cgroup removal attempts, in milliseconds.
pub const CGROUP_REMOVE_BACKOFF_MS: u64 = 50;

/// Application name used in log output.
pub const APP_NAME: &str = "burrow";
