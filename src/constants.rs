// Intel thermal MSR addresses
pub const IA32_THERM_STATUS_MSR: u32 = 0x19C;
pub const MSR_TEMPERATURE_TARGET: u32 = 0x1A2;

// Intel performance status MSR
pub const IA32_PERF_STATUS_MSR: u32 = 0x198;

// Intel RAPL MSR addresses
pub const INTEL_POWER_UNIT_MSR: u32 = 0x606;
pub const INTEL_PKG_ENERGY_MSR: u32 = 0x611;

/// Bus reference clock used to turn the perf-status ratio into MHz.
///
/// Valid for Sandy Bridge and newer Intel parts. Older generations ran a
/// 133 MHz bus and AMD parts encode frequency differently, so decoded values
/// must be confirmed against the target hardware before being treated as
/// authoritative.
pub const BUS_FREQUENCY_MHZ: u64 = 100;

/// Width of the RAPL energy status counter
pub const ENERGY_COUNTER_MASK: u64 = 0xFFFF_FFFF;

/// Number of NUMA node ids probed, starting at node0.
///
/// Probing stops at the first missing node directory. Raising this bound
/// changes which machines report their full topology, so it stays fixed.
pub const MAX_NUMA_NODES: usize = 8;

/// Placeholder memory bandwidth reported for every NUMA node (typical DDR4)
pub const ESTIMATED_MEMORY_BANDWIDTH_GBS: f64 = 40.0;

/// Elements ahead of the current index that are prefetched
pub const PREFETCH_DISTANCE: usize = 8;

pub const CACHE_LINE_SIZE: usize = 64;

// Default OS locations
pub const MSR_DEVICE_ROOT: &str = "/dev/cpu";
pub const NUMA_ROOT: &str = "/sys/devices/system/node";
pub const CPUFREQ_ROOT: &str = "/sys/devices/system/cpu";
pub const PROC_STAT_PATH: &str = "/proc/stat";
pub const MODPROBE_PROGRAM: &str = "modprobe";
pub const SMARTCTL_PROGRAM: &str = "smartctl";

// Monitoring settings
pub const DATA_COLLECTION_INTERVAL_MS: u64 = 1000;
pub const DEMO_SAMPLE_COUNT: usize = 5;
pub const ENERGY_MAX_GAP_MS: u64 = 60_000;

/// Shortest interval between energy samples that yields a power figure.
///
/// Counter granularity makes anything shorter meaningless.
pub const MIN_SAMPLE_INTERVAL_US: u64 = 1_000;

/// Upper bound (exclusive) on CPU ids accepted from sysfs and affinity masks
pub const MAX_CPU_IDS: usize = libc::CPU_SETSIZE as usize;
