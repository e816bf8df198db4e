use kernel_info::boot::MemoryNodeInfo;
use kernel_info::tunables::{PCP_MAX_NR, SMP_MAX_CPUS};

/// Returns the id of the CPU executing the caller.
pub type CpuIdFn = fn() -> usize;

const fn boot_cpu() -> usize {
    0
}

/// Runtime configuration of one physical memory node.
#[derive(Copy, Clone, Debug)]
pub struct NodeConfig {
    /// Physical layout reported by the boot stage.
    pub info: MemoryNodeInfo,
    /// Number of per-CPU caches.
    pub cpus: usize,
    /// Pages a per-CPU cache holds before evicting its coldest page.
    pub pcp_capacity: usize,
    /// CPU id source used to pick the per-CPU cache.
    pub current_cpu: CpuIdFn,
}

impl NodeConfig {
    #[must_use]
    pub const fn new(info: MemoryNodeInfo) -> Self {
        Self {
            info,
            cpus: SMP_MAX_CPUS,
            pcp_capacity: PCP_MAX_NR,
            current_cpu: boot_cpu,
        }
    }

    #[must_use]
    pub const fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    #[must_use]
    pub const fn with_pcp_capacity(mut self, capacity: usize) -> Self {
        self.pcp_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_cpu_source(mut self, current_cpu: CpuIdFn) -> Self {
        self.current_cpu = current_cpu;
        self
    }
}

impl From<MemoryNodeInfo> for NodeConfig {
    fn from(info: MemoryNodeInfo) -> Self {
        Self::new(info)
    }
}
