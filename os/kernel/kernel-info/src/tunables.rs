//! # Allocator Tunables

/// Maximum number of CPUs; one per-CPU page cache exists per CPU.
pub const SMP_MAX_CPUS: usize = 8;

/// Capacity of each per-CPU hot-page cache. Reaching it evicts the coldest
/// page back to the movable pool.
pub const PCP_MAX_NR: usize = 1024;

/// Upper bound on pages held by debug-fixed allocations on one node.
pub const UNMOV_MAX_NR: u64 = 1024;

const _: () = {
    assert!(SMP_MAX_CPUS > 0 && SMP_MAX_CPUS <= 32);
    assert!(PCP_MAX_NR > 0);
    assert!(UNMOV_MAX_NR.is_power_of_two());
};
