//! # Memory Layout

use kernel_memory_addresses::PAGE_SIZE;

/// Start of the platform's RAM window (QEMU `virt` layout).
pub const MEMBASE: u64 = 0x4000_0000;

/// Size of the platform's RAM window.
pub const MEMSIZE: u64 = 0x4000_0000; // 1 GiB

/// Start of the window carved into the unmovable pools at boot.
/// Zero size disables the reserved window.
pub const RESERVED_MEMBASE: u64 = MEMBASE + MEMSIZE - RESERVED_MEMSIZE;

/// Size of the reserved window.
pub const RESERVED_MEMSIZE: u64 = 0x40_0000; // 4 MiB

/// Upper bound of physical memory nodes the allocator context manages.
pub const MAX_NODES: usize = 4;

const _: () = {
    assert!(MEMBASE.is_multiple_of(PAGE_SIZE));
    assert!(MEMSIZE.is_multiple_of(PAGE_SIZE));
    assert!(RESERVED_MEMSIZE.is_multiple_of(PAGE_SIZE));
    assert!(RESERVED_MEMBASE >= MEMBASE);
    assert!(RESERVED_MEMBASE + RESERVED_MEMSIZE <= MEMBASE + MEMSIZE);
    assert!(MAX_NODES > 0 && MAX_NODES <= 32);
};
