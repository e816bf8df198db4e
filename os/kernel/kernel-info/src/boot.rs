//! # Boot Memory Information

use crate::memory::{MAX_NODES, MEMBASE, MEMSIZE, RESERVED_MEMBASE, RESERVED_MEMSIZE};

/// One physical memory node as reported by the boot stage.
/// Keep this `#[repr(C)]` and use fixed-size integers at the ABI boundary.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MemoryNodeInfo {
    /// Physical base of the node, page aligned.
    pub base: u64,

    /// Size of the node in **bytes**, page aligned.
    pub size: u64,

    /// Physical base of the reserved window inside the node.
    pub reserved_base: u64,

    /// Size of the reserved window in **bytes**; 0 if there is none.
    pub reserved_size: u64,
}

impl MemoryNodeInfo {
    #[must_use]
    pub const fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            reserved_base: 0,
            reserved_size: 0,
        }
    }

    #[must_use]
    pub const fn with_reserved(mut self, base: u64, size: u64) -> Self {
        self.reserved_base = base;
        self.reserved_size = size;
        self
    }

    /// The platform's default single node.
    #[must_use]
    pub const fn platform_default() -> Self {
        Self::new(MEMBASE, MEMSIZE).with_reserved(RESERVED_MEMBASE, RESERVED_MEMSIZE)
    }

    #[must_use]
    pub const fn has_reserved(&self) -> bool {
        self.reserved_size != 0
    }
}

/// Boot hand-off describing all physical memory nodes.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct BootMemoryInfo {
    /// Node records; only the first `count` entries are valid.
    pub nodes: [MemoryNodeInfo; MAX_NODES],

    /// Number of valid entries in `nodes`.
    pub count: u32,
}

impl BootMemoryInfo {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            nodes: [MemoryNodeInfo::new(0, 0); MAX_NODES],
            count: 0,
        }
    }

    /// Append a node; returns `false` when the table is full.
    pub fn push(&mut self, node: MemoryNodeInfo) -> bool {
        let idx = self.count as usize;
        if idx >= MAX_NODES {
            return false;
        }
        self.nodes[idx] = node;
        self.count += 1;
        true
    }

    #[must_use]
    pub fn nodes(&self) -> &[MemoryNodeInfo] {
        &self.nodes[..(self.count as usize).min(MAX_NODES)]
    }
}

impl Default for BootMemoryInfo {
    fn default() -> Self {
        let mut info = Self::empty();
        info.push(MemoryNodeInfo::platform_default());
        info
    }
}
