//! # Page Descriptors
//!
//! One [`Page`] exists per physical page of a node. Its flags word packs the
//! buddy metadata into a single `u64`:
//!
//! | Bits  | Field     | Meaning |
//! |-------|-----------|---------|
//! | 0     | `present` | Block handed out (head page only). |
//! | 1–4   | `order`   | Buddy order within the level. |
//! | 5–8   | `state`   | [`PageState`] of an allocated block. |
//! | 9–13  | `table`   | Per-CPU cache slot the page belongs to. |
//! | 14–18 | `node`    | Owning node id. |
//! | 19–23 | `level`   | Hierarchy level of the block. |
//! | 24–26 | `list`    | [`ListMembership`]. |
//! | 27–29 | `usage`   | [`UsageClass`] of the allocation. |
//! | 30–31 | `home`    | [`MigrationType`] pool the block belongs to. |
//! | 32–63 | -         | Reserved. |
//!
//! Only the head page of a block carries meaningful flags. Tail pages keep
//! [`ListMembership::Detached`].

use bitfield_struct::bitfield;

/// Allocation category of a block. Selects the free-list family it lives on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum MigrationType {
    Movable = 0,
    Unmovable = 1,
    /// Reserved for reclaimable caches; never served.
    Reclaimable = 2,
    /// Per-CPU cached single pages.
    Pcp = 3,
}

impl MigrationType {
    pub const COUNT: usize = 4;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Movable,
        Self::Unmovable,
        Self::Reclaimable,
        Self::Pcp,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Movable => "movable",
            Self::Unmovable => "unmovable",
            Self::Reclaimable => "reclaimable",
            Self::Pcp => "pcp",
        }
    }

    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            1 => Self::Unmovable,
            2 => Self::Reclaimable,
            3 => Self::Pcp,
            _ => Self::Movable,
        }
    }
}

/// Lifecycle state of an allocated block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum PageState {
    MovableNormal = 0,
    /// Member of a multi-block (compound) allocation.
    MovableComp = 1,
    /// Borrowed from another node.
    MovableNode = 2,
    Slab = 3,
    NoMovable = 4,
    Reclaim = 5,
    Pcp = 6,
}

impl PageState {
    /// Migration class a block in this state is returned to.
    #[must_use]
    pub const fn migration(self) -> MigrationType {
        match self {
            Self::MovableNormal | Self::MovableComp | Self::MovableNode => MigrationType::Movable,
            Self::Slab | Self::Pcp => MigrationType::Pcp,
            Self::NoMovable => MigrationType::Unmovable,
            Self::Reclaim => MigrationType::Reclaimable,
        }
    }

    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            1 => Self::MovableComp,
            2 => Self::MovableNode,
            3 => Self::Slab,
            4 => Self::NoMovable,
            5 => Self::Reclaim,
            6 => Self::Pcp,
            _ => Self::MovableNormal,
        }
    }
}

/// Which list, if any, currently links the page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ListMembership {
    Detached = 0,
    FreeArea = 1,
    PcpCache = 2,
}

impl ListMembership {
    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            1 => Self::FreeArea,
            2 => Self::PcpCache,
            _ => Self::Detached,
        }
    }
}

/// What an allocation is used for. Drives the allocation policy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum UsageClass {
    Undefined = 0,
    /// Must be one physically contiguous block.
    ContiguousRequired = 1,
    /// Contiguous if possible, a compound chain otherwise.
    ContiguousPreferred = 2,
    /// Translation-table memory.
    MmuBlock = 3,
    /// Backing for the object allocator.
    GenericObject = 4,
    /// Fixed debug pages, bounded by an unmovable quota.
    DebugFixed = 5,
    /// Reserved memory handed out during boot.
    BootReserved = 6,
}

impl UsageClass {
    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            1 => Self::ContiguousRequired,
            2 => Self::ContiguousPreferred,
            3 => Self::MmuBlock,
            4 => Self::GenericObject,
            5 => Self::DebugFixed,
            6 => Self::BootReserved,
            _ => Self::Undefined,
        }
    }
}

#[bitfield(u64)]
pub struct PageFlags {
    pub present: bool,
    #[bits(4)]
    pub order: u8,
    #[bits(4)]
    pub state: PageState,
    #[bits(5)]
    pub table: u8,
    #[bits(5)]
    pub node: u8,
    #[bits(5)]
    pub level: u8,
    #[bits(3)]
    pub list: ListMembership,
    #[bits(3)]
    pub usage: UsageClass,
    #[bits(2)]
    pub home: MigrationType,
    #[bits(32)]
    __reserved: u32,
}

/// Sentinel for "no page" in the index links.
pub(crate) const NIL: u32 = u32::MAX;

/// Descriptor of one physical page.
#[derive(Copy, Clone, Debug)]
pub struct Page {
    pub flags: PageFlags,
    /// Use-defined word, e.g. a slab owner back-reference.
    pub private: u64,
    pub(crate) prev: u32,
    pub(crate) next: u32,
}

impl Page {
    #[must_use]
    pub(crate) const fn new(node: u8) -> Self {
        Self {
            flags: PageFlags::new().with_node(node),
            private: 0,
            prev: NIL,
            next: NIL,
        }
    }

    /// Whether the page heads a block on an area free-list.
    #[inline]
    #[must_use]
    pub const fn is_free_head(&self) -> bool {
        matches!(self.flags.list(), ListMembership::FreeArea) && !self.flags.present()
    }
}
