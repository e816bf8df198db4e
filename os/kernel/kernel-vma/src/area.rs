use crate::arena::VmaId;
use crate::flags::{AreaAttr, AreaFlags, AreaState, MapFlags};
use crate::mm::MmId;
use kernel_memory_addresses::{AddressRange, PAGE_SHIFT, PhysicalAddress, VirtualAddress};

/// Physical address meaning "activate without mapping anything".
pub const UNBACKED_PADDR: u64 = u64::MAX;

/// Physical address meaning "allocate backing from the buddy allocator".
pub const ALLOCATE_PADDR: u64 = u64::MAX - 1;

/// Where the pages of a new mapping come from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Backing {
    /// Caller-provided physical range (device window, donated memory).
    Fixed(PhysicalAddress),
    /// Mark the area active without programming any translation.
    Unbacked,
    /// Allocate from the buddy allocator; freed when the area is destroyed.
    Allocate,
}

impl Backing {
    /// Decode the physical-address word of a request.
    #[must_use]
    pub const fn from_raw(paddr: u64) -> Self {
        match paddr {
            UNBACKED_PADDR => Self::Unbacked,
            ALLOCATE_PADDR => Self::Allocate,
            pa => Self::Fixed(PhysicalAddress::new(pa)),
        }
    }
}

/// Position of an area in another address space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AreaLink {
    pub mm: MmId,
    pub vma: VmaId,
}

/// One contiguous region of an address space.
///
/// ```text
///          map                 lend / share
///   NA ──────────────► EA ──────────────────► LA / SA ─┐
///    ▲                  │ ◄──────────────────    ▲      │ lend / share
///    │  destroy, donate │    last relinquish     └──────┘
///    └──────────────────┘
/// ```
///
/// An area borrowed from another space carries a [`AreaLink`] to the lender
/// in `parent` and sits on its space's access list.
#[derive(Copy, Clone, Debug)]
pub struct VmArea {
    pub(crate) range: AddressRange,
    pub(crate) attr: AreaAttr,
    pub(crate) state: AreaState,
    pub(crate) flags: AreaFlags,
    pub(crate) prot: MapFlags,
    pub(crate) backing: Option<PhysicalAddress>,
    pub(crate) owners: u32,
    pub(crate) users: u32,
    pub(crate) parent: Option<AreaLink>,
    pub(crate) prev: Option<VmaId>,
    pub(crate) next: Option<VmaId>,
}

impl VmArea {
    #[must_use]
    pub(crate) const fn new(range: AddressRange, attr: AreaAttr, flags: AreaFlags) -> Self {
        Self {
            range,
            attr,
            state: AreaState::NA,
            flags,
            prot: MapFlags::new(),
            backing: None,
            owners: 1,
            users: 0,
            parent: None,
            prev: None,
            next: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn range(&self) -> AddressRange {
        self.range
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        VirtualAddress::new(self.range.start)
    }

    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u64 {
        self.range.len() >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn attr(&self) -> AreaAttr {
        self.attr
    }

    #[inline]
    #[must_use]
    pub const fn state(&self) -> AreaState {
        self.state
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> AreaFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn prot(&self) -> MapFlags {
        self.prot
    }

    /// Physical base of the area's pages, if it has any.
    #[inline]
    #[must_use]
    pub const fn backing(&self) -> Option<PhysicalAddress> {
        self.backing
    }

    #[inline]
    #[must_use]
    pub const fn owners(&self) -> u32 {
        self.owners
    }

    #[inline]
    #[must_use]
    pub const fn users(&self) -> u32 {
        self.users
    }

    /// Lender of a borrowed area.
    #[inline]
    #[must_use]
    pub const fn parent(&self) -> Option<AreaLink> {
        self.parent
    }

    #[inline]
    #[must_use]
    pub const fn is_gaps(&self) -> bool {
        matches!(self.attr, AreaAttr::Gaps)
    }

    /// Whether the area was borrowed from another address space.
    #[inline]
    #[must_use]
    pub const fn is_grant(&self) -> bool {
        self.parent.is_some()
    }

    /// Whether the owner's translation for the area is installed.
    #[must_use]
    pub const fn is_mapped(&self) -> bool {
        self.backing.is_some() && matches!(self.state, AreaState::EA | AreaState::SA)
    }

    /// Owner and borrower counts agree with the ownership state.
    #[must_use]
    pub const fn ownership_consistent(&self) -> bool {
        let counted = self.owners > 0 || self.users > 0;
        let state_ok = match self.state {
            AreaState::EA => self.owners == 1 && self.users == 0,
            AreaState::SA | AreaState::LA => self.users > 0,
            AreaState::NA => self.users == 0,
        };
        counted && state_ok
    }

    /// Heading used by dumps.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self.attr {
            AreaAttr::Gaps => "Gaps",
            AreaAttr::MmioEmul => "Emulation Device",
            AreaAttr::Mmio => "Passthrough Device",
            AreaAttr::Normal if self.prot.virtio() => "Virtio Device",
            AreaAttr::Normal if self.prot.exec() => "Payload",
            AreaAttr::Normal => "Normal",
            AreaAttr::Dma => "DMA",
        }
    }

    /// Forget mapping and ownership details; the area becomes a gap.
    pub(crate) const fn reset(&mut self) {
        self.attr = AreaAttr::Gaps;
        self.state = AreaState::NA;
        self.flags = AreaFlags::new();
        self.prot = MapFlags::new();
        self.backing = None;
        self.owners = 1;
        self.users = 0;
        self.parent = None;
    }
}
