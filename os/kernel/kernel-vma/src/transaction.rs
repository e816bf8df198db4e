//! # Hypercall Records
//!
//! Decoding of the owner transaction a guest passes with a memory hypercall.
//!
//! ## Region handle (`u64`)
//!
//! | Bits  | Field    | Meaning |
//! |-------|----------|---------|
//! | 0     | `typ`    | Handle type. |
//! | 1     | `secure` | Secure-world region; cleared means non-secure mapping. |
//! | 2     | `user`   | Mapping accessible from EL0. |
//! | 3     | `global` | Only expand inside existing areas. |
//! | 4–6   | `space`  | [`AddressSpaceKind`]. |
//! | 12–63 | address  | Page-aligned start address. |
//!
//! ## Usage flags (`u32`)
//!
//! `r w x large virtio reserved`, 16 zero bits, then `io init`, a 4-bit
//! [`MemAttr`] and a 4-bit [`AreaAttr`].

use crate::area::Backing;
use crate::error::VmaError;
use crate::flags::{AddressSpaceKind, AreaAttr, AreaFlags, MapFlags, MemAttr, Rights};
use crate::mm::MmId;
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{AddressRange, PAGE_MASK, PAGE_SHIFT};

/// Operation tag of a memory hypercall.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Operation {
    CreateRoot = 0,
    CreateRootMap = 1,
    Create = 2,
    CreateMap = 3,
    Destroy = 4,
    Donate = 5,
    Lend = 6,
    Share = 7,
    Relinquish = 8,
}

impl Operation {
    /// Root operations are issued by the hypervisor itself, never through
    /// the hypercall dispatcher.
    #[must_use]
    pub const fn is_dispatchable(self) -> bool {
        !matches!(self, Self::CreateRoot | Self::CreateRootMap)
    }

    /// Whether the operation touches a second address space.
    #[must_use]
    pub const fn is_exchange(self) -> bool {
        matches!(self, Self::Donate | Self::Lend | Self::Share | Self::Relinquish)
    }
}

impl TryFrom<u8> for Operation {
    type Error = VmaError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::CreateRoot,
            1 => Self::CreateRootMap,
            2 => Self::Create,
            3 => Self::CreateMap,
            4 => Self::Destroy,
            5 => Self::Donate,
            6 => Self::Lend,
            7 => Self::Share,
            8 => Self::Relinquish,
            _ => return Err(VmaError::InvalidArgs),
        })
    }
}

#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct RegionHandle {
    pub typ: bool,
    pub secure: bool,
    pub user: bool,
    pub global: bool,
    #[bits(3)]
    pub space: AddressSpaceKind,
    #[bits(5)]
    __reserved: u8,
    #[bits(52)]
    pub frame: u64,
}

impl RegionHandle {
    /// Handle naming the page containing `addr`.
    #[must_use]
    pub const fn for_address(addr: u64) -> Self {
        Self::new().with_frame(addr >> PAGE_SHIFT)
    }

    #[must_use]
    pub const fn address(self) -> u64 {
        self.into_bits() & !PAGE_MASK
    }
}

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct UsageFlags {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub large: bool,
    pub virtio: bool,
    pub reserved: bool,
    #[bits(16)]
    __mbz: u16,
    pub io: bool,
    pub init: bool,
    #[bits(4)]
    pub mem_attr: MemAttr,
    #[bits(4)]
    pub vma_attr: u8,
}

/// Bits 6..22 of [`UsageFlags`] must be zero.
const USAGE_MBZ_MASK: u32 = 0xffff << 6;

impl UsageFlags {
    #[must_use]
    pub const fn with_attr(self, attr: AreaAttr) -> Self {
        self.with_vma_attr(attr as u8)
    }
}

/// One intended borrower of an owner transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AccessEntry {
    pub borrower: MmId,
    /// [`Rights`] bits.
    pub mem_ap: u8,
    pub flags: u8,
    pub range: u32,
    pub handle: RegionHandle,
}

impl AccessEntry {
    #[must_use]
    pub const fn new(borrower: MmId, rights: Rights, addr: u64, range: u32) -> Self {
        Self {
            borrower,
            mem_ap: rights.bits(),
            flags: 0,
            range,
            handle: RegionHandle::for_address(addr),
        }
    }

    #[must_use]
    pub const fn rights(&self) -> Rights {
        Rights::from_bits_truncate(self.mem_ap)
    }

    /// Borrower-side range.
    ///
    /// # Errors
    /// [`VmaError::OutOfRange`] if the range wraps.
    pub fn target(&self) -> Result<AddressRange, VmaError> {
        AddressRange::from_len(self.handle.address(), u64::from(self.range)).ok_or(VmaError::OutOfRange)
    }
}

/// Owner transaction of a memory hypercall.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProtTransaction {
    pub owner_id: MmId,
    pub flags: UsageFlags,
    pub handle: RegionHandle,
    /// Physical address for mapping requests, or one of the sentinels
    /// decoded by [`Backing::from_raw`].
    pub badge: u64,
    pub range: u64,
    pub access: Vec<AccessEntry>,
}

/// Owner side of a transaction in typed form.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OwnerRequest {
    pub range: AddressRange,
    pub attr: AreaAttr,
    pub flags: AreaFlags,
    pub prot: MapFlags,
    pub backing: Backing,
}

impl ProtTransaction {
    #[must_use]
    pub const fn new(owner_id: MmId, addr: u64, range: u64) -> Self {
        Self {
            owner_id,
            flags: UsageFlags::new(),
            handle: RegionHandle::for_address(addr),
            badge: crate::area::UNBACKED_PADDR,
            range,
            access: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_flags(mut self, flags: UsageFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub const fn with_badge(mut self, badge: u64) -> Self {
        self.badge = badge;
        self
    }

    #[must_use]
    pub fn with_access(mut self, entry: AccessEntry) -> Self {
        self.access.push(entry);
        self
    }

    /// Decode the owner side.
    ///
    /// # Errors
    /// [`VmaError::OutOfRange`] if the range wraps,
    /// [`VmaError::InvalidArgs`] for an unknown area attribute or non-zero
    /// reserved bits.
    pub fn owner_request(&self) -> Result<OwnerRequest, VmaError> {
        let range = AddressRange::from_len(self.handle.address(), self.range).ok_or(VmaError::OutOfRange)?;
        let attr = AreaAttr::from_raw(self.flags.vma_attr()).ok_or(VmaError::InvalidArgs)?;
        if self.flags.into_bits() & USAGE_MBZ_MASK != 0 {
            return Err(VmaError::InvalidArgs);
        }
        let u = self.flags;
        let flags = AreaFlags::new()
            .with_global(self.handle.global())
            .with_init(u.init())
            .with_kind(self.handle.space())
            .with_id(self.owner_id)
            .with_reserved(u.reserved());
        let prot = MapFlags::new()
            .with_read(u.read())
            .with_write(u.write())
            .with_exec(u.exec())
            .with_io(u.io())
            .with_mem_attr(u.mem_attr())
            .with_non_secure(!self.handle.secure())
            .with_user(self.handle.user())
            .with_large(u.large())
            .with_virtio(u.virtio());
        Ok(OwnerRequest {
            range,
            attr,
            flags,
            prot,
            backing: Backing::from_raw(self.badge),
        })
    }
}
