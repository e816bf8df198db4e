//! # Area and Mapping Words
//!
//! Packed words carried by every [`VmArea`](crate::VmArea) and by the
//! hypercall records decoded in [`transaction`](crate::transaction).
//!
//! ## Area flags (`u32`)
//!
//! | Bits  | Field     | Meaning |
//! |-------|-----------|---------|
//! | 0     | `global`  | Area may be expanded in place by any borrower. |
//! | 1     | `init`    | Device areas start from reset state. |
//! | 2–4   | `kind`    | [`AddressSpaceKind`] of the owning space. |
//! | 5–20  | `id`      | Owner or borrower partition id. |
//! | 21    | `reserved`| Backing comes from the boot-reserved window. |
//! | 22    | `alloc`   | Backing was allocated for the area and is freed with it. |
//!
//! ## Map flags (`u16`)
//!
//! Protection handed to the translation context: read, write, exec, io,
//! a 3-bit [`MemAttr`], non-secure, user, large and virtio.

use bitfield_struct::bitfield;
use bitflags::bitflags;
use core::fmt;

/// What an area is used for.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum AreaAttr {
    /// Unmapped, ownerless address space.
    #[default]
    Gaps = 0,
    /// Buddy-backed memory.
    Normal = 1,
    /// Buddy-backed memory for device DMA.
    Dma = 2,
    /// Trapped and emulated device window.
    MmioEmul = 3,
    /// Passthrough device window.
    Mmio = 4,
}

impl AreaAttr {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gaps => "GAPS",
            Self::Normal => "NORMAL",
            Self::Dma => "DMA",
            Self::MmioEmul => "MMIO_EMUL",
            Self::Mmio => "MMIO",
        }
    }

    /// Decode a 4-bit attribute field; unknown values are rejected.
    #[must_use]
    pub const fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Gaps),
            1 => Some(Self::Normal),
            2 => Some(Self::Dma),
            3 => Some(Self::MmioEmul),
            4 => Some(Self::Mmio),
            _ => None,
        }
    }
}

/// Ownership state of an area.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum AreaState {
    /// Not activated: nothing mapped.
    #[default]
    NA = 0,
    /// Exclusively activated: one owner, no borrowers.
    EA = 1,
    /// Shared with one or more borrowers; the owner keeps its mapping.
    SA = 2,
    /// Lent to one or more borrowers; the owner's mapping is withdrawn.
    LA = 3,
}

impl AreaState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NA => "NA",
            Self::EA => "EA",
            Self::SA => "SA",
            Self::LA => "LA",
        }
    }

    #[must_use]
    pub const fn is_borrowed_out(self) -> bool {
        matches!(self, Self::SA | Self::LA)
    }
}

/// Translation regime of an address space.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum AddressSpaceKind {
    /// Hypervisor virtual addresses.
    #[default]
    Hyper = 0,
    /// Guest intermediate physical addresses (stage 2).
    Guest = 1,
}

impl AddressSpaceKind {
    pub(crate) const fn into_bits(self) -> u8 {
        self as u8
    }

    pub(crate) const fn from_bits(value: u8) -> Self {
        match value {
            1 => Self::Guest,
            _ => Self::Hyper,
        }
    }
}

/// Memory type of a mapping.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum MemAttr {
    #[default]
    None = 0,
    DeviceNgnrne = 1,
    DeviceNgnre = 2,
    DeviceGre = 3,
    NonCacheable = 4,
    Normal = 5,
    WriteThrough = 6,
}

impl MemAttr {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NOT",
            Self::DeviceNgnrne => "nGnRnE",
            Self::DeviceNgnre => "nGnRE",
            Self::DeviceGre => "GRE",
            Self::NonCacheable => "NC",
            Self::Normal => "NORMAL",
            Self::WriteThrough => "WT",
        }
    }

    pub(crate) const fn into_bits(self) -> u8 {
        self as u8
    }

    pub(crate) const fn from_bits(value: u8) -> Self {
        match value {
            1 => Self::DeviceNgnrne,
            2 => Self::DeviceNgnre,
            3 => Self::DeviceGre,
            4 => Self::NonCacheable,
            5 => Self::Normal,
            6 => Self::WriteThrough,
            _ => Self::None,
        }
    }
}

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct AreaFlags {
    pub global: bool,
    pub init: bool,
    #[bits(3)]
    pub kind: AddressSpaceKind,
    #[bits(16)]
    pub id: u16,
    pub reserved: bool,
    pub alloc: bool,
    #[bits(9)]
    __reserved: u16,
}

#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct MapFlags {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub io: bool,
    #[bits(3)]
    pub mem_attr: MemAttr,
    pub non_secure: bool,
    pub user: bool,
    pub large: bool,
    pub virtio: bool,
    #[bits(5)]
    __reserved: u8,
}

impl MapFlags {
    /// Whether any access right is granted.
    #[inline]
    #[must_use]
    pub const fn is_accessible(self) -> bool {
        self.read() || self.write() || self.exec()
    }

    /// Same attributes with the access rights replaced by `rights`.
    #[must_use]
    pub const fn with_rights(self, rights: Rights) -> Self {
        self.with_read(rights.contains(Rights::READ))
            .with_write(rights.contains(Rights::WRITE))
            .with_exec(rights.contains(Rights::EXEC))
    }
}

impl fmt::Display for MapFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.read() { "r" } else { "-" };
        let w = if self.write() { "w" } else { "-" };
        let x = if self.exec() { "x" } else { "-" };
        let io = if self.io() {
            " io"
        } else if self.virtio() {
            " vio"
        } else {
            " -"
        };
        write!(f, "{r}{w}{x}{io} {}", self.mem_attr().as_str())
    }
}

bitflags! {
    /// Access rights granted to a borrower by an access entry.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct Rights: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_flags_layout() {
        let f = AreaFlags::new()
            .with_global(true)
            .with_kind(AddressSpaceKind::Guest)
            .with_id(0xabcd)
            .with_alloc(true);
        assert_eq!(f.into_bits(), 1 | (1 << 2) | (0xabcd << 5) | (1 << 22));
        assert_eq!(f.kind(), AddressSpaceKind::Guest);
        assert!(!f.reserved());
    }

    #[test]
    fn map_flags_display() {
        let p = MapFlags::new()
            .with_read(true)
            .with_exec(true)
            .with_mem_attr(MemAttr::Normal);
        assert_eq!(alloc::format!("{p}"), "r-x - NORMAL");
        let d = MapFlags::new()
            .with_read(true)
            .with_write(true)
            .with_io(true)
            .with_mem_attr(MemAttr::DeviceNgnrne);
        assert_eq!(alloc::format!("{d}"), "rw- io nGnRnE");
    }

    #[test]
    fn rights_replace_access_bits_only() {
        let p = MapFlags::new()
            .with_read(true)
            .with_write(true)
            .with_mem_attr(MemAttr::Normal)
            .with_rights(Rights::READ | Rights::EXEC);
        assert!(p.read() && p.exec() && !p.write());
        assert_eq!(p.mem_attr(), MemAttr::Normal);
        assert!(!MapFlags::new().is_accessible());
    }

    #[test]
    fn unknown_attr_is_rejected() {
        assert_eq!(AreaAttr::from_raw(2), Some(AreaAttr::Dma));
        assert_eq!(AreaAttr::from_raw(9), None);
    }
}
