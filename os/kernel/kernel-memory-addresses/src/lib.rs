//! # Physical and Intermediate-Physical Address Types
//!
//! Strongly typed wrappers for the addresses the memory core moves around:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | Host physical address (RAM or MMIO). |
//! | [`VirtualAddress`] | Address inside an address space: a hypervisor VA or a guest IPA. |
//! | [`PageFrameNumber`] | Physical address shifted right by [`PAGE_SHIFT`]. |
//! | [`AddressRange`] | Half-open `[start, end)` byte range. |
//!
//! All types are `#[repr(transparent)]` (or plain pairs of `u64`), `Copy`,
//! and their arithmetic helpers are `const fn`.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x4020_3000);
//! let pfn = pa.pfn();
//! assert_eq!(pfn.as_u64(), 0x40203);
//! assert_eq!(pfn.base(), pa);
//!
//! let r = AddressRange::new(0x1000, 0x3000);
//! assert_eq!(r.pages(), 2);
//! assert!(r.contains(0x2fff));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod address_range;
mod page_frame;
mod physical_address;
mod virtual_address;

pub use address_range::AddressRange;
pub use page_frame::PageFrameNumber;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// log2 of the base page size.
pub const PAGE_SHIFT: u32 = 12;

/// Base page size in bytes (4 KiB).
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Mask selecting the in-page offset bits.
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Round `value` down to a multiple of `align` (power of two).
#[inline]
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Round `value` up to a multiple of `align` (power of two), saturating at the
/// highest aligned value.
#[inline]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => v & !(align - 1),
        None => align_down(u64::MAX, align),
    }
}

/// Whether `value` is a multiple of [`PAGE_SIZE`].
#[inline]
#[must_use]
pub const fn is_page_aligned(value: u64) -> bool {
    value & PAGE_MASK == 0
}

/// Number of whole pages covered by `bytes`, rounding up.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    align_up(bytes, PAGE_SIZE) >> PAGE_SHIFT
}
