//! # Ownership-Tracked Memory Areas
//!
//! Bookkeeping for who owns which part of an address space and which pages
//! are lent or shared with whom. The hardware view is programmed through a
//! [`Vspace`] translation context; allocated backing comes from a
//! [`FrameSource`], normally the buddy allocator's
//! [`PhysicalMemory`](kernel_pmm::PhysicalMemory).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  VmSystem (context)                 │
//! │    • address-space registry                         │
//! │    • hypercall dispatch                             │
//! │    • global exchange lock                           │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ one per partition / VM
//! ┌─────────────────▼───────────────────────────────────┐
//! │                  AddressSpace                       │
//! │    • split / merge / destroy                        │
//! │    • lookups and protection                         │
//! └───────┬─────────────────────────────┬───────────────┘
//!         │                             │
//! ┌───────▼─────────────────┐ ┌─────────▼───────────────┐
//! │  arena + interval index │ │  translation context    │
//! │  sibling list, grants   │ │  (Vspace)               │
//! └─────────────────────────┘ └─────────────────────────┘
//! ```
//!
//! ## Ownership
//!
//! Every area has an owner count and a borrower count and is in one of four
//! states (see [`AreaState`]):
//!
//! * **NA**: reserved or a gap, nothing mapped,
//! * **EA**: mapped for exactly one owner,
//! * **SA**: shared; owner and borrowers map the same pages,
//! * **LA**: lent; only the borrowers map the pages.
//!
//! Donating moves an `EA` area to another space outright. Lending and sharing
//! leave the owner's area in place and create a grant in the borrower's space
//! that points back at it; relinquishing the last grant restores `EA`.
//!
//! ## Hypercalls
//!
//! [`VmSystem::dispatch`] takes an [`Operation`] and a decoded
//! [`ProtTransaction`]. Ranges are validated against the address spaces
//! before any area is touched, and a failing exchange leaves no grant
//! behind.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::cast_possible_truncation)]

extern crate alloc;

mod area;
mod arena;
mod error;
mod exchange;
pub mod flags;
mod frame;
mod index;
mod manager;
mod mm;
pub mod transaction;
mod vspace;

pub use area::{ALLOCATE_PADDR, AreaLink, Backing, UNBACKED_PADDR, VmArea};
pub use arena::VmaId;
pub use error::{VmaError, VspaceError};
pub use exchange::GrantMode;
pub use flags::{AddressSpaceKind, AreaAttr, AreaFlags, AreaState, MapFlags, MemAttr, Rights};
pub use frame::FrameSource;
pub use manager::VmSystem;
pub use mm::{AddressSpace, MmId};
pub use transaction::{AccessEntry, Operation, OwnerRequest, ProtTransaction, RegionHandle, UsageFlags};
pub use vspace::Vspace;
