//! # Platform Configuration and Boot Memory Description
//!
//! Single source of truth for the compile-time configuration of the memory
//! core and for the record the boot stage hands over to describe physical
//! memory.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! Default physical memory window of the platform, node limits and the
//! optional reserved (boot-time unmovable) window.
//!
//! ### Allocator Tunables ([`tunables`])
//! Per-CPU cache capacity, unmovable quota and CPU count.
//!
//! ### Boot Information ([`boot`])
//! `#[repr(C)]` records describing each physical memory node:
//!
//! ```text
//! node base                 reserved window                      node end
//!     ┌──────────────────────┬──────────────┬───────────────────────┐
//!     │       movable        │  unmovable   │        movable        │
//!     └──────────────────────┴──────────────┴───────────────────────┘
//! ```
//!
//! ## Compile-Time Checks
//! Every module validates its constants in a `const _: () = { ... }` block so
//! that an inconsistent configuration fails the build instead of the boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod tunables;
