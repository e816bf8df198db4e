//! # Kernel Physical Memory Allocator
//!
//! Hierarchical buddy allocator for the hypervisor's physical memory. Memory
//! is split into nodes; each node tracks every page in a descriptor table and
//! keeps free blocks on per-level, per-class, per-order free-lists.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              PhysicalMemory (context)               │
//! │    • node lookup by address                         │
//! │    • cross-node lending for movable requests        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ one per node
//! ┌─────────────────▼───────────────────────────────────┐
//! │              PhysicalMemoryNode                     │
//! │    • usage-class policy                             │
//! │    • forward / backward / migrate dispatch          │
//! │    • compound chains                                │
//! └───────┬─────────────────────────────┬───────────────┘
//!         │                             │
//! ┌───────▼─────────────────┐ ┌─────────▼───────────────┐
//! │  Area × 4 levels        │ │  per-CPU caches         │
//! │  class × order lists    │ │  hot single pages       │
//! └─────────────────────────┘ └─────────────────────────┘
//! ```
//!
//! ## Levels and Orders
//!
//! Block sizes follow the stage-2 translation granules (see [`level`]): a
//! 4 KiB page, a 2 MiB block, a 1 GiB block and a 512 GiB block. Within a
//! level, buddies of order `o` merge into order `o + 1`; at order 9 a block
//! becomes an order-0 block of the next coarser level.
//!
//! ## Migration Classes
//!
//! * **movable**: general allocations, may be served from several blocks,
//! * **unmovable**: boot-reserved and debug pages; borrows from movable and
//!   then only searches forward,
//! * **per-CPU**: single pages cached per CPU,
//! * **reclaimable**: reserved, never served.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_info::boot::MemoryNodeInfo;
//! use kernel_pmm::{NodeConfig, PhysicalMemory, UsageClass};
//!
//! let pm = PhysicalMemory::new(&[NodeConfig::new(MemoryNodeInfo::new(0x4000_0000, 0x20_0000))])
//!     .expect("valid layout");
//! let pa = pm.alloc(0, 4, UsageClass::ContiguousRequired).expect("free memory");
//! assert_eq!(pm.free(pa), Ok(4));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::cast_possible_truncation, clippy::cast_lossless)]

extern crate alloc;

mod area;
mod buddy;
mod config;
mod error;
mod free_list;
pub mod level;
mod memory;
mod node;
pub mod page;
mod pcp;
pub mod policy;
mod stats;

pub use buddy::Block;
pub use config::{CpuIdFn, NodeConfig};
pub use error::PmmError;
pub use memory::PhysicalMemory;
pub use node::{Allocation, MAX_NODE_ID, NodeStatus, PhysicalMemoryNode};
pub use page::{MigrationType, Page, PageFlags, PageState, UsageClass};
pub use stats::NodeStats;
