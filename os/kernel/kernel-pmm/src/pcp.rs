//! Per-CPU hot-page caches.
//!
//! Single-page allocations are served from a small per-CPU list before the
//! buddy free-lists are touched. Frees push to the head (hot); once a list
//! reaches its capacity the tail (coldest) page is evicted into the movable
//! pool through the regular merge path.

use crate::free_list::FreeList;
use crate::level::LEVELS;
use crate::node::NodeState;
use crate::page::{ListMembership, MigrationType, PageState};
use alloc::vec::Vec;
use log::trace;

#[derive(Debug)]
pub(crate) struct PcpCaches {
    lists: Vec<FreeList>,
    capacity: usize,
}

impl PcpCaches {
    pub(crate) fn new(cpus: usize, capacity: usize) -> Self {
        Self {
            lists: (0..cpus).map(|_| FreeList::new()).collect(),
            capacity,
        }
    }

    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn cpus(&self) -> usize {
        self.lists.len()
    }

    #[inline]
    pub(crate) fn len(&self, cpu: usize) -> usize {
        self.lists[cpu].len()
    }

    /// Pages cached over all CPUs.
    pub(crate) fn total(&self) -> usize {
        self.lists.iter().map(FreeList::len).sum()
    }
}

impl NodeState {
    /// Pop the hottest cached page of `cpu`.
    pub(crate) fn pcp_take(&mut self, cpu: usize) -> Option<u32> {
        let idx = self.pcp.lists[cpu].pop_head(&mut self.pages)?;
        self.pages[idx as usize]
            .flags
            .set_list(ListMembership::Detached);
        Some(idx)
    }

    /// Cache a freed single page on `cpu`, evicting the coldest page into the
    /// movable pool when the cache is full.
    pub(crate) fn pcp_give(&mut self, idx: u32, cpu: usize) {
        let page = &mut self.pages[idx as usize];
        page.flags = page
            .flags
            .with_present(false)
            .with_state(PageState::Pcp)
            .with_table(cpu as u8)
            .with_list(ListMembership::PcpCache);
        self.pcp.lists[cpu].push_head(&mut self.pages, idx);

        if self.pcp.lists[cpu].len() < self.pcp.capacity {
            return;
        }
        if let Some(cold) = self.pcp.lists[cpu].pop_tail(&mut self.pages) {
            trace!("node {}: pcp{cpu} full, evicting page {cold}", self.id);
            self.pages[cold as usize]
                .flags
                .set_list(ListMembership::Detached);
            self.release(cold, LEVELS - 1, 0, MigrationType::Movable);
        }
    }
}
