use crate::level::{LEVELS, MAX_ORDERS, block_pages};
use crate::node::{NodeState, NodeStatus};
use crate::page::MigrationType;
use log::info;

/// Point-in-time counters of one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeStats {
    pub id: u8,
    pub status: NodeStatus,
    pub total_pages: u64,
    /// Pages on the movable free-lists.
    pub free_pages: u64,
    pub allocated_pages: u64,
    /// Pages parked in per-CPU caches, per CPU.
    pub pcp_pages: alloc::vec::Vec<usize>,
    pub pcp_capacity: usize,
    pub debug_pages: u64,
    pub compound_allocations: usize,
    /// Free block counts indexed by level, class and order.
    pub free_blocks: [[[usize; MAX_ORDERS]; MigrationType::COUNT]; LEVELS],
}

impl NodeStats {
    /// Pages on the free-lists of `class`.
    #[must_use]
    pub fn free_list_pages(&self, class: MigrationType) -> u64 {
        let mut pages = 0;
        for (level, classes) in self.free_blocks.iter().enumerate() {
            for (order, &count) in classes[class.index()].iter().enumerate() {
                pages += count as u64 * block_pages(level, order);
            }
        }
        pages
    }

    #[must_use]
    pub fn pcp_total(&self) -> u64 {
        self.pcp_pages.iter().map(|&n| n as u64).sum()
    }

    /// Every page of the node is on exactly one free-list, in one per-CPU
    /// cache, or handed out.
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        let free: u64 = MigrationType::ALL
            .iter()
            .map(|&c| self.free_list_pages(c))
            .sum();
        free + self.pcp_total() + self.allocated_pages == self.total_pages
            && self.free_list_pages(MigrationType::Movable) == self.free_pages
    }

    pub fn dump(&self) {
        info!(
            "node {}: {:?}, {} pages, {} free, {} allocated, {}/{} cached, {} debug, {} compound",
            self.id,
            self.status,
            self.total_pages,
            self.free_pages,
            self.allocated_pages,
            self.pcp_total(),
            self.pcp_capacity * self.pcp_pages.len(),
            self.debug_pages,
            self.compound_allocations
        );
        for (level, classes) in self.free_blocks.iter().enumerate() {
            for class in MigrationType::ALL {
                let orders = &classes[class.index()];
                if orders.iter().all(|&n| n == 0) {
                    continue;
                }
                info!("  L{level} {:<11} {orders:?}", class.as_str());
            }
        }
        for (cpu, n) in self.pcp_pages.iter().enumerate() {
            if *n != 0 {
                info!("  pcp{cpu}: {n}");
            }
        }
    }
}

impl NodeState {
    /// Walk every free-list and check that each entry heads a free block of
    /// the list's level, order and class.
    pub(crate) fn free_lists_consistent(&self) -> bool {
        self.geometry.levels().all(|level| {
            MigrationType::ALL.iter().all(|&class| {
                (0..MAX_ORDERS).all(|order| {
                    let list = self.areas[level].list(class, order);
                    let mut seen = 0;
                    let heads_ok = list.iter(&self.pages).all(|idx| {
                        seen += 1;
                        let flags = self.pages[idx as usize].flags;
                        self.pages[idx as usize].is_free_head()
                            && usize::from(flags.level()) == level
                            && usize::from(flags.order()) == order
                            && flags.home() == class
                    });
                    heads_ok && seen == list.len()
                })
            })
        })
    }

    pub(crate) fn stats(&self) -> NodeStats {
        let mut free_blocks = [[[0; MAX_ORDERS]; MigrationType::COUNT]; LEVELS];
        for (level, classes) in free_blocks.iter_mut().enumerate() {
            for class in MigrationType::ALL {
                for (order, count) in classes[class.index()].iter_mut().enumerate() {
                    *count = self.areas[level].count(class, order);
                }
            }
        }
        NodeStats {
            id: self.id,
            status: self.status,
            total_pages: self.npages,
            free_pages: self.nr_free_pages,
            allocated_pages: self.allocated,
            pcp_pages: (0..self.pcp.cpus()).map(|c| self.pcp.len(c)).collect(),
            pcp_capacity: self.pcp.capacity(),
            debug_pages: self.debug_held,
            compound_allocations: self.chains.len(),
            free_blocks,
        }
    }
}
