use crate::free_list::FreeList;
use crate::level::{MAX_ORDERS, block_pages};
use crate::page::MigrationType;

/// Free-lists of one hierarchy level of one node: one list per order for
/// each migration class.
///
/// # Invariants
/// - The blocks reachable from the lists of one class partition exactly the
///   free pages of that class at this level.
/// - A block head is on exactly one `(class, order)` list.
#[derive(Debug)]
pub(crate) struct Area {
    lists: [[FreeList; MAX_ORDERS]; MigrationType::COUNT],
}

impl Default for Area {
    fn default() -> Self {
        Self::new()
    }
}

impl Area {
    pub(crate) const fn new() -> Self {
        Self {
            lists: [const { [const { FreeList::new() }; MAX_ORDERS] }; MigrationType::COUNT],
        }
    }

    #[inline]
    pub(crate) const fn list(&self, class: MigrationType, order: usize) -> &FreeList {
        &self.lists[class.index()][order]
    }

    #[inline]
    pub(crate) const fn list_mut(&mut self, class: MigrationType, order: usize) -> &mut FreeList {
        &mut self.lists[class.index()][order]
    }

    /// Number of free blocks of `class` at `order`.
    #[inline]
    pub(crate) const fn count(&self, class: MigrationType, order: usize) -> usize {
        self.list(class, order).len()
    }

    /// Smallest order in `[from, to)` with a free block of `class`.
    pub(crate) fn first_nonempty(&self, class: MigrationType, from: usize, to: usize) -> Option<usize> {
        (from..to.min(MAX_ORDERS)).find(|&o| !self.list(class, o).is_empty())
    }

    /// Free pages of `class` held in orders `[from, to)` at `level`.
    pub(crate) fn budget(&self, level: usize, class: MigrationType, from: usize, to: usize) -> u64 {
        (from..to.min(MAX_ORDERS))
            .map(|o| self.count(class, o) as u64 * block_pages(level, o))
            .sum()
    }
}
