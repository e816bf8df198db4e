//! Split and merge primitives of the hierarchical buddy system.
//!
//! Block heads are addressed by their index relative to the node base; buddy
//! pairing uses absolute frame numbers so that alignment follows the
//! physical address, not the node offset.

use crate::level::{LEVEL_ORDERS, LEVELS, block_pages, block_shift};
use crate::node::NodeState;
use crate::page::{ListMembership, MigrationType, PageState, UsageClass};
use alloc::vec::Vec;
use kernel_memory_addresses::{PageFrameNumber, PhysicalAddress};

/// One naturally aligned buddy block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Block {
    pfn: PageFrameNumber,
    level: u8,
    order: u8,
}

impl Block {
    #[inline]
    #[must_use]
    pub const fn new(pfn: PageFrameNumber, level: usize, order: usize) -> Self {
        Self {
            pfn,
            level: level as u8,
            order: order as u8,
        }
    }

    #[inline]
    #[must_use]
    pub const fn pfn(&self) -> PageFrameNumber {
        self.pfn
    }

    #[inline]
    #[must_use]
    pub const fn addr(&self) -> PhysicalAddress {
        self.pfn.base()
    }

    #[inline]
    #[must_use]
    pub const fn level(&self) -> usize {
        self.level as usize
    }

    #[inline]
    #[must_use]
    pub const fn order(&self) -> usize {
        self.order as usize
    }

    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u64 {
        block_pages(self.level(), self.order())
    }
}

impl NodeState {
    #[inline]
    pub(crate) const fn block(&self, idx: u32, level: usize, order: usize) -> Block {
        Block::new(PageFrameNumber::new(self.base + idx as u64), level, order)
    }

    /// Link a free block and stamp its head.
    pub(crate) fn push_free(&mut self, idx: u32, level: usize, order: usize, class: MigrationType, at_head: bool) {
        let page = &mut self.pages[idx as usize];
        page.flags = page
            .flags
            .with_present(false)
            .with_order(order as u8)
            .with_level(level as u8)
            .with_list(ListMembership::FreeArea)
            .with_home(class)
            .with_usage(UsageClass::Undefined);

        let list = self.areas[level].list_mut(class, order);
        if at_head {
            list.push_head(&mut self.pages, idx);
        } else {
            list.push_tail(&mut self.pages, idx);
        }
        if class == MigrationType::Movable {
            self.nr_free_pages += block_pages(level, order);
        }
    }

    /// Unlink a known free block.
    pub(crate) fn unlink_free(&mut self, idx: u32, level: usize, order: usize, class: MigrationType) {
        self.areas[level]
            .list_mut(class, order)
            .remove(&mut self.pages, idx);
        self.detach(idx, level, order, class);
    }

    /// Pop the hottest free block of `(level, order, class)`.
    pub(crate) fn pop_free(&mut self, level: usize, order: usize, class: MigrationType) -> Option<u32> {
        let idx = self.areas[level]
            .list_mut(class, order)
            .pop_head(&mut self.pages)?;
        self.detach(idx, level, order, class);
        Some(idx)
    }

    fn detach(&mut self, idx: u32, level: usize, order: usize, class: MigrationType) {
        let page = &mut self.pages[idx as usize];
        page.flags.set_list(ListMembership::Detached);
        if class == MigrationType::Movable {
            self.nr_free_pages -= block_pages(level, order);
        }
    }

    /// Hand out a detached block: mark the head present and account it.
    pub(crate) fn take(
        &mut self,
        idx: u32,
        level: usize,
        order: usize,
        home: MigrationType,
        state: PageState,
    ) -> Block {
        let page = &mut self.pages[idx as usize];
        page.flags = page
            .flags
            .with_present(true)
            .with_order(order as u8)
            .with_level(level as u8)
            .with_state(state)
            .with_home(home)
            .with_usage(UsageClass::Undefined)
            .with_list(ListMembership::Detached);
        self.allocated += block_pages(level, order);
        self.block(idx, level, order)
    }

    /// Take a block of exactly `order` at `level`, splitting the smallest
    /// larger block of that level if needed. Upper halves go to the head of
    /// their free-lists.
    pub(crate) fn remove_area(&mut self, level: usize, order: usize, class: MigrationType) -> Option<u32> {
        let orders = self.geometry.orders(level);
        let mut o = self.areas[level].first_nonempty(class, order, orders)?;
        let idx = self.pop_free(level, o, class)?;
        while o > order {
            o -= 1;
            let upper = idx + block_pages(level, o) as u32;
            self.push_free(upper, level, o, class, true);
        }
        Some(idx)
    }

    /// Split an order-0 block of `level` into two top-order halves one level
    /// finer.
    fn split_into_next_level(&mut self, idx: u32, level: usize, class: MigrationType) {
        let next = level + 1;
        let half = LEVEL_ORDERS - 1;
        let upper = idx + block_pages(next, half) as u32;
        self.push_free(upper, next, half, class, true);
        self.push_free(idx, next, half, class, true);
    }

    /// Forward search: find a block at or above `order` at `level`, walking
    /// to coarser levels if needed, and split it down to the exact size.
    pub(crate) fn forward_remove(&mut self, level: usize, order: u32, class: MigrationType) -> Option<u32> {
        let order = order as usize;
        if order >= self.geometry.orders(level) {
            return None;
        }

        let top = self.geometry.top();
        let mut src = level;
        let mut from = order;
        while self.areas[src]
            .first_nonempty(class, from, self.geometry.orders(src))
            .is_none()
        {
            if src == top {
                return None;
            }
            src -= 1;
            from = 0;
        }

        while src != level {
            let idx = self.remove_area(src, 0, class)?;
            self.split_into_next_level(idx, src, class);
            src += 1;
        }
        self.remove_area(level, order, class)
    }

    /// Backward search: gather whole smaller blocks, largest first, from
    /// `level` and all finer levels until exactly `2^order` blocks of `level`
    /// are covered.
    pub(crate) fn backward_remove(&mut self, level: usize, order: u32, class: MigrationType) -> Option<Vec<Block>> {
        let shift = block_shift(level) + order;
        if shift >= u64::BITS {
            return None;
        }
        let need = 1u64 << shift;

        let available: u64 = (level..LEVELS)
            .map(|l| self.areas[l].budget(l, class, 0, self.backward_orders(level, order, l)))
            .sum();
        if available < need {
            return None;
        }

        let mut remaining = need;
        let mut blocks = Vec::new();
        for l in level..LEVELS {
            for o in (0..self.backward_orders(level, order, l)).rev() {
                let size = block_pages(l, o);
                while remaining >= size {
                    let Some(idx) = self.pop_free(l, o, class) else {
                        break;
                    };
                    blocks.push(self.take(idx, l, o, class, PageState::MovableComp));
                    remaining -= size;
                }
                if remaining == 0 {
                    return Some(blocks);
                }
            }
        }

        // budget said yes but the lists disagree: give everything back
        for b in blocks.into_iter().rev() {
            let idx = self.index_of(b.pfn());
            self.allocated -= b.pages();
            self.release(idx, b.level(), b.order(), class);
        }
        None
    }

    /// Orders of level `l` eligible for a backward search targeting
    /// `(level, order)`.
    fn backward_orders(&self, level: usize, order: u32, l: usize) -> usize {
        let orders = self.geometry.orders(l);
        if l == level {
            orders.min(order as usize)
        } else {
            orders
        }
    }

    /// Return a detached block to the `class` free-lists, coalescing with
    /// free buddies and escalating to coarser levels.
    pub(crate) fn release(&mut self, mut idx: u32, mut level: usize, mut order: usize, class: MigrationType) {
        let top = self.geometry.top();
        loop {
            if level == top && order + 1 >= self.geometry.orders(level) {
                break;
            }
            let Some(buddy) = self.buddy_of(idx, block_shift(level) + order as u32) else {
                break;
            };
            if !self.is_free_block(buddy, level, order, class) {
                break;
            }
            self.unlink_free(buddy, level, order, class);
            idx = idx.min(buddy);
            order += 1;
            if order == LEVEL_ORDERS && level != top {
                level -= 1;
                order = 0;
            }
        }

        // a block whose parent's buddy is free will likely merge soon: keep it cold
        let at_head = !self.parent_buddy_free(idx, level, order, class);
        self.push_free(idx, level, order, class, at_head);
    }

    /// Index of the buddy of the `2^shift`-page block at `idx`, if the buddy
    /// lies completely inside the node.
    fn buddy_of(&self, idx: u32, shift: u32) -> Option<u32> {
        let pfn = PageFrameNumber::new(self.base + u64::from(idx));
        let buddy = pfn.buddy(shift).as_u64();
        if buddy < self.base || buddy + (1 << shift) > self.base + self.npages {
            return None;
        }
        Some((buddy - self.base) as u32)
    }

    fn is_free_block(&self, idx: u32, level: usize, order: usize, class: MigrationType) -> bool {
        let page = &self.pages[idx as usize];
        page.is_free_head()
            && usize::from(page.flags.order()) == order
            && usize::from(page.flags.level()) == level
            && page.flags.home() == class
    }

    fn parent_buddy_free(&self, idx: u32, level: usize, order: usize, class: MigrationType) -> bool {
        let top = self.geometry.top();
        if level == top && order + 1 >= self.geometry.orders(level) {
            return false;
        }
        let (plevel, porder) = if order + 1 == LEVEL_ORDERS && level != top {
            (level - 1, 0)
        } else {
            (level, order + 1)
        };
        let pshift = block_shift(plevel) + porder as u32;
        let parent = (self.base + u64::from(idx)) & !((1u64 << pshift) - 1);
        if parent < self.base {
            return false;
        }
        self.buddy_of((parent - self.base) as u32, pshift)
            .is_some_and(|b| self.is_free_block(b, plevel, porder, class))
    }
}
