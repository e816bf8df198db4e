//! # Hierarchy Levels
//!
//! Physical memory is grouped into four levels whose block sizes follow the
//! stage-2 translation granules:
//!
//! | Level | Block      | Pages (log2) |
//! |-------|------------|--------------|
//! | 0     | 512 GiB    | 27           |
//! | 1     | 1 GiB      | 18           |
//! | 2     | 2 MiB      | 9            |
//! | 3     | 4 KiB      | 0            |
//!
//! A block of level `L` and order `o` spans `2^(block_shift(L) + o)` pages.
//! Every level except the node's top level uses orders `[0, 9)`: two order-8
//! buddies of level `L + 1` coalesce into one order-0 block of level `L`. The
//! top level uses `[0, top_orders)`.

/// Number of hierarchy levels.
pub const LEVELS: usize = 4;

/// Pages per level step, as a shift.
pub const LEVEL_BITS: u32 = 9;

/// Orders available below the top level.
pub const LEVEL_ORDERS: usize = 9;

/// Number of free-list slots per migration class.
pub const MAX_ORDERS: usize = 12;

const _: () = {
    assert!(LEVEL_ORDERS == LEVEL_BITS as usize);
    assert!(MAX_ORDERS >= LEVEL_ORDERS);
    assert!(MAX_ORDERS < 16);
};

/// log2 of the page count of an order-0 block at `level`.
#[inline]
#[must_use]
pub const fn block_shift(level: usize) -> u32 {
    (LEVELS - 1 - level) as u32 * LEVEL_BITS
}

/// Page count of a block at `level` / `order`.
#[inline]
#[must_use]
pub const fn block_pages(level: usize, order: usize) -> u64 {
    1 << (block_shift(level) + order as u32)
}

/// Per-node level geometry, fixed at boot before any free-list is populated.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Geometry {
    top: usize,
    top_orders: usize,
}

impl Geometry {
    /// Coarsest level whose block divides the base frame and fits the node.
    #[must_use]
    pub const fn for_node(base_pfn: u64, npages: u64) -> Self {
        let mut level = 0;
        while level < LEVELS - 1 {
            let shift = block_shift(level);
            if npages >> shift != 0 && base_pfn & ((1 << shift) - 1) == 0 {
                break;
            }
            level += 1;
        }
        Self {
            top: level,
            top_orders: 1,
        }
    }

    #[inline]
    #[must_use]
    pub const fn top(&self) -> usize {
        self.top
    }

    #[inline]
    #[must_use]
    pub const fn top_orders(&self) -> usize {
        self.top_orders
    }

    /// Widen the top level's order range to include `order`.
    pub(crate) const fn note_top_order(&mut self, order: usize) {
        if order + 1 > self.top_orders {
            self.top_orders = order + 1;
        }
    }

    /// Order range `[0, orders)` used at `level`.
    #[inline]
    #[must_use]
    pub const fn orders(&self, level: usize) -> usize {
        if level == self.top {
            self.top_orders
        } else {
            LEVEL_ORDERS
        }
    }

    /// Levels populated by this node, coarsest first.
    #[must_use]
    pub fn levels(&self) -> core::ops::Range<usize> {
        self.top..LEVELS
    }

    /// Largest aligned `(level, order)` block starting at `pfn` that ends at
    /// or before `end`.
    #[must_use]
    pub const fn largest_block(&self, pfn: u64, end: u64) -> Option<(usize, usize)> {
        let mut level = self.top;
        while level < LEVELS {
            let max = if level == self.top {
                MAX_ORDERS
            } else {
                LEVEL_ORDERS
            };
            let mut order = max;
            while order > 0 {
                order -= 1;
                let shift = block_shift(level) + order as u32;
                let pages = 1u64 << shift;
                if pfn & (pages - 1) == 0 && pfn + pages <= end {
                    return Some((level, order));
                }
            }
            level += 1;
        }
        None
    }
}

/// Index of the highest set bit; `npages` must be non-zero.
#[inline]
#[must_use]
pub const fn floor_log2(npages: u64) -> u32 {
    63 - npages.leading_zeros()
}

/// log2 of `npages` rounded up to the next power of two.
#[inline]
#[must_use]
pub const fn ceil_log2(npages: u64) -> u32 {
    if npages <= 1 {
        0
    } else {
        floor_log2(npages - 1) + 1
    }
}
