//! # Physical Memory Nodes
//!
//! A node is one contiguous range of physical memory with its own page
//! descriptor table, one [`Area`] per hierarchy level, per-CPU caches and a
//! single lock guarding all of it.
//!
//! ## Search state
//!
//! ```text
//!            forward hit                 forward miss (movable)
//!   Idle ─────────────────► Forward ───────────────────────────► Backward
//!    ▲                         │  ▲                                  │
//!    │                         │  │ forward hit                      │
//!    │   unmovable migrates    ▼  │                                  │
//!    │                     OnlyForward                               │
//!    └───────────────────────────────────────────────────────────────┘
//!                          backward hit
//! ```
//!
//! `OnlyForward` forbids further migration: a miss fails with
//! [`PmmError::OutOfMemory`]. In `Backward` a fragmentable movable request is
//! assembled from smaller blocks; every other request keeps using the forward
//! path.

use crate::area::Area;
use crate::buddy::Block;
use crate::config::{CpuIdFn, NodeConfig};
use crate::error::PmmError;
use crate::level::{Geometry, LEVELS, block_pages, block_shift, ceil_log2};
use crate::page::{MigrationType, Page, PageFlags, PageState, UsageClass};
use crate::pcp::PcpCaches;
use crate::policy::{AllocPolicy, UnmovableBudget, preprocess, take_highest_order};
use crate::stats::NodeStats;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use kernel_info::boot::MemoryNodeInfo;
use kernel_memory_addresses::{PAGE_SHIFT, PageFrameNumber, PhysicalAddress, is_page_aligned};
use kernel_sync::SpinLock;
use log::{debug, info, trace, warn};

/// Highest node id representable in a page descriptor.
pub const MAX_NODE_ID: u8 = 31;

/// Highest CPU count representable in a page descriptor.
const MAX_PCP_CPUS: usize = 32;

/// Direction of the most recent successful free-list search.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeStatus {
    Idle,
    Forward,
    /// An unmovable request is being served from the movable pool.
    OnlyForward,
    /// The next fragmentable movable request gathers smaller blocks.
    Backward,
}

/// Blocks handed out by one allocation, head block first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Allocation {
    blocks: Vec<Block>,
}

impl Allocation {
    /// Address passed back to `free`.
    #[must_use]
    pub fn head(&self) -> PhysicalAddress {
        self.blocks.first().map_or(PhysicalAddress::zero(), Block::addr)
    }

    /// Pages covered by all blocks.
    #[must_use]
    pub fn pages(&self) -> u64 {
        self.blocks.iter().map(Block::pages).sum()
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Whether the allocation consists of more than one block.
    #[must_use]
    pub fn is_compound(&self) -> bool {
        self.blocks.len() > 1
    }
}

/// Lock-protected state of one node.
#[derive(Debug)]
pub(crate) struct NodeState {
    pub(crate) id: u8,
    /// First frame of the node.
    pub(crate) base: u64,
    pub(crate) npages: u64,
    pub(crate) geometry: Geometry,
    pub(crate) pages: Vec<Page>,
    pub(crate) areas: [Area; LEVELS],
    pub(crate) pcp: PcpCaches,
    pub(crate) status: NodeStatus,
    /// Pages on the movable free-lists.
    pub(crate) nr_free_pages: u64,
    /// Pages currently handed out.
    pub(crate) allocated: u64,
    /// Pages held by debug-fixed allocations.
    pub(crate) debug_held: u64,
    /// Multi-block allocations keyed by the index of their head block.
    pub(crate) chains: BTreeMap<u32, Vec<Block>>,
}

impl NodeState {
    fn new(id: u8, config: &NodeConfig) -> Result<Self, PmmError> {
        let info = &config.info;
        validate(id, config)?;

        let base = info.base >> PAGE_SHIFT;
        let npages = info.size >> PAGE_SHIFT;
        let mut state = Self {
            id,
            base,
            npages,
            geometry: Geometry::for_node(base, npages),
            pages: alloc::vec![Page::new(id); npages as usize],
            areas: [const { Area::new() }; LEVELS],
            pcp: PcpCaches::new(config.cpus, config.pcp_capacity),
            status: NodeStatus::Idle,
            nr_free_pages: 0,
            allocated: 0,
            debug_held: 0,
            chains: BTreeMap::new(),
        };

        let end = base + npages;
        if info.has_reserved() {
            let rstart = info.reserved_base >> PAGE_SHIFT;
            let rend = rstart + (info.reserved_size >> PAGE_SHIFT);
            state.carve(base, rstart, MigrationType::Movable);
            state.carve(rstart, rend, MigrationType::Unmovable);
            state.carve(rend, end, MigrationType::Movable);
        } else {
            state.carve(base, end, MigrationType::Movable);
        }
        Ok(state)
    }

    /// Populate the `class` free-lists with `[start, end)`, largest aligned
    /// blocks first, appending to the tails.
    fn carve(&mut self, start: u64, end: u64, class: MigrationType) {
        let mut pfn = start;
        while pfn < end {
            let Some((level, order)) = self.geometry.largest_block(pfn, end) else {
                break;
            };
            if level == self.geometry.top() {
                self.geometry.note_top_order(order);
            }
            let idx = self.index_of(PageFrameNumber::new(pfn));
            self.push_free(idx, level, order, class, false);
            pfn += block_pages(level, order);
        }
    }

    /// Descriptor index of a frame inside the node.
    #[inline]
    pub(crate) const fn index_of(&self, pfn: PageFrameNumber) -> u32 {
        (pfn.as_u64() - self.base) as u32
    }

    #[inline]
    const fn contains_pfn(&self, pfn: u64) -> bool {
        pfn >= self.base && pfn < self.base + self.npages
    }

    /// Free pages of `class` over all levels. For the per-CPU class this is
    /// the number of cached pages.
    pub(crate) fn budget(&self, class: MigrationType) -> u64 {
        if class == MigrationType::Pcp {
            return self.pcp.total() as u64;
        }
        self.geometry
            .levels()
            .map(|l| self.budget_level(class, l))
            .sum()
    }

    pub(crate) fn budget_level(&self, class: MigrationType, level: usize) -> u64 {
        if level < self.geometry.top() || level >= LEVELS {
            return 0;
        }
        self.areas[level].budget(level, class, 0, self.geometry.orders(level))
    }

    fn unmovable_budget(&self) -> UnmovableBudget {
        let mut per_level = [0; LEVELS];
        for (level, pages) in per_level.iter_mut().enumerate() {
            *pages = self.budget_level(MigrationType::Unmovable, level);
        }
        UnmovableBudget {
            total: per_level.iter().sum(),
            per_level,
            debug_held: self.debug_held,
        }
    }

    /// Whether the pools `class` may draw from hold at least `npages`.
    fn budget_sufficient(&self, class: MigrationType, npages: u64) -> bool {
        let available = match class {
            MigrationType::Movable => self.nr_free_pages,
            MigrationType::Pcp => self.nr_free_pages + self.pcp.total() as u64,
            MigrationType::Unmovable => self.nr_free_pages + self.budget(MigrationType::Unmovable),
            MigrationType::Reclaimable => 0,
        };
        available >= npages
    }

    /// Allocate `npages` of `class` as one block, or as a chain of blocks
    /// when `fragmented`. Either every block is taken or none is.
    pub(crate) fn compound(
        &mut self,
        npages: u64,
        class: MigrationType,
        fragmented: bool,
        usage: UsageClass,
        cpu: usize,
    ) -> Result<Allocation, PmmError> {
        if npages == 0
            || class == MigrationType::Reclaimable
            || (class == MigrationType::Pcp && npages != 1)
        {
            return Err(PmmError::InvalidArgs);
        }
        let mut remaining = if fragmented {
            npages
        } else {
            npages
                .checked_next_power_of_two()
                .ok_or(PmmError::InvalidArgs)?
        };

        let mut blocks = Vec::new();
        for level in self.geometry.levels() {
            let shift = block_shift(level);
            let mut count = remaining >> shift;
            remaining &= (1 << shift) - 1;

            while count != 0 {
                let order = if fragmented {
                    take_highest_order(&mut count)
                } else {
                    let order = ceil_log2(count);
                    count = 0;
                    order
                };
                if let Err(e) = self.dispatch(level, order, class, fragmented, cpu, &mut blocks) {
                    debug!(
                        "node {}: no {} block at level {level} order {order}: {e}",
                        self.id,
                        class.as_str()
                    );
                    self.rollback(blocks, cpu);
                    return Err(e);
                }
            }
        }

        let mut held = 0;
        for b in &blocks {
            let idx = self.index_of(b.pfn());
            let flags = &mut self.pages[idx as usize].flags;
            flags.set_usage(usage);
            if blocks.len() > 1 && flags.state() == PageState::MovableNormal {
                flags.set_state(PageState::MovableComp);
            }
            held += b.pages();
        }
        if usage == UsageClass::DebugFixed {
            self.debug_held += held;
        }
        if blocks.len() > 1 {
            let head = self.index_of(blocks[0].pfn());
            self.chains.insert(head, blocks.clone());
        }
        trace!("node {}: allocated {held} pages in {} blocks", self.id, blocks.len());
        Ok(Allocation { blocks })
    }

    /// Take one `(level, order)` block of `class`, appending it (or the
    /// blocks assembled for it) to `out`.
    fn dispatch(
        &mut self,
        level: usize,
        order: u32,
        class: MigrationType,
        fragmented: bool,
        cpu: usize,
        out: &mut Vec<Block>,
    ) -> Result<(), PmmError> {
        if class == MigrationType::Pcp
            && let Some(idx) = self.pcp_take(cpu)
        {
            let block = self.take(idx, LEVELS - 1, 0, MigrationType::Movable, PageState::Pcp);
            self.pages[idx as usize].flags.set_table(cpu as u8);
            out.push(block);
            return Ok(());
        }

        let status = self.status;
        if status == NodeStatus::Backward && fragmented && class == MigrationType::Movable {
            let blocks = self
                .backward_remove(level, order, class)
                .ok_or(PmmError::OutOfMemory)?;
            self.status = NodeStatus::Idle;
            out.extend(blocks);
            return Ok(());
        }

        if let Some(idx) = self.forward_remove(level, order, class) {
            self.status = NodeStatus::Forward;
            out.push(self.take(idx, level, order as usize, class, state_for(class)));
            return Ok(());
        }

        match (status, class) {
            (NodeStatus::OnlyForward, _) | (NodeStatus::Backward, MigrationType::Movable) => {
                Err(PmmError::OutOfMemory)
            }
            _ => self.migrate(level, order, class, fragmented, cpu, out),
        }
    }

    /// Serve a request of `class` from another pool after its own
    /// free-lists came up empty.
    fn migrate(
        &mut self,
        level: usize,
        order: u32,
        class: MigrationType,
        fragmented: bool,
        cpu: usize,
        out: &mut Vec<Block>,
    ) -> Result<(), PmmError> {
        let start = out.len();
        match class {
            MigrationType::Reclaimable => return Err(PmmError::InvalidArgs),
            MigrationType::Pcp => {
                self.dispatch(level, order, MigrationType::Movable, fragmented, cpu, out)?;
                for b in &out[start..] {
                    let idx = (b.pfn().as_u64() - self.base) as usize;
                    let flags = &mut self.pages[idx].flags;
                    flags.set_state(PageState::Pcp);
                    flags.set_table(cpu as u8);
                }
            }
            MigrationType::Unmovable => {
                self.status = NodeStatus::OnlyForward;
                self.dispatch(level, order, MigrationType::Movable, fragmented, cpu, out)?;
                for b in &out[start..] {
                    let idx = (b.pfn().as_u64() - self.base) as usize;
                    self.pages[idx].flags.set_state(PageState::NoMovable);
                }
            }
            MigrationType::Movable => {
                self.status = NodeStatus::Backward;
                self.dispatch(level, order, class, fragmented, cpu, out)?;
            }
        }
        Ok(())
    }

    fn rollback(&mut self, blocks: Vec<Block>, cpu: usize) {
        for b in blocks.into_iter().rev() {
            self.release_block(b, cpu);
        }
    }

    /// Free the allocation headed by `paddr`; returns the number of pages
    /// released.
    pub(crate) fn decompose(&mut self, paddr: PhysicalAddress, cpu: usize) -> Result<u64, PmmError> {
        let pfn = paddr.pfn();
        if !paddr.is_page_aligned() || !self.contains_pfn(pfn.as_u64()) {
            return Err(PmmError::InvalidArgs);
        }
        let idx = self.index_of(pfn);
        let flags = self.pages[idx as usize].flags;
        if !flags.present() {
            warn!("node {}: free of unallocated page {paddr}", self.id);
            return Err(PmmError::InvalidArgs);
        }

        if let Some(chain) = self.chains.remove(&idx) {
            let pages = chain.iter().map(Block::pages).sum();
            for b in chain {
                self.release_block(b, cpu);
            }
            return Ok(pages);
        }
        if self
            .chains
            .values()
            .any(|c| c.iter().skip(1).any(|b| b.pfn() == pfn))
        {
            warn!("node {}: {paddr} is not the head of its compound allocation", self.id);
            return Err(PmmError::InvalidArgs);
        }

        let block = self.block(idx, usize::from(flags.level()), usize::from(flags.order()));
        self.release_block(block, cpu);
        Ok(block.pages())
    }

    /// Return one handed-out block to the pool it came from.
    fn release_block(&mut self, block: Block, cpu: usize) {
        let idx = self.index_of(block.pfn());
        let flags = self.pages[idx as usize].flags;
        assert!(
            flags.present()
                && usize::from(flags.level()) == block.level()
                && usize::from(flags.order()) == block.order(),
            "node {}: descriptor of {:?} does not match level {} order {}",
            self.id,
            block.addr(),
            block.level(),
            block.order()
        );

        let pages = block.pages();
        if flags.usage() == UsageClass::DebugFixed {
            self.debug_held -= pages;
        }
        self.allocated -= pages;
        let page = &mut self.pages[idx as usize];
        page.flags = page
            .flags
            .with_present(false)
            .with_usage(UsageClass::Undefined);

        if flags.state() == PageState::Pcp {
            self.pcp_give(idx, cpu);
        } else {
            self.release(idx, block.level(), block.order(), flags.home());
        }
    }

    fn page(&self, paddr: PhysicalAddress) -> Option<&Page> {
        let pfn = paddr.pfn();
        self.contains_pfn(pfn.as_u64())
            .then(|| &self.pages[self.index_of(pfn) as usize])
    }
}

/// State stamped on a block taken from the free-lists of `class`.
const fn state_for(class: MigrationType) -> PageState {
    match class {
        MigrationType::Movable => PageState::MovableNormal,
        MigrationType::Unmovable => PageState::NoMovable,
        MigrationType::Reclaimable => PageState::Reclaim,
        MigrationType::Pcp => PageState::Pcp,
    }
}

fn validate(id: u8, config: &NodeConfig) -> Result<(), PmmError> {
    let MemoryNodeInfo {
        base,
        size,
        reserved_base,
        reserved_size,
    } = config.info;

    if id > MAX_NODE_ID {
        return Err(PmmError::InvalidLayout("node id out of range"));
    }
    if size == 0 || !is_page_aligned(base) || !is_page_aligned(size) {
        return Err(PmmError::InvalidLayout("node range not page aligned"));
    }
    if base.checked_add(size).is_none() || size >> PAGE_SHIFT >= u64::from(u32::MAX) {
        return Err(PmmError::InvalidLayout("node too large"));
    }
    if config.cpus == 0 || config.cpus > MAX_PCP_CPUS || config.pcp_capacity == 0 {
        return Err(PmmError::InvalidLayout("bad per-cpu cache configuration"));
    }
    if reserved_size != 0 {
        let inside = reserved_base >= base
            && reserved_base
                .checked_add(reserved_size)
                .is_some_and(|end| end <= base + size);
        if !inside || !is_page_aligned(reserved_base) || !is_page_aligned(reserved_size) {
            return Err(PmmError::InvalidLayout("reserved window outside node"));
        }
    }
    Ok(())
}

/// One physical memory node.
///
/// Every operation takes the node lock for its whole duration; the per-CPU
/// cache used is selected by the configured CPU id source.
#[derive(Debug)]
pub struct PhysicalMemoryNode {
    id: u8,
    base: PageFrameNumber,
    npages: u64,
    geometry: Geometry,
    cpus: usize,
    current_cpu: CpuIdFn,
    state: SpinLock<NodeState>,
}

impl PhysicalMemoryNode {
    /// Build the node's page table and carve its range into free blocks.
    ///
    /// # Errors
    /// [`PmmError::InvalidLayout`] if the range, the reserved window or the
    /// per-CPU configuration cannot be represented.
    pub fn new(id: u8, config: &NodeConfig) -> Result<Self, PmmError> {
        let state = NodeState::new(id, config)?;
        info!(
            "node {id}: {} pages at {}, top level {} with {} orders",
            state.npages,
            PhysicalAddress::new(config.info.base),
            state.geometry.top(),
            state.geometry.top_orders()
        );
        Ok(Self {
            id,
            base: PageFrameNumber::new(state.base),
            npages: state.npages,
            geometry: state.geometry,
            cpus: config.cpus,
            current_cpu: config.current_cpu,
            state: SpinLock::new(state),
        })
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base.base()
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.npages << PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn npages(&self) -> u64 {
        self.npages
    }

    #[inline]
    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[must_use]
    pub const fn contains(&self, paddr: PhysicalAddress) -> bool {
        let pfn = paddr.pfn().as_u64();
        pfn >= self.base.as_u64() && pfn < self.base.as_u64() + self.npages
    }

    fn cpu(&self) -> usize {
        (self.current_cpu)() % self.cpus
    }

    #[must_use]
    pub fn status(&self) -> NodeStatus {
        self.state.lock().status
    }

    /// Pages on the movable free-lists.
    #[must_use]
    pub fn free_pages(&self) -> u64 {
        self.state.lock().nr_free_pages
    }

    /// Free pages of `class` over all levels.
    #[must_use]
    pub fn budget(&self, class: MigrationType) -> u64 {
        self.state.lock().budget(class)
    }

    #[must_use]
    pub fn budget_level(&self, class: MigrationType, level: usize) -> u64 {
        self.state.lock().budget_level(class, level)
    }

    /// Allocate `npages` of `class` without usage-class rules.
    ///
    /// # Errors
    /// [`PmmError::InvalidArgs`] for a zero count, the reclaimable class or a
    /// multi-page per-CPU request; [`PmmError::OutOfMemory`] if the blocks
    /// cannot be found.
    pub fn compound(&self, npages: u64, class: MigrationType, fragmented: bool) -> Result<Allocation, PmmError> {
        let cpu = self.cpu();
        self.state
            .lock()
            .compound(npages, class, fragmented, UsageClass::Undefined, cpu)
    }

    /// Free the allocation whose head block starts at `paddr`.
    ///
    /// # Errors
    /// [`PmmError::InvalidArgs`] if `paddr` is outside the node, not
    /// allocated, or inside a compound allocation other than its head.
    pub fn decompose(&self, paddr: PhysicalAddress) -> Result<u64, PmmError> {
        let cpu = self.cpu();
        self.state.lock().decompose(paddr, cpu)
    }

    /// Allocate `npages` for `usage` according to the usage-class policy.
    ///
    /// # Errors
    /// See [`preprocess`] and [`Self::compound`].
    pub fn alloc(&self, npages: u64, usage: UsageClass) -> Result<Allocation, PmmError> {
        self.allocate(npages, usage, false)
    }

    /// Like [`Self::alloc`] on behalf of another node; single-block results
    /// are marked as borrowed.
    pub(crate) fn lend(&self, npages: u64, usage: UsageClass) -> Result<Allocation, PmmError> {
        self.allocate(npages, usage, true)
    }

    fn allocate(&self, npages: u64, usage: UsageClass, borrowed: bool) -> Result<Allocation, PmmError> {
        let policy = AllocPolicy::for_usage(usage, npages)?;
        let cpu = self.cpu();
        let mut state = self.state.lock();
        let npages = preprocess(usage, npages, &state.unmovable_budget())?;
        if !state.budget_sufficient(policy.class, npages) {
            debug!("node {}: {npages} {} pages exceed budget", self.id, policy.class.as_str());
            return Err(PmmError::OutOfMemory);
        }

        let allocation = state.compound(npages, policy.class, policy.fragmented, usage, cpu)?;
        if borrowed && !allocation.is_compound() {
            let idx = state.index_of(allocation.blocks[0].pfn()) as usize;
            let flags = &mut state.pages[idx].flags;
            if flags.state() == PageState::MovableNormal {
                flags.set_state(PageState::MovableNode);
            }
        }
        Ok(allocation)
    }

    /// Snapshot of the descriptor flags of the page at `paddr`.
    #[must_use]
    pub fn page_flags(&self, paddr: PhysicalAddress) -> Option<PageFlags> {
        self.state.lock().page(paddr).map(|p| p.flags)
    }

    /// User word of the page at `paddr`.
    #[must_use]
    pub fn page_private(&self, paddr: PhysicalAddress) -> Option<u64> {
        self.state.lock().page(paddr).map(|p| p.private)
    }

    /// Set the user word of the page at `paddr`; returns `false` if the page
    /// is outside the node.
    #[must_use]
    pub fn set_page_private(&self, paddr: PhysicalAddress, value: u64) -> bool {
        let mut state = self.state.lock();
        let pfn = paddr.pfn();
        if !state.contains_pfn(pfn.as_u64()) {
            return false;
        }
        let idx = state.index_of(pfn) as usize;
        state.pages[idx].private = value;
        true
    }

    #[must_use]
    pub fn stats(&self) -> NodeStats {
        self.state.lock().stats()
    }

    /// Whether every free-list entry heads a free block matching its list.
    #[must_use]
    pub fn free_lists_consistent(&self) -> bool {
        self.state.lock().free_lists_consistent()
    }

    /// Log the node's free-lists and counters.
    pub fn dump(&self) {
        self.stats().dump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::{MEMBASE, MEMSIZE};

    fn node(size: u64) -> PhysicalMemoryNode {
        PhysicalMemoryNode::new(0, &NodeConfig::new(MemoryNodeInfo::new(MEMBASE, size)).with_cpus(2))
            .unwrap()
    }

    #[test]
    fn gigabyte_node_is_one_top_block() {
        let n = node(MEMSIZE);
        assert_eq!(n.geometry().top(), 1);
        assert_eq!(n.free_pages(), MEMSIZE >> PAGE_SHIFT);
        assert_eq!(n.budget_level(MigrationType::Movable, 1), MEMSIZE >> PAGE_SHIFT);
        assert_eq!(n.status(), NodeStatus::Idle);
    }

    #[test]
    fn four_pages_come_from_the_base() {
        let n = node(MEMSIZE);
        let a = n.compound(4, MigrationType::Movable, false).unwrap();
        assert_eq!(a.head(), PhysicalAddress::new(MEMBASE));
        assert_eq!(a.blocks(), &[Block::new(PageFrameNumber::new(MEMBASE >> PAGE_SHIFT), 3, 2)]);
        assert_eq!(n.status(), NodeStatus::Forward);
        assert_eq!(n.free_pages(), (MEMSIZE >> PAGE_SHIFT) - 4);

        assert_eq!(n.decompose(a.head()), Ok(4));
        assert_eq!(n.free_pages(), MEMSIZE >> PAGE_SHIFT);
        // everything coalesced back into the single top block
        assert_eq!(n.budget_level(MigrationType::Movable, 1), MEMSIZE >> PAGE_SHIFT);
    }

    #[test]
    fn non_fragmented_requests_round_up() {
        let n = node(MEMSIZE);
        let a = n.compound(5, MigrationType::Movable, false).unwrap();
        assert_eq!(a.pages(), 8);
        assert!(!a.is_compound());
    }

    #[test]
    fn invalid_compound_arguments() {
        let n = node(MEMSIZE);
        assert_eq!(n.compound(0, MigrationType::Movable, false), Err(PmmError::InvalidArgs));
        assert_eq!(n.compound(1, MigrationType::Reclaimable, false), Err(PmmError::InvalidArgs));
        assert_eq!(n.compound(2, MigrationType::Pcp, false), Err(PmmError::InvalidArgs));
    }

    #[test]
    fn double_free_is_rejected() {
        let n = node(MEMSIZE);
        let a = n.compound(1, MigrationType::Movable, false).unwrap();
        assert_eq!(n.decompose(a.head()), Ok(1));
        assert_eq!(n.decompose(a.head()), Err(PmmError::InvalidArgs));
        assert_eq!(n.decompose(PhysicalAddress::new(0x1000)), Err(PmmError::InvalidArgs));
    }

    #[test]
    fn bad_layouts() {
        let cfg = NodeConfig::new(MemoryNodeInfo::new(MEMBASE + 1, MEMSIZE));
        assert!(matches!(PhysicalMemoryNode::new(0, &cfg), Err(PmmError::InvalidLayout(_))));
        let cfg = NodeConfig::new(MemoryNodeInfo::new(MEMBASE, MEMSIZE));
        assert!(matches!(PhysicalMemoryNode::new(32, &cfg), Err(PmmError::InvalidLayout(_))));
        let cfg = NodeConfig::new(MemoryNodeInfo::new(MEMBASE, 0x1000).with_reserved(MEMBASE, 0x2000));
        assert!(matches!(PhysicalMemoryNode::new(0, &cfg), Err(PmmError::InvalidLayout(_))));
    }

    #[test]
    fn private_word() {
        let n = node(0x20_0000);
        let pa = PhysicalAddress::new(MEMBASE + 0x3000);
        assert!(n.set_page_private(pa, 42));
        assert_eq!(n.page_private(pa), Some(42));
        assert!(!n.set_page_private(PhysicalAddress::new(0), 1));
    }
}
