//! # Address Spaces
//!
//! An [`AddressSpace`] owns the areas of one translation context: the
//! hypervisor itself, a partition or a guest VM. Areas tile the space's root
//! range; unused parts are `GAPS` areas that are split when something is
//! created inside them and merged back when it is destroyed.
//!
//! ```text
//!  root [0x0000 ─────────────────────────────────────── 0x10_0000)
//!
//!  split [0x1000, 0x3000) NORMAL
//!
//!       ┌──────────┬──────────────────┬──────────────────────────┐
//!       │   GAPS   │      NORMAL      │           GAPS           │
//!       └──────────┴──────────────────┴──────────────────────────┘
//!       0x0000     0x1000             0x3000                0x10_0000
//!
//!  destroy [0x1000, 0x3000): NORMAL becomes GAPS and is absorbed by its
//!  neighbours, leaving the single root area again.
//! ```
//!
//! Each area lives in the space's arena and is reachable through two views
//! kept in lockstep under the space's lock: an address-ordered interval index
//! and a doubly linked sibling list. Areas borrowed from other spaces are
//! additionally kept on the access list, ordered by end address.

use crate::area::{Backing, VmArea};
use crate::arena::{Arena, VmaId};
use crate::error::VmaError;
use crate::flags::{AddressSpaceKind, AreaAttr, AreaFlags, AreaState, MapFlags};
use crate::frame::FrameSource;
use crate::index::IntervalIndex;
use crate::vspace::Vspace;
use alloc::vec::Vec;
use kernel_memory_addresses::{AddressRange, PhysicalAddress, VirtualAddress};
use kernel_pmm::UsageClass;
use kernel_sync::{SpinLock, SpinLockGuard};
use log::{debug, info, trace, warn};

/// Partition id naming an address space.
pub type MmId = u16;

/// Validate a page-aligned, non-empty range.
pub(crate) const fn check_range(range: AddressRange) -> Result<(), VmaError> {
    if range.start >= range.end || !range.is_page_aligned() {
        return Err(VmaError::InvalidArgs);
    }
    Ok(())
}

/// Area records and the translation context of one address space.
pub(crate) struct MmInner<V> {
    pub(crate) vspace: V,
    pub(crate) arena: Arena,
    pub(crate) index: IntervalIndex,
    pub(crate) access: Vec<VmaId>,
}

impl<V: Vspace> MmInner<V> {
    fn new(vspace: V) -> Self {
        Self {
            vspace,
            arena: Arena::new(),
            index: IntervalIndex::new(),
            access: Vec::new(),
        }
    }

    /// Add an area to the arena, the index and the sibling list.
    pub(crate) fn insert(&mut self, area: VmArea) -> Result<VmaId, VmaError> {
        let range = area.range;
        let id = self.arena.insert(area);
        if let Err(e) = self.index.insert(range, id) {
            self.arena.remove(id);
            return Err(e);
        }
        let prev = self.index.before(range.start);
        let next = self.index.after(range.start);
        self.arena[id].prev = prev;
        self.arena[id].next = next;
        if let Some(p) = prev {
            self.arena[p].next = Some(id);
        }
        if let Some(n) = next {
            self.arena[n].prev = Some(id);
        }
        Ok(id)
    }

    /// Remove an area from every view and return its record.
    pub(crate) fn unlink(&mut self, id: VmaId) -> VmArea {
        let area = self.arena[id];
        self.index.remove(area.range.start);
        if let Some(p) = area.prev {
            self.arena[p].next = area.next;
        }
        if let Some(n) = area.next {
            self.arena[n].prev = area.prev;
        }
        self.access.retain(|a| *a != id);
        self.arena.remove(id)
    }

    fn set_end(&mut self, id: VmaId, end: u64) {
        let area = &mut self.arena[id];
        area.range.end = end;
        self.index.set_end(area.range.start, end);
    }

    fn set_start(&mut self, id: VmaId, start: u64) {
        let area = &mut self.arena[id];
        let old = area.range.start;
        if let Some(pa) = area.backing {
            area.backing = Some(PhysicalAddress::new(pa.as_u64() - (old - start)));
        }
        area.range.start = start;
        self.index.set_start(old, start);
    }

    /// Detach an exclusively owned, inactive area.
    ///
    /// Mapped areas and grants keep translations and lender counts that only
    /// destroy and relinquish know how to release.
    pub(crate) fn revoke(&mut self, id: VmaId) -> Result<VmArea, VmaError> {
        let area = &self.arena[id];
        if area.owners != 1 || area.users != 0 || area.state != AreaState::NA || area.is_grant() {
            debug!("revoke {}: {} area", area.range, area.state.as_str());
            return Err(VmaError::StateConflict);
        }
        Ok(self.unlink(id))
    }

    /// Cut `id` at `at`; the upper part becomes a new area.
    fn carve(&mut self, id: VmaId, at: u64) -> Result<VmaId, VmaError> {
        let area = self.arena[id];
        debug_assert!(area.range.start < at && at < area.range.end);
        let mut tail = area;
        tail.range = AddressRange::new(at, area.range.end);
        tail.flags = area.flags.with_alloc(false);
        tail.backing = area
            .backing
            .map(|pa| PhysicalAddress::new(pa.as_u64() + (at - area.range.start)));
        tail.prev = None;
        tail.next = None;
        self.set_end(id, at);
        self.insert(tail).inspect_err(|_| self.set_end(id, area.range.end))
    }

    /// Carve `range` out of the area containing it.
    ///
    /// The returned area covers exactly `range`. Unless `attr` is
    /// [`AreaAttr::Gaps`] it takes `attr` and `flags`; otherwise it keeps what
    /// it inherited from the containing area.
    pub(crate) fn split(&mut self, range: AddressRange, attr: AreaAttr, flags: AreaFlags) -> Result<VmaId, VmaError> {
        check_range(range)?;
        let parent = self.index.find(range)?.ok_or(VmaError::OutOfRange)?;
        let ancestor = self.arena[parent];
        if ancestor.state.is_borrowed_out() || ancestor.is_grant() {
            debug!("split {range}: containing area is {}", ancestor.state.as_str());
            return Err(VmaError::InvalidArgs);
        }
        if ancestor.flags.alloc() && ancestor.backing.is_some() && ancestor.range != range {
            debug!("split {range}: {} is one allocation", ancestor.range);
            return Err(VmaError::InvalidArgs);
        }

        let mut piece = parent;
        if range.start != ancestor.range.start {
            piece = self.carve(parent, range.start)?;
        }
        if range.end != ancestor.range.end
            && let Err(e) = self.carve(piece, range.end)
        {
            if piece != parent {
                self.unlink(piece);
                self.set_end(parent, ancestor.range.end);
            }
            return Err(e);
        }

        if attr != AreaAttr::Gaps {
            let area = &mut self.arena[piece];
            area.attr = attr;
            area.flags = flags.with_alloc(flags.alloc() || area.flags.alloc());
        }
        trace!("split {range} from {}", ancestor.range);
        Ok(piece)
    }

    /// Re-join the pieces a failed [`Self::split`] cut out of `ancestor`.
    pub(crate) fn unsplit(&mut self, ancestor: &VmArea) {
        let Some(head) = self.index.containing(ancestor.range.start) else {
            return;
        };
        while let Some(n) = self.arena[head]
            .next
            .filter(|n| self.arena[*n].range.start < ancestor.range.end)
        {
            self.unlink(n);
        }
        let area = &mut self.arena[head];
        *area = VmArea {
            prev: area.prev,
            next: area.next,
            ..*ancestor
        };
        self.index.set_end(ancestor.range.start, ancestor.range.end);
    }

    /// Split and activate in one step.
    ///
    /// Returns the area and, if this call activated it, the record of the
    /// area it was carved from. If mapping fails that area is restored.
    pub(crate) fn split_map(
        &mut self,
        range: AddressRange,
        attr: AreaAttr,
        flags: AreaFlags,
        prot: MapFlags,
        backing: Backing,
        frames: &impl FrameSource,
    ) -> Result<(VmaId, Option<VmArea>), VmaError> {
        check_range(range)?;
        let ancestor = self.index.find(range)?.map(|id| self.arena[id]);
        let id = self.split(range, attr, flags)?;
        let fresh = self.arena[id].state == AreaState::NA;
        if let Err(e) = self.map_area(id, prot, backing, frames) {
            if let Some(ancestor) = ancestor {
                self.unsplit(&ancestor);
            }
            return Err(e);
        }
        Ok((id, ancestor.filter(|_| fresh)))
    }

    /// Absorb a `GAPS` area into adjacent `GAPS` neighbours.
    ///
    /// The higher neighbour is tried first. Returns the area that now covers
    /// the range; a no-op for anything that is not an inactive gap.
    pub(crate) fn merge(&mut self, id: VmaId) -> VmaId {
        let mut id = id;
        loop {
            let area = self.arena[id];
            if !area.is_gaps() || area.state != AreaState::NA {
                return id;
            }
            let absorbs = |other: &VmArea| other.is_gaps() && other.state == AreaState::NA;

            if let Some(n) = area.next.filter(|n| {
                let next = &self.arena[*n];
                absorbs(next) && next.range.start == area.range.end
            }) {
                self.unlink(id);
                self.set_start(n, area.range.start);
                id = n;
                continue;
            }
            if let Some(p) = area.prev.filter(|p| {
                let prev = &self.arena[*p];
                absorbs(prev) && prev.range.end == area.range.start
            }) {
                self.unlink(id);
                self.set_end(p, area.range.end);
                id = p;
                continue;
            }
            return id;
        }
    }

    /// Tear down the owner's mapping and turn the area into a gap.
    pub(crate) fn destroy_mapping(&mut self, id: VmaId, frames: &impl FrameSource) -> Result<(), VmaError> {
        let area = self.arena[id];
        if area.owners != 1 || area.users != 0 {
            return Err(VmaError::StateConflict);
        }
        if area.is_mapped() {
            self.vspace.unmap(area.start(), area.pages())?;
        }
        self.arena[id].reset();
        if let (true, Some(pa)) = (area.flags.alloc(), area.backing) {
            frames.free_frames(pa).inspect_err(|e| warn!("{}: leaking {pa}: {e}", area.range))?;
        }
        Ok(())
    }

    pub(crate) fn destroy(&mut self, id: VmaId, frames: &impl FrameSource) -> Result<VmaId, VmaError> {
        self.destroy_mapping(id, frames)?;
        Ok(self.merge(id))
    }

    /// Activate an area carved by [`Self::split`].
    ///
    /// An area carved out of an already mapped ancestor is only re-protected;
    /// an empty `prot` keeps the inherited protection.
    pub(crate) fn map_area(
        &mut self,
        id: VmaId,
        prot: MapFlags,
        backing: Backing,
        frames: &impl FrameSource,
    ) -> Result<(), VmaError> {
        let area = self.arena[id];
        if area.is_gaps() {
            return Err(VmaError::InvalidArgs);
        }
        if area.state == AreaState::EA && area.backing.is_some() {
            let prot = if prot.is_accessible() { prot } else { area.prot };
            self.vspace.protect(area.start(), area.pages(), prot)?;
            self.arena[id].prot = prot;
            return Ok(());
        }
        if area.state != AreaState::NA {
            return Err(VmaError::StateConflict);
        }

        let (pa, allocated) = match backing {
            Backing::Unbacked => {
                let a = &mut self.arena[id];
                a.state = AreaState::EA;
                a.prot = prot;
                return Ok(());
            }
            _ if !prot.is_accessible() => return Err(VmaError::InvalidArgs),
            Backing::Fixed(pa) if !pa.is_page_aligned() => return Err(VmaError::InvalidArgs),
            Backing::Fixed(pa) => (pa, false),
            Backing::Allocate => {
                let usage = allocation_usage(area.attr, area.flags)?;
                (frames.alloc_frames(area.pages(), usage)?, true)
            }
        };

        if let Err(e) = self.vspace.map(pa, area.start(), area.pages(), prot) {
            if allocated {
                frames.free_frames(pa)?;
            }
            return Err(e.into());
        }
        let a = &mut self.arena[id];
        a.state = AreaState::EA;
        a.prot = prot;
        a.backing = Some(pa);
        a.flags = a.flags.with_alloc(allocated);
        trace!("mapped {} -> {pa} [{prot}]", a.range);
        Ok(())
    }

    /// Area covering exactly `range`.
    pub(crate) fn find_exact(&self, range: AddressRange) -> Result<VmaId, VmaError> {
        check_range(range)?;
        let id = self.index.find(range)?.ok_or(VmaError::NotFound)?;
        if self.arena[id].range == range {
            Ok(id)
        } else {
            Err(VmaError::InvalidArgs)
        }
    }

    /// Record a borrowed area, keeping the list ordered by end address.
    pub(crate) fn access_insert(&mut self, id: VmaId) {
        let end = self.arena[id].range.end;
        let arena = &self.arena;
        let pos = self.access.partition_point(|a| arena[*a].range.end <= end);
        self.access.insert(pos, id);
    }

    /// Borrowed area containing `addr`.
    pub(crate) fn access_find(&self, addr: u64) -> Option<VmaId> {
        self.access
            .iter()
            .copied()
            .find(|a| self.arena[*a].range.contains(addr))
    }

    fn ordered(&self) -> impl Iterator<Item = &VmArea> {
        self.index.iter().map(|(_, id)| &self.arena[id])
    }

    fn is_consistent(&self) -> bool {
        if self.index.len() != self.arena.len() {
            return false;
        }
        let mut expected_prev = None;
        let mut last_end = 0;
        for (range, id) in self.index.iter() {
            let area = &self.arena[id];
            if area.range != range || area.prev != expected_prev || range.start < last_end {
                return false;
            }
            if let Some(p) = expected_prev
                && self.arena[p].next != Some(id)
            {
                return false;
            }
            if !area.ownership_consistent() {
                return false;
            }
            expected_prev = Some(id);
            last_end = range.end;
        }
        let tail_ok = expected_prev.is_none_or(|t| self.arena[t].next.is_none());
        let grants_ok = self.access.iter().all(|a| self.arena.get(*a).is_some_and(VmArea::is_grant));
        tail_ok && grants_ok
    }
}

/// Usage class for backing allocated on behalf of an area.
const fn allocation_usage(attr: AreaAttr, flags: AreaFlags) -> Result<UsageClass, VmaError> {
    match attr {
        AreaAttr::Normal if flags.reserved() => Ok(UsageClass::BootReserved),
        AreaAttr::Normal | AreaAttr::Dma => Ok(UsageClass::ContiguousRequired),
        _ => Err(VmaError::InvalidArgs),
    }
}

/// One address space: its areas, access list and translation context.
pub struct AddressSpace<V: Vspace> {
    id: MmId,
    kind: AddressSpaceKind,
    range: AddressRange,
    inner: SpinLock<MmInner<V>>,
}

impl<V: Vspace> AddressSpace<V> {
    /// Create a space whose root area spans `root` (or the whole context when
    /// `root` is empty).
    ///
    /// # Errors
    /// [`VmaError::InvalidArgs`] for a misaligned root,
    /// [`VmaError::OutOfRange`] for a root outside the context.
    pub fn new(
        id: MmId,
        kind: AddressSpaceKind,
        vspace: V,
        root: AddressRange,
        attr: AreaAttr,
    ) -> Result<Self, VmaError> {
        let range = vspace.range();
        let root = if root.is_empty() { range } else { root };
        check_range(root)?;
        if !range.contains_range(&root) {
            return Err(VmaError::OutOfRange);
        }

        let mut inner = MmInner::new(vspace);
        let flags = AreaFlags::new().with_kind(kind).with_id(id);
        inner.insert(VmArea::new(root, attr, flags))?;
        info!("mm {id}: {kind:?} space {range}, root {root} {}", attr.as_str());
        Ok(Self {
            id,
            kind,
            range,
            inner: SpinLock::new(inner),
        })
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> MmId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> AddressSpaceKind {
        self.kind
    }

    /// Addresses the translation context covers.
    #[inline]
    #[must_use]
    pub const fn range(&self) -> AddressRange {
        self.range
    }

    pub(crate) fn lock(&self) -> SpinLockGuard<'_, MmInner<V>> {
        self.inner.lock()
    }

    pub(crate) fn into_vspace(self) -> V {
        self.inner.into_inner().vspace
    }

    /// Carve `range` out of the area containing it.
    ///
    /// # Errors
    /// [`VmaError::OutOfRange`] if no area contains `range`;
    /// [`VmaError::InvalidArgs`] if `range` is misaligned, straddles areas, or
    /// the containing area is shared, lent or borrowed.
    pub fn split(&self, range: AddressRange, attr: AreaAttr, flags: AreaFlags) -> Result<VmArea, VmaError> {
        let mut mm = self.lock();
        let id = mm.split(range, attr, flags)?;
        Ok(mm.arena[id])
    }

    /// Activate the area covering exactly `range`.
    ///
    /// # Errors
    /// [`VmaError::NotFound`] or [`VmaError::InvalidArgs`] if no area covers
    /// exactly `range`; allocator and translation errors are passed through.
    pub fn map(
        &self,
        range: AddressRange,
        prot: MapFlags,
        backing: Backing,
        frames: &impl FrameSource,
    ) -> Result<VmArea, VmaError> {
        let mut mm = self.lock();
        let id = mm.find_exact(range)?;
        mm.map_area(id, prot, backing, frames)?;
        Ok(mm.arena[id])
    }

    /// Split and activate in one step; the containing area is restored if
    /// mapping fails.
    ///
    /// # Errors
    /// See [`Self::split`] and [`Self::map`].
    pub fn create_map(
        &self,
        range: AddressRange,
        attr: AreaAttr,
        flags: AreaFlags,
        prot: MapFlags,
        backing: Backing,
        frames: &impl FrameSource,
    ) -> Result<VmArea, VmaError> {
        let mut mm = self.lock();
        let (id, _) = mm.split_map(range, attr, flags, prot, backing, frames)?;
        Ok(mm.arena[id])
    }

    /// Unmap the area covering exactly `range` and merge it into its gaps.
    ///
    /// # Errors
    /// [`VmaError::InvalidArgs`] for gaps and borrowed areas,
    /// [`VmaError::StateConflict`] for shared or lent areas.
    pub fn destroy(&self, range: AddressRange, frames: &impl FrameSource) -> Result<(), VmaError> {
        let mut mm = self.lock();
        let id = mm.find_exact(range)?;
        let area = &mm.arena[id];
        if area.is_gaps() || area.is_grant() {
            return Err(VmaError::InvalidArgs);
        }
        mm.destroy(id, frames)?;
        Ok(())
    }

    /// Detach the exclusively owned area covering exactly `range` and hand
    /// its record to the caller. The range is left uncovered.
    ///
    /// # Errors
    /// [`VmaError::StateConflict`] unless the area is inactive, has one owner
    /// and no borrowers, and was not borrowed from another space.
    pub fn revoke(&self, range: AddressRange) -> Result<VmArea, VmaError> {
        let mut mm = self.lock();
        let id = mm.find_exact(range)?;
        mm.revoke(id)
    }

    /// Detach and drop the area covering exactly `range`.
    ///
    /// # Errors
    /// See [`Self::revoke`].
    pub fn revoke_delete(&self, range: AddressRange) -> Result<(), VmaError> {
        self.revoke(range).map(|_| ())
    }

    /// Merge the gap containing `addr` with adjacent gaps.
    ///
    /// # Errors
    /// [`VmaError::NotFound`] if no area contains `addr`.
    pub fn merge(&self, addr: u64) -> Result<VmArea, VmaError> {
        let mut mm = self.lock();
        let id = mm.index.containing(addr).ok_or(VmaError::NotFound)?;
        let id = mm.merge(id);
        Ok(mm.arena[id])
    }

    /// Area containing all of `range`.
    ///
    /// # Errors
    /// [`VmaError::InvalidArgs`] if `range` straddles areas.
    pub fn find(&self, range: AddressRange) -> Result<Option<VmArea>, VmaError> {
        let mm = self.lock();
        Ok(mm.index.find(range)?.map(|id| mm.arena[id]))
    }

    #[must_use]
    pub fn area_at(&self, addr: u64) -> Option<VmArea> {
        let mm = self.lock();
        mm.index.containing(addr).map(|id| mm.arena[id])
    }

    /// Translation of `va` in this space's context.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<(PhysicalAddress, MapFlags)> {
        self.lock().vspace.query(va)
    }

    /// First gap at or after `addr` with room for `size` bytes.
    #[must_use]
    pub fn get_unmapped_area(&self, addr: u64, size: u64) -> Option<VmArea> {
        self.first_from(addr, |a| a.is_gaps() && a.state == AreaState::NA && a.range.len() >= size)
    }

    /// First active area at or after `addr` of at least `size` bytes.
    #[must_use]
    pub fn get_mapped_area(&self, addr: u64, size: u64) -> Option<VmArea> {
        self.first_from(addr, |a| {
            matches!(a.state, AreaState::EA | AreaState::SA) && a.range.len() >= size
        })
    }

    fn first_from(&self, addr: u64, pred: impl Fn(&VmArea) -> bool) -> Option<VmArea> {
        let mm = self.lock();
        let mut cursor = mm.index.containing(addr).or_else(|| mm.index.after(addr));
        while let Some(id) = cursor {
            let area = &mm.arena[id];
            if pred(area) {
                return Some(*area);
            }
            cursor = area.next;
        }
        None
    }

    /// First area holding a page-aligned window of `size` bytes that starts
    /// inside `[start, end)`.
    #[must_use]
    pub fn find_vma_intersection(&self, start: u64, end: u64, size: u64) -> Option<VmArea> {
        if start >= end || size == 0 {
            return None;
        }
        let mm = self.lock();
        mm.index
            .overlapping(AddressRange::new(start, end))
            .find(|(r, _)| r.start.max(start).checked_add(size).is_some_and(|e| e <= r.end))
            .map(|(_, id)| mm.arena[id])
    }

    /// Change the protection of the active area covering exactly `range`.
    ///
    /// # Errors
    /// [`VmaError::InvalidArgs`] for an empty protection,
    /// [`VmaError::StateConflict`] unless the area is exclusively mapped.
    pub fn protect(&self, range: AddressRange, prot: MapFlags) -> Result<(), VmaError> {
        if !prot.is_accessible() {
            return Err(VmaError::InvalidArgs);
        }
        let mut mm = self.lock();
        let id = mm.find_exact(range)?;
        let area = mm.arena[id];
        if area.state != AreaState::EA || !area.is_mapped() {
            return Err(VmaError::StateConflict);
        }
        mm.vspace.protect(area.start(), area.pages(), prot)?;
        mm.arena[id].prot = prot;
        Ok(())
    }

    /// Snapshot of all areas in address order.
    #[must_use]
    pub fn areas(&self) -> Vec<VmArea> {
        self.lock().ordered().copied().collect()
    }

    /// Snapshot of the areas borrowed from other spaces.
    #[must_use]
    pub fn grants(&self) -> Vec<VmArea> {
        let mm = self.lock();
        mm.access.iter().map(|id| mm.arena[*id]).collect()
    }

    #[must_use]
    pub fn area_count(&self) -> usize {
        self.lock().arena.len()
    }

    /// Index, sibling list and arena agree, ranges are disjoint and every
    /// area's counters match its state.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.lock().is_consistent()
    }

    pub fn dump(&self) {
        let mm = self.lock();
        info!("mm {}: {} areas", self.id, mm.arena.len());
        for area in mm.ordered().filter(|a| !a.is_gaps()) {
            info!(
                "{}: [{:#x}, {:#x}) flags[{:#x}] stat[{}] attr[{}] prot[{}] users[{}] owners[{}]",
                area.title(),
                area.range.start,
                area.range.end,
                area.flags.into_bits(),
                area.state.as_str(),
                area.attr.as_str(),
                area.prot,
                area.users,
                area.owners
            );
        }
        mm.vspace.dump();
    }
}

impl<V: Vspace> core::fmt::Debug for AddressSpace<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}
