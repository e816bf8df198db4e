//! # VMA System Context
//!
//! [`VmSystem`] owns the registry of address spaces, the frame source used
//! for allocated backing, and the global exchange lock.
//!
//! ## Lock order
//!
//! 1. exchange lock (cross-space operations only, a FIFO ticket lock),
//! 2. address-space locks in ascending id order.
//!
//! Single-space operations take only their own address-space lock. The
//! registry lock is never held while an address-space lock is taken.

use crate::area::{Backing, VmArea};
use crate::arena::VmaId;
use crate::error::VmaError;
use crate::exchange::{self, GrantMode};
use crate::flags::{AddressSpaceKind, AreaAttr, AreaFlags, AreaState, MapFlags};
use crate::frame::FrameSource;
use crate::mm::{AddressSpace, MmId, MmInner, check_range};
use crate::transaction::{Operation, OwnerRequest, ProtTransaction};
use crate::vspace::Vspace;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_memory_addresses::AddressRange;
use kernel_sync::{SpinLock, SpinLockGuard, TicketLock};
use log::{debug, info, warn};

/// Address spaces locked in ascending id order.
struct Locked<'a, V> {
    guards: Vec<(MmId, SpinLockGuard<'a, MmInner<V>>)>,
}

impl<'a, V: Vspace> Locked<'a, V> {
    fn new(spaces: &'a [Arc<AddressSpace<V>>]) -> Self {
        let mut sorted: Vec<&'a Arc<AddressSpace<V>>> = spaces.iter().collect();
        sorted.sort_by_key(|s| s.id());
        sorted.dedup_by_key(|s| s.id());
        Self {
            guards: sorted.into_iter().map(|s| (s.id(), s.lock())).collect(),
        }
    }

    fn position(&self, id: MmId) -> usize {
        match self.guards.binary_search_by_key(&id, |(g, _)| *g) {
            Ok(i) => i,
            Err(_) => panic!("mm {id} is not locked"),
        }
    }

    fn get(&mut self, id: MmId) -> &mut MmInner<V> {
        let i = self.position(id);
        &mut *self.guards[i].1
    }

    fn pair(&mut self, a: MmId, b: MmId) -> (&mut MmInner<V>, &mut MmInner<V>) {
        let (ia, ib) = (self.position(a), self.position(b));
        assert_ne!(ia, ib, "pair of one address space");
        if ia < ib {
            let (lo, hi) = self.guards.split_at_mut(ib);
            (&mut *lo[ia].1, &mut *hi[0].1)
        } else {
            let (lo, hi) = self.guards.split_at_mut(ia);
            (&mut *hi[0].1, &mut *lo[ib].1)
        }
    }
}

/// Grant handed out while a dispatch is in flight; undone on failure.
struct Applied {
    borrower: MmId,
    grant: VmaId,
}

/// Registry of address spaces plus the shared exchange machinery.
pub struct VmSystem<V: Vspace, F: FrameSource> {
    frames: F,
    spaces: SpinLock<BTreeMap<MmId, Arc<AddressSpace<V>>>>,
    exchange: TicketLock<()>,
}

impl<V: Vspace, F: FrameSource> VmSystem<V, F> {
    #[must_use]
    pub const fn new(frames: F) -> Self {
        Self {
            frames,
            spaces: SpinLock::new(BTreeMap::new()),
            exchange: TicketLock::new(()),
        }
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &F {
        &self.frames
    }

    #[must_use]
    pub fn space(&self, id: MmId) -> Option<Arc<AddressSpace<V>>> {
        self.spaces.lock().get(&id).cloned()
    }

    #[must_use]
    pub fn space_ids(&self) -> Vec<MmId> {
        self.spaces.lock().keys().copied().collect()
    }

    fn lookup(&self, id: MmId) -> Result<Arc<AddressSpace<V>>, VmaError> {
        self.space(id).ok_or(VmaError::NotFound)
    }

    /// Register a new address space with a single root area.
    ///
    /// An empty `root` spans the whole translation context.
    ///
    /// # Errors
    /// [`VmaError::Collision`] if `id` is taken; see [`AddressSpace::new`].
    pub fn create_root(
        &self,
        id: MmId,
        kind: AddressSpaceKind,
        vspace: V,
        root: AddressRange,
        attr: AreaAttr,
    ) -> Result<Arc<AddressSpace<V>>, VmaError> {
        let space = Arc::new(AddressSpace::new(id, kind, vspace, root, attr)?);
        let mut spaces = self.spaces.lock();
        if spaces.contains_key(&id) {
            return Err(VmaError::Collision);
        }
        spaces.insert(id, Arc::clone(&space));
        Ok(space)
    }

    /// Back a non-`GAPS` root area with freshly allocated memory.
    ///
    /// # Errors
    /// [`VmaError::InvalidArgs`] for an empty `prot` or a `GAPS` root;
    /// [`VmaError::StateConflict`] if the space no longer has a single inactive
    /// area.
    pub fn create_root_mapping(&self, id: MmId, prot: MapFlags) -> Result<VmArea, VmaError> {
        if !prot.is_accessible() {
            return Err(VmaError::InvalidArgs);
        }
        let space = self.lookup(id)?;
        let mut mm = space.lock();
        let root = {
            let mut areas = mm.index.iter();
            let (Some((_, root)), None) = (areas.next(), areas.next()) else {
                return Err(VmaError::StateConflict);
            };
            root
        };
        if mm.arena[root].is_gaps() {
            return Err(VmaError::InvalidArgs);
        }
        if mm.arena[root].state != AreaState::NA {
            return Err(VmaError::StateConflict);
        }
        mm.map_area(root, prot, Backing::Allocate, &self.frames)?;
        Ok(mm.arena[root])
    }

    /// Tear down an address space and return its translation context.
    ///
    /// Every area is unmapped and allocated backing is freed.
    ///
    /// # Errors
    /// [`VmaError::NotFound`] for an unknown id; [`VmaError::StateConflict`]
    /// if the space is still referenced elsewhere, has lent or shared areas,
    /// or holds areas borrowed from another space.
    pub fn destroy_root(&self, id: MmId) -> Result<V, VmaError> {
        let _exchange = self.exchange.lock();
        let space = self.spaces.lock().remove(&id).ok_or(VmaError::NotFound)?;

        let busy = Arc::strong_count(&space) != 1 || {
            let mm = space.lock();
            mm.arena
                .iter()
                .any(|(_, a)| a.state.is_borrowed_out() || a.is_grant())
        };
        if busy {
            self.spaces.lock().insert(id, space);
            return Err(VmaError::StateConflict);
        }

        let space = match Arc::try_unwrap(space) {
            Ok(space) => space,
            Err(space) => {
                self.spaces.lock().insert(id, space);
                return Err(VmaError::StateConflict);
            }
        };
        {
            let mut mm = space.lock();
            let ids: Vec<VmaId> = mm.arena.iter().map(|(id, _)| id).collect();
            for area in ids {
                mm.destroy_mapping(area, &self.frames)?;
            }
            info!("mm {id}: destroyed {} areas", mm.arena.len());
        }
        Ok(space.into_vspace())
    }

    /// Handle a memory hypercall issued by `owner`.
    ///
    /// The owner range is validated against the owner's address space before
    /// any area is touched. For exchange operations every access entry is
    /// validated up front; if applying a later entry fails, the grants
    /// already handed out are withdrawn and the owner area created for the
    /// call is destroyed again.
    ///
    /// # Errors
    /// [`VmaError::InvalidArgs`] for an operation that cannot be dispatched,
    /// a misaligned or empty range or a malformed entry;
    /// [`VmaError::OutOfRange`] for ranges outside an address space;
    /// [`VmaError::NotFound`] for unknown address spaces; plus whatever the
    /// operation itself reports.
    pub fn dispatch(&self, op: Operation, owner: MmId, txn: &ProtTransaction) -> Result<(), VmaError> {
        if !op.is_dispatchable() || txn.owner_id != owner {
            return Err(VmaError::InvalidArgs);
        }
        let space = self.lookup(owner)?;
        let req = txn.owner_request()?;
        if !space.range().contains_range(&req.range) {
            return Err(VmaError::OutOfRange);
        }
        check_range(req.range)?;
        debug!("mm {owner}: {op:?} {}", req.range);

        match op {
            Operation::Create => space.split(req.range, req.attr, req.flags).map(|_| ()),
            Operation::CreateMap => {
                if req.attr == AreaAttr::Gaps {
                    return Err(VmaError::InvalidArgs);
                }
                space
                    .create_map(req.range, req.attr, req.flags, req.prot, req.backing, &self.frames)
                    .map(|_| ())
            }
            Operation::Destroy => space.destroy(req.range, &self.frames),
            Operation::Relinquish => self.relinquish(owner, req.range.start),
            _ if op.is_exchange() => self.apply_exchange(op, &space, &req, txn),
            _ => Err(VmaError::InvalidArgs),
        }
    }

    fn apply_exchange(
        &self,
        op: Operation,
        owner: &Arc<AddressSpace<V>>,
        req: &OwnerRequest,
        txn: &ProtTransaction,
    ) -> Result<(), VmaError> {
        if txn.access.is_empty() || (op == Operation::Donate && txn.access.len() != 1) {
            return Err(VmaError::InvalidArgs);
        }

        let mut involved = Vec::with_capacity(txn.access.len() + 1);
        involved.push(Arc::clone(owner));
        let mut targets = Vec::with_capacity(txn.access.len());
        for entry in &txn.access {
            if entry.borrower == owner.id() {
                return Err(VmaError::InvalidArgs);
            }
            let borrower = self.lookup(entry.borrower)?;
            let target = entry.target()?;
            check_range(target)?;
            if !borrower.range().contains_range(&target) {
                return Err(VmaError::OutOfRange);
            }
            if target.len() != req.range.len() {
                return Err(VmaError::InvalidArgs);
            }
            targets.push(target);
            involved.push(borrower);
        }

        let _exchange = self.exchange.lock();
        let mut locked = Locked::new(&involved);

        let regrant = {
            let mm = locked.get(owner.id());
            mm.find_exact(req.range)
                .is_ok_and(|id| mm.arena[id].state.is_borrowed_out())
        };
        let created = if op == Operation::Donate || regrant {
            None
        } else {
            let mm = locked.get(owner.id());
            let (id, ancestor) = mm.split_map(req.range, req.attr, req.flags, req.prot, req.backing, &self.frames)?;
            ancestor.map(|ancestor| (id, ancestor))
        };

        let area = locked.get(owner.id()).find_exact(req.range)?;
        let mut applied: Vec<Applied> = Vec::with_capacity(targets.len());
        for (entry, target) in txn.access.iter().zip(targets) {
            let (lender, borrower) = locked.pair(owner.id(), entry.borrower);
            let owned = lender.arena[area];
            let flags = owned.flags.with_id(entry.borrower);
            let prot = owned.prot.with_rights(entry.rights());
            let res = match op {
                Operation::Donate => exchange::donate(lender, area, borrower, target, flags, prot),
                Operation::Lend => {
                    exchange::grant(GrantMode::Lend, lender, owner.id(), area, borrower, target, flags, prot)
                }
                _ => exchange::grant(GrantMode::Share, lender, owner.id(), area, borrower, target, flags, prot),
            };
            match res {
                Ok(grant) => applied.push(Applied {
                    borrower: entry.borrower,
                    grant,
                }),
                Err(e) => {
                    warn!("mm {}: {op:?} to mm {} failed: {e}", owner.id(), entry.borrower);
                    Self::roll_back(&mut locked, owner.id(), &applied);
                    if let Some((id, ancestor)) = created {
                        let mm = locked.get(owner.id());
                        match mm.destroy_mapping(id, &self.frames) {
                            Ok(()) => mm.unsplit(&ancestor),
                            Err(undo) => warn!("mm {}: cannot undo area {}: {undo}", owner.id(), req.range),
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn roll_back(locked: &mut Locked<'_, V>, owner: MmId, applied: &[Applied]) {
        for a in applied.iter().rev() {
            let (borrower, lender) = locked.pair(a.borrower, owner);
            if let Err(e) = exchange::relinquish(borrower, a.grant, lender) {
                warn!("mm {}: cannot withdraw grant: {e}", a.borrower);
            }
        }
    }

    /// Exclusively move the area covering `range` in `owner` to `target` in
    /// `borrower`.
    ///
    /// # Errors
    /// [`VmaError::StateConflict`] unless the area is exclusively mapped;
    /// [`VmaError::InvalidArgs`] for size mismatches.
    pub fn donate(
        &self,
        owner: MmId,
        range: AddressRange,
        borrower: MmId,
        target: AddressRange,
        prot: MapFlags,
    ) -> Result<VmArea, VmaError> {
        self.transfer(owner, range, borrower, target, |lender, area, borrower_mm, flags| {
            exchange::donate(lender, area, borrower_mm, target, flags, prot)
        })
    }

    /// Lend (`GrantMode::Lend`) or share (`GrantMode::Share`) the area
    /// covering `range` in `owner` at `target` in `borrower`.
    ///
    /// # Errors
    /// [`VmaError::StateConflict`] if the area's state does not allow the
    /// grant; [`VmaError::InvalidArgs`] for size mismatches.
    pub fn grant(
        &self,
        mode: GrantMode,
        owner: MmId,
        range: AddressRange,
        borrower: MmId,
        target: AddressRange,
        prot: MapFlags,
    ) -> Result<VmArea, VmaError> {
        self.transfer(owner, range, borrower, target, |lender, area, borrower_mm, flags| {
            exchange::grant(mode, lender, owner, area, borrower_mm, target, flags, prot)
        })
    }

    fn transfer(
        &self,
        owner: MmId,
        range: AddressRange,
        borrower: MmId,
        target: AddressRange,
        apply: impl FnOnce(&mut MmInner<V>, VmaId, &mut MmInner<V>, AreaFlags) -> Result<VmaId, VmaError>,
    ) -> Result<VmArea, VmaError> {
        if owner == borrower {
            return Err(VmaError::InvalidArgs);
        }
        check_range(target)?;
        let spaces = [self.lookup(owner)?, self.lookup(borrower)?];
        if !spaces[1].range().contains_range(&target) {
            return Err(VmaError::OutOfRange);
        }

        let _exchange = self.exchange.lock();
        let mut locked = Locked::new(&spaces);
        let (lender, borrower_mm) = locked.pair(owner, borrower);
        let area = lender.find_exact(range)?;
        let flags = lender.arena[area].flags.with_id(borrower);
        let given = apply(lender, area, borrower_mm, flags)?;
        Ok(borrower_mm.arena[given])
    }

    /// Give back the borrowed area of `borrower` containing `addr`.
    ///
    /// # Errors
    /// [`VmaError::NotFound`] if `borrower` holds no grant at `addr`;
    /// [`VmaError::InvalidArgs`] if the grant is not active.
    pub fn relinquish(&self, borrower: MmId, addr: u64) -> Result<(), VmaError> {
        let space = self.lookup(borrower)?;
        let _exchange = self.exchange.lock();

        let (grant, link) = {
            let mm = space.lock();
            let grant = mm.access_find(addr).ok_or(VmaError::NotFound)?;
            let area = &mm.arena[grant];
            if area.state != AreaState::EA {
                return Err(VmaError::InvalidArgs);
            }
            (grant, area.parent.ok_or(VmaError::InvalidArgs)?)
        };

        let spaces = [space, self.lookup(link.mm)?];
        let mut locked = Locked::new(&spaces);
        let (borrower_mm, lender) = locked.pair(borrower, link.mm);
        exchange::relinquish(borrower_mm, grant, lender)
    }

    pub fn dump(&self) {
        let spaces: Vec<Arc<AddressSpace<V>>> = self.spaces.lock().values().cloned().collect();
        for space in spaces {
            space.dump();
        }
    }
}

impl<V: Vspace, F: FrameSource> core::fmt::Debug for VmSystem<V, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VmSystem")
            .field("spaces", &self.space_ids())
            .finish_non_exhaustive()
    }
}
