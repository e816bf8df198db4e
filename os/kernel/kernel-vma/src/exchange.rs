//! # Ownership Exchange
//!
//! Moves and grants between two address spaces. Every function here runs
//! with the global exchange lock held and both spaces locked, so a transfer
//! is never observable half-done.
//!
//! | Verb        | Owner area after | Borrower area       |
//! |-------------|------------------|---------------------|
//! | donate      | merged into GAPS | `EA`, sole owner    |
//! | lend        | `LA`, unmapped   | `EA` grant          |
//! | share       | `SA`, mapped     | `EA` grant          |
//! | relinquish  | `EA` at last one | removed, merged     |

use crate::area::{AreaLink, VmArea};
use crate::arena::VmaId;
use crate::error::VmaError;
use crate::flags::{AreaAttr, AreaFlags, AreaState, MapFlags};
use crate::mm::{MmId, MmInner};
use crate::vspace::Vspace;
use kernel_memory_addresses::{AddressRange, PhysicalAddress};
use log::{debug, warn};

/// How a grant treats the owner's own mapping.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GrantMode {
    /// Exclusive access moves to the borrowers until they relinquish.
    Lend,
    /// Owner and borrowers access the pages concurrently.
    Share,
}

impl GrantMode {
    #[must_use]
    pub const fn state(self) -> AreaState {
        match self {
            Self::Lend => AreaState::LA,
            Self::Share => AreaState::SA,
        }
    }
}

impl<V: Vspace> MmInner<V> {
    /// Install a new area for `target` in this space.
    ///
    /// Without an area at `target` a fresh one is created (unless `flags`
    /// marks the request global) and coalesced with friendly neighbours.
    /// An inactive area covering `target` is split and the piece activated.
    pub(crate) fn expand(
        &mut self,
        target: AddressRange,
        attr: AreaAttr,
        flags: AreaFlags,
        prot: MapFlags,
        pa: PhysicalAddress,
        link: Option<AreaLink>,
    ) -> Result<VmaId, VmaError> {
        let Some(found) = self.index.find(target)? else {
            if flags.global() {
                return Err(VmaError::NotFound);
            }
            let id = self.insert(VmArea::new(target, attr, flags))?;
            if let Err(e) = self.install(id, prot, pa, link) {
                self.unlink(id);
                return Err(e);
            }
            return Ok(if link.is_none() { self.coalesce(id) } else { id });
        };

        let before = self.arena[found];
        if before.state != AreaState::NA {
            debug!("expand {target}: {} area in the way", before.state.as_str());
            return Err(VmaError::StateConflict);
        }
        let piece = self.split(target, attr, flags)?;
        if let Err(e) = self.install(piece, prot, pa, link) {
            self.unsplit(&before);
            return Err(e);
        }
        Ok(piece)
    }

    fn install(&mut self, id: VmaId, prot: MapFlags, pa: PhysicalAddress, link: Option<AreaLink>) -> Result<(), VmaError> {
        if !prot.is_accessible() {
            return Err(VmaError::InvalidArgs);
        }
        let area = self.arena[id];
        match link {
            Some(_) => self.vspace.grant(pa, area.start(), area.pages(), prot)?,
            None => self.vspace.map(pa, area.start(), area.pages(), prot)?,
        }
        let a = &mut self.arena[id];
        a.state = AreaState::EA;
        a.prot = prot;
        a.backing = Some(pa);
        a.parent = link;
        Ok(())
    }

    /// Merge a freshly created area with friendly neighbours, higher first.
    fn coalesce(&mut self, id: VmaId) -> VmaId {
        let mut id = id;
        let end = self.arena[id].range.end;
        if let Some(hi) = self.index.starting_at(end).filter(|hi| self.is_friend(id, *hi)) {
            let absorbed = self.unlink(hi);
            let area = &mut self.arena[id];
            area.range.end = absorbed.range.end;
            self.index.set_end(area.range.start, absorbed.range.end);
        }
        let start = self.arena[id].range.start;
        if let Some(lo) = self.index.ending_at(start).filter(|lo| self.is_friend(*lo, id)) {
            let absorbed = self.unlink(id);
            let area = &mut self.arena[lo];
            area.range.end = absorbed.range.end;
            self.index.set_end(area.range.start, absorbed.range.end);
            id = lo;
        }
        id
    }

    /// Whether `lo` and the adjacent `hi` describe one contiguous mapping.
    fn is_friend(&self, lo: VmaId, hi: VmaId) -> bool {
        let (a, b) = (&self.arena[lo], &self.arena[hi]);
        let plain = |x: &VmArea| {
            !x.is_gaps()
                && !x.is_grant()
                && !x.flags.alloc()
                && x.users == 0
                && matches!(x.state, AreaState::NA | AreaState::EA)
        };
        let contiguous = match (a.backing, b.backing) {
            (Some(base), Some(next_base)) => base.as_u64() + a.range.len() == next_base.as_u64(),
            (None, None) => true,
            _ => false,
        };
        plain(a)
            && plain(b)
            && a.range.end == b.range.start
            && a.attr == b.attr
            && a.state == b.state
            && a.prot == b.prot
            && a.flags == b.flags
            && contiguous
    }

    /// Withdraw a borrowed area: unmap it and merge it into its gaps.
    pub(crate) fn drop_grant(&mut self, id: VmaId) -> Result<(), VmaError> {
        let area = self.arena[id];
        if area.is_mapped() {
            self.vspace.unmap(area.start(), area.pages())?;
        }
        self.access.retain(|a| *a != id);
        self.arena[id].reset();
        self.merge(id);
        Ok(())
    }
}

/// Move the exclusively owned `area` of `lender` to `target` in `borrower`.
///
/// The lender's area is unmapped and merged back into its gaps; the
/// borrower's new area owns the pages, including the duty to free allocated
/// backing.
pub(crate) fn donate<V: Vspace>(
    lender: &mut MmInner<V>,
    area: VmaId,
    borrower: &mut MmInner<V>,
    target: AddressRange,
    flags: AreaFlags,
    prot: MapFlags,
) -> Result<VmaId, VmaError> {
    let owned = lender.arena.get(area).copied().ok_or(VmaError::NotFound)?;
    if owned.state != AreaState::EA || owned.owners != 1 || owned.users != 0 || owned.is_grant() {
        return Err(VmaError::StateConflict);
    }
    if owned.range.len() != target.len() {
        return Err(VmaError::InvalidArgs);
    }
    let pa = owned.backing.ok_or(VmaError::StateConflict)?;

    lender.vspace.unmap(owned.start(), owned.pages())?;
    let flags = flags
        .with_alloc(owned.flags.alloc())
        .with_reserved(owned.flags.reserved());
    let given = match borrower.expand(target, owned.attr, flags, prot, pa, None) {
        Ok(id) => id,
        Err(e) => {
            if let Err(restore) = lender.vspace.map(pa, owned.start(), owned.pages(), owned.prot) {
                warn!("donate {}: cannot restore owner mapping: {restore}", owned.range);
            }
            return Err(e);
        }
    };

    lender.arena[area].reset();
    lender.merge(area);
    debug!("donated {} -> {target}", owned.range);
    Ok(given)
}

/// Lend or share `area` of `lender` (space `lender_mm`) at `target` in
/// `borrower`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn grant<V: Vspace>(
    mode: GrantMode,
    lender: &mut MmInner<V>,
    lender_mm: MmId,
    area: VmaId,
    borrower: &mut MmInner<V>,
    target: AddressRange,
    flags: AreaFlags,
    prot: MapFlags,
) -> Result<VmaId, VmaError> {
    let owned = lender.arena.get(area).copied().ok_or(VmaError::NotFound)?;
    let allowed = owned.state == AreaState::EA || owned.state == mode.state();
    if !allowed || owned.is_grant() || owned.is_gaps() {
        return Err(VmaError::StateConflict);
    }
    if owned.range.len() != target.len() {
        return Err(VmaError::InvalidArgs);
    }
    let pa = owned.backing.ok_or(VmaError::StateConflict)?;

    let link = AreaLink { mm: lender_mm, vma: area };
    let child = borrower.expand(target, owned.attr, flags.with_alloc(false), prot, pa, Some(link))?;
    borrower.access_insert(child);

    if mode == GrantMode::Lend
        && owned.is_mapped()
        && let Err(e) = lender.vspace.unmap(owned.start(), owned.pages())
    {
        borrower.drop_grant(child)?;
        return Err(e.into());
    }
    let a = &mut lender.arena[area];
    a.users += 1;
    a.state = mode.state();
    debug!("{mode:?} {} -> {target}, {} users", owned.range, a.users);
    Ok(child)
}

/// Return the borrowed area `child` of `borrower` to `lender`.
///
/// When the last borrower leaves, a lent area is mapped for its owner again
/// and the owner's area becomes exclusive.
pub(crate) fn relinquish<V: Vspace>(
    borrower: &mut MmInner<V>,
    child: VmaId,
    lender: &mut MmInner<V>,
) -> Result<(), VmaError> {
    let borrowed = borrower.arena.get(child).copied().ok_or(VmaError::NotFound)?;
    let link = borrowed.parent.ok_or(VmaError::InvalidArgs)?;
    let owned = lender.arena.get(link.vma).copied().ok_or(VmaError::NotFound)?;
    if owned.users == 0 || !owned.state.is_borrowed_out() {
        return Err(VmaError::StateConflict);
    }

    if borrowed.is_mapped() {
        borrower.vspace.unmap(borrowed.start(), borrowed.pages())?;
    }
    if owned.users == 1
        && owned.state == AreaState::LA
        && let Some(pa) = owned.backing
        && let Err(e) = lender.vspace.map(pa, owned.start(), owned.pages(), owned.prot)
    {
        if let Some(granted) = borrowed.backing
            && let Err(restore) = borrower.vspace.grant(granted, borrowed.start(), borrowed.pages(), borrowed.prot)
        {
            warn!("relinquish {}: grant lost: {restore}", borrowed.range);
        }
        return Err(e.into());
    }

    let a = &mut lender.arena[link.vma];
    a.users -= 1;
    if a.users == 0 {
        a.state = AreaState::EA;
    }
    borrower.access.retain(|id| *id != child);
    borrower.arena[child].reset();
    borrower.merge(child);
    debug!("relinquished {} back to {}", borrowed.range, owned.range);
    Ok(())
}
