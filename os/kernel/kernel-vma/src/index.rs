use crate::arena::VmaId;
use crate::error::VmaError;
use alloc::collections::BTreeMap;
use kernel_memory_addresses::AddressRange;

/// Address-ordered index of non-overlapping ranges.
///
/// Keyed by range start. Since ranges never overlap, the entry containing an
/// address is always the nearest entry starting at or below it.
#[derive(Debug, Default)]
pub(crate) struct IntervalIndex {
    by_start: BTreeMap<u64, (u64, VmaId)>,
}

impl IntervalIndex {
    pub(crate) const fn new() -> Self {
        Self {
            by_start: BTreeMap::new(),
        }
    }

    /// # Errors
    /// [`VmaError::Collision`] if `range` overlaps an indexed range.
    pub(crate) fn insert(&mut self, range: AddressRange, id: VmaId) -> Result<(), VmaError> {
        if range.is_empty() {
            return Err(VmaError::InvalidArgs);
        }
        if self.overlapping(range).next().is_some() {
            return Err(VmaError::Collision);
        }
        self.by_start.insert(range.start, (range.end, id));
        Ok(())
    }

    pub(crate) fn remove(&mut self, start: u64) -> Option<VmaId> {
        self.by_start.remove(&start).map(|(_, id)| id)
    }

    /// Move the end of the range starting at `start`.
    pub(crate) fn set_end(&mut self, start: u64, end: u64) {
        match self.by_start.get_mut(&start) {
            Some(entry) => entry.0 = end,
            None => panic!("no indexed range starts at {start:#x}"),
        }
    }

    /// Move the start of the range starting at `old`.
    pub(crate) fn set_start(&mut self, old: u64, new: u64) {
        let Some(entry) = self.by_start.remove(&old) else {
            panic!("no indexed range starts at {old:#x}");
        };
        self.by_start.insert(new, entry);
    }

    /// Entry containing `addr`.
    pub(crate) fn containing(&self, addr: u64) -> Option<VmaId> {
        self.by_start
            .range(..=addr)
            .next_back()
            .filter(|(_, (end, _))| addr < *end)
            .map(|(_, (_, id))| *id)
    }

    /// Entry containing all of `range`.
    ///
    /// # Errors
    /// [`VmaError::InvalidArgs`] if `range` straddles an entry boundary.
    pub(crate) fn find(&self, range: AddressRange) -> Result<Option<VmaId>, VmaError> {
        let mut hits = self.overlapping(range);
        match (hits.next(), hits.next()) {
            (None, _) => Ok(None),
            (Some((r, id)), None) if r.contains_range(&range) => Ok(Some(id)),
            _ => Err(VmaError::InvalidArgs),
        }
    }

    /// Entries intersecting `range`, in address order.
    pub(crate) fn overlapping(&self, range: AddressRange) -> impl Iterator<Item = (AddressRange, VmaId)> + '_ {
        let first = self
            .by_start
            .range(..=range.start)
            .next_back()
            .filter(|(_, (end, _))| range.start < *end)
            .map_or(range.start, |(start, _)| *start);
        self.by_start
            .range(first..range.end.max(first))
            .map(|(start, (end, id))| (AddressRange::new(*start, *end), *id))
    }

    /// Entry ending exactly at `addr`.
    pub(crate) fn ending_at(&self, addr: u64) -> Option<VmaId> {
        self.by_start
            .range(..addr)
            .next_back()
            .filter(|(_, (end, _))| *end == addr)
            .map(|(_, (_, id))| *id)
    }

    /// Entry starting exactly at `addr`.
    pub(crate) fn starting_at(&self, addr: u64) -> Option<VmaId> {
        self.by_start.get(&addr).map(|(_, id)| *id)
    }

    /// Nearest entry starting below `addr`.
    pub(crate) fn before(&self, addr: u64) -> Option<VmaId> {
        self.by_start.range(..addr).next_back().map(|(_, (_, id))| *id)
    }

    /// Nearest entry starting above `addr`.
    pub(crate) fn after(&self, addr: u64) -> Option<VmaId> {
        self.by_start
            .range(addr.saturating_add(1)..)
            .next()
            .filter(|(start, _)| **start > addr)
            .map(|(_, (_, id))| *id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (AddressRange, VmaId)> + '_ {
        self.by_start
            .iter()
            .map(|(start, (end, id))| (AddressRange::new(*start, *end), *id))
    }

    pub(crate) fn len(&self) -> usize {
        self.by_start.len()
    }
}
