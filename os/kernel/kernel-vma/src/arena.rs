use crate::area::VmArea;
use alloc::vec::Vec;
use core::fmt;
use core::ops::{Index, IndexMut};

/// Handle of an area inside its address space's [`Arena`].
///
/// Handles are only meaningful for the address space that issued them and
/// may be reused once the area is deleted.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VmaId(u32);

impl VmaId {
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    const fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for VmaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vma#{}", self.0)
    }
}

/// Slab of area records addressed by [`VmaId`].
///
/// Tree and list links between areas are handles into this slab, so deleting
/// an area during a merge cannot leave a dangling link behind; a stale handle
/// panics on access.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    slots: Vec<Option<VmArea>>,
    vacant: Vec<u32>,
    live: usize,
}

impl Arena {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            live: 0,
        }
    }

    pub(crate) fn insert(&mut self, area: VmArea) -> VmaId {
        self.live += 1;
        if let Some(slot) = self.vacant.pop() {
            self.slots[slot as usize] = Some(area);
            return VmaId(slot);
        }
        self.slots.push(Some(area));
        VmaId((self.slots.len() - 1) as u32)
    }

    pub(crate) fn remove(&mut self, id: VmaId) -> VmArea {
        let Some(area) = self.slots.get_mut(id.slot()).and_then(Option::take) else {
            panic!("{id:?}: removing a vacant slot");
        };
        self.vacant.push(id.0);
        self.live -= 1;
        area
    }

    #[inline]
    pub(crate) fn get(&self, id: VmaId) -> Option<&VmArea> {
        self.slots.get(id.slot()).and_then(Option::as_ref)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: VmaId) -> Option<&mut VmArea> {
        self.slots.get_mut(id.slot()).and_then(Option::as_mut)
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (VmaId, &VmArea)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|a| (VmaId(i as u32), a)))
    }
}

impl Index<VmaId> for Arena {
    type Output = VmArea;

    fn index(&self, id: VmaId) -> &VmArea {
        match self.get(id) {
            Some(area) => area,
            None => panic!("{id:?}: stale area handle"),
        }
    }
}

impl IndexMut<VmaId> for Arena {
    fn index_mut(&mut self, id: VmaId) -> &mut VmArea {
        match self.get_mut(id) {
            Some(area) => area,
            None => panic!("{id:?}: stale area handle"),
        }
    }
}
