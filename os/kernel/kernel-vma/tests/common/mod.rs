#![allow(dead_code, clippy::must_use_candidate, clippy::missing_panics_doc)]

use std::collections::BTreeMap;
use std::ops::Range;

use kernel_info::boot::BootMemoryInfo;
use kernel_memory_addresses::{AddressRange, PAGE_MASK, PAGE_SHIFT, PhysicalAddress, VirtualAddress};
use kernel_pmm::PhysicalMemory;
use kernel_vma::{AddressSpaceKind, AreaAttr, MapFlags, MemAttr, MmId, VmSystem, Vspace, VspaceError};

/// Translation range of every test address space.
pub const SPACE: AddressRange = AddressRange::new(0, 0x100_0000);

/// Page table kept as a map from page number to translation.
#[derive(Debug)]
pub struct TableDouble {
    range: AddressRange,
    pages: BTreeMap<u64, (PhysicalAddress, MapFlags)>,
    granted: u64,
}

impl TableDouble {
    pub const fn new(range: AddressRange) -> Self {
        Self {
            range,
            pages: BTreeMap::new(),
            granted: 0,
        }
    }

    fn span(&self, va: VirtualAddress, npages: u64) -> Result<Range<u64>, VspaceError> {
        let start = va.as_u64();
        let end = start
            .checked_add(npages << PAGE_SHIFT)
            .ok_or(VspaceError::OutOfRange)?;
        if !self.range.contains_range(&AddressRange::new(start, end)) {
            return Err(VspaceError::OutOfRange);
        }
        Ok((start >> PAGE_SHIFT)..(end >> PAGE_SHIFT))
    }

    fn all_mapped(&self, pages: &Range<u64>) -> bool {
        pages.clone().all(|p| self.pages.contains_key(&p))
    }
}

impl Vspace for TableDouble {
    fn range(&self) -> AddressRange {
        self.range
    }

    fn map(
        &mut self,
        pa: PhysicalAddress,
        va: VirtualAddress,
        npages: u64,
        flags: MapFlags,
    ) -> Result<(), VspaceError> {
        let pages = self.span(va, npages)?;
        if pages.clone().any(|p| self.pages.contains_key(&p)) {
            return Err(VspaceError::AlreadyMapped);
        }
        for (i, page) in pages.enumerate() {
            self.pages.insert(page, (pa + ((i as u64) << PAGE_SHIFT), flags));
        }
        Ok(())
    }

    fn grant(
        &mut self,
        pa: PhysicalAddress,
        va: VirtualAddress,
        npages: u64,
        flags: MapFlags,
    ) -> Result<(), VspaceError> {
        self.map(pa, va, npages, flags)?;
        self.granted += npages;
        Ok(())
    }

    fn unmap(&mut self, va: VirtualAddress, npages: u64) -> Result<(), VspaceError> {
        let pages = self.span(va, npages)?;
        if !self.all_mapped(&pages) {
            return Err(VspaceError::NotMapped);
        }
        for page in pages {
            self.pages.remove(&page);
        }
        Ok(())
    }

    fn protect(&mut self, va: VirtualAddress, npages: u64, flags: MapFlags) -> Result<(), VspaceError> {
        let pages = self.span(va, npages)?;
        if !self.all_mapped(&pages) {
            return Err(VspaceError::NotMapped);
        }
        for page in pages {
            if let Some(entry) = self.pages.get_mut(&page) {
                entry.1 = flags;
            }
        }
        Ok(())
    }

    fn query(&self, va: VirtualAddress) -> Option<(PhysicalAddress, MapFlags)> {
        let addr = va.as_u64();
        self.pages
            .get(&(addr >> PAGE_SHIFT))
            .map(|(pa, flags)| (*pa + (addr & PAGE_MASK), *flags))
    }
}

pub type System = VmSystem<TableDouble, PhysicalMemory>;

/// A system with one guest address space per id, each a single `GAPS` root.
pub fn system(ids: &[MmId]) -> System {
    let sys = VmSystem::new(PhysicalMemory::from_boot_info(&BootMemoryInfo::default()).unwrap());
    for &id in ids {
        sys.create_root(
            id,
            AddressSpaceKind::Guest,
            TableDouble::new(SPACE),
            AddressRange::default(),
            AreaAttr::Gaps,
        )
        .unwrap();
    }
    sys
}

pub const fn range(start: u64, len: u64) -> AddressRange {
    AddressRange::new(start, start + len)
}

pub const fn rw() -> MapFlags {
    MapFlags::new()
        .with_read(true)
        .with_write(true)
        .with_mem_attr(MemAttr::Normal)
}

pub const fn ro() -> MapFlags {
    rw().with_write(false)
}

pub const fn va(addr: u64) -> VirtualAddress {
    VirtualAddress::new(addr)
}
