use kernel_memory_addresses::PhysicalAddress;
use kernel_pmm::{PhysicalMemory, PmmError, UsageClass};

/// Source of physical backing for areas created with the allocate sentinel.
pub trait FrameSource {
    /// Allocate `npages` and return the head address.
    ///
    /// # Errors
    /// Whatever the allocator reports.
    fn alloc_frames(&self, npages: u64, usage: UsageClass) -> Result<PhysicalAddress, PmmError>;

    /// Release the allocation headed by `pa`.
    ///
    /// # Errors
    /// Whatever the allocator reports.
    fn free_frames(&self, pa: PhysicalAddress) -> Result<u64, PmmError>;
}

impl FrameSource for PhysicalMemory {
    /// Prefers node 0; movable requests fall back to the other nodes.
    fn alloc_frames(&self, npages: u64, usage: UsageClass) -> Result<PhysicalAddress, PmmError> {
        self.alloc(0, npages, usage)
    }

    fn free_frames(&self, pa: PhysicalAddress) -> Result<u64, PmmError> {
        self.free(pa)
    }
}

impl<T: FrameSource + ?Sized> FrameSource for &T {
    fn alloc_frames(&self, npages: u64, usage: UsageClass) -> Result<PhysicalAddress, PmmError> {
        (**self).alloc_frames(npages, usage)
    }

    fn free_frames(&self, pa: PhysicalAddress) -> Result<u64, PmmError> {
        (**self).free_frames(pa)
    }
}
