use crate::error::VspaceError;
use crate::flags::MapFlags;
use kernel_memory_addresses::{AddressRange, PhysicalAddress, VirtualAddress};

/// Translation context of one address space (stage-1 or stage-2 tables).
///
/// The VMA graph never touches table memory itself; every change to the
/// hardware view goes through this trait. Implementations decide how tables
/// are allocated and how TLBs are maintained.
pub trait Vspace: Send {
    /// Addresses this context can translate.
    fn range(&self) -> AddressRange;

    /// Map `npages` contiguous pages starting at `pa` to `va`.
    ///
    /// # Errors
    /// [`VspaceError::AlreadyMapped`] if any target page is mapped.
    fn map(
        &mut self,
        pa: PhysicalAddress,
        va: VirtualAddress,
        npages: u64,
        flags: MapFlags,
    ) -> Result<(), VspaceError>;

    /// Map pages owned by another address space.
    ///
    /// Same contract as [`Self::map`]; implementations may track grants
    /// separately (e.g. to skip them on teardown).
    ///
    /// # Errors
    /// See [`Self::map`].
    fn grant(
        &mut self,
        pa: PhysicalAddress,
        va: VirtualAddress,
        npages: u64,
        flags: MapFlags,
    ) -> Result<(), VspaceError> {
        self.map(pa, va, npages, flags)
    }

    /// # Errors
    /// [`VspaceError::NotMapped`] if a page in the range is not mapped.
    fn unmap(&mut self, va: VirtualAddress, npages: u64) -> Result<(), VspaceError>;

    /// Replace the protection of mapped pages.
    ///
    /// # Errors
    /// [`VspaceError::NotMapped`] if a page in the range is not mapped.
    fn protect(&mut self, va: VirtualAddress, npages: u64, flags: MapFlags) -> Result<(), VspaceError>;

    /// Translate one address.
    fn query(&self, va: VirtualAddress) -> Option<(PhysicalAddress, MapFlags)>;

    /// Log the context's mappings.
    fn dump(&self) {}
}
