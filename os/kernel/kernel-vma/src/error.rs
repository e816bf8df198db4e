use kernel_pmm::PmmError;

/// Errors reported by a [`Vspace`](crate::Vspace) implementation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VspaceError {
    #[error("address outside of the translation context")]
    OutOfRange,
    #[error("page already mapped")]
    AlreadyMapped,
    #[error("page not mapped")]
    NotMapped,
    #[error("no memory for translation tables")]
    OutOfMemory,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmaError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("no such area or address space")]
    NotFound,
    #[error("address outside of the address space")]
    OutOfRange,
    /// The area's ownership state does not allow the transition.
    #[error("ownership state conflict")]
    StateConflict,
    #[error("area overlaps an existing area")]
    Collision,
    #[error("physical allocator: {0}")]
    Pmm(#[from] PmmError),
    #[error("translation context: {0}")]
    Vspace(#[from] VspaceError),
}
