use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Why a [`map`](crate::AddressSpace::map) or
/// [`unmap`](crate::AddressSpace::unmap) request was rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("address or size is not page aligned")]
    Unaligned,
    #[error("mapping size must not be zero")]
    EmptyRange,
    #[error("range wraps around the address space")]
    WrapsAround,
    #[error("virtual range is not canonical")]
    NonCanonical,
    #[error("out of memory while allocating a page table")]
    OutOfMemory,
    #[error("{virt} is mapped to {existing}, cannot remap to {requested}")]
    Conflict {
        virt: VirtualAddress,
        existing: PhysicalAddress,
        requested: PhysicalAddress,
    },
    #[error("range covers only part of the large page at {virt}")]
    SplitLargePage { virt: VirtualAddress },
}

impl MapError {
    /// Invariant violations are programming defects; only exhaustion is
    /// left to the caller's discretion.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::OutOfMemory)
    }
}
