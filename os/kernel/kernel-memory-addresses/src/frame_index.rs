use crate::{PAGE_SHIFT, PhysicalAddress};
use core::fmt;

/// Number of a physical page frame, i.e. `address >> PAGE_SHIFT`.
///
/// The frame allocator stores these in its free-list descriptors.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameIndex(u64);

impl FrameIndex {
    #[inline]
    #[must_use]
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    /// The frame containing `pa`.
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u64() >> PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// First byte of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }
}

impl fmt::Debug for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:#x})", self.0)
    }
}

impl fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<PhysicalAddress> for FrameIndex {
    #[inline]
    fn from(pa: PhysicalAddress) -> Self {
        Self::containing(pa)
    }
}
