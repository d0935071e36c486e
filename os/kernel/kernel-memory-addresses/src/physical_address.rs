use crate::{FrameIndex, PAGE_SIZE};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Physical memory address.
///
/// Denotes host RAM or MMIO, i.e. what the hardware table walker reads and
/// what page-table entries point to. Never dereferenced directly; the paging
/// code goes through a `PhysMapper` to obtain a usable pointer.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, align: u64) -> bool {
        crate::is_aligned(self.0, align)
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self, align: u64) -> Self {
        Self(crate::align_down(self.0, align))
    }

    /// Rounds up to `align`; `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn align_up(self, align: u64) -> Option<Self> {
        match crate::align_up(self.0, align) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Offset of this address inside its base page.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_sub(self, rhs: u64) -> Option<Self> {
        match self.0.checked_sub(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// The frame this address falls into.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameIndex {
        FrameIndex::containing(self)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<PhysicalAddress> for u64 {
    #[inline]
    fn from(v: PhysicalAddress) -> Self {
        v.0
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

/// Distance in bytes between two physical addresses.
impl Sub<Self> for PhysicalAddress {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting() {
        let pa = PhysicalAddress::new(0x1000);
        assert_eq!(format!("{pa:?}"), "PA(0x0000000000001000)");
        assert_eq!(format!("{pa}"), "0x0000000000001000");
    }

    #[test]
    fn arithmetic() {
        let pa = PhysicalAddress::new(0x1234);
        assert_eq!(pa.page_offset(), 0x234);
        assert_eq!((pa + 0x10) - pa, 0x10);
        assert_eq!(pa.align_up(PAGE_SIZE), Some(PhysicalAddress::new(0x2000)));
        assert_eq!(PhysicalAddress::new(u64::MAX).checked_add(1), None);
        assert_eq!(PhysicalAddress::zero().checked_sub(1), None);
    }
}
