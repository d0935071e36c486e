//! # Address Resolution Strategies
//!
//! Every access the paging code makes to a table frame, and every access the
//! frame allocator makes to a free-list descriptor, goes through a
//! [`PhysMapper`]. Which strategy is valid depends on the translation state:
//!
//! | Strategy           | Valid while                          | Physical `pa` is reached at |
//! |--------------------|--------------------------------------|-----------------------------|
//! | [`IdentityMapper`] | before the kernel tables are active  | `pa`                        |
//! | [`HhdmPhysMapper`] | after activation                     | `HHDM_BASE + pa`            |
//!
//! With the direct map in place the hardware performs the table walk on every
//! dereference, so the two strategies are the only place where the addressing
//! mode is decided.

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::PhysicalAddress;

/// Converts physical addresses into pointers usable in the current
/// addressing mode.
pub trait PhysMapper {
    /// Pointer through which `pa` is reachable right now.
    fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T;

    /// Borrow the `T` stored at `pa`.
    ///
    /// # Safety
    /// - `pa` must be reachable (and writable) through this strategy.
    /// - The bytes at `pa` must be a valid `T` and not aliased for `'a`.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_ptr::<T>(pa) }
    }

    /// Borrow `len` consecutive `T` starting at `pa`.
    ///
    /// # Safety
    /// As for [`phys_to_mut`](Self::phys_to_mut), for the whole range.
    #[inline]
    unsafe fn phys_to_slice<'a, T>(&self, pa: PhysicalAddress, len: usize) -> &'a [T] {
        unsafe { core::slice::from_raw_parts(self.phys_to_ptr::<T>(pa), len) }
    }
}

impl<M: PhysMapper> PhysMapper for &M {
    #[inline]
    fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        (**self).phys_to_ptr(pa)
    }
}

/// Physical memory is directly addressable.
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    #[inline]
    fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        core::ptr::with_exposed_provenance_mut(usize_of(pa.as_u64()))
    }
}

/// Physical memory is reached through the higher-half direct map.
#[derive(Copy, Clone, Debug, Default)]
pub struct HhdmPhysMapper;

impl PhysMapper for HhdmPhysMapper {
    #[inline]
    fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        core::ptr::with_exposed_provenance_mut(usize_of(HHDM_BASE + pa.as_u64()))
    }
}

#[inline(always)]
#[allow(clippy::cast_possible_truncation)]
const fn usize_of(v: u64) -> usize {
    v as usize
}
