//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses used by the paging and frame
//! allocation code.
//!
//! ## Overview
//!
//! | Type                | Meaning                                                  |
//! |---------------------|----------------------------------------------------------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO).         |
//! | [`VirtualAddress`]  | A byte address as seen through the translation unit.     |
//! | [`FrameIndex`]      | The number of a [`PAGE_SIZE`] frame of physical memory.  |
//!
//! All three are `#[repr(transparent)]` over `u64` and zero-cost. Keeping
//! them apart makes the two addressing views explicit: a page-table entry
//! stores a [`PhysicalAddress`], a table walk consumes a [`VirtualAddress`],
//! and the frame allocator counts in [`FrameIndex`] units.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_2042);
//! assert_eq!(pa.align_down(PAGE_SIZE).as_u64(), 0x0010_2000);
//! assert_eq!(pa.page_offset(), 0x42);
//!
//! let frame = FrameIndex::containing(pa);
//! assert_eq!(frame.as_u64(), 0x102);
//! assert_eq!(frame.base(), PhysicalAddress::new(0x0010_2000));
//!
//! let va = VirtualAddress::new(0xFFFF_FFFF_8000_1000);
//! assert!(va.is_aligned(PAGE_SIZE));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod frame_index;
mod physical_address;
mod virtual_address;

pub use frame_index::FrameIndex;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// log2 of the base page size.
pub const PAGE_SHIFT: u32 = 12;

/// Base page (and frame) size in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Rounds `value` down to a multiple of `align` (a power of two).
#[inline(always)]
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Rounds `value` up to a multiple of `align` (a power of two).
///
/// Returns `None` if the result does not fit into 64 bits.
#[inline(always)]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Whether `value` is a multiple of `align` (a power of two).
#[inline(always)]
#[must_use]
pub const fn is_aligned(value: u64, align: u64) -> bool {
    debug_assert!(align.is_power_of_two());
    value & (align - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_down(0x1fff, PAGE_SIZE), 0x1000);
        assert_eq!(align_up(0x1001, PAGE_SIZE), Some(0x2000));
        assert_eq!(align_up(0x1000, PAGE_SIZE), Some(0x1000));
        assert_eq!(align_up(u64::MAX, PAGE_SIZE), None);
        assert!(is_aligned(0x20_0000, 0x20_0000));
        assert!(!is_aligned(0x20_1000, 0x20_0000));
    }
}
