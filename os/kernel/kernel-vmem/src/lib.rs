//! # Virtual Memory Support
//!
//! Level-parametric paging for the kernel: page-table entries, the table
//! walker behind [`AddressSpace`], and the one-time [`bootstrap`] sequence
//! that switches the CPU onto the kernel's own tables.
//!
//! ## What you get
//! - [`PageTableEntry`], the x86 long-mode entry format, and the
//!   [`MapAttributes`] a caller may request.
//! - [`PagingLayout`], the address-bits-per-level table consumed by the walker.
//! - A 4 KiB-aligned [`PageTable`].
//! - [`AddressSpace`]: map, unmap and translate in either direction.
//! - The allocator and resolution interfaces ([`FrameAlloc`], [`PhysMapper`]).
//! - [`bootstrap::Bootstrap`], fix-up and activation of the kernel tables.
//!
//! ## Virtual Address → Physical Address Walk
//!
//! With [`PagingLayout::X86_64_4LEVEL`] a 48-bit virtual address is divided
//! into five fields:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L0   |  L1   |  L2   |  L3   | Offset |
//! ```
//!
//! Each field indexes one table level, starting at the root:
//!
//! ```text
//!  L0  →  L1  →  L2  →  L3  →  Physical Page
//!   │      │      │      │
//!   │      │      │      └───► leaf entry              → maps 4 KiB page
//!   │      │      └──────────► large entry (if allowed) → maps 2 MiB page
//!   │      └─────────────────► large entry (if allowed) → maps 1 GiB page
//!   └────────────────────────► root entry, always points to a table
//! ```
//!
//! Other layouts only change the number of fields and their widths; see
//! [`layout`].
//!
//! ### Leaf vs. non-leaf entries
//!
//! - A **leaf entry** maps physical memory directly: every entry on the last
//!   level, and an entry with the `large_page` bit above it.
//! - A **non-leaf entry** points to the next lower table and continues the walk.
//!
//! Permissions intersect along the walk, so a page is only writable if every
//! entry leading to it is writable.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
pub mod bootstrap;
pub mod entry;
pub mod layout;
pub mod page_table;
pub mod phys_mapper;

pub use crate::address_space::{AddressSpace, MapError, Mapping};
pub use crate::entry::{EntryFlags, MapAttributes, PageTableEntry};
pub use crate::layout::PagingLayout;
pub use crate::page_table::PageTable;
pub use crate::phys_mapper::{HhdmPhysMapper, IdentityMapper, PhysMapper};
pub use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Source of physical frames for new page tables.
///
/// Returned frames must be page aligned and reachable through the
/// [`PhysMapper`] of the address space they are used for. `None` means the
/// source is exhausted.
pub trait FrameAlloc {
    fn allocate_frame(&mut self) -> Option<PhysicalAddress>;
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &mut A {
    #[inline]
    fn allocate_frame(&mut self) -> Option<PhysicalAddress> {
        (**self).allocate_frame()
    }
}
