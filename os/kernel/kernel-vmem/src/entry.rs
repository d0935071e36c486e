//! # Page Table Entry
//!
//! One machine word per entry, in the x86 long-mode layout. The same format
//! is used at every level of every [`PagingLayout`](crate::PagingLayout); the
//! level only decides whether an entry is a table pointer, a large-page leaf,
//! or a base-page leaf.
//!
//! | Bits   | Field            | Meaning                                      |
//! |--------|------------------|----------------------------------------------|
//! | 0      | `present`        | Entry is valid                               |
//! | 1      | `writable`       | Writes allowed                               |
//! | 2      | `user`           | User-mode access allowed                     |
//! | 3      | `write_through`  | Write-through caching hint                   |
//! | 4      | `cache_disable`  | Caching disabled                             |
//! | 5      | `accessed`       | Set by hardware on access                    |
//! | 6      | `dirty`          | Set by hardware on write (leaf only)         |
//! | 7      | `large_page`     | Leaf above the last level                    |
//! | 8      | `global`         | Survives a translation-root switch           |
//! | 9–11   | OS available     | Ignored by hardware                          |
//! | 12–51  | frame            | Physical frame of the table or page          |
//! | 52–62  | OS available     | Ignored by hardware (PKU when enabled)       |
//! | 63     | `no_execute`     | Instruction fetch disallowed                 |

use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::{PAGE_SHIFT, PhysicalAddress};

/// Mask of the physical frame bits (12..=51).
pub const ENTRY_ADDRESS_MASK: u64 = 0x000f_ffff_ffff_f000;

/// Highest physical address an entry can encode.
pub const MAX_PHYSICAL_ADDRESS: u64 = ENTRY_ADDRESS_MASK | 0xfff;

/// A single page-table entry.
///
/// A non-present entry carries no meaning beyond "not present"; its other
/// bits are never interpreted.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Subject to `CR0.WP` in supervisor mode.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user: bool,

    /// Page Write-Through (PWT, bit 3). Caching hint only.
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4). Caching hint only.
    pub cache_disable: bool,

    /// Accessed (A, bit 5). Maintained by hardware.
    pub accessed: bool,

    /// Dirty (D, bit 6). Maintained by hardware, leaf only.
    pub dirty: bool,

    /// Page Size (PS, bit 7).
    ///
    /// Set on an entry above the last level to terminate the walk early.
    pub large_page: bool,

    /// Global (G, bit 8), leaf only.
    pub global: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available_low: u8,

    /// Physical frame number (bits 12..=51).
    #[bits(40)]
    frame: u64,

    /// OS-available or protection key (bits 52..=62).
    #[bits(11)]
    pub os_available_high: u16,

    /// Execute Disable (NX, bit 63).
    pub no_execute: bool,
}

/// Caller-visible attributes of a mapping.
///
/// `writable` and `user` are the permissive bits, `write_through` and
/// `cache_disable` the caching hints. See
/// [`AddressSpace::map`](crate::AddressSpace::map) for how they combine with
/// an existing entry.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct MapAttributes {
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    #[bits(4)]
    __: u8,
}

impl MapAttributes {
    /// Supervisor, read-only, cached.
    pub const READ_ONLY: Self = Self::new();

    /// Supervisor, read-write, cached.
    pub const WRITABLE: Self = Self::new().with_writable(true);

    /// Supervisor, read-write, uncached (MMIO, firmware tables).
    pub const DEVICE: Self = Self::new().with_writable(true).with_cache_disable(true);
}

impl PageTableEntry {
    /// The all-zero, non-present entry.
    pub const EMPTY: Self = Self::new();

    /// A pointer to the next-level table at `table`.
    ///
    /// Intermediate entries carry the permissive bits of everything mapped
    /// below them, since the hardware intersects permissions along the walk.
    #[inline]
    #[must_use]
    pub const fn table(table: PhysicalAddress, attrs: MapAttributes) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(attrs.writable())
            .with_user(attrs.user())
            .with_address(table)
    }

    /// A leaf entry mapping `target`.
    ///
    /// `large` marks an entry above the last level.
    #[inline]
    #[must_use]
    pub const fn leaf(
        target: PhysicalAddress,
        attrs: MapAttributes,
        large: bool,
        global: bool,
    ) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(attrs.writable())
            .with_user(attrs.user())
            .with_write_through(attrs.write_through())
            .with_cache_disable(attrs.cache_disable())
            .with_large_page(large)
            .with_global(global)
            .with_address(target)
    }

    /// Physical address of the next table or the mapped page.
    #[inline]
    #[must_use]
    pub const fn address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame() << PAGE_SHIFT)
    }

    /// Replace the physical address; the low 12 bits of `pa` are dropped.
    #[inline]
    #[must_use]
    pub const fn with_address(self, pa: PhysicalAddress) -> Self {
        self.with_frame((pa.as_u64() & ENTRY_ADDRESS_MASK) >> PAGE_SHIFT)
    }

    /// `true` for the all-zero word.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.into_bits() == 0
    }

    /// The caller-visible attributes of this entry.
    #[inline]
    #[must_use]
    pub const fn attributes(&self) -> MapAttributes {
        MapAttributes::new()
            .with_writable(self.writable())
            .with_user(self.user())
            .with_write_through(self.write_through())
            .with_cache_disable(self.cache_disable())
    }

    /// OR the permissive bits of `attrs` into a table pointer.
    #[inline]
    #[must_use]
    pub const fn widened(self, attrs: MapAttributes) -> Self {
        self.with_writable(self.writable() | attrs.writable())
            .with_user(self.user() | attrs.user())
    }

    /// Combine an existing entry with a requested one for the same slot.
    ///
    /// A non-present `self` is simply replaced. Otherwise the target and the
    /// entry kind must match exactly; `writable`, `user` and `global` are
    /// OR-ed, `write_through` and `cache_disable` AND-ed, everything else is
    /// kept. Returns `None` on a conflict.
    #[must_use]
    pub const fn merged(self, requested: Self) -> Option<Self> {
        if !self.present() {
            return Some(requested);
        }
        if self.address().as_u64() != requested.address().as_u64()
            || self.large_page() != requested.large_page()
        {
            return None;
        }
        Some(
            self.with_writable(self.writable() | requested.writable())
                .with_user(self.user() | requested.user())
                .with_global(self.global() | requested.global())
                .with_write_through(self.write_through() & requested.write_through())
                .with_cache_disable(self.cache_disable() & requested.cache_disable()),
        )
    }
}

/// Short `rwug`-style rendering used by dumps.
pub struct EntryFlags(pub PageTableEntry);

impl fmt::Display for EntryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = self.0;
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}{}{}",
            flag(e.writable(), 'w'),
            flag(e.user(), 'u'),
            flag(e.global(), 'g'),
            flag(e.cache_disable(), 'c'),
            flag(e.large_page(), 'L'),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_hardware() {
        let e = PageTableEntry::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_accessed(true)
            .with_dirty(true)
            .with_large_page(true)
            .with_global(true)
            .with_no_execute(true);
        assert_eq!(e.into_bits(), 0x8000_0000_0000_01e7);
    }

    #[test]
    fn address_is_frame_aligned() {
        let e = PageTableEntry::new().with_address(PhysicalAddress::new(0x1234_5678));
        assert_eq!(e.address(), PhysicalAddress::new(0x1234_5000));
        assert_eq!(e.into_bits() & !ENTRY_ADDRESS_MASK, 0);
    }

    #[test]
    fn merge_ors_permissions_and_ands_caching() {
        let pa = PhysicalAddress::new(0x20_0000);
        let existing = PageTableEntry::leaf(
            pa,
            MapAttributes::new().with_cache_disable(true).with_write_through(true),
            false,
            false,
        );
        let requested = PageTableEntry::leaf(
            pa,
            MapAttributes::new().with_writable(true).with_write_through(true),
            false,
            true,
        );
        let merged = existing.merged(requested).expect("compatible");
        assert!(merged.writable());
        assert!(merged.global());
        assert!(!merged.user());
        assert!(merged.write_through());
        assert!(!merged.cache_disable());
    }

    #[test]
    fn merge_rejects_different_targets_and_kinds() {
        let a = PageTableEntry::leaf(PhysicalAddress::new(0x1000), MapAttributes::READ_ONLY, false, false);
        let b = PageTableEntry::leaf(PhysicalAddress::new(0x2000), MapAttributes::READ_ONLY, false, false);
        assert_eq!(a.merged(b), None);
        assert_eq!(a.merged(a.with_large_page(true)), None);
        assert_eq!(PageTableEntry::EMPTY.merged(b), Some(b));
    }

    #[test]
    fn merge_keeps_hardware_bits() {
        let pa = PhysicalAddress::new(0x3000);
        let existing = PageTableEntry::leaf(pa, MapAttributes::READ_ONLY, false, false).with_accessed(true);
        let merged = existing
            .merged(PageTableEntry::leaf(pa, MapAttributes::READ_ONLY, false, false))
            .expect("compatible");
        assert!(merged.accessed());
    }
}
