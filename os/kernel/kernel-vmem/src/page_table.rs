//! # Page Table
//!
//! A frame-sized, frame-aligned array of [`PageTableEntry`] values. Layouts
//! with fewer than nine index bits per level use a prefix of the array.
//!
//! Tables are never created on the Rust heap: they are either statics in the
//! kernel image or frames handed out by a [`FrameAlloc`](crate::FrameAlloc),
//! reached through a [`PhysMapper`](crate::PhysMapper).

use crate::entry::PageTableEntry;
use kernel_memory_addresses::PAGE_SIZE;

/// Entries in one table frame.
pub const ENTRIES_PER_TABLE: usize = 512;

/// One table of the hierarchy, at any level.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() as u64 == PAGE_SIZE);

impl PageTable {
    /// A table with every entry non-present.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageTableEntry::EMPTY; ENTRIES_PER_TABLE],
        }
    }

    /// Clear every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::EMPTY);
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self, index: usize) -> PageTableEntry {
        self.entries[index]
    }

    /// Write the entry at `index`.
    ///
    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set_entry(&mut self, index: usize, entry: PageTableEntry) {
        self.entries[index] = entry;
    }

    /// Iterate the first `count` entries with their index.
    pub fn iter(&self, count: usize) -> impl Iterator<Item = (usize, PageTableEntry)> + '_ {
        self.entries[..count.min(ENTRIES_PER_TABLE)]
            .iter()
            .copied()
            .enumerate()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::MapAttributes;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn zeroed_table_has_no_present_entries() {
        let t = PageTable::zeroed();
        assert!(t.iter(ENTRIES_PER_TABLE).all(|(_, e)| e.is_empty()));
    }

    #[test]
    fn set_and_clear() {
        let mut t = PageTable::zeroed();
        let e = PageTableEntry::table(PhysicalAddress::new(0x7000), MapAttributes::WRITABLE);
        t.set_entry(3, e);
        assert_eq!(t.entry(3), e);
        assert_eq!(t.iter(8).filter(|(_, e)| e.present()).count(), 1);
        t.zero();
        assert!(t.entry(3).is_empty());
    }
}
