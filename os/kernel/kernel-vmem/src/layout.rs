//! # Paging Layouts
//!
//! The number of translation levels and the index width of each level are
//! plain data. One table walker consumes a [`PagingLayout`] and therefore
//! serves a four-level x86-64 hierarchy and a three-level 39-bit hierarchy
//! alike.
//!
//! ```text
//! X86_64_4LEVEL:   | 9 | 9 | 9 | 9 | 12 |   48-bit VA, 2 MiB large pages at level 2
//! THREE_LEVEL_39:  | 9 | 9 | 9 | 12 |       39-bit VA, 2 MiB large pages at level 1
//! ```
//!
//! Levels are numbered from the root (`0`) down to the leaf level.
//!
//! The layout is `Copy` and always held by value, so a walk never has to
//! dereference it through memory that might not be addressable yet.

use crate::page_table::ENTRIES_PER_TABLE;
use kernel_memory_addresses::VirtualAddress;

/// Upper bound on translation levels.
pub const MAX_LEVELS: usize = 5;

/// Address bits per translation level, plus base page shift.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PagingLayout {
    bits: [u8; MAX_LEVELS],
    levels: u8,
    page_shift: u8,
    /// Bit `n` set: level `n` may hold large-page entries.
    large_levels: u8,
}

impl PagingLayout {
    /// x86-64 4-level paging with 2 MiB large pages.
    pub const X86_64_4LEVEL: Self = Self::new(&[9, 9, 9, 9], 12, 1 << 2);

    /// x86-64 4-level paging with 2 MiB and 1 GiB large pages.
    ///
    /// Requires `pdpe1gb` support.
    pub const X86_64_4LEVEL_1G: Self = Self::new(&[9, 9, 9, 9], 12, (1 << 1) | (1 << 2));

    /// Three levels, 39-bit virtual addresses, 2 MiB large pages.
    pub const THREE_LEVEL_39: Self = Self::new(&[9, 9, 9], 12, 1 << 1);

    /// Builds a layout; panics (at compile time for constants) if a level
    /// would not fit into one table frame or if the layout is empty.
    #[must_use]
    pub const fn new(bits_per_level: &[u8], page_shift: u8, large_levels: u8) -> Self {
        assert!(!bits_per_level.is_empty() && bits_per_level.len() <= MAX_LEVELS);
        let mut bits = [0u8; MAX_LEVELS];
        let mut total = page_shift as u32;
        let mut i = 0;
        while i < bits_per_level.len() {
            let b = bits_per_level[i];
            assert!(b > 0 && (1usize << b) <= ENTRIES_PER_TABLE);
            bits[i] = b;
            total += b as u32;
            i += 1;
        }
        assert!(total <= 64);
        #[allow(clippy::cast_possible_truncation)]
        let levels = bits_per_level.len() as u8;
        // The root and the leaf level never carry large entries.
        let allowed = large_levels & !1 & !(1 << (levels - 1));
        Self {
            bits,
            levels,
            page_shift,
            large_levels: allowed,
        }
    }

    /// The address-bits-per-level sequence, root first.
    #[inline]
    #[must_use]
    pub const fn address_bits(&self) -> &[u8] {
        self.bits.split_at(self.levels as usize).0
    }

    #[inline]
    #[must_use]
    pub const fn levels(&self) -> usize {
        self.levels as usize
    }

    /// Index of the last level, whose entries always map base pages.
    #[inline]
    #[must_use]
    pub const fn leaf_level(&self) -> usize {
        self.levels as usize - 1
    }

    #[inline]
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        1 << self.page_shift
    }

    /// Index bits consumed at `level`.
    #[inline]
    #[must_use]
    pub const fn bits(&self, level: usize) -> u32 {
        self.bits[level] as u32
    }

    /// Number of entries a table at `level` uses.
    #[inline]
    #[must_use]
    pub const fn entries(&self, level: usize) -> usize {
        1 << self.bits[level]
    }

    /// Bit position of the lowest address bit indexing `level`.
    #[must_use]
    pub const fn shift(&self, level: usize) -> u32 {
        let mut shift = self.page_shift as u32;
        let mut l = level + 1;
        while l < self.levels as usize {
            shift += self.bits[l] as u32;
            l += 1;
        }
        shift
    }

    /// Bytes covered by one entry at `level`.
    #[inline]
    #[must_use]
    pub const fn span(&self, level: usize) -> u64 {
        1 << self.shift(level)
    }

    /// Table index selected by `va` at `level`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index(&self, level: usize, va: VirtualAddress) -> usize {
        ((va.as_u64() >> self.shift(level)) & (self.entries(level) as u64 - 1)) as usize
    }

    /// Number of implemented virtual address bits.
    #[inline]
    #[must_use]
    pub const fn virtual_bits(&self) -> u32 {
        self.shift(0) + self.bits(0)
    }

    /// Whether `level` may hold a large-page entry.
    #[inline]
    #[must_use]
    pub const fn supports_large(&self, level: usize) -> bool {
        level < MAX_LEVELS && self.large_levels & (1 << level) != 0
    }

    /// Whether all bits above the implemented range replicate the top one.
    #[must_use]
    pub const fn is_canonical(&self, va: VirtualAddress) -> bool {
        let n = self.virtual_bits();
        if n >= 64 {
            return true;
        }
        let upper = va.as_u64() >> (n - 1);
        upper == 0 || upper == (u64::MAX >> (n - 1))
    }

    /// Whether `va` lies in the upper (sign-extended) half.
    #[inline]
    #[must_use]
    pub const fn is_upper_half(&self, va: VirtualAddress) -> bool {
        let n = self.virtual_bits();
        n < 64 && (va.as_u64() >> (n - 1)) & 1 == 1
    }

    /// Sign-extends an address assembled from table indices.
    #[must_use]
    pub const fn canonicalize(&self, raw: u64) -> VirtualAddress {
        let n = self.virtual_bits();
        if n >= 64 {
            return VirtualAddress::new(raw);
        }
        let unused = 64 - n;
        VirtualAddress::new(((raw << unused).cast_signed() >> unused).cast_unsigned())
    }
}
