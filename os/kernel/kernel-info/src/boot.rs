//! # Boot Hand-off
//!
//! The loader passes a single [`KernelBootInfo`] pointer to the kernel entry
//! point. It is `#[repr(C)]` and only carries raw physical pointers and
//! lengths; the kernel turns it into a borrowed [`BootInfo`] view once the
//! referenced memory is addressable.

use crate::memory::LOW_MEMORY_END;

/// Raw, ABI-stable boot information.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct KernelBootInfo {
    /// Physical address of the first [`MemoryRegion`].
    pub regions_ptr: u64,

    /// Number of [`MemoryRegion`] entries.
    pub regions_len: u64,

    /// Physical address of the UTF-8 command line, or `0`.
    pub cmdline_ptr: u64,

    /// Length of the command line in bytes.
    pub cmdline_len: u64,

    /// Physical address of the first [`BootModule`], or `0`.
    pub modules_ptr: u64,

    /// Number of [`BootModule`] entries.
    pub modules_len: u64,
}

/// Classification of a physical memory region.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryRegionKind {
    /// Free RAM the kernel may hand out.
    Usable = 1,
    /// Firmware, MMIO holes, ACPI tables, and everything else.
    Reserved = 2,
}

/// One entry of the loader-provided memory map.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn usable(base: u64, length: u64) -> Self {
        Self {
            base,
            length,
            kind: MemoryRegionKind::Usable,
        }
    }

    #[must_use]
    pub const fn reserved(base: u64, length: u64) -> Self {
        Self {
            base,
            length,
            kind: MemoryRegionKind::Reserved,
        }
    }

    /// Exclusive end address, saturating at the top of the address space.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self.kind, MemoryRegionKind::Usable)
    }
}

/// A module (initrd, program image) loaded next to the kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BootModule {
    pub start: u64,
    pub end: u64,
}

/// Borrowed view of the boot hand-off, consumed once during initialization.
#[derive(Copy, Clone, Debug)]
pub struct BootInfo<'a> {
    pub memory_map: &'a [MemoryRegion],
    pub command_line: Option<&'a str>,
    pub modules: &'a [BootModule],
}

impl<'a> BootInfo<'a> {
    #[must_use]
    pub const fn new(memory_map: &'a [MemoryRegion]) -> Self {
        Self {
            memory_map,
            command_line: None,
            modules: &[],
        }
    }

    /// Iterates the usable regions of the memory map.
    pub fn usable_regions(&self) -> impl Iterator<Item = &'a MemoryRegion> + 'a {
        self.memory_map.iter().filter(|r| r.is_usable())
    }

    /// Highest physical address covered by any region.
    #[must_use]
    pub fn physical_top(&self) -> u64 {
        self.memory_map
            .iter()
            .map(MemoryRegion::end)
            .max()
            .unwrap_or_default()
    }

    /// Up to `size` bytes of usable RAM to direct-map during bootstrap.
    ///
    /// Taken from the start of the largest usable region, skipping memory
    /// below [`LOW_MEMORY_END`]. Page aligned; `None` if no usable page
    /// remains.
    #[must_use]
    pub fn direct_map_window(&self, size: u64) -> Option<MemoryRegion> {
        const PAGE: u64 = 0x1000;
        let region = self.usable_regions().max_by_key(|r| r.length)?;
        let start = region.base.max(LOW_MEMORY_END).checked_add(PAGE - 1)? & !(PAGE - 1);
        let end = region.end() & !(PAGE - 1);
        let length = end.checked_sub(start)?.min(size & !(PAGE - 1));
        (length > 0).then_some(MemoryRegion::usable(start, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_regions_are_filtered() {
        let map = [
            MemoryRegion::usable(0, 0x9_f000),
            MemoryRegion::reserved(0x9_f000, 0x6_1000),
            MemoryRegion::usable(0x10_0000, 0x7ff_0000),
        ];
        let info = BootInfo::new(&map);
        let usable: Vec<_> = info.usable_regions().map(|r| r.base).collect();
        assert_eq!(usable, vec![0, 0x10_0000]);
        assert_eq!(info.physical_top(), 0x80f_0000);
    }

    #[test]
    fn window_comes_from_the_largest_usable_region() {
        let map = [
            MemoryRegion::usable(0, 0x9_f000),
            MemoryRegion::usable(0x10_0000, 0x7ff_0000),
            MemoryRegion::reserved(0xfd_0000_0000, 0x3_0000_0000),
            MemoryRegion::usable(0x1_0000_0000, 0xf_0000_0000),
        ];
        let info = BootInfo::new(&map);
        assert_eq!(
            info.direct_map_window(0x400_0000),
            Some(MemoryRegion::usable(0x1_0000_0000, 0x400_0000))
        );
        assert_eq!(info.physical_top(), 0x100_0000_0000);
    }

    #[test]
    fn window_skips_low_memory_and_clips_to_the_region() {
        let map = [MemoryRegion::usable(0x800, 0x18_0000)];
        let info = BootInfo::new(&map);
        assert_eq!(
            info.direct_map_window(0x400_0000),
            Some(MemoryRegion::usable(LOW_MEMORY_END, 0x8_0000))
        );

        let low_only = [MemoryRegion::usable(0, 0x9_f000), MemoryRegion::reserved(0x10_0000, 0x10_0000)];
        assert_eq!(BootInfo::new(&low_only).direct_map_window(0x400_0000), None);
        assert_eq!(BootInfo::new(&[]).direct_map_window(0x400_0000), None);
    }

    #[test]
    fn region_end_saturates() {
        assert_eq!(MemoryRegion::usable(u64::MAX - 1, 16).end(), u64::MAX);
    }
}
