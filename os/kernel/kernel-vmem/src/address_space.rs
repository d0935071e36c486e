//! # Address Space
//!
//! A translation tree identified by the physical address of its root table,
//! walked generically according to a [`PagingLayout`].
//!
//! ## Operations
//!
//! - [`AddressSpace::map`] installs `virt → phys` for a page-aligned range,
//!   allocating missing tables on demand and using large pages where the
//!   range allows it.
//! - [`AddressSpace::map_pages`] does the same with base pages only.
//! - [`AddressSpace::map_direct`] maps a memory-map region into the direct
//!   map at [`HHDM_BASE`].
//! - [`AddressSpace::unmap`] clears the leaf entries covering a range, and
//!   [`AddressSpace::unmap_active`] also drops their cached translations.
//! - [`AddressSpace::physical_address`] translates a virtual address.
//! - [`AddressSpace::virtual_address`] searches the tree for a physical one.
//! - [`AddressSpace::load`] installs the root in the translation unit.
//!
//! ## Remapping
//!
//! Mapping over an existing entry is allowed when the entry already points to
//! the requested target with the same granularity. The entries are then
//! merged:
//!
//! | Bit                               | Combined with |
//! |-----------------------------------|---------------|
//! | `present`, `writable`, `user`, `global` | OR      |
//! | `write_through`, `cache_disable`  | AND           |
//! | `accessed`, `dirty`               | kept          |
//!
//! Any other overlap is a [`MapError::Conflict`].
//!
//! ## Global mappings
//!
//! Mappings at or above the kernel region start are forced global, since that
//! region is shared by every address space.
//!
//! ## Safety
//!
//! - All table accesses go through the [`PhysMapper`], which must reach every
//!   table frame of this tree.
//! - Changing active mappings other than through
//!   [`AddressSpace::unmap_active`] requires TLB maintenance by the caller.

mod error;
mod visit;

pub use crate::address_space::error::MapError;
pub use crate::address_space::visit::Mapping;
use crate::bootstrap::TranslationControl;
use crate::entry::{MAX_PHYSICAL_ADDRESS, MapAttributes, PageTableEntry};
use crate::layout::PagingLayout;
use crate::page_table::PageTable;
use crate::{FrameAlloc, PhysMapper};
use kernel_info::boot::MemoryRegion;
use kernel_info::memory::{HHDM_BASE, KERNEL_SPACE_START};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::{debug, trace};

/// Handle to a single address space.
pub struct AddressSpace<M: PhysMapper> {
    root: PhysicalAddress,
    mapper: M,
    layout: PagingLayout,
    kernel_region: VirtualAddress,
}

/// Borrow the table stored in frame `pa`.
///
/// # Safety
/// - `pa` must be a table frame reachable through `mapper`.
/// - No other live reference to the same table may be used concurrently.
#[inline]
pub(crate) unsafe fn table_at<'a, M: PhysMapper>(mapper: &M, pa: PhysicalAddress) -> &'a mut PageTable {
    unsafe { mapper.phys_to_mut::<PageTable>(pa) }
}

impl<M: PhysMapper> AddressSpace<M> {
    /// View the tree rooted at `root`.
    #[inline]
    #[must_use]
    pub const fn new(root: PhysicalAddress, mapper: M, layout: PagingLayout) -> Self {
        Self {
            root,
            mapper,
            layout,
            kernel_region: VirtualAddress::new(KERNEL_SPACE_START),
        }
    }

    /// Allocate and clear a fresh root table.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if `alloc` has no frame left.
    pub fn create<A: FrameAlloc>(alloc: &mut A, mapper: M, layout: PagingLayout) -> Result<Self, MapError> {
        let root = alloc.allocate_frame().ok_or(MapError::OutOfMemory)?;
        // SAFETY: a freshly allocated frame is owned by us and reachable through the mapper.
        unsafe { table_at(&mapper, root) }.zero();
        Ok(Self::new(root, mapper, layout))
    }

    /// Mappings at or above `start` are marked global.
    #[inline]
    #[must_use]
    pub const fn with_kernel_region(mut self, start: VirtualAddress) -> Self {
        self.kernel_region = start;
        self
    }

    /// Physical address of the root table.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalAddress {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &PagingLayout {
        &self.layout
    }

    #[inline]
    #[must_use]
    pub const fn kernel_region(&self) -> VirtualAddress {
        self.kernel_region
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// The same tree, reached through a different resolution strategy.
    #[must_use]
    pub fn rebind<N: PhysMapper>(self, mapper: N) -> AddressSpace<N> {
        AddressSpace {
            root: self.root,
            mapper,
            layout: self.layout,
            kernel_region: self.kernel_region,
        }
    }

    /// Install this tree as the active translation root.
    ///
    /// # Safety
    /// The tree must map the currently executing code, the stack, and
    /// everything else touched after the switch.
    #[inline]
    pub unsafe fn load<C: TranslationControl>(&self, control: &mut C) {
        unsafe { control.load_root(self.root) }
    }

    /// Map `size` bytes at `virt` to `phys`.
    ///
    /// Large pages are used where the remaining size and both addresses are
    /// aligned to a level's span and the layout allows them at that level.
    ///
    /// # Errors
    /// - [`MapError::Unaligned`], [`MapError::EmptyRange`],
    ///   [`MapError::WrapsAround`], [`MapError::NonCanonical`] for invalid
    ///   arguments.
    /// - [`MapError::OutOfMemory`] if a table could not be allocated. Pages
    ///   mapped before the failure stay mapped.
    /// - [`MapError::Conflict`] if a page is already mapped elsewhere.
    pub fn map<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        size: u64,
        attrs: MapAttributes,
    ) -> Result<(), MapError> {
        self.map_range(alloc, virt, phys, size, attrs, true)
    }

    /// Like [`map`](Self::map), but never installs large pages.
    ///
    /// # Errors
    /// As for [`map`](Self::map).
    pub fn map_pages<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        size: u64,
        attrs: MapAttributes,
    ) -> Result<(), MapError> {
        self.map_range(alloc, virt, phys, size, attrs, false)
    }

    /// Map `region` at `HHDM_BASE + base`, widened to whole pages.
    ///
    /// Usable RAM is mapped writable and cacheable, every other region as
    /// device memory. Regions that cover no page are skipped.
    ///
    /// # Errors
    /// As for [`map`](Self::map).
    pub fn map_direct<A: FrameAlloc>(&mut self, alloc: &mut A, region: &MemoryRegion) -> Result<(), MapError> {
        let page = self.layout.page_size();
        let start = kernel_memory_addresses::align_down(region.base, page);
        let Some(end) = kernel_memory_addresses::align_up(region.end(), page) else {
            return Ok(());
        };
        if end <= start {
            return Ok(());
        }
        let attrs = if region.is_usable() {
            MapAttributes::WRITABLE
        } else {
            MapAttributes::DEVICE
        };
        let virt = VirtualAddress::new(HHDM_BASE + start);
        debug!("direct map {virt} (+{:#x})", end - start);
        self.map(alloc, virt, PhysicalAddress::new(start), end - start, attrs)
    }

    fn map_range<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        size: u64,
        attrs: MapAttributes,
        allow_large: bool,
    ) -> Result<(), MapError> {
        self.check_virtual_range(virt, size)?;
        if !phys.is_aligned(self.layout.page_size()) {
            return Err(MapError::Unaligned);
        }
        match phys.checked_add(size - 1) {
            Some(last) if last.as_u64() <= MAX_PHYSICAL_ADDRESS => {}
            _ => return Err(MapError::WrapsAround),
        }

        trace!("map {virt}..+{size:#x} -> {phys}");
        let (mut va, mut pa, mut remaining) = (virt, phys, size);
        loop {
            let step = self.map_chunk(alloc, va, pa, remaining, attrs, allow_large)?;
            remaining -= step;
            if remaining == 0 {
                return Ok(());
            }
            va += step;
            pa += step;
        }
    }

    /// Install one entry covering `va` and return the number of bytes it maps.
    fn map_chunk<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        remaining: u64,
        attrs: MapAttributes,
        allow_large: bool,
    ) -> Result<u64, MapError> {
        let layout = self.layout;
        let leaf = layout.leaf_level();
        let global = va >= self.kernel_region;
        let mut table_pa = self.root;

        for level in 0..leaf {
            // SAFETY: `table_pa` is the root or a table installed in the tree.
            let table = unsafe { table_at(&self.mapper, table_pa) };
            let index = layout.index(level, va);
            let current = table.entry(index);
            let span = layout.span(level);

            let fits_large = allow_large
                && layout.supports_large(level)
                && remaining >= span
                && va.is_aligned(span)
                && pa.is_aligned(span);

            if fits_large && (!current.present() || current.large_page()) {
                let requested = PageTableEntry::leaf(pa, attrs, true, global);
                table.set_entry(index, Self::merge(va, current, requested)?);
                return Ok(span);
            }

            if current.present() && current.large_page() {
                // An existing large page already covers `va`; accept it if it
                // resolves to the same target.
                let resolved = current.address() + (va.as_u64() & (span - 1));
                if resolved != pa {
                    return Err(MapError::Conflict {
                        virt: va,
                        existing: resolved,
                        requested: pa,
                    });
                }
                let requested = PageTableEntry::leaf(current.address(), attrs, true, global);
                table.set_entry(index, Self::merge(va, current, requested)?);
                return Ok(layout.span(leaf));
            }

            table_pa = if current.present() {
                let widened = current.widened(attrs);
                if widened != current {
                    table.set_entry(index, widened);
                }
                current.address()
            } else {
                let frame = alloc.allocate_frame().ok_or(MapError::OutOfMemory)?;
                // SAFETY: the frame was just handed to us and is not linked anywhere yet.
                unsafe { table_at(&self.mapper, frame) }.zero();
                table.set_entry(index, PageTableEntry::table(frame, attrs));
                trace!("level {level} table for {va} at {frame}");
                frame
            };
        }

        // SAFETY: `table_pa` is a last-level table of this tree.
        let table = unsafe { table_at(&self.mapper, table_pa) };
        let index = layout.index(leaf, va);
        let requested = PageTableEntry::leaf(pa, attrs, false, global);
        table.set_entry(index, Self::merge(va, table.entry(index), requested)?);
        Ok(layout.span(leaf))
    }

    fn merge(
        va: VirtualAddress,
        current: PageTableEntry,
        requested: PageTableEntry,
    ) -> Result<PageTableEntry, MapError> {
        current.merged(requested).ok_or(MapError::Conflict {
            virt: va,
            existing: current.address(),
            requested: requested.address(),
        })
    }

    /// Remove every mapping in `virt..virt + size`.
    ///
    /// Pages that are not mapped are skipped. Table frames are not reclaimed.
    ///
    /// # Errors
    /// - The argument errors of [`map`](Self::map).
    /// - [`MapError::SplitLargePage`] if the range covers only part of a
    ///   large page. Entries cleared before that point stay cleared.
    pub fn unmap(&mut self, virt: VirtualAddress, size: u64) -> Result<(), MapError> {
        self.unmap_with(virt, size, |_| {})
    }

    /// [`unmap`](Self::unmap) in the active tree: every cleared entry is
    /// also invalidated through `control`.
    ///
    /// # Errors
    /// As for [`unmap`](Self::unmap). Entries cleared before a failure are
    /// invalidated as well.
    ///
    /// # Safety
    /// This tree must be the one loaded in `control`.
    pub unsafe fn unmap_active<C: TranslationControl>(
        &mut self,
        control: &mut C,
        virt: VirtualAddress,
        size: u64,
    ) -> Result<(), MapError> {
        // SAFETY: the caller guarantees the tree is active.
        self.unmap_with(virt, size, |va| unsafe { control.invalidate(va) })
    }

    fn unmap_with(
        &mut self,
        virt: VirtualAddress,
        size: u64,
        mut cleared: impl FnMut(VirtualAddress),
    ) -> Result<(), MapError> {
        self.check_virtual_range(virt, size)?;
        trace!("unmap {virt}..+{size:#x}");
        let (mut va, mut remaining) = (virt, size);
        loop {
            let (step, was_mapped) = self.unmap_chunk(va, remaining)?;
            if was_mapped {
                cleared(va);
            }
            remaining -= step;
            if remaining == 0 {
                return Ok(());
            }
            va += step;
        }
    }

    /// Clear the entry covering `va`. Returns the bytes it covered and
    /// whether anything was mapped there.
    fn unmap_chunk(&mut self, va: VirtualAddress, remaining: u64) -> Result<(u64, bool), MapError> {
        let layout = self.layout;
        let leaf = layout.leaf_level();
        let mut table_pa = self.root;
        for level in 0..=leaf {
            // SAFETY: `table_pa` is the root or a table installed in the tree.
            let table = unsafe { table_at(&self.mapper, table_pa) };
            let index = layout.index(level, va);
            let entry = table.entry(index);
            let span = layout.span(level);

            if !entry.present() {
                // Nothing below this entry; skip to its end.
                let to_boundary = span - (va.as_u64() & (span - 1));
                return Ok((to_boundary.min(remaining), false));
            }
            if level == leaf || entry.large_page() {
                if !va.is_aligned(span) || remaining < span {
                    return Err(MapError::SplitLargePage { virt: va });
                }
                table.set_entry(index, PageTableEntry::EMPTY);
                return Ok((span, true));
            }
            table_pa = entry.address();
        }
        Ok((layout.span(leaf), false))
    }

    fn check_virtual_range(&self, virt: VirtualAddress, size: u64) -> Result<(), MapError> {
        let page = self.layout.page_size();
        if size == 0 {
            return Err(MapError::EmptyRange);
        }
        if !virt.is_aligned(page) || !size.is_multiple_of(page) {
            return Err(MapError::Unaligned);
        }
        let last = virt.checked_add(size - 1).ok_or(MapError::WrapsAround)?;
        let layout = &self.layout;
        if !layout.is_canonical(virt)
            || !layout.is_canonical(last)
            || layout.is_upper_half(virt) != layout.is_upper_half(last)
        {
            return Err(MapError::NonCanonical);
        }
        Ok(())
    }

    /// Translate `va`, or `None` if it is not mapped.
    ///
    /// Handles large pages by adding the in-page offset of their span.
    #[must_use]
    pub fn physical_address(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let layout = &self.layout;
        if !layout.is_canonical(va) {
            return None;
        }
        let leaf = layout.leaf_level();
        let mut table_pa = self.root;
        for level in 0..=leaf {
            // SAFETY: `table_pa` is the root or a table installed in the tree.
            let table = unsafe { table_at(&self.mapper, table_pa) };
            let entry = table.entry(layout.index(level, va));
            if !entry.present() {
                return None;
            }
            if level == leaf || entry.large_page() {
                let span = layout.span(level);
                return Some(entry.address() + (va.as_u64() & (span - 1)));
            }
            table_pa = entry.address();
        }
        None
    }

    /// The leaf (or large-page) entry translating `va`.
    #[must_use]
    pub fn leaf_entry(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        let layout = &self.layout;
        if !layout.is_canonical(va) {
            return None;
        }
        let leaf = layout.leaf_level();
        let mut table_pa = self.root;
        for level in 0..=leaf {
            // SAFETY: `table_pa` is the root or a table installed in the tree.
            let table = unsafe { table_at(&self.mapper, table_pa) };
            let entry = table.entry(layout.index(level, va));
            if !entry.present() {
                return None;
            }
            if level == leaf || entry.large_page() {
                return Some(entry);
            }
            table_pa = entry.address();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BumpAlloc, FakeMmu, TestPhys};

    const MIB2: u64 = 0x20_0000;

    fn space(layout: PagingLayout) -> (AddressSpace<TestPhys>, BumpAlloc) {
        let mut alloc = BumpAlloc::new(PhysicalAddress::new(0x1000), 63);
        let space = AddressSpace::create(&mut alloc, TestPhys::new(64), layout).expect("root");
        (space, alloc)
    }

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    fn pa(p: u64) -> PhysicalAddress {
        PhysicalAddress::new(p)
    }

    fn snapshot<M: PhysMapper>(space: &AddressSpace<M>) -> Vec<(PhysicalAddress, Vec<u64>)> {
        let mut tables = Vec::new();
        space.for_each_table(|table_pa, _| {
            let table = unsafe { table_at(space.mapper(), table_pa) };
            tables.push((table_pa, table.iter(512).map(|(_, e)| e.into_bits()).collect()));
        });
        tables
    }

    #[test]
    fn round_trip() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        space
            .map(&mut alloc, va(0x1000_0000), pa(0x123_4000), 0x5000, MapAttributes::WRITABLE)
            .expect("map");

        for k in (0..0x5000).step_by(0x1000) {
            assert_eq!(space.physical_address(va(0x1000_0000 + k)), Some(pa(0x123_4000 + k)));
            let back = space.virtual_address(pa(0x123_4000 + k)).expect("reverse");
            assert_eq!(space.physical_address(back), Some(pa(0x123_4000 + k)));
        }
        assert_eq!(space.physical_address(va(0x1000_0abc)), Some(pa(0x123_4abc)));
        assert_eq!(space.physical_address(va(0x1000_5000)), None);
        assert_eq!(space.virtual_address(pa(0x123_9000)), None);
    }

    #[test]
    fn mapping_twice_changes_nothing() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        space
            .map(&mut alloc, va(0x40_0000), pa(0x80_0000), 3 * MIB2, MapAttributes::WRITABLE)
            .expect("first");
        let before = snapshot(&space);
        let left = alloc.remaining();

        space
            .map(&mut alloc, va(0x40_0000), pa(0x80_0000), 3 * MIB2, MapAttributes::WRITABLE)
            .expect("second");

        assert_eq!(snapshot(&space), before);
        assert_eq!(alloc.remaining(), left);
    }

    #[test]
    fn conflicting_target_is_rejected() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        space
            .map(&mut alloc, va(0x5000), pa(0x10_0000), 0x1000, MapAttributes::WRITABLE)
            .expect("map");

        let err = space
            .map(&mut alloc, va(0x5000), pa(0x20_0000), 0x1000, MapAttributes::WRITABLE)
            .unwrap_err();
        assert_eq!(
            err,
            MapError::Conflict {
                virt: va(0x5000),
                existing: pa(0x10_0000),
                requested: pa(0x20_0000),
            }
        );
        assert!(err.is_fatal());
        assert_eq!(space.physical_address(va(0x5000)), Some(pa(0x10_0000)));
    }

    #[test]
    fn large_pages_translate_like_base_pages() {
        let (mut large, mut a) = space(PagingLayout::X86_64_4LEVEL);
        let (mut small, mut b) = space(PagingLayout::X86_64_4LEVEL);
        let (v, p, size) = (0x4000_0000, 0x8000_0000, 2 * MIB2);

        large.map(&mut a, va(v), pa(p), size, MapAttributes::WRITABLE).expect("large");
        small.map_pages(&mut b, va(v), pa(p), size, MapAttributes::WRITABLE).expect("small");

        assert!(large.leaf_entry(va(v)).expect("mapped").large_page());
        assert!(!small.leaf_entry(va(v)).expect("mapped").large_page());
        for offset in (0..size).step_by(0x1000) {
            let at = va(v + offset + 0x18);
            assert_eq!(large.physical_address(at), small.physical_address(at));
        }
        assert_eq!(large.physical_address(va(v + size)), None);

        let mut large_tables = 0;
        large.for_each_table(|_, _| large_tables += 1);
        let mut small_tables = 0;
        small.for_each_table(|_, _| small_tables += 1);
        assert_eq!(large_tables, 3);
        assert_eq!(small_tables, 5);
    }

    #[test]
    fn one_gib_pages_when_the_layout_allows_them() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL_1G);
        space
            .map(&mut alloc, va(0x4000_0000), pa(0x4000_0000), 0x4000_0000 + MIB2, MapAttributes::WRITABLE)
            .expect("map");

        let first = space.leaf_entry(va(0x4000_0000)).expect("1 GiB");
        assert!(first.large_page());
        assert_eq!(space.physical_address(va(0x7fff_f123)), Some(pa(0x7fff_f123)));
        let mut sizes = Vec::new();
        space.for_each_mapping(|m| sizes.push(m.size));
        assert_eq!(sizes, vec![0x4000_0000, MIB2]);
    }

    #[test]
    fn existing_large_page_accepts_matching_sub_range() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        space
            .map(&mut alloc, va(0x60_0000), pa(0xa0_0000), MIB2, MapAttributes::READ_ONLY)
            .expect("large");

        space
            .map(&mut alloc, va(0x60_3000), pa(0xa0_3000), 0x2000, MapAttributes::WRITABLE)
            .expect("inside the large page");
        let entry = space.leaf_entry(va(0x60_0000)).expect("mapped");
        assert!(entry.large_page() && entry.writable());

        let err = space
            .map(&mut alloc, va(0x60_3000), pa(0xb0_3000), 0x1000, MapAttributes::WRITABLE)
            .unwrap_err();
        assert!(matches!(err, MapError::Conflict { existing, .. } if existing == pa(0xa0_3000)));
    }

    #[test]
    fn large_range_over_base_pages_fills_in() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        space
            .map_pages(&mut alloc, va(0x60_0000), pa(0xa0_0000), 0x1000, MapAttributes::WRITABLE)
            .expect("base page");
        space
            .map(&mut alloc, va(0x60_0000), pa(0xa0_0000), MIB2, MapAttributes::WRITABLE)
            .expect("covering range");

        assert!(!space.leaf_entry(va(0x60_0000)).expect("mapped").large_page());
        assert_eq!(space.physical_address(va(0x7f_f000)), Some(pa(0xbf_f000)));
    }

    #[test]
    fn remapping_merges_attributes() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        let v = va(0x9000);
        let p = pa(0x9000);

        space.map(&mut alloc, v, p, 0x1000, MapAttributes::DEVICE).expect("device");
        space.map(&mut alloc, v, p, 0x1000, MapAttributes::READ_ONLY).expect("read only");
        let entry = space.leaf_entry(v).expect("mapped");
        assert!(entry.writable(), "writable is OR-ed");
        assert!(!entry.cache_disable(), "cache disable is AND-ed");

        let user = MapAttributes::READ_ONLY.with_user(true);
        space.map(&mut alloc, v, p, 0x1000, user).expect("user");
        assert!(space.leaf_entry(v).expect("mapped").user());
    }

    #[test]
    fn kernel_region_is_global() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        let high = va(0xffff_8000_0010_0000);
        space.map(&mut alloc, high, pa(0x10_0000), 0x1000, MapAttributes::WRITABLE).expect("high");
        space.map(&mut alloc, va(0x10_0000), pa(0x10_0000), 0x1000, MapAttributes::WRITABLE).expect("low");

        assert!(space.leaf_entry(high).expect("high").global());
        assert!(!space.leaf_entry(va(0x10_0000)).expect("low").global());

        let mut seen = Vec::new();
        space.for_each_mapping(|m| seen.push(m.virt));
        assert_eq!(seen, vec![va(0x10_0000), high]);
    }

    #[test]
    fn reverse_lookup_prefers_the_last_mapping() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        let high = 0xffff_8000_0000_0000;
        space.map(&mut alloc, va(0x10_0000), pa(0x10_0000), 0x1000, MapAttributes::WRITABLE).expect("low");
        space.map(&mut alloc, va(high), pa(0x10_0000), 0x1000, MapAttributes::WRITABLE).expect("high");

        assert_eq!(space.virtual_address(pa(0x10_0010)), Some(va(high + 0x10)));
    }

    #[test]
    fn unmap_clears_leaves_and_skips_holes() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        space.map(&mut alloc, va(0x1000), pa(0x3000), 0x3000, MapAttributes::WRITABLE).expect("map");

        space.unmap(va(0x2000), 0x1000).expect("unmap middle");
        assert_eq!(space.physical_address(va(0x1000)), Some(pa(0x3000)));
        assert_eq!(space.physical_address(va(0x2000)), None);
        assert_eq!(space.physical_address(va(0x3000)), Some(pa(0x5000)));

        space.unmap(va(0x4000_0000), 0x4000_0000).expect("nothing mapped there");
        space.unmap(va(0), 0x10000).expect("holes are skipped");
        assert_eq!(space.physical_address(va(0x1000)), None);
        assert_eq!(space.physical_address(va(0x3000)), None);
    }

    #[test]
    fn unmap_refuses_to_split_large_pages() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        space.map(&mut alloc, va(0x20_0000), pa(0x20_0000), MIB2, MapAttributes::WRITABLE).expect("large");

        assert_eq!(
            space.unmap(va(0x20_1000), 0x1000),
            Err(MapError::SplitLargePage { virt: va(0x20_1000) })
        );
        space.unmap(va(0x20_0000), MIB2).expect("whole page");
        assert_eq!(space.physical_address(va(0x20_0000)), None);
    }

    #[test]
    fn unmapping_active_pages_invalidates_each_cleared_entry() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        let base = 0xffff_8000_0000_0000;
        space.map(&mut alloc, va(base), pa(0x3000), 0x2000, MapAttributes::WRITABLE).expect("pages");
        space.map(&mut alloc, va(base + MIB2), pa(0x40_0000), MIB2, MapAttributes::WRITABLE).expect("large");
        assert!(space.leaf_entry(va(base)).expect("mapped").global());

        let mut mmu = FakeMmu::default();
        unsafe { space.unmap_active(&mut mmu, va(base), 2 * MIB2) }.expect("unmap");

        // The hole between the base pages and the large page is skipped.
        assert_eq!(mmu.invalidated, vec![va(base), va(base + 0x1000), va(base + MIB2)]);
        assert_eq!(mmu.flushes, 0);
        assert_eq!(space.physical_address(va(base + MIB2)), None);
    }

    #[test]
    fn direct_map_widens_regions_to_pages() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        let hhdm = |p: u64| va(HHDM_BASE + p);

        space.map_direct(&mut alloc, &MemoryRegion::usable(0x1800, 0x1000)).expect("usable");
        space.map_direct(&mut alloc, &MemoryRegion::reserved(0xf_e000, 0x2000)).expect("reserved");
        space.map_direct(&mut alloc, &MemoryRegion::usable(0x5000, 0)).expect("empty region");

        assert_eq!(space.physical_address(hhdm(0x1000)), Some(pa(0x1000)));
        assert_eq!(space.physical_address(hhdm(0x2fff)), Some(pa(0x2fff)));
        assert_eq!(space.physical_address(hhdm(0x3000)), None);
        assert_eq!(space.physical_address(hhdm(0x5000)), None);
        assert!(space.leaf_entry(hhdm(0x1000)).expect("usable").writable());
        assert!(space.leaf_entry(hhdm(0xf_f000)).expect("device").cache_disable());
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        let w = MapAttributes::WRITABLE;
        let cases = [
            (0x1000, 0x1000, 0, MapError::EmptyRange),
            (0x1800, 0x1000, 0x1000, MapError::Unaligned),
            (0x1000, 0x1800, 0x1000, MapError::Unaligned),
            (0x1000, 0x1000, 0x1800, MapError::Unaligned),
            (0x0000_8000_0000_0000, 0x1000, 0x1000, MapError::NonCanonical),
            (0x0000_7fff_ffff_f000, 0x1000, 0x2000, MapError::NonCanonical),
            (0xffff_ffff_ffff_f000, 0x1000, 0x2000, MapError::WrapsAround),
            (0x1000, MAX_PHYSICAL_ADDRESS - 0xfff, 0x2000, MapError::WrapsAround),
        ];
        for (v, p, size, expected) in cases {
            assert_eq!(space.map(&mut alloc, va(v), pa(p), size, w), Err(expected), "{v:#x} {p:#x} {size:#x}");
        }
        assert_eq!(space.unmap(va(0x1000), 0), Err(MapError::EmptyRange));
        assert_eq!(alloc.remaining(), 62, "rejected requests allocate nothing");
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut root_alloc = BumpAlloc::new(pa(0x1000), 1);
        let mut space = AddressSpace::create(&mut root_alloc, TestPhys::new(8), PagingLayout::X86_64_4LEVEL).expect("root");
        let mut alloc = BumpAlloc::new(pa(0x2000), 2);

        let err = space
            .map(&mut alloc, va(0x1000), pa(0x1000), 0x1000, MapAttributes::WRITABLE)
            .unwrap_err();
        assert_eq!(err, MapError::OutOfMemory);
        assert!(!err.is_fatal());
        assert_eq!(space.physical_address(va(0x1000)), None);
    }

    #[test]
    fn three_level_layout_round_trip() {
        let (mut space, mut alloc) = space(PagingLayout::THREE_LEVEL_39);
        space
            .map(&mut alloc, va(0x40_0000_0000 - MIB2), pa(0x20_0000), MIB2 + 0x1000, MapAttributes::WRITABLE)
            .unwrap_err();

        space
            .map(&mut alloc, va(0x3f_c000_0000), pa(0x20_0000), MIB2 + 0x1000, MapAttributes::WRITABLE)
            .expect("map");
        assert!(space.leaf_entry(va(0x3f_c000_0000)).expect("mapped").large_page());
        assert_eq!(space.physical_address(va(0x3f_c020_0000)), Some(pa(0x40_0000)));

        let high = va(0xffff_ffc0_0000_0000);
        space.map(&mut alloc, high, pa(0x5000), 0x1000, MapAttributes::WRITABLE).expect("upper half");
        assert_eq!(space.physical_address(high), Some(pa(0x5000)));
        assert_eq!(space.virtual_address(pa(0x5000)), Some(high));
    }

    #[test]
    fn rebind_keeps_the_tree() {
        let (mut space, mut alloc) = space(PagingLayout::X86_64_4LEVEL);
        space.map(&mut alloc, va(0x1000), pa(0x7000), 0x1000, MapAttributes::WRITABLE).expect("map");
        let shared = space.mapper().clone();
        let root = space.root();
        let rebound = space.rebind(shared);
        assert_eq!(rebound.root(), root);
        assert_eq!(rebound.physical_address(va(0x1000)), Some(pa(0x7000)));
        rebound.dump();
    }
}
