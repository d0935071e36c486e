//! # Bootstrap Sequence
//!
//! Brings up the kernel address space exactly once per boot. The kernel's
//! root table is a static whose entries were initialized by the linker with
//! *link-time virtual* pointers; the hardware walker reads them as physical
//! addresses, so they have to be rewritten before the table is ever loaded.
//!
//! ```text
//!  Unmapped ──fix_up──► FixedUp ──map_kernel──► KernelMapped ──activate──► Active ──relocate──► Relocated
//!                                                 │        ▲
//!                                                 └────────┘
//!                                                 map_direct
//! ```
//!
//! | Phase          | Executing at | Tables reached through |
//! |----------------|--------------|------------------------|
//! | `Unmapped`     | physical     | identity               |
//! | `FixedUp`      | physical     | identity               |
//! | `KernelMapped` | physical     | identity               |
//! | `Active`       | physical (identity mapping of the image) | identity mapping |
//! | `Relocated`    | high virtual | direct map             |
//!
//! Every step requires the previous phase; there is no way back. Any failure
//! leaves the machine without usable virtual memory, so the caller is expected
//! to halt.

mod control;
mod image;
mod stack;

pub use crate::bootstrap::control::TranslationControl;
pub use crate::bootstrap::image::{KernelImage, Section};
pub use crate::bootstrap::stack::relocate_frame_chain;
use crate::address_space::{AddressSpace, MapError, table_at};
use crate::entry::PageTableEntry;
use crate::layout::PagingLayout;
use crate::page_table::PageTable;
use crate::{FrameAlloc, PhysMapper};
use kernel_info::boot::MemoryRegion;
use kernel_info::memory::KERNEL_SPACE_START;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::{debug, info};

/// Progress of the bootstrap sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum BootPhase {
    Unmapped,
    FixedUp,
    KernelMapped,
    Active,
    Relocated,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
    #[error("bootstrap step requires phase {expected:?}, but is in {actual:?}")]
    OutOfOrder { expected: BootPhase, actual: BootPhase },
    #[error("kernel image boundaries are misaligned or out of order")]
    InvalidImage,
    #[error("kernel image is not mapped at {virt}")]
    MissingMapping { virt: VirtualAddress },
    #[error("translation did not turn on")]
    NotEnabled,
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Rewrite link-time virtual pointers in the first `entries` words of `table`.
///
/// A present entry whose address part (the raw word without its low twelve
/// attribute bits) lies inside the image is reduced by the image offset, so
/// `link_va | flags` becomes `(link_va - offset) | flags`. Returns the number
/// of rewritten entries. Entries already holding physical addresses are left
/// alone, which makes the rewrite idempotent.
pub fn fix_up_table(table: &mut PageTable, entries: usize, image: &KernelImage) -> usize {
    let mut fixed = 0;
    for index in 0..entries {
        let raw = table.entry(index).into_bits();
        if raw & 1 == 0 {
            continue;
        }
        let target = VirtualAddress::new(raw & !0xfff);
        if image.contains(target) {
            table.set_entry(index, PageTableEntry::from_bits(raw.wrapping_sub(image.offset())));
            fixed += 1;
        }
    }
    fixed
}

/// Drives the kernel address space through the [`BootPhase`]s.
pub struct Bootstrap<M: PhysMapper, C: TranslationControl> {
    phase: BootPhase,
    image: KernelImage,
    space: AddressSpace<M>,
    control: C,
}

impl<M: PhysMapper, C: TranslationControl> Bootstrap<M, C> {
    /// Prepare the sequence for the static root table at `root`.
    ///
    /// The image's own high range is forced global even if it lies below
    /// [`KERNEL_SPACE_START`].
    ///
    /// # Errors
    /// [`BootError::InvalidImage`] if the image fails validation.
    pub fn new(
        image: KernelImage,
        root: PhysicalAddress,
        mapper: M,
        layout: PagingLayout,
        control: C,
    ) -> Result<Self, BootError> {
        image.validate(layout.page_size())?;
        if !root.is_aligned(layout.page_size()) {
            return Err(BootError::InvalidImage);
        }
        let kernel_region = if image.code.as_u64() < KERNEL_SPACE_START {
            image.code
        } else {
            VirtualAddress::new(KERNEL_SPACE_START)
        };
        Ok(Self {
            phase: BootPhase::Unmapped,
            image,
            space: AddressSpace::new(root, mapper, layout).with_kernel_region(kernel_region),
            control,
        })
    }

    #[inline]
    #[must_use]
    pub const fn phase(&self) -> BootPhase {
        self.phase
    }

    #[inline]
    #[must_use]
    pub const fn image(&self) -> &KernelImage {
        &self.image
    }

    #[inline]
    #[must_use]
    pub const fn address_space(&self) -> &AddressSpace<M> {
        &self.space
    }

    #[inline]
    #[must_use]
    pub const fn control(&self) -> &C {
        &self.control
    }

    fn require(&self, expected: BootPhase) -> Result<(), BootError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(BootError::OutOfOrder {
                expected,
                actual: self.phase,
            })
        }
    }

    fn advance(&mut self, next: BootPhase) {
        info!("vmem bootstrap: {:?} -> {next:?}", self.phase);
        self.phase = next;
    }

    /// Convert the root table's link-time pointers to physical ones.
    ///
    /// # Errors
    /// [`BootError::OutOfOrder`] unless in [`BootPhase::Unmapped`].
    pub fn fix_up(&mut self) -> Result<usize, BootError> {
        self.require(BootPhase::Unmapped)?;
        let entries = self.space.layout().entries(0);
        // SAFETY: the root is a static table inside the image, reachable
        // through the mapper and not otherwise borrowed.
        let root: &mut PageTable = unsafe { table_at(self.space.mapper(), self.space.root()) };
        let fixed = fix_up_table(root, entries, &self.image);
        debug!("fixed up {fixed} root entries");
        self.advance(BootPhase::FixedUp);
        Ok(fixed)
    }

    /// Map the image twice: at its load address and at its link address.
    ///
    /// # Errors
    /// - [`BootError::OutOfOrder`] unless in [`BootPhase::FixedUp`].
    /// - [`BootError::Map`] if a table could not be allocated or the image
    ///   overlaps an incompatible mapping.
    pub fn map_kernel<A: FrameAlloc>(&mut self, alloc: &mut A) -> Result<(), BootError> {
        self.require(BootPhase::FixedUp)?;
        for section in self.image.sections() {
            if section.len == 0 {
                continue;
            }
            let phys = self
                .image
                .to_physical(section.virt)
                .ok_or(BootError::InvalidImage)?;
            let attrs = section.attributes();
            debug!(
                "kernel {}: {} (+{:#x}) at {phys}, writable={}",
                section.name, section.virt, section.len, section.writable
            );
            self.space
                .map(alloc, VirtualAddress::new(phys.as_u64()), phys, section.len, attrs)?;
            self.space.map(alloc, section.virt, phys, section.len, attrs)?;
        }
        self.advance(BootPhase::KernelMapped);
        Ok(())
    }

    /// Map `regions` and the kernel image at `HHDM_BASE + pa`.
    ///
    /// Usable RAM is mapped writable and cacheable, every other region as
    /// device memory. Large pages are used where alignment permits. Tables
    /// come from `alloc`, so `regions` should only hold what the kernel needs
    /// before it has a frame allocator of its own; the rest can be mapped
    /// later through [`AddressSpace::map_direct`].
    ///
    /// # Errors
    /// - [`BootError::OutOfOrder`] unless in [`BootPhase::KernelMapped`].
    /// - [`BootError::Map`] as for [`map_kernel`](Self::map_kernel).
    pub fn map_direct<A: FrameAlloc>(&mut self, alloc: &mut A, regions: &[MemoryRegion]) -> Result<(), BootError> {
        self.require(BootPhase::KernelMapped)?;
        let image = MemoryRegion::usable(self.image.phys_base.as_u64(), self.image.size());
        for region in regions.iter().chain([&image]) {
            self.space.map_direct(alloc, region)?;
        }
        Ok(())
    }

    /// Load the root and switch translation on.
    ///
    /// Before loading, both views of the image are checked to resolve to its
    /// load address.
    ///
    /// # Errors
    /// - [`BootError::OutOfOrder`] unless in [`BootPhase::KernelMapped`].
    /// - [`BootError::MissingMapping`] if either view of the image is absent.
    /// - [`BootError::NotEnabled`] if translation is still off afterwards.
    ///
    /// # Safety
    /// The running code, its stack, and everything touched until
    /// [`relocate`](Self::relocate) must lie inside the image.
    pub unsafe fn activate(&mut self) -> Result<(), BootError> {
        self.require(BootPhase::KernelMapped)?;
        let image = self.image;
        let identity = VirtualAddress::new(image.phys_base.as_u64());
        for virt in [identity, image.code] {
            if self.space.physical_address(virt) != Some(image.phys_base) {
                return Err(BootError::MissingMapping { virt });
            }
        }

        let was_enabled = self.control.is_enabled();
        unsafe {
            self.space.load(&mut self.control);
            self.control.enable();
            if was_enabled {
                // Also drops the loader's global translations.
                self.control.flush();
            }
        }
        if !self.control.is_enabled() {
            return Err(BootError::NotEnabled);
        }
        self.advance(BootPhase::Active);
        Ok(())
    }

    /// Move execution into the high view of the image.
    ///
    /// `trampoline` receives the image offset; it must advance the stack and
    /// frame pointers and the pending return addresses (see
    /// [`relocate_frame_chain`]) and return through the rewritten frames.
    ///
    /// # Errors
    /// [`BootError::OutOfOrder`] unless in [`BootPhase::Active`].
    ///
    /// # Safety
    /// The trampoline rewrites the stack this function is running on.
    pub unsafe fn relocate<F: FnOnce(u64)>(&mut self, trampoline: F) -> Result<(), BootError> {
        self.require(BootPhase::Active)?;
        self.advance(BootPhase::Relocated);
        trampoline(self.image.offset());
        Ok(())
    }

    /// Run every step from [`fix_up`](Self::fix_up) through
    /// [`relocate`](Self::relocate).
    ///
    /// # Errors
    /// The first error of any step.
    ///
    /// # Safety
    /// As for [`activate`](Self::activate) and [`relocate`](Self::relocate).
    pub unsafe fn run<A: FrameAlloc, F: FnOnce(u64)>(
        &mut self,
        alloc: &mut A,
        regions: &[MemoryRegion],
        trampoline: F,
    ) -> Result<(), BootError> {
        self.fix_up()?;
        self.map_kernel(alloc)?;
        self.map_direct(alloc, regions)?;
        unsafe {
            self.activate()?;
            self.relocate(trampoline)
        }
    }

    /// The finished kernel address space, reached through `mapper` from now on.
    ///
    /// # Errors
    /// [`BootError::OutOfOrder`] unless in [`BootPhase::Relocated`].
    pub fn into_address_space<N: PhysMapper>(self, mapper: N) -> Result<(AddressSpace<N>, C), BootError> {
        self.require(BootPhase::Relocated)?;
        Ok((self.space.rebind(mapper), self.control))
    }
}
