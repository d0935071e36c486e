//! # Physical Frame Setup
//!
//! Builds the kernel's [`FreeFrameList`] once the kernel runs in the upper
//! half. The bootstrap only direct-mapped a window of usable RAM, so this
//! happens in three steps:
//!
//! 1. seed the list from the window,
//! 2. direct-map every memory-map region, with tables taken from the list,
//! 3. seed the rest of the usable RAM.
//!
//! Every frame the kernel already uses is held back:
//!
//! | Range                          | Holds                                   |
//! |--------------------------------|-----------------------------------------|
//! | `0 .. LOW_MEMORY_END`          | firmware data, real-mode leftovers      |
//! | kernel image                   | code, data, boot stack, boot tables     |
//! | boot info, memory map, cmdline | the loader hand-off, still referenced   |
//! | module table and modules       | images loaded next to the kernel        |

use crate::vmem::KernelMemory;
use core::ops::Range;
use kernel_alloc::{FrameAllocError, FreeFrameList};
use kernel_info::boot::{BootInfo, BootModule, KernelBootInfo, MemoryRegion};
use kernel_info::memory::{KERNEL_SPACE_START, LOW_MEMORY_END};
use kernel_memory_addresses::PAGE_SIZE;
use kernel_vmem::address_space::MapError;
use kernel_vmem::bootstrap::KernelImage;
use kernel_vmem::{HhdmPhysMapper, MapAttributes, PhysMapper, PhysicalAddress, VirtualAddress};
use log::{debug, warn};

/// Page used by [`self_test`]; nothing else maps the bottom of kernel space.
const SCRATCH_PAGE: u64 = KERNEL_SPACE_START;

const PATTERN: u64 = 0x5eed_f00d_cafe_d00d;

#[derive(Debug, thiserror::Error)]
pub enum SelfTestError {
    #[error(transparent)]
    Frames(#[from] FrameAllocError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error("scratch page and direct map disagree")]
    Mismatch,
}

fn span(base: u64, len: u64) -> Range<PhysicalAddress> {
    PhysicalAddress::new(base)..PhysicalAddress::new(base.saturating_add(len))
}

fn region_span(region: &MemoryRegion) -> Range<PhysicalAddress> {
    span(region.base, region.length)
}

/// Boot info, memory map, command line, and module table, as regions.
#[must_use]
pub fn hand_off_regions(hand_off: &KernelBootInfo, info_pa: u64) -> [MemoryRegion; 4] {
    [
        MemoryRegion::usable(info_pa, size_of::<KernelBootInfo>() as u64),
        MemoryRegion::usable(
            hand_off.regions_ptr,
            hand_off.regions_len.saturating_mul(size_of::<MemoryRegion>() as u64),
        ),
        MemoryRegion::usable(hand_off.cmdline_ptr, hand_off.cmdline_len),
        MemoryRegion::usable(
            hand_off.modules_ptr,
            hand_off.modules_len.saturating_mul(size_of::<BootModule>() as u64),
        ),
    ]
}

/// Everything [`init`] must not hand out. The window comes last.
fn reserved_ranges(
    boot: &BootInfo<'_>,
    hand_off: &KernelBootInfo,
    info_pa: u64,
    image: &KernelImage,
    window: &MemoryRegion,
) -> [Range<PhysicalAddress>; 8] {
    let modules = boot
        .modules
        .iter()
        .fold(None, |acc: Option<(u64, u64)>, m| match acc {
            None => Some((m.start, m.end)),
            Some((lo, hi)) => Some((lo.min(m.start), hi.max(m.end))),
        })
        .map_or(span(0, 0), |(lo, hi)| span(lo, hi.saturating_sub(lo)));
    let [info, memory_map, cmdline, module_table] = hand_off_regions(hand_off, info_pa);

    [
        span(0, LOW_MEMORY_END),
        image.phys_base..image.phys_end(),
        region_span(&info),
        region_span(&memory_map),
        region_span(&cmdline),
        region_span(&module_table),
        modules,
        region_span(window),
    ]
}

/// Build the frame allocator from the memory map and complete the direct
/// map on the way.
///
/// If the direct map cannot be completed, only the window is handed out.
pub fn init(
    boot: &BootInfo<'_>,
    hand_off: &KernelBootInfo,
    info_pa: u64,
    memory: &mut KernelMemory,
) -> FreeFrameList<HhdmPhysMapper> {
    let mut frames = FreeFrameList::new(HhdmPhysMapper);
    let Some(window) = memory.window else {
        warn!("no usable memory in the memory map");
        return frames;
    };

    let reserved = reserved_ranges(boot, hand_off, info_pa, &memory.image, &window);
    for r in &reserved {
        debug!("reserved {}..{}", r.start, r.end);
    }
    let (in_use, _) = reserved.split_at(reserved.len() - 1);

    // SAFETY: The bootstrap direct-mapped the window, and every frame in use
    // lies in one of the reserved ranges.
    unsafe { frames.seed(&[window], in_use) };

    for region in boot.memory_map {
        if let Err(e) = memory.space.map_direct(&mut frames, region) {
            warn!("direct map ends before {:#x}: {e}", region.base);
            return frames;
        }
    }

    // SAFETY: The direct map now covers all usable RAM. The window was
    // seeded above and is held back here together with everything in use.
    unsafe { frames.seed(boot.memory_map, &reserved) };
    frames
}

/// Map a fresh frame at [`SCRATCH_PAGE`], write through it, read the value
/// back through the direct map, and release everything again.
///
/// Exercises table allocation from the free list and invalidation of a
/// global page on unmap.
///
/// # Errors
/// Allocation or mapping failures, or [`SelfTestError::Mismatch`] if the
/// two views of the frame disagree.
pub fn self_test(
    memory: &mut KernelMemory,
    frames: &mut FreeFrameList<HhdmPhysMapper>,
) -> Result<(), SelfTestError> {
    let frame = frames.allocate()?.base();
    let va = VirtualAddress::new(SCRATCH_PAGE);
    memory
        .space
        .map(frames, va, frame, PAGE_SIZE, MapAttributes::WRITABLE)?;

    let translated = memory.space.physical_address(va);

    // SAFETY: The page was just mapped writable and nothing else uses it.
    let seen = unsafe {
        va.as_mut_ptr::<u64>().write_volatile(PATTERN);
        HhdmPhysMapper.phys_to_ptr::<u64>(frame).read_volatile()
    };

    // SAFETY: The kernel root is the active one.
    unsafe { memory.space.unmap_active(&mut memory.mmu, va, PAGE_SIZE)? };
    // SAFETY: The frame is no longer mapped at the scratch page.
    unsafe { frames.free(frame.frame()) };

    if translated == Some(frame) && seen == PATTERN && memory.space.physical_address(va).is_none() {
        Ok(())
    } else {
        Err(SelfTestError::Mismatch)
    }
}
