//! # Kernel Virtual Memory Bring-Up
//!
//! Glue between the hardware and [`kernel_vmem::bootstrap`]:
//!
//! - the static root table, linked with a pointer to its upper-half child,
//! - a pool of table frames inside `.bss.boot` for use before any allocator
//!   exists,
//! - [`X86Mmu`], the control-register implementation of [`TranslationControl`],
//! - the trampoline that moves the running stack and return chain to
//!   [`KERNEL_BASE`].
//!
//! Everything in here up to the trampoline runs at the physical load address.
//! Pointers to statics are therefore computed RIP-relative and are physical,
//! while pointers stored in initialized data hold link-time virtual addresses.

use crate::frames::hand_off_regions;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_info::boot::{BootInfo, KernelBootInfo, MemoryRegion};
use kernel_info::memory::{BOOT_DIRECT_MAP_WINDOW, BOOT_TABLE_FRAMES, KERNEL_BASE};
use kernel_registers::cr0::Cr0;
use kernel_registers::cr3::Cr3;
use kernel_registers::cr4::Cr4;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_vmem::bootstrap::{
    BootError, BootPhase, Bootstrap, KernelImage, TranslationControl, relocate_frame_chain,
};
use kernel_vmem::{
    AddressSpace, FrameAlloc, HhdmPhysMapper, IdentityMapper, PageTable, PagingLayout, PhysMapper,
    PhysicalAddress, VirtualAddress,
};

/// The translation layout the kernel builds its tables for.
pub const LAYOUT: PagingLayout = PagingLayout::X86_64_4LEVEL;

/// A table whose entries the linker fills with link-time pointers.
#[repr(C, align(4096))]
struct LinkTimeTable([*const u8; 512]);

impl LinkTimeTable {
    const fn with_entry(index: usize, pointer: *const u8) -> Self {
        let mut entries = [core::ptr::null(); 512];
        entries[index] = pointer;
        Self(entries)
    }
}

const _: () = {
    assert!(size_of::<LinkTimeTable>() == size_of::<PageTable>());
    assert!(align_of::<LinkTimeTable>() == align_of::<PageTable>());
};

/// Level-1 table for the top 512 GiB, where [`KERNEL_BASE`] lives.
static mut KERNEL_HIGH_TABLE: PageTable = PageTable::zeroed();

/// The kernel's root table.
///
/// Entry 511 holds the *link address* of [`KERNEL_HIGH_TABLE`] with the
/// `present` and `writable` bits; the bootstrap fix-up rewrites it to the
/// physical address before the table is loaded.
static mut KERNEL_ROOT: LinkTimeTable = LinkTimeTable::with_entry(
    511,
    (&raw const KERNEL_HIGH_TABLE).cast::<u8>().wrapping_byte_add(0b11),
);

#[repr(C, align(4096))]
struct TablePool([PageTable; BOOT_TABLE_FRAMES]);

#[unsafe(link_section = ".bss.boot")]
static mut BOOT_TABLES: TablePool = TablePool([const { PageTable::zeroed() }; BOOT_TABLE_FRAMES]);

/// Hands out the frames of [`BOOT_TABLES`], by physical address.
///
/// Only valid while executing at the load address.
struct BootTablePool {
    next: usize,
}

impl BootTablePool {
    const fn new() -> Self {
        Self { next: 0 }
    }
}

impl FrameAlloc for BootTablePool {
    fn allocate_frame(&mut self) -> Option<PhysicalAddress> {
        if self.next == BOOT_TABLE_FRAMES {
            return None;
        }
        let base = (&raw mut BOOT_TABLES).cast::<PageTable>();
        let frame = base.wrapping_add(self.next);
        self.next += 1;
        Some(PhysicalAddress::new(frame.addr() as u64))
    }
}

/// Translation control over `CR0`, `CR3` and `CR4`.
#[derive(Debug, Default)]
pub struct X86Mmu;

impl TranslationControl for X86Mmu {
    fn is_enabled(&self) -> bool {
        // SAFETY: The kernel runs in ring 0.
        unsafe { Cr0::load_unsafe() }.paging()
    }

    unsafe fn load_root(&mut self, root: PhysicalAddress) {
        unsafe { Cr3::from_root_phys(root).store_unsafe() }
    }

    unsafe fn enable(&mut self) {
        unsafe {
            let cr4 = Cr4::load_unsafe();
            if !cr4.pge() {
                cr4.with_pge(true).store_unsafe();
            }
            Cr0::load_unsafe().with_paging_enabled().store_unsafe();
        }
    }

    unsafe fn flush(&mut self) {
        unsafe {
            let cr4 = Cr4::load_unsafe();
            if cr4.pge() {
                // Toggling PGE drops global entries as well.
                cr4.with_pge(false).store_unsafe();
                cr4.store_unsafe();
            } else {
                Cr3::load_unsafe().store_unsafe();
            }
        }
    }

    unsafe fn invalidate(&mut self, va: VirtualAddress) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
        }
    }
}

#[allow(non_upper_case_globals)]
unsafe extern "C" {
    static __kernel_start: u8;
    static __rodata_start: u8;
    static __data_start: u8;
    static __kernel_end: u8;
}

/// Section boundaries from the linker script.
///
/// Only differences between the symbols are used, so it does not matter
/// whether they resolve to load or link addresses. The physical base is the
/// runtime address of the entry point, which the linker script puts first.
fn kernel_image() -> KernelImage {
    #[allow(unused_unsafe)]
    let (start, rodata, data, end) = unsafe {
        (
            (&raw const __kernel_start).addr() as u64,
            (&raw const __rodata_start).addr() as u64,
            (&raw const __data_start).addr() as u64,
            (&raw const __kernel_end).addr() as u64,
        )
    };
    let link = |symbol: u64| VirtualAddress::new(KERNEL_BASE + symbol.wrapping_sub(start));
    KernelImage {
        phys_base: PhysicalAddress::new(crate::init::load_address()),
        code: VirtualAddress::new(KERNEL_BASE),
        rodata: link(rodata),
        data: link(data),
        end: link(end),
    }
}

/// Move execution by `offset`: rewrite the saved frame pointers and return
/// addresses between here and `stack_top`, then return into the upper half
/// on the upper-half alias of the stack.
///
/// ```text
///   rbp ─► [saved rbp ]  ◄─ rewritten by relocate_chain
///          [return    ]  ◄─ rewritten by relocate_chain
///          [caller ...]
/// ```
#[unsafe(naked)]
unsafe extern "C" fn relocate_execution(offset: u64, stack_top: u64) {
    core::arch::naked_asm!(
        "push rbp",
        "mov rbp, rsp",
        "push rdi",
        "push rsi",
        // relocate_chain(fp = rbp, stack_top = rsi, delta = rdi)
        "mov rdx, rdi",
        "mov rdi, rbp",
        "call {chain}",
        "pop rsi",
        "pop rdi",
        "add rsp, rdi",
        "pop rbp",
        "ret",
        chain = sym relocate_chain,
    );
}

extern "C" fn relocate_chain(fp: usize, stack_top: usize, delta: usize) -> usize {
    // SAFETY: `fp` is the trampoline's own frame on the boot stack, and
    // every frame up to `stack_top` was built with frame pointers.
    unsafe { relocate_frame_chain(fp, stack_top, delta) }
}

static BOOTSTRAPPED: AtomicBool = AtomicBool::new(false);

/// The kernel's address space after bring-up.
pub struct KernelMemory {
    pub space: AddressSpace<HhdmPhysMapper>,
    pub mmu: X86Mmu,
    pub image: KernelImage,
    /// Usable RAM already in the direct map, if the memory map had any.
    pub window: Option<MemoryRegion>,
}

/// Build the kernel tables, switch onto them, and continue in the upper half.
///
/// The direct map starts out with the image, the hand-off data at `info_pa`,
/// and a window of [`BOOT_DIRECT_MAP_WINDOW`] bytes of usable RAM. Returns at
/// [`KERNEL_BASE`] on the upper-half alias of the boot stack. Errors returned
/// from a phase before [`BootPhase::Relocated`] are returned at the load
/// address.
///
/// # Errors
/// Any [`BootError`]; there is no way to recover from one.
pub fn bootstrap(hand_off: &KernelBootInfo, info_pa: u64, stack_top: u64) -> Result<KernelMemory, BootError> {
    if BOOTSTRAPPED.swap(true, Ordering::AcqRel) {
        return Err(BootError::OutOfOrder {
            expected: BootPhase::Unmapped,
            actual: BootPhase::Relocated,
        });
    }

    // SAFETY: The kernel runs in ring 0.
    if unsafe { Cr4::load_unsafe() }.paging_levels() != LAYOUT.levels() {
        return Err(BootError::InvalidImage);
    }

    // SAFETY: The loader's memory map is reachable at its physical address
    // until the kernel's tables are active.
    let regions = unsafe {
        IdentityMapper.phys_to_slice::<MemoryRegion>(
            PhysicalAddress::new(hand_off.regions_ptr),
            crate::init::count(hand_off.regions_len),
        )
    };
    let window = BootInfo::new(regions).direct_map_window(BOOT_DIRECT_MAP_WINDOW);
    let [info, memory_map, cmdline, modules] = hand_off_regions(hand_off, info_pa);
    let early = [
        window.unwrap_or(MemoryRegion::usable(0, 0)),
        info,
        memory_map,
        cmdline,
        modules,
    ];

    let image = kernel_image();
    let root = PhysicalAddress::new((&raw const KERNEL_ROOT).addr() as u64);
    let mut pool = BootTablePool::new();
    let mut boot = Bootstrap::new(image, root, IdentityMapper, LAYOUT, X86Mmu)?;

    // The identity mapping of the image stays in place after relocation:
    // `hand_off` points into the boot stack at its physical address, and
    // callee-saved registers of the callers may hold such pointers too.
    //
    // SAFETY: The pool, the root, and the loader's memory map are reachable
    // at their physical addresses, and this is the only sequence touching
    // the translation registers.
    unsafe {
        boot.run(&mut pool, &early, |offset| relocate_execution(offset, stack_top))?;
    }

    let (space, mmu) = boot.into_address_space(HhdmPhysMapper)?;
    Ok(KernelMemory {
        space,
        mmu,
        image,
        window,
    })
}

/// Text for a bootstrap failure, printable without formatting.
#[must_use]
pub const fn describe(err: &BootError) -> &'static str {
    match err {
        BootError::OutOfOrder { .. } => "kernel: bootstrap step out of order\n",
        BootError::InvalidImage => "kernel: unusable kernel image or paging mode\n",
        BootError::MissingMapping { .. } => "kernel: kernel image not mapped\n",
        BootError::NotEnabled => "kernel: translation did not switch on\n",
        BootError::Map(_) => "kernel: failed to map kernel memory\n",
    }
}
