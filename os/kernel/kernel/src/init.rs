//! # Early Entry
//!
//! The loader jumps to [`_start_kernel`] at the kernel's physical load address
//! with translation still in the loader's hands. This module switches onto
//! the boot stack, brings up the kernel's own address space through
//! [`vmem::bootstrap`], and continues in [`kernel_main`] at [`KERNEL_BASE`].
//!
//! [`KERNEL_BASE`]: kernel_info::memory::KERNEL_BASE

use crate::frames;
use crate::halt;
use crate::vmem::{self, KernelMemory};
use kernel_info::boot::{BootInfo, BootModule, KernelBootInfo, MemoryRegion};
use kernel_info::memory::BOOT_STACK_SIZE;
use kernel_qemu::{QemuLogger, qemu_puts};
use kernel_vmem::{HhdmPhysMapper, PhysMapper, PhysicalAddress};
use log::{LevelFilter, error, info, warn};

#[repr(align(16))]
struct Aligned16<const N: usize>([u8; N]);

/// Stack of the bootstrap processor from entry onwards.
///
/// Used at its physical address until relocation, and through its upper-half
/// alias afterwards.
#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_STACK: Aligned16<BOOT_STACK_SIZE> = Aligned16([0; BOOT_STACK_SIZE]);

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);

/// The kernel entry point.
///
/// # ABI
/// System V (`extern "C"`): the loader passes the physical address of the
/// [`KernelBootInfo`] in `RDI`.
///
/// # Naked function & Stack
/// Sets up the boot stack before any Rust code runs. The pushed zero return
/// address and the cleared frame pointer terminate the frame chain that the
/// relocation trampoline walks.
#[unsafe(no_mangle)]
#[unsafe(naked)]
#[unsafe(link_section = ".text._start_kernel")]
pub unsafe extern "C" fn _start_kernel(_boot_info: *const KernelBootInfo) -> ! {
    core::arch::naked_asm!(
        "cli",
        // keep boot_info out of the way while building the stack
        "mov r12, rdi",
        "lea rax, [rip + {stack}]",
        "add rax, {stack_size}",
        "and rax, -16",
        "mov rsp, rax",
        // emulate a call: RSP % 16 == 8 at entry, zero return address
        "push 0",
        "xor rbp, rbp",
        "mov rdi, r12",
        "jmp {entry}",
        stack = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        entry = sym kernel_entry,
    );
}

/// Address the image is executing from right now.
///
/// The linker script places [`_start_kernel`] at the very start of the image,
/// so before relocation this is the physical load address.
#[must_use]
pub fn load_address() -> u64 {
    _start_kernel as usize as u64
}

/// Physical top of [`BOOT_STACK`]. Only meaningful before relocation.
fn boot_stack_top() -> u64 {
    let base = (&raw const BOOT_STACK).addr() as u64;
    (base + BOOT_STACK_SIZE as u64) & !0xf
}

extern "C" fn kernel_entry(boot_info: *const KernelBootInfo) -> ! {
    qemu_puts("kernel: entered at load address\n");
    if boot_info.is_null() {
        qemu_puts("kernel: no boot info\n");
        halt();
    }

    // SAFETY: The loader passes a valid pointer, reachable at its physical
    // address until the kernel's tables are active.
    let hand_off = unsafe { boot_info.read() };
    let info_pa = boot_info.addr() as u64;

    match vmem::bootstrap(&hand_off, info_pa, boot_stack_top()) {
        Ok(memory) => kernel_main(memory, &hand_off, info_pa),
        Err(err) => {
            qemu_puts(vmem::describe(&err));
            halt()
        }
    }
}

/// First code running at the link address.
fn kernel_main(mut memory: KernelMemory, hand_off: &KernelBootInfo, info_pa: u64) -> ! {
    if LOGGER.install().is_err() {
        qemu_puts("kernel: logger already installed\n");
    }
    info!(
        "running at {:#x}, kernel root table at {}",
        load_address(),
        memory.space.root()
    );

    // SAFETY: The bootstrap direct-mapped the loader's hand-off data.
    let boot = unsafe { boot_info(hand_off, &HhdmPhysMapper) };
    if let Some(cmdline) = boot.command_line {
        info!("command line: {cmdline}");
    }
    info!(
        "{} memory regions, physical memory up to {:#x}",
        boot.memory_map.len(),
        boot.physical_top()
    );

    let mut frames = frames::init(&boot, hand_off, info_pa, &mut memory);
    info!("{} free frames", frames.free_frames());

    match frames::self_test(&mut memory, &mut frames) {
        Ok(()) => info!("map/unmap self-test passed"),
        Err(e) => warn!("map/unmap self-test failed: {e}"),
    }

    memory.space.dump();
    if frames.is_empty() {
        error!("no usable memory left");
    }

    info!("kernel initialized, idling");
    halt()
}

/// Borrowed view of the raw hand-off.
///
/// # Safety
/// Every pointer in `raw` must be reachable through `mapper` for the rest of
/// the kernel's lifetime.
unsafe fn boot_info<M: PhysMapper>(raw: &KernelBootInfo, mapper: &M) -> BootInfo<'static> {
    let memory_map = unsafe {
        mapper.phys_to_slice::<MemoryRegion>(PhysicalAddress::new(raw.regions_ptr), count(raw.regions_len))
    };
    let modules = if raw.modules_ptr == 0 {
        &[]
    } else {
        unsafe {
            mapper.phys_to_slice::<BootModule>(PhysicalAddress::new(raw.modules_ptr), count(raw.modules_len))
        }
    };
    let command_line = if raw.cmdline_ptr == 0 {
        None
    } else {
        let bytes = unsafe { mapper.phys_to_slice::<u8>(PhysicalAddress::new(raw.cmdline_ptr), count(raw.cmdline_len)) };
        core::str::from_utf8(bytes).ok()
    };
    BootInfo {
        memory_map,
        command_line,
        modules,
    }
}

pub fn count(len: u64) -> usize {
    usize::try_from(len).unwrap_or_default()
}
