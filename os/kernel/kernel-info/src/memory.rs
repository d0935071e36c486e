//! # Memory Layout

/// Start of the canonical upper half. Everything at or above this address is
/// kernel space, shared by every address space, and mapped global.
pub const KERNEL_SPACE_START: u64 = 0xffff_8000_0000_0000;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything mapped at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset once translation is active.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel executes (VMA), matches the linker script.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Where the kernel image sits in *physical* memory (LMA) before translation.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Physical memory below this address is never handed to the frame allocator
/// (real-mode IVT, BIOS data, VGA, option ROMs).
pub const LOW_MEMORY_END: u64 = 0x0010_0000;

/// The size of the boot stack the bootstrap sequence runs on.
pub const BOOT_STACK_SIZE: usize = 64 * 1024;

/// Number of page-table frames reserved in the kernel image for the
/// bootstrap sequence, before the frame allocator exists.
pub const BOOT_TABLE_FRAMES: usize = 64;

/// Usable RAM the bootstrap sequence puts into the direct map, on top of the
/// kernel image and the hand-off data. The rest of physical memory is mapped
/// later with tables taken from this window.
pub const BOOT_DIRECT_MAP_WINDOW: u64 = 64 * 1024 * 1024;

const _: () = {
    assert!(BOOT_STACK_SIZE.is_multiple_of(4096));
    assert!(PHYS_LOAD.is_multiple_of(4096));
    assert!(KERNEL_BASE.is_multiple_of(0x20_0000));
    assert!(HHDM_BASE >= KERNEL_SPACE_START);
    assert!(KERNEL_BASE > HHDM_BASE);
    assert!(LOW_MEMORY_END <= PHYS_LOAD);
    assert!(BOOT_DIRECT_MAP_WINDOW.is_multiple_of(0x20_0000));
};
