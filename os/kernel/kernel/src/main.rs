//! # Kernel Entry Point
//!
//! Boot proceeds in two halves that never mix:
//!
//! ```text
//!  _start_kernel ──► kernel_entry ──► vmem::bootstrap ──┐        (physical)
//!                                                        │ relocate_execution
//!  kernel_main  ◄────────────────────────────────────────┘        (KERNEL_BASE)
//!      ├── install logger
//!      ├── seed the free-frame list from the boot window
//!      ├── direct-map the rest of the memory map, seed the rest
//!      └── idle
//! ```
//!
//! Before relocation the image executes at the address the loader put it, so
//! only position-independent code is allowed: no formatting, no `log` output,
//! only [`kernel_qemu::qemu_puts`].

#![cfg_attr(target_os = "none", no_std, no_main)]
#![allow(unsafe_code)]

#[cfg(target_os = "none")]
mod frames;
#[cfg(target_os = "none")]
mod init;
#[cfg(target_os = "none")]
mod vmem;

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("kernel panic: {info}");
    halt()
}

/// Park the CPU for good.
#[cfg(target_os = "none")]
pub fn halt() -> ! {
    loop {
        // SAFETY: Interrupts stay off; nothing will wake us.
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
