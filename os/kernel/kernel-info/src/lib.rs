//! # Kernel Configuration and Boot Interface
//!
//! Memory layout constants and the loader-to-kernel hand-off shared by the
//! kernel's `build.rs`, the bootstrap sequence and the frame allocator. This
//! crate is the single source of truth for where the kernel lives, both
//! physically and virtually.
//!
//! ## Architecture
//!
//! ### Boot Information ([`boot`])
//! Defines the loader-to-kernel handoff interface:
//! * **Kernel Entry Point**: Function signature and calling convention
//! * **Raw Hand-off**: [`KernelBootInfo`](boot::KernelBootInfo), physical pointers and lengths only
//! * **Borrowed View**: [`BootInfo`](boot::BootInfo) over the memory map, command line and modules
//!
//! ### Memory Layout ([`memory`])
//! Establishes the kernel's virtual memory architecture:
//! * **Higher Half Design**: Kernel execution at high virtual addresses
//! * **Physical Memory Mapping**: HHDM (Higher Half Direct Mapping) configuration
//! * **Bootstrap Resources**: Boot stack and boot page-table pool sizes
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! Virtual Address Space Layout (64-bit, 4-level paging):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │   Identity map of the kernel    │
//!                       │   image (bootstrap only)        │
//!                       ├─────────────────────────────────┤
//!                       │         (unused)                │
//! KERNEL_SPACE_START    ├─────────────────────────────────┤ 0xffff_8000_0000_0000
//!                       │   Guard Region                  │
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Mapping    │
//!                       │   (Physical Memory Access)      │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │   Kernel code / rodata / data   │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! Everything from [`KERNEL_SPACE_START`](memory::KERNEL_SPACE_START) upward
//! is identical in every address space and therefore mapped global.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory (< 1MiB)         │
//!             │  (never handed out)             │
//! PHYS_LOAD   ├─────────────────────────────────┤ 0x0010_0000 (1 MiB)
//!             │       Kernel Image              │
//!             │   (code, rodata, data, bss)     │
//!             ├─────────────────────────────────┤
//!             │    Available RAM                │
//!             │  (managed by the free list)     │
//!             └─────────────────────────────────┘
//! ```
//!
//! ## Usage Patterns
//!
//! ### Build Script Integration
//! ```rust
//! // In build.rs
//! use kernel_info::memory::{KERNEL_BASE, PHYS_LOAD};
//!
//! println!("cargo:rustc-link-arg=--defsym=KERNEL_BASE={:#x}", KERNEL_BASE);
//! println!("cargo:rustc-link-arg=--defsym=PHYS_LOAD={:#x}", PHYS_LOAD);
//! ```
//!
//! ### Consuming the Memory Map
//! ```rust
//! use kernel_info::boot::{BootInfo, MemoryRegion};
//!
//! let map = [MemoryRegion::usable(0x10_0000, 0x100_0000)];
//! let info = BootInfo::new(&map);
//! assert_eq!(info.usable_regions().count(), 1);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
