//! # Kernel Frame Allocation
//!
//! The physical frame allocator of the kernel. Free frames are kept in an
//! intrusive list that stores its bookkeeping inside the free frames
//! themselves, so the allocator needs no memory of its own and can be seeded
//! straight from the boot memory map.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              kernel_vmem::AddressSpace              │
//! │    • allocates page tables through FrameAlloc       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              FreeFrameList (this crate)             │
//! │    • 4 KiB frames, O(1) allocate and free           │
//! │    • descriptors live in free frames                │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ PhysMapper
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical memory                        │
//! │    • identity before activation, HHDM after         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_alloc::FreeFrameList;
//! use kernel_info::boot::MemoryRegion;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::HhdmPhysMapper;
//!
//! let regions = [MemoryRegion::usable(0x10_0000, 0x100_0000)];
//! let kernel = PhysicalAddress::new(0x10_0000)..PhysicalAddress::new(0x20_0000);
//!
//! let mut frames = FreeFrameList::new(HhdmPhysMapper);
//! let seeded = unsafe { frames.seed(&regions, &[kernel]) };
//! let frame = frames.allocate()?;
//! unsafe { frames.free(frame) };
//! assert_eq!(frames.free_frames(), seeded);
//! # Ok::<(), kernel_alloc::FrameAllocError>(())
//! ```
//!
//! ## Concurrency
//!
//! The list is not synchronized. It is owned by the single boot-time kernel
//! context; sharing it between cores requires an external lock.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod free_list;

pub use crate::free_list::FreeFrameList;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("no free physical frames left")]
    Exhausted,
}

#[cfg(test)]
pub(crate) mod test_support {
    use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
    use kernel_vmem::PhysMapper;
    use std::cell::UnsafeCell;
    use std::rc::Rc;

    #[repr(C, align(4096))]
    struct Frame([u8; 4096]);

    /// Simulated RAM: frame `n` lives at physical address `n * 4096`.
    #[derive(Clone)]
    pub struct TestPhys {
        frames: Rc<Vec<UnsafeCell<Frame>>>,
    }

    impl TestPhys {
        pub fn new(frames: usize) -> Self {
            Self {
                frames: Rc::new((0..frames).map(|_| UnsafeCell::new(Frame([0xa5; 4096]))).collect()),
            }
        }

        pub fn bytes(&self, pa: PhysicalAddress) -> &[u8] {
            unsafe { &*self.phys_to_ptr::<[u8; 4096]>(pa) }
        }
    }

    impl PhysMapper for TestPhys {
        fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
            let index = usize::try_from(pa.as_u64() / PAGE_SIZE).expect("index fits");
            let offset = usize::try_from(pa.page_offset()).expect("offset fits");
            let frame = self
                .frames
                .get(index)
                .unwrap_or_else(|| panic!("{pa} outside simulated RAM"));
            unsafe { frame.get().cast::<u8>().add(offset).cast() }
        }
    }
}
