//! Frames handed to page tables plus frames left on the list always add up
//! to what was seeded.

use kernel_alloc::{FrameAllocError, FreeFrameList};
use kernel_info::boot::MemoryRegion;
use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::{FrameIndex, PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_vmem::{AddressSpace, MapAttributes, MapError, PagingLayout, PhysMapper};
use std::cell::UnsafeCell;
use std::rc::Rc;

#[repr(C, align(4096))]
struct Frame([u8; 4096]);

#[derive(Clone)]
struct Ram(Rc<Vec<UnsafeCell<Frame>>>);

impl Ram {
    fn new(frames: usize) -> Self {
        Self(Rc::new((0..frames).map(|_| UnsafeCell::new(Frame([0xee; 4096]))).collect()))
    }
}

impl PhysMapper for Ram {
    fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        let index = usize::try_from(pa.as_u64() / PAGE_SIZE).unwrap();
        let offset = usize::try_from(pa.page_offset()).unwrap();
        unsafe { self.0[index].get().cast::<u8>().add(offset).cast() }
    }
}

fn table_count<M: PhysMapper>(space: &AddressSpace<M>) -> usize {
    let mut tables = 0;
    space.for_each_table(|_, _| tables += 1);
    tables
}

#[test]
fn tables_and_free_frames_add_up() {
    let ram = Ram::new(256);
    let mut frames = FreeFrameList::new(ram.clone());
    let regions = [MemoryRegion::usable(0, 256 * PAGE_SIZE)];
    let low = PhysicalAddress::zero()..PhysicalAddress::new(0x1000);
    let seeded = unsafe { frames.seed(&regions, &[low]) };
    assert_eq!(seeded, 255);

    let mut space = AddressSpace::create(&mut frames, ram, PagingLayout::X86_64_4LEVEL).expect("root");
    assert_eq!(frames.free_frames() + table_count(&space), seeded);

    let ranges = [
        (0x1000, 0x4000_0000, 0x3000),
        (0x4000_0000, 0x8000_0000, 0x40_0000),
        (0x7fff_ffe0_0000, 0x1000_0000, 0x1000),
        (0xffff_8000_0000_0000, 0x20_0000, 0x1000),
        (0xffff_ffff_8000_0000, 0x10_0000, 0x5000),
    ];
    for (virt, phys, size) in ranges {
        space
            .map(&mut frames, VirtualAddress::new(virt), PhysicalAddress::new(phys), size, MapAttributes::WRITABLE)
            .expect("map");
        assert_eq!(frames.free_frames() + table_count(&space), seeded);
    }

    // Unmapping leaves the tables in place.
    space.unmap(VirtualAddress::new(0x1000), 0x3000).expect("unmap");
    assert_eq!(frames.free_frames() + table_count(&space), seeded);

    for (virt, phys, size) in ranges {
        if virt == 0x1000 {
            assert_eq!(space.physical_address(VirtualAddress::new(virt)), None);
            continue;
        }
        let last = VirtualAddress::new(virt + size - PAGE_SIZE);
        assert_eq!(space.physical_address(last), Some(PhysicalAddress::new(phys + size - PAGE_SIZE)));
    }
}

#[test]
fn allocate_and_free_conserve_frames() {
    let ram = Ram::new(1200);
    let mut frames = FreeFrameList::new(ram);
    let regions = [MemoryRegion::usable(PAGE_SIZE, 1199 * PAGE_SIZE)];
    let seeded = unsafe { frames.seed(&regions, &[]) };
    assert_eq!(seeded, 1199);

    let mut held = Vec::new();
    for round in 0..5 {
        for _ in 0..(300 + round * 50) {
            held.push(frames.allocate().expect("frame"));
        }
        for frame in held.drain(..held.len() / 2) {
            unsafe { frames.free(frame) };
        }
        assert_eq!(frames.free_frames() + held.len(), seeded);
    }

    let mut unique: Vec<FrameIndex> = held.clone();
    while let Ok(frame) = frames.allocate() {
        unique.push(frame);
    }
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), seeded, "no frame handed out twice");
    assert_eq!(frames.allocate(), Err(FrameAllocError::Exhausted));
}

#[test]
fn map_reports_exhaustion_without_losing_frames() {
    let ram = Ram::new(8);
    let mut frames = FreeFrameList::new(ram.clone());
    let seeded = unsafe { frames.seed(&[MemoryRegion::usable(0x1000, 0x3000)], &[]) };
    let mut space = AddressSpace::create(&mut frames, ram, PagingLayout::X86_64_4LEVEL).expect("root");

    let err = space
        .map(&mut frames, VirtualAddress::new(0x1000), PhysicalAddress::new(0x1000), 0x1000, MapAttributes::WRITABLE)
        .unwrap_err();

    assert_eq!(err, MapError::OutOfMemory);
    assert!(frames.is_empty());
    assert_eq!(table_count(&space), seeded);
}

#[test]
fn direct_map_grows_from_window_frames() {
    const GIB: u64 = 0x4000_0000;
    let ram = Ram::new(96);
    let mut frames = FreeFrameList::new(ram.clone());
    let window = MemoryRegion::usable(PAGE_SIZE, 95 * PAGE_SIZE);
    let seeded = unsafe { frames.seed(&[window], &[]) };
    let mut space = AddressSpace::create(&mut frames, ram, PagingLayout::X86_64_4LEVEL).expect("root");

    space
        .map_direct(&mut frames, &MemoryRegion::usable(0, 64 * GIB))
        .expect("one table per GiB fits the window");

    // Root, one level-1 table, and 64 tables of 2 MiB pages.
    assert_eq!(table_count(&space), 66);
    assert_eq!(frames.free_frames() + table_count(&space), seeded);
    let top = VirtualAddress::new(HHDM_BASE + 64 * GIB - 0x1000);
    assert_eq!(space.physical_address(top), Some(PhysicalAddress::new(64 * GIB - 0x1000)));
}
