//! # Intrusive Free-Frame List
//!
//! Free frames are tracked without any memory of their own: some free frames
//! are used as *descriptors*, each holding the indices of up to [`SLOTS`]
//! other free frames and the index of the next descriptor.
//!
//! ```text
//!   head ─► ┌──────────────┐      ┌──────────────┐
//!           │ next ────────┼────► │ next = NONE  │
//!           │ len = 3      │      │ len = 510    │
//!           │ slots[0..3]  │      │ slots[..]    │
//!           └──────────────┘      └──────────────┘
//!            (a free frame)        (a free frame)
//! ```
//!
//! - `allocate` pops the last slot of the head descriptor. A descriptor with
//!   no slots left is itself handed out, and its successor becomes the head.
//! - `free` pushes into the head descriptor; if it is full (or there is none),
//!   the freed frame becomes the new head descriptor.
//!
//! Whether a frame holds payload or a descriptor is modelled by
//! [`FrameContents`]. The switch between both views happens in exactly two
//! places, `promote` and `retire`.

use crate::FrameAllocError;
use core::ops::Range;
use kernel_info::boot::MemoryRegion;
use kernel_memory_addresses::{FrameIndex, PAGE_SIZE, PhysicalAddress};
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::{debug, trace};

/// Frame indices a descriptor can hold.
pub const SLOTS: usize = 510;

const NO_NEXT: u64 = u64::MAX;

/// A free frame acting as list descriptor.
#[repr(C)]
#[derive(Copy, Clone)]
struct FreeFrameNode {
    /// Frame index of the next descriptor, or [`NO_NEXT`].
    next: u64,
    /// Occupied prefix of `slots`.
    len: u64,
    slots: [u64; SLOTS],
}

/// The two interpretations of a free frame.
#[repr(C, align(4096))]
union FrameContents {
    payload: [u8; 4096],
    node: FreeFrameNode,
}

const _: () = {
    assert!(size_of::<FreeFrameNode>() == 4096);
    assert!(size_of::<FrameContents>() as u64 == PAGE_SIZE);
};

/// Turn the free frame `frame` into an empty descriptor linked to `next`.
///
/// # Safety
/// `frame` must be free, reachable through `mapper`, and not referenced
/// anywhere else.
unsafe fn promote<M: PhysMapper>(mapper: &M, frame: FrameIndex, next: Option<FrameIndex>) {
    let contents = mapper.phys_to_ptr::<FrameContents>(frame.base());
    unsafe {
        contents.write(FrameContents {
            node: FreeFrameNode {
                next: next.map_or(NO_NEXT, FrameIndex::as_u64),
                len: 0,
                slots: [0; SLOTS],
            },
        });
    }
}

/// Turn the empty descriptor `frame` back into a cleared payload frame and
/// return its successor.
///
/// # Safety
/// `frame` must be a descriptor of this list with no slots in use.
unsafe fn retire<M: PhysMapper>(mapper: &M, frame: FrameIndex) -> Option<FrameIndex> {
    let contents = mapper.phys_to_ptr::<FrameContents>(frame.base());
    unsafe {
        let next = (*contents).node.next;
        contents.write(FrameContents { payload: [0; 4096] });
        (next != NO_NEXT).then_some(FrameIndex::new(next))
    }
}

/// Physical frame allocator over an intrusive list of free frames.
pub struct FreeFrameList<M: PhysMapper> {
    mapper: M,
    head: Option<FrameIndex>,
    free: usize,
}

impl<M: PhysMapper> FreeFrameList<M> {
    /// An empty list; frames are added with [`free`](Self::free) or
    /// [`seed`](Self::seed).
    #[must_use]
    pub const fn new(mapper: M) -> Self {
        Self {
            mapper,
            head: None,
            free: 0,
        }
    }

    /// Number of free frames, descriptors included.
    #[inline]
    #[must_use]
    pub const fn free_frames(&self) -> usize {
        self.free
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Whether the next [`free`](Self::free) is stored in a slot rather than
    /// becoming a new descriptor.
    #[must_use]
    pub fn head_has_capacity(&self) -> bool {
        self.head.is_some_and(|head| {
            let contents = self.mapper.phys_to_ptr::<FrameContents>(head.base());
            // SAFETY: the head is a descriptor owned by this list.
            unsafe { ((*contents).node.len as usize) < SLOTS }
        })
    }

    fn head_node(&mut self) -> Option<&mut FreeFrameNode> {
        let head = self.head?;
        let contents = self.mapper.phys_to_ptr::<FrameContents>(head.base());
        // SAFETY: the head is a descriptor owned by this list.
        Some(unsafe { &mut (*contents).node })
    }

    /// Take one frame off the list.
    ///
    /// The frame's contents are unspecified, except for former descriptors,
    /// which are returned cleared.
    ///
    /// # Errors
    /// [`FrameAllocError::Exhausted`] if no frame is left.
    pub fn allocate(&mut self) -> Result<FrameIndex, FrameAllocError> {
        let head = self.head.ok_or(FrameAllocError::Exhausted)?;
        let node = self.head_node().ok_or(FrameAllocError::Exhausted)?;
        let frame = if node.len > 0 {
            node.len -= 1;
            #[allow(clippy::cast_possible_truncation)]
            let slot = node.len as usize;
            FrameIndex::new(node.slots[slot])
        } else {
            // SAFETY: the head has no slots in use.
            self.head = unsafe { retire(&self.mapper, head) };
            head
        };
        self.free -= 1;
        trace!("allocated {frame}");
        Ok(frame)
    }

    /// Return `frame` to the list.
    ///
    /// # Safety
    /// `frame` must be unused, reachable through the mapper, and must not
    /// already be on the list.
    pub unsafe fn free(&mut self, frame: FrameIndex) {
        if self.head_has_capacity()
            && let Some(node) = self.head_node()
        {
            #[allow(clippy::cast_possible_truncation)]
            let slot = node.len as usize;
            node.slots[slot] = frame.as_u64();
            node.len += 1;
        } else {
            // SAFETY: the caller hands the frame over to us.
            unsafe { promote(&self.mapper, frame, self.head) };
            self.head = Some(frame);
        }
        self.free += 1;
    }

    /// Free every whole frame of every usable region that does not overlap
    /// one of the `reserved` ranges. Returns the number of frames added.
    ///
    /// # Safety
    /// The usable regions must describe RAM reachable through the mapper, and
    /// every frame in use (kernel image, boot tables, boot data) must be
    /// covered by `reserved`.
    pub unsafe fn seed(&mut self, regions: &[MemoryRegion], reserved: &[Range<PhysicalAddress>]) -> usize {
        let mut added = 0;
        for region in regions.iter().filter(|r| r.is_usable()) {
            let Some(start) = kernel_memory_addresses::align_up(region.base, PAGE_SIZE) else {
                continue;
            };
            let end = kernel_memory_addresses::align_down(region.end(), PAGE_SIZE);
            let mut pa = start;
            while pa < end {
                let frame = PhysicalAddress::new(pa);
                let taken = reserved
                    .iter()
                    .any(|r| r.start.align_down(PAGE_SIZE) <= frame && frame < r.end);
                if !taken {
                    // SAFETY: usable, not reserved, and visited once.
                    unsafe { self.free(frame.frame()) };
                    added += 1;
                }
                pa += PAGE_SIZE;
            }
        }
        debug!("seeded {added} free frames ({} KiB)", added * 4);
        added
    }
}

impl<M: PhysMapper> FrameAlloc for FreeFrameList<M> {
    #[inline]
    fn allocate_frame(&mut self) -> Option<PhysicalAddress> {
        self.allocate().ok().map(FrameIndex::base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestPhys;

    fn frames(list: &mut FreeFrameList<TestPhys>) -> Vec<u64> {
        core::iter::from_fn(|| list.allocate().ok()).map(FrameIndex::as_u64).collect()
    }

    #[test]
    fn empty_list_is_exhausted() {
        let mut list = FreeFrameList::new(TestPhys::new(1));
        assert!(list.is_empty());
        assert!(!list.head_has_capacity());
        assert_eq!(list.allocate(), Err(FrameAllocError::Exhausted));
        assert_eq!(list.allocate_frame(), None);
    }

    #[test]
    fn first_free_becomes_the_descriptor() {
        let mut list = FreeFrameList::new(TestPhys::new(8));
        unsafe {
            list.free(FrameIndex::new(3));
            list.free(FrameIndex::new(5));
            list.free(FrameIndex::new(6));
        }
        assert_eq!(list.free_frames(), 3);
        assert!(list.head_has_capacity());

        // Slots are popped last-in first-out, the descriptor itself goes last.
        assert_eq!(frames(&mut list), vec![6, 5, 3]);
        assert!(list.is_empty());
        assert_eq!(list.free_frames(), 0);
    }

    #[test]
    fn retired_descriptor_is_cleared() {
        let phys = TestPhys::new(4);
        let mut list = FreeFrameList::new(phys.clone());
        unsafe {
            list.free(FrameIndex::new(2));
            list.free(FrameIndex::new(1));
        }
        assert_eq!(list.allocate(), Ok(FrameIndex::new(1)));
        assert_eq!(list.allocate(), Ok(FrameIndex::new(2)));
        assert!(phys.bytes(FrameIndex::new(2).base()).iter().all(|&b| b == 0));
    }

    #[test]
    fn full_descriptor_chains_a_new_one() {
        let total = SLOTS as u64 + 3;
        let mut list = FreeFrameList::new(TestPhys::new(total as usize + 1));
        for i in 1..=total {
            unsafe { list.free(FrameIndex::new(i)) };
        }
        // Frame 1 holds slots 2..=511; frame 512 heads a second descriptor.
        assert_eq!(list.free_frames(), total as usize);
        assert!(list.head_has_capacity());

        let mut all = frames(&mut list);
        assert_eq!(&all[..2], &[513, 512]);
        all.sort_unstable();
        assert_eq!(all, (1..=total).collect::<Vec<_>>());
    }

    #[test]
    fn freeing_after_exhaustion_restarts_the_list() {
        let mut list = FreeFrameList::new(TestPhys::new(4));
        unsafe { list.free(FrameIndex::new(1)) };
        assert_eq!(list.allocate(), Ok(FrameIndex::new(1)));
        assert!(list.is_empty());

        unsafe { list.free(FrameIndex::new(2)) };
        assert_eq!(list.allocate_frame(), Some(PhysicalAddress::new(0x2000)));
    }

    #[test]
    fn seeding_skips_reserved_and_partial_frames() {
        let mut list = FreeFrameList::new(TestPhys::new(32));
        let regions = [
            MemoryRegion::usable(0x800, 0x4800),
            MemoryRegion::reserved(0x5000, 0x1000),
            MemoryRegion::usable(0x8000, 0x8000),
        ];
        let reserved = [
            PhysicalAddress::new(0x9000)..PhysicalAddress::new(0xb000),
            PhysicalAddress::new(0xc800)..PhysicalAddress::new(0xc900),
        ];

        let added = unsafe { list.seed(&regions, &reserved) };

        let mut got = frames(&mut list);
        got.sort_unstable();
        assert_eq!(got, vec![1, 2, 3, 4, 8, 0xb, 0xd, 0xe, 0xf]);
        assert_eq!(added, got.len());
    }
}
