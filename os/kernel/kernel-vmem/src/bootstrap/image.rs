use crate::bootstrap::BootError;
use crate::entry::MapAttributes;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Where the kernel image was linked and where it was loaded.
///
/// The linker places the image at consecutive, page-aligned virtual addresses
/// (`code ≤ rodata ≤ data ≤ end`) and loads it at `phys_base`. All four virtual
/// boundaries share the same constant offset to their physical location.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KernelImage {
    pub phys_base: PhysicalAddress,
    /// Start of executable code (link address).
    pub code: VirtualAddress,
    /// Start of read-only data.
    pub rodata: VirtualAddress,
    /// Start of read-write data and `.bss`.
    pub data: VirtualAddress,
    /// End of the image, exclusive.
    pub end: VirtualAddress,
}

/// One region of the kernel image and the attributes it is mapped with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Section {
    pub name: &'static str,
    pub virt: VirtualAddress,
    pub len: u64,
    pub writable: bool,
}

impl Section {
    #[inline]
    #[must_use]
    pub const fn attributes(&self) -> MapAttributes {
        if self.writable {
            MapAttributes::WRITABLE
        } else {
            MapAttributes::READ_ONLY
        }
    }
}

impl KernelImage {
    /// Virtual-minus-physical distance of the image.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.code.as_u64().wrapping_sub(self.phys_base.as_u64())
    }

    /// Size of the whole image in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end.as_u64().saturating_sub(self.code.as_u64())
    }

    /// Physical end of the image, exclusive.
    #[inline]
    #[must_use]
    pub const fn phys_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_base.as_u64() + self.size())
    }

    /// Whether the link address `va` lies inside the image.
    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.code.as_u64() && va.as_u64() < self.end.as_u64()
    }

    /// Physical location of the image address `va`.
    #[inline]
    #[must_use]
    pub const fn to_physical(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        if self.contains(va) {
            Some(PhysicalAddress::new(va.as_u64() - self.offset()))
        } else {
            None
        }
    }

    /// Check alignment and ordering of the boundaries.
    ///
    /// # Errors
    /// [`BootError::InvalidImage`] if any boundary is not `page` aligned, the
    /// boundaries are out of order, the image is empty, or it is linked below
    /// its load address.
    pub const fn validate(&self, page: u64) -> Result<(), BootError> {
        let aligned = self.phys_base.is_aligned(page)
            && self.code.is_aligned(page)
            && self.rodata.is_aligned(page)
            && self.data.is_aligned(page)
            && self.end.is_aligned(page);
        let ordered = self.code.as_u64() <= self.rodata.as_u64()
            && self.rodata.as_u64() <= self.data.as_u64()
            && self.data.as_u64() <= self.end.as_u64()
            && self.code.as_u64() < self.end.as_u64();
        if aligned && ordered && self.code.as_u64() >= self.phys_base.as_u64() {
            Ok(())
        } else {
            Err(BootError::InvalidImage)
        }
    }

    /// Code and read-only data are mapped read-only, data writable.
    #[must_use]
    pub const fn sections(&self) -> [Section; 3] {
        [
            Section {
                name: "text",
                virt: self.code,
                len: self.rodata.as_u64() - self.code.as_u64(),
                writable: false,
            },
            Section {
                name: "rodata",
                virt: self.rodata,
                len: self.data.as_u64() - self.rodata.as_u64(),
                writable: false,
            },
            Section {
                name: "data",
                virt: self.data,
                len: self.end.as_u64() - self.data.as_u64(),
                writable: true,
            },
        ]
    }
}
