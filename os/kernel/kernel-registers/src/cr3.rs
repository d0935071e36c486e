use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// `CR3` with PCID disabled: the active translation root.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    #[bits(3)]
    _reserved_0_2: u8,

    /// Bit 3 — Page-level Write-Through for root table accesses.
    pub write_through: bool,

    /// Bit 4 — Page-level Cache Disable for root table accesses.
    pub cache_disable: bool,

    #[bits(7)]
    _reserved_5_11: u8,

    /// Bits 12–51 — Root table frame number.
    #[bits(40)]
    root_frame: u64,

    #[bits(12)]
    _reserved_52_63: u16,
}

impl Cr3 {
    /// Point at the root table in frame `root` with write-back caching.
    ///
    /// The low twelve bits of `root` are ignored.
    #[inline]
    #[must_use]
    pub const fn from_root_phys(root: PhysicalAddress) -> Self {
        Self::new().with_root_frame(root.as_u64() >> 12)
    }

    /// Physical address of the root table.
    #[inline]
    #[must_use]
    pub const fn root_phys(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.root_frame() << 12)
    }
}

#[cfg(feature = "asm")]
crate::control_register!(Cr3, "cr3");
