use bitfield_struct::bitfield;

/// `CR0` in 64-bit mode. Reserved bits are kept at zero.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr0 {
    /// Bit 0 — Protection Enable (PE).
    pub protection_enable: bool,

    /// Bit 1 — Monitor Coprocessor (MP).
    pub monitor_coprocessor: bool,

    /// Bit 2 — Emulation (EM); x87 instructions fault when set.
    pub emulation: bool,

    /// Bit 3 — Task Switched (TS).
    pub task_switched: bool,

    /// Bit 4 — Extension Type (ET), hardwired to 1 on modern CPUs.
    pub extension_type: bool,

    /// Bit 5 — Numeric Error (NE).
    pub numeric_error: bool,

    #[bits(10)]
    _reserved_6_15: u16,

    /// Bit 16 — Write Protect (WP).
    ///
    /// When set, ring 0 faults on writes to read-only pages as well. Without
    /// it the read-only kernel text mapping would not be enforced.
    pub write_protect: bool,

    #[bits(1)]
    _reserved_17: bool,

    /// Bit 18 — Alignment Mask (AM).
    pub alignment_mask: bool,

    #[bits(10)]
    _reserved_19_28: u16,

    /// Bit 29 — Not Write-through (NW).
    pub not_write_through: bool,

    /// Bit 30 — Cache Disable (CD).
    pub cache_disable: bool,

    /// Bit 31 — Paging (PG).
    pub paging: bool,

    #[bits(32)]
    _reserved_32_63: u32,
}

impl Cr0 {
    /// Bits set to switch translation on: `PG | WP`.
    pub const PAGING_ENABLE: Self = Self::new().with_paging(true).with_write_protect(true);

    /// This value with translation and write protection switched on.
    #[inline]
    #[must_use]
    pub const fn with_paging_enabled(self) -> Self {
        Self::from_bits(self.into_bits() | Self::PAGING_ENABLE.into_bits())
    }
}

#[cfg(feature = "asm")]
crate::control_register!(Cr0, "cr0");
