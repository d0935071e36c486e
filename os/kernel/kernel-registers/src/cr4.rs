use bitfield_struct::bitfield;

/// `CR4`. Only the bits relevant to paging are documented in detail.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr4 {
    /// Bit 0 — Virtual-8086 Mode Extensions.
    pub vme: bool,
    /// Bit 1 — Protected-Mode Virtual Interrupts.
    pub pvi: bool,
    /// Bit 2 — Time Stamp Disable.
    pub tsd: bool,
    /// Bit 3 — Debugging Extensions.
    pub de: bool,
    /// Bit 4 — Page Size Extensions.
    pub pse: bool,
    /// Bit 5 — Physical Address Extension, required for long mode.
    pub pae: bool,
    /// Bit 6 — Machine-Check Enable.
    pub mce: bool,
    /// Bit 7 — Page Global Enable.
    ///
    /// Lets entries with the `global` bit survive a root switch. Toggling it
    /// flushes every cached translation, global ones included.
    pub pge: bool,
    /// Bit 8 — Performance-Monitoring Counter Enable.
    pub pce: bool,
    /// Bit 9 — OS support for `FXSAVE`/`FXRSTOR`.
    pub osfxsr: bool,
    /// Bit 10 — OS support for unmasked SIMD exceptions.
    pub osxmmexcpt: bool,
    /// Bit 11 — User-Mode Instruction Prevention.
    pub umip: bool,
    /// Bit 12 — 57-bit linear addresses (five paging levels).
    pub la57: bool,
    /// Bit 13 — VMX Enable.
    pub vmxe: bool,
    /// Bit 14 — SMX Enable.
    pub smxe: bool,
    #[bits(1)]
    _reserved_15: bool,
    /// Bit 16 — `RDFSBASE` and friends.
    pub fsgsbase: bool,
    /// Bit 17 — Process-Context Identifiers.
    pub pcide: bool,
    /// Bit 18 — `XSAVE` and extended states.
    pub osxsave: bool,
    #[bits(1)]
    _reserved_19: bool,
    /// Bit 20 — Supervisor Mode Execution Prevention.
    pub smep: bool,
    /// Bit 21 — Supervisor Mode Access Prevention.
    pub smap: bool,
    /// Bit 22 — Protection Keys.
    pub pke: bool,
    #[bits(41)]
    _reserved_23_63: u64,
}

impl Cr4 {
    /// Number of translation levels the CPU walks in long mode.
    #[inline]
    #[must_use]
    pub const fn paging_levels(&self) -> usize {
        if self.la57() { 5 } else { 4 }
    }
}

#[cfg(feature = "asm")]
crate::control_register!(Cr4, "cr4");
