//! # Typed `X86_64` Control Registers
//!
//! Bitfield models of the control registers the paging code touches.
//!
//! | Register | Role here                                                  |
//! |----------|------------------------------------------------------------|
//! | [`Cr0`]  | `PG` (translation on) and `WP` (honor read-only pages)     |
//! | [`Cr3`]  | Physical address of the active translation root            |
//! | [`Cr4`]  | `PGE` (global pages), `LA57` (number of paging levels)     |
//!
//! The models are plain values and usable on any host. Reading and writing
//! the actual registers requires the `asm` feature and ring 0.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "cr4")]
pub mod cr4;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The register access is privileged and requires ring 0.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the register-specific requirements, e.g. a
    /// valid translation root for `CR3`. Requires ring 0.
    unsafe fn store_unsafe(self);
}

/// Generates the `mov` based load/store pair for a `u64` bitfield register.
#[cfg(feature = "asm")]
macro_rules! control_register {
    ($ty:ty, $name:literal) => {
        impl $crate::LoadRegisterUnsafe for $ty {
            #[inline]
            unsafe fn load_unsafe() -> Self {
                let bits: u64;
                unsafe {
                    core::arch::asm!(
                        concat!("mov {}, ", $name),
                        out(reg) bits,
                        options(nomem, nostack, preserves_flags)
                    );
                }
                Self::from_bits(bits)
            }
        }

        impl $crate::StoreRegisterUnsafe for $ty {
            #[inline]
            unsafe fn store_unsafe(self) {
                let bits = self.into_bits();
                unsafe {
                    core::arch::asm!(
                        concat!("mov ", $name, ", {}"),
                        in(reg) bits,
                        options(nostack, preserves_flags)
                    );
                }
            }
        }
    };
}

#[cfg(feature = "asm")]
pub(crate) use control_register;
