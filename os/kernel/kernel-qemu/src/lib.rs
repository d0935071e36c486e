//! # QEMU Debug Output
//!
//! Diagnostics for a kernel running under QEMU, written byte by byte to the
//! debug console port `0x402`:
//!
//! ```bash
//! qemu-system-x86_64 ... -debugcon stdio
//! ```
//!
//! | Entry point      | Formatting | Usable                                               |
//! |------------------|------------|------------------------------------------------------|
//! | [`qemu_puts`]    | none       | always, including before the kernel runs at its link address |
//! | [`qemu_trace!`]  | `core::fmt`| once the kernel runs at its link address             |
//! | [`QemuLogger`]   | `log`      | once installed                                       |
//!
//! Formatting goes through `core::fmt` vtables holding link-time addresses, so
//! only [`qemu_puts`] may be used while the kernel still executes from its
//! physical load address.
//!
//! ## Feature `enabled` (default)
//!
//! Without it every output function compiles to nothing and no port I/O is
//! emitted.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.install().expect("logger installed once");
//! info!("kernel mapped");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

/// Write `s` verbatim to the debug console. Never formats.
#[inline]
pub fn qemu_puts(s: &str) {
    qemu_fmt::write_bytes(s.as_bytes());
}

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// QEMU's debug console port.
    const QEMU_DEBUG_PORT: u16 = 0x402;

    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    #[inline]
    pub fn write_bytes(bytes: &[u8]) {
        for &b in bytes {
            dbg_putc(b);
        }
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            write_bytes(s.as_bytes());
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best effort; the sink itself never fails.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn write_bytes(_: &[u8]) {}

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// `print!`-style output to the debug console, without allocation.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
