use crate::qemu_trace;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing to the QEMU debug console.
///
/// Lines are formatted as `[LEVEL] target: message`.
pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Register this logger and raise the global level to its own.
    ///
    /// Until this is called every `log` macro is a no-op.
    ///
    /// # Errors
    /// A logger was already installed.
    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

fn write_record<W: Write>(out: &mut W, record: &Record) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        qemu_trace!("{}", LogLine(record));
    }

    fn flush(&self) {}
}

/// Adapter so a record is formatted straight into the port.
struct LogLine<'a, 'b>(&'a Record<'b>);

impl fmt::Display for LogLine<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_record(f, self.0)
    }
}
