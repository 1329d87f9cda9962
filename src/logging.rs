//! A minimal `log::Log` implementation that serialises every write through
//! a single process-wide mutex, matching the runtime's "process-wide logging
//! mutex serialises log writes" rule so that interleaved net threads never
//! tear each other's lines.
//!
//! Consumers are free to install their own logger (`env_logger`, etc.)
//! instead — `init()` is opt-in, never called implicitly by the crate.

use std::io::Write;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};

struct SerialLogger {
    sink: Mutex<()>,
    level: LevelFilter,
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _guard = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        let stream: &mut dyn Write = &mut std::io::stderr();
        let _ = writeln!(
            stream,
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the runtime's default logger at the given level. Returns an
/// error if a logger is already installed (e.g. by the host application).
pub fn init(level: Level) -> Result<(), log::SetLoggerError> {
    static LOGGER_HOLDER: std::sync::OnceLock<SerialLogger> = std::sync::OnceLock::new();
    let logger = LOGGER_HOLDER.get_or_init(|| SerialLogger {
        sink: Mutex::new(()),
        level: level.to_level_filter(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level.to_level_filter());
    Ok(())
}
