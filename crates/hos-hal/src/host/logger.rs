//! `log` facade bridge onto the HAL debug sink.

use std::sync::Arc;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::HAL;

/// Forwards `log` records to [`HAL::debug_write`], one line per record.
pub struct HostLogger {
    hal: Arc<dyn HAL>,
    level: LevelFilter,
}

impl HostLogger {
    pub fn new(hal: Arc<dyn HAL>, level: LevelFilter) -> Self {
        Self { hal, level }
    }

    /// Install as the global logger.
    ///
    /// Fails if a logger is already installed; the existing one is kept.
    pub fn install(self) -> Result<(), SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }

    fn format(record: &Record<'_>) -> String {
        format!(
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        )
    }
}

impl Log for HostLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.hal.debug_write(&Self::format(record));
        }
    }

    fn flush(&self) {}
}
