//! Logger installation
//!
//! Library crates only emit `log` records; the supervisor is the one place
//! that installs a sink.

use std::sync::Arc;

use hos_hal::host::HostLogger;
use hos_hal::HAL;
use log::LevelFilter;

/// Install [`HostLogger`] over `hal` as the global logger.
///
/// Returns false if a logger was already installed; that logger is kept
/// and the call is otherwise a no-op.
pub fn init(hal: Arc<dyn HAL>, level: LevelFilter) -> bool {
    HostLogger::new(hal, level).install().is_ok()
}
