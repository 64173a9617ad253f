//! Service lifecycle

use log::info;

use super::Supervisor;
use crate::constants::SM_INIT_TIMEOUT;
use crate::error::SupervisorError;

impl Supervisor {
    /// Start `sm:` and the service table on the active context. Named
    /// servers start only after the service manager signals it is ready.
    ///
    /// # Errors
    /// * `AlreadyInitialized` - services are running
    /// * `Service(Sm(AlreadyRegistered))` - a table entry's name is taken;
    ///   later entries are not started
    pub fn initialize_services(&mut self) -> Result<(), SupervisorError> {
        let ignore_missing = self.config.ignore_missing_services;
        let context = self.active_context();
        self.server_set_mut()
            .initialize(ignore_missing, SM_INIT_TIMEOUT)?;
        info!("Services initialized ({:?} context)", context);
        Ok(())
    }

    /// Stop the active context's named servers newest first, then `sm:`,
    /// then clear its registry and service table.
    pub fn deinitialize_services(&mut self) {
        self.server_set_mut().deinitialize();
    }
}
