//! Service table
//!
//! The named services started at boot, each with the factory that builds
//! one instance per accepted session.

mod ldn;
mod ns;
mod settings;

pub use ldn::{LdnState, MonitorService, MonitorServiceCreator};
pub use ns::ApplicationManager;
pub use settings::{FirmwareVersion, SystemSettings, FIRMWARE_VERSION_SIZE};

use std::sync::Arc;

use hos_kernel::KernelContext;

use crate::command::{shared, ServiceCommands};
use crate::error::{ServiceResult, SmError};
use crate::server::{ServerBase, ServerOptions, ServiceFactory};
use crate::sm::{ServiceName, SmRegistry};

/// Session limit for table services.
pub const DEFAULT_MAX_SESSIONS: u32 = 32;

/// One named service.
#[derive(Clone)]
pub struct ServiceEntry {
    pub name: ServiceName,
    pub max_sessions: u32,
    pub factory: ServiceFactory,
}

impl ServiceEntry {
    /// Publish the service in `registry` and start its server.
    ///
    /// # Errors
    /// * `AlreadyRegistered` - the name is taken; nothing is started
    /// * process creation errors; the registration is rolled back
    pub fn start(
        &self,
        kernel: &Arc<KernelContext>,
        registry: &SmRegistry,
        options: ServerOptions,
    ) -> ServiceResult<Arc<ServerBase>> {
        let port = registry.register(&self.name, self.max_sessions)?;
        ServerBase::start(
            kernel,
            self.name.as_str(),
            port,
            Arc::clone(&self.factory),
            options,
        )
        .inspect_err(|_| {
            let _ = registry.unregister(&self.name);
        })
    }
}

fn factory_of<S: ServiceCommands + Default>() -> ServiceFactory {
    Arc::new(|_: &Arc<KernelContext>| shared(S::default()))
}

/// Ordered list of named services.
#[derive(Clone, Default)]
pub struct ServiceTable {
    entries: Vec<ServiceEntry>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `set:sys`, `ldn:m` and `ns:am`.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for (name, factory) in [
            ("set:sys", factory_of::<SystemSettings>()),
            ("ldn:m", factory_of::<MonitorServiceCreator>()),
            ("ns:am", factory_of::<ApplicationManager>()),
        ] {
            // Names are distinct and valid.
            let _ = table.add(name, DEFAULT_MAX_SESSIONS, factory);
        }
        table
    }

    /// # Errors
    /// * `InvalidName` / `AlreadyRegistered`
    pub fn add(
        &mut self,
        name: &str,
        max_sessions: u32,
        factory: ServiceFactory,
    ) -> Result<(), SmError> {
        let name = ServiceName::new(name)?;
        if self.entries.iter().any(|entry| entry.name == name) {
            return Err(SmError::AlreadyRegistered(name.to_string()));
        }
        self.entries.push(ServiceEntry {
            name,
            max_sessions,
            factory,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[ServiceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = ServiceTable::with_defaults();
        let names: Vec<&str> = table.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["set:sys", "ldn:m", "ns:am"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut table = ServiceTable::with_defaults();
        let result = table.add("ns:am", 4, factory_of::<ApplicationManager>());
        assert_eq!(result, Err(SmError::AlreadyRegistered("ns:am".into())));
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.add("too-long-name", 4, factory_of::<ApplicationManager>()),
            Err(SmError::InvalidName)
        );
    }
}
