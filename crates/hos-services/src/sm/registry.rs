//! Service registry
//!
//! Process-wide mapping from service name to the client side of the port
//! serving it. Registering a taken name fails and leaves the existing
//! registration untouched.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hos_kernel::{
    create_port, ClientPort, ClientSession, Event, KernelContext, KernelError, KernelEvent,
    ServerPort,
};
use log::info;

use super::name::ServiceName;
use crate::error::{ServiceResult, SmError};

pub struct SmRegistry {
    kernel: Arc<KernelContext>,
    services: Mutex<BTreeMap<ServiceName, Arc<ClientPort>>>,
    /// Signaled once the `sm:` server accepts connections.
    init_done: Arc<Event>,
}

impl SmRegistry {
    pub fn new(kernel: Arc<KernelContext>) -> Arc<Self> {
        Arc::new(Self {
            kernel,
            services: Mutex::new(BTreeMap::new()),
            init_done: Event::new(),
        })
    }

    fn services(&self) -> MutexGuard<'_, BTreeMap<ServiceName, Arc<ClientPort>>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a port for `name` and register its client side.
    ///
    /// # Errors
    /// * `AlreadyRegistered` - `name` is taken
    pub fn register(
        &self,
        name: &ServiceName,
        max_sessions: u32,
    ) -> Result<Arc<ServerPort>, SmError> {
        let (server, client) = create_port(name.as_str(), max_sessions);
        self.register_port(name, client)?;
        Ok(server)
    }

    /// Register an existing port.
    ///
    /// # Errors
    /// * `AlreadyRegistered` - `name` is taken
    pub fn register_port(&self, name: &ServiceName, port: Arc<ClientPort>) -> Result<(), SmError> {
        {
            let mut services = self.services();
            if services.contains_key(name) {
                return Err(SmError::AlreadyRegistered(name.to_string()));
            }
            services.insert(name.clone(), port);
        }
        info!("Registered service {}", name);
        self.kernel.log_event(KernelEvent::ServiceRegistered {
            name: name.to_string(),
        });
        Ok(())
    }

    /// # Errors
    /// * `NotRegistered` - nothing is registered under `name`
    pub fn unregister(&self, name: &ServiceName) -> Result<(), SmError> {
        self.services()
            .remove(name)
            .ok_or_else(|| SmError::NotRegistered(name.to_string()))?;
        info!("Unregistered service {}", name);
        self.kernel.log_event(KernelEvent::ServiceUnregistered {
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn get(&self, name: &ServiceName) -> Option<Arc<ClientPort>> {
        self.services().get(name).cloned()
    }

    /// Open a session to the service registered as `name`.
    ///
    /// # Errors
    /// * `NotRegistered` - nothing is registered under `name`
    /// * kernel errors from the port (closed, session limit)
    pub fn connect(&self, name: &ServiceName) -> ServiceResult<Arc<ClientSession>> {
        let port = self
            .get(name)
            .ok_or_else(|| SmError::NotRegistered(name.to_string()))?;
        Ok(port.connect()?)
    }

    pub fn contains(&self, name: &ServiceName) -> bool {
        self.services().contains_key(name)
    }

    pub fn names(&self) -> Vec<ServiceName> {
        self.services().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services().is_empty()
    }

    pub fn clear(&self) {
        self.services().clear();
    }

    pub fn init_done(&self) -> &Arc<Event> {
        &self.init_done
    }

    pub fn signal_init_done(&self) {
        self.init_done.signal();
    }

    /// Block until the `sm:` server is up.
    ///
    /// # Errors
    /// * `TimedOut` - `timeout` elapsed first
    pub fn wait_init_done(&self, timeout: Option<Duration>) -> Result<(), KernelError> {
        self.init_done.wait(timeout)
    }
}
