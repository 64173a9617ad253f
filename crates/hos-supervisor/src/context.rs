//! Emulation contexts
//!
//! The main context always exists; an applet context can be attached
//! next to it. Each owns a kernel and the servers running on it.

use std::sync::Arc;
use std::time::Duration;

use hos_kernel::KernelContext;
use hos_services::{
    start_sm_server, ServerBase, ServerOptions, ServiceTable, SmRegistry, SM_PORT_NAME,
};
use log::{info, warn};

use crate::error::SupervisorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextKind {
    Main,
    Applet,
}

/// Which context registry and server access goes to. The applet context
/// is only chosen when one is attached.
pub fn select_context(is_applet: bool, applet_attached: bool) -> ContextKind {
    if is_applet && applet_attached {
        ContextKind::Applet
    } else {
        ContextKind::Main
    }
}

// =============================================================================
// Server Set
// =============================================================================

/// A kernel, its service registry and the servers started on it.
pub struct ServerSet {
    kernel: Arc<KernelContext>,
    registry: Arc<SmRegistry>,
    table: ServiceTable,
    sm: Option<Arc<ServerBase>>,
    servers: Vec<Arc<ServerBase>>,
}

impl ServerSet {
    pub fn new(kernel: Arc<KernelContext>, table: ServiceTable) -> Self {
        let registry = SmRegistry::new(Arc::clone(&kernel));
        Self {
            kernel,
            registry,
            table,
            sm: None,
            servers: Vec::new(),
        }
    }

    pub fn kernel(&self) -> &Arc<KernelContext> {
        &self.kernel
    }

    pub fn registry(&self) -> &Arc<SmRegistry> {
        &self.registry
    }

    pub fn table(&self) -> &ServiceTable {
        &self.table
    }

    /// Services added here start on the next `initialize`.
    pub fn table_mut(&mut self) -> &mut ServiceTable {
        &mut self.table
    }

    pub fn sm_server(&self) -> Option<&Arc<ServerBase>> {
        self.sm.as_ref()
    }

    /// Named servers in start order.
    pub fn servers(&self) -> &[Arc<ServerBase>] {
        &self.servers
    }

    pub fn server(&self, name: &str) -> Option<&Arc<ServerBase>> {
        self.servers.iter().find(|server| server.name() == name)
    }

    pub fn is_initialized(&self) -> bool {
        self.sm.is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sm.iter().chain(&self.servers).map(|s| s.session_count()).sum()
    }

    /// Start `sm:`, wait for it to report ready, then start every table
    /// entry in order. The first failure aborts; servers already started
    /// stay up until `deinitialize`.
    pub fn initialize(
        &mut self,
        ignore_missing: bool,
        timeout: Duration,
    ) -> Result<(), SupervisorError> {
        if self.is_initialized() {
            return Err(SupervisorError::AlreadyInitialized);
        }
        self.sm = Some(start_sm_server(&self.kernel, &self.registry, ignore_missing)?);
        self.registry.wait_init_done(Some(timeout))?;

        for entry in self.table.entries() {
            let server = entry.start(&self.kernel, &self.registry, ServerOptions::default())?;
            self.servers.push(server);
        }
        info!("{} services started", self.servers.len());
        Ok(())
    }

    /// Every running server in the order they must stop: service servers
    /// newest first, `sm:` last.
    pub fn stop_order(&self) -> Vec<Arc<ServerBase>> {
        self.servers
            .iter()
            .rev()
            .chain(self.sm.as_ref())
            .cloned()
            .collect()
    }

    /// Stop named servers newest first, then `sm:`, then forget every
    /// registration and table entry.
    pub fn deinitialize(&mut self) {
        while let Some(server) = self.servers.pop() {
            server.stop();
        }
        if let Some(sm) = self.sm.take() {
            sm.stop();
            if let Err(err) = self.kernel.unregister_named_port(SM_PORT_NAME) {
                warn!("Failed to unregister {}: {}", SM_PORT_NAME, err);
            }
        }
        self.registry.clear();
        self.table.clear();
    }
}
