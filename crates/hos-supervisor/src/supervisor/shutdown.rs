//! Shutdown
//!
//! Applications go first so none of them sees a service vanish under it.
//! Service servers stop in the termination hook, after the applications
//! and before the kernel reaps the remaining service hosts.

use std::sync::Arc;

use hos_services::ServerBase;
use log::{error, info};

use super::Supervisor;
use crate::error::SupervisorError;

impl Supervisor {
    /// Tear the system down: unpause, then run the kernel termination
    /// protocol on every context. In the main context `display_teardown`
    /// runs once applications are gone, followed by the service servers.
    /// Registrations and table entries are dropped last.
    ///
    /// # Errors
    /// `Kernel(TerminationThreadStalled)` is fatal; the session must not
    /// continue.
    pub fn shutdown(
        &mut self,
        display_teardown: impl FnOnce() + Send + 'static,
    ) -> Result<(), SupervisorError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        if self.paused {
            self.toggle_pause_emulation(false);
        }

        if let Some(applet) = self.applet.as_mut() {
            let servers = applet.stop_order();
            applet
                .kernel()
                .terminate_all(move || stop_servers(&servers))
                .inspect_err(report)?;
            applet.deinitialize();
        }

        let servers = self.main.stop_order();
        self.main
            .kernel()
            .terminate_all(move || {
                display_teardown();
                stop_servers(&servers);
            })
            .inspect_err(report)?;
        self.main.deinitialize();
        info!("Shutdown complete");
        Ok(())
    }
}

fn stop_servers(servers: &[Arc<ServerBase>]) {
    for server in servers {
        server.stop();
    }
}

fn report(err: &hos_kernel::KernelError) {
    if err.is_fatal() {
        error!("Fatal: {}", err);
    } else {
        error!("Shutdown failed: {}", err);
    }
}
