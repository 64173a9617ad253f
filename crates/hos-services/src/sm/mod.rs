//! Service manager
//!
//! The registry every service is published in, and the `sm:` named port
//! guest code uses to look services up.

mod name;
mod registry;
mod user;

pub use name::{ServiceName, MAX_NAME_LEN};
pub use registry::SmRegistry;
pub use user::{MissingService, UserInterface};

use std::sync::Arc;

use hos_kernel::KernelContext;

use crate::command::shared;
use crate::error::ServiceResult;
use crate::server::{ServerBase, ServerOptions, ServiceFactory};

/// Name of the service manager's named port.
pub const SM_PORT_NAME: &str = "sm:";

/// Session limit of the `sm:` port.
pub const SM_MAX_SESSIONS: u32 = 50;

/// Register the `sm:` named port, start its server and signal the
/// registry's init-done event.
///
/// # Errors
/// `InvalidState` if `sm:` is already registered, or process creation
/// errors.
pub fn start_sm_server(
    kernel: &Arc<KernelContext>,
    registry: &Arc<SmRegistry>,
    ignore_missing: bool,
) -> ServiceResult<Arc<ServerBase>> {
    let port = kernel.register_named_port(SM_PORT_NAME, SM_MAX_SESSIONS)?;
    let factory: ServiceFactory = {
        let registry = Arc::clone(registry);
        Arc::new(move |_: &Arc<KernelContext>| {
            shared(UserInterface::new(Arc::clone(&registry), ignore_missing))
        })
    };
    let server = match ServerBase::start(
        kernel,
        SM_PORT_NAME,
        port,
        factory,
        ServerOptions::default(),
    ) {
        Ok(server) => server,
        Err(err) => {
            let _ = kernel.unregister_named_port(SM_PORT_NAME);
            return Err(err);
        }
    };
    registry.signal_init_done();
    Ok(server)
}
