//! `sm:` user interface

use std::sync::Arc;

use hos_ipc::result::sm;
use hos_kernel::KernelObject;
use log::{debug, warn};

use super::name::ServiceName;
use super::registry::SmRegistry;
use crate::command::{Command, CommandInfo, IpcService, ServiceCommands};
use crate::context::ServiceCtx;
use crate::error::{ServiceError, ServiceResult, SmError};

/// One client's `sm:` session.
pub struct UserInterface {
    registry: Arc<SmRegistry>,
    ignore_missing: bool,
    initialized: bool,
}

impl UserInterface {
    pub fn new(registry: Arc<SmRegistry>, ignore_missing: bool) -> Self {
        Self {
            registry,
            ignore_missing,
            initialized: false,
        }
    }

    fn ensure_initialized(&self) -> ServiceResult {
        if self.initialized {
            Ok(())
        } else {
            Err(ServiceError::Result(sm::INVALID_CLIENT))
        }
    }

    fn initialize(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        debug!("sm: initialized by {}", ctx.client().name());
        self.initialized = true;
        Ok(())
    }

    fn get_service(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        self.ensure_initialized()?;
        let name = ServiceName::from_u64(ctx.read_u64()?)?;
        match self.registry.connect(&name) {
            Ok(session) => {
                ctx.move_out(KernelObject::ClientSession(session));
                Ok(())
            }
            Err(ServiceError::Sm(SmError::NotRegistered(_))) if self.ignore_missing => {
                warn!("Missing service {} ignored", name);
                ctx.make_object(MissingService { name });
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn register_service(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        self.ensure_initialized()?;
        let name = ServiceName::from_u64(ctx.read_u64()?)?;
        let _is_light = ctx.read_bool()?;
        let max_sessions = ctx.read_u32()?;
        let port = self.registry.register(&name, max_sessions)?;
        ctx.move_out(KernelObject::ServerPort(port));
        Ok(())
    }

    fn unregister_service(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        self.ensure_initialized()?;
        let name = ServiceName::from_u64(ctx.read_u64()?)?;
        self.registry.unregister(&name)?;
        Ok(())
    }
}

impl ServiceCommands for UserInterface {
    const INTERFACE: &'static str = "sm:";
    const COMMANDS: &'static [Command<Self>] = &[
        Command::new(0, "Initialize", &[], Self::initialize),
        Command::new(1, "GetService", &[], Self::get_service),
        Command::new(2, "RegisterService", &[], Self::register_service),
        Command::new(3, "UnregisterService", &[], Self::unregister_service),
    ];
}

/// Stands in for a service nobody registered. Every command succeeds
/// without output.
pub struct MissingService {
    name: ServiceName,
}

impl IpcService for MissingService {
    fn interface_name(&self) -> &'static str {
        "missing"
    }

    fn find_command(&self, id: u32) -> Option<CommandInfo> {
        Some(CommandInfo {
            id,
            name: "ignored",
            buffers: &[],
        })
    }

    fn invoke(&mut self, id: u32, _ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        warn!("Missing service {}: command {} ignored", self.name, id);
        Ok(())
    }
}
