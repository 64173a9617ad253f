//! `ldn:m` - local wireless monitor

use log::debug;

use crate::command::{Command, ServiceCommands};
use crate::context::ServiceCtx;
use crate::error::ServiceResult;

/// `nn::ldn::State` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum LdnState {
    None = 0,
    Initialized = 1,
}

/// Root interface of `ldn:m`; hands out monitor sessions.
#[derive(Default)]
pub struct MonitorServiceCreator;

impl MonitorServiceCreator {
    fn create_monitor_service(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        ctx.make_object(MonitorService::default());
        Ok(())
    }
}

impl ServiceCommands for MonitorServiceCreator {
    const INTERFACE: &'static str = "ldn:m";
    const COMMANDS: &'static [Command<Self>] = &[Command::new(
        0,
        "CreateMonitorService",
        &[],
        Self::create_monitor_service,
    )];
}

/// `nn::ldn::detail::IMonitorService`. Local wireless is never available,
/// so the monitor always reports `None`.
#[derive(Default)]
pub struct MonitorService {
    initialized: bool,
}

impl MonitorService {
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn get_state_for_monitor(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        ctx.write_u32(LdnState::None as u32);
        Ok(())
    }

    fn initialize_monitor(&mut self, _ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        debug!("ldn:m: InitializeMonitor stubbed");
        self.initialized = true;
        Ok(())
    }

    fn finalize_monitor(&mut self, _ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        debug!("ldn:m: FinalizeMonitor stubbed");
        self.initialized = false;
        Ok(())
    }
}

impl ServiceCommands for MonitorService {
    const INTERFACE: &'static str = "IMonitorService";
    const COMMANDS: &'static [Command<Self>] = &[
        Command::new(0, "GetStateForMonitor", &[], Self::get_state_for_monitor),
        Command::new(100, "InitializeMonitor", &[], Self::initialize_monitor),
        Command::new(101, "FinalizeMonitor", &[], Self::finalize_monitor),
    ];
}
