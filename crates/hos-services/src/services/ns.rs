//! `ns:am` - application manager

use std::sync::Arc;

use hos_kernel::{Event, KernelObject};
use log::debug;

use crate::command::{Command, ServiceCommands};
use crate::context::ServiceCtx;
use crate::error::ServiceResult;

/// Reported as both total and free space of every storage.
const STORAGE_SPACE_SIZE: u64 = 6_999_999_999_999;

/// `nn::ns::detail::IApplicationManagerInterface`. Every instance owns its
/// own set of system events.
pub struct ApplicationManager {
    record_update: Arc<Event>,
    sd_card_mount_status_changed: Arc<Event>,
    game_card_update_detection: Arc<Event>,
    game_card_mount_failure: Arc<Event>,
    game_card_wake: Arc<Event>,
}

impl Default for ApplicationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationManager {
    pub fn new() -> Self {
        Self {
            record_update: Event::new(),
            sd_card_mount_status_changed: Event::new(),
            game_card_update_detection: Event::new(),
            game_card_mount_failure: Event::new(),
            game_card_wake: Event::new(),
        }
    }

    /// The event handed out by `GetApplicationRecordUpdateSystemEvent`.
    pub fn record_update_event(&self) -> &Arc<Event> {
        &self.record_update
    }

    fn get_application_record_update_system_event(
        &mut self,
        ctx: &mut ServiceCtx<'_>,
    ) -> ServiceResult {
        ctx.copy_out(KernelObject::Event(Arc::clone(&self.record_update)));
        Ok(())
    }

    fn get_sd_card_mount_status_changed_event(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        ctx.copy_out(KernelObject::Event(Arc::clone(
            &self.sd_card_mount_status_changed,
        )));
        Ok(())
    }

    fn get_total_space_size(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        let _storage_id = ctx.read_u8()?;
        ctx.write_u64(STORAGE_SPACE_SIZE);
        Ok(())
    }

    fn get_free_space_size(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        let _storage_id = ctx.read_u8()?;
        ctx.write_u64(STORAGE_SPACE_SIZE);
        Ok(())
    }

    fn get_game_card_update_detection_event(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        ctx.copy_out(KernelObject::Event(Arc::clone(
            &self.game_card_update_detection,
        )));
        Ok(())
    }

    fn get_application_desired_language(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        let source = ctx.read_u8()?;
        debug!("ns:am: GetApplicationDesiredLanguage({}) stubbed", source);
        ctx.write_u8(0);
        Ok(())
    }

    fn resume_all(&mut self, _ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        debug!("ns:am: ResumeAll stubbed");
        Ok(())
    }

    fn get_game_card_mount_failure_event(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        ctx.copy_out(KernelObject::Event(Arc::clone(&self.game_card_mount_failure)));
        Ok(())
    }

    fn get_game_card_waken_ready_event(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        ctx.copy_out(KernelObject::Event(Arc::clone(&self.game_card_wake)));
        self.game_card_wake.signal();
        Ok(())
    }

    fn is_game_card_application_running(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        debug!("ns:am: IsGameCardApplicationRunning stubbed");
        ctx.write_bool(true);
        Ok(())
    }
}

impl ServiceCommands for ApplicationManager {
    const INTERFACE: &'static str = "ns:am";
    const COMMANDS: &'static [Command<Self>] = &[
        Command::new(
            2,
            "GetApplicationRecordUpdateSystemEvent",
            &[],
            Self::get_application_record_update_system_event,
        ),
        Command::new(
            44,
            "GetSdCardMountStatusChangedEvent",
            &[],
            Self::get_sd_card_mount_status_changed_event,
        ),
        Command::new(47, "GetTotalSpaceSize", &[], Self::get_total_space_size),
        Command::new(48, "GetFreeSpaceSize", &[], Self::get_free_space_size),
        Command::new(
            52,
            "GetGameCardUpdateDetectionEvent",
            &[],
            Self::get_game_card_update_detection_event,
        ),
        Command::new(
            55,
            "GetApplicationDesiredLanguage",
            &[],
            Self::get_application_desired_language,
        ),
        Command::new(70, "ResumeAll", &[], Self::resume_all),
        Command::new(
            505,
            "GetGameCardMountFailureEvent",
            &[],
            Self::get_game_card_mount_failure_event,
        ),
        Command::new(
            511,
            "GetGameCardWakenReadyEvent",
            &[],
            Self::get_game_card_waken_ready_event,
        ),
        Command::new(
            512,
            "IsGameCardApplicationRunning",
            &[],
            Self::is_game_card_application_running,
        ),
    ];
}
