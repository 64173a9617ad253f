//! The supervisor
//!
//! Owns the main context (and an optional applet context), the shared
//! memory layout and the system events. Split by concern:
//!
//! - `services`: service lifecycle for the active context
//! - `shared_memory`: the NvServices layout
//! - `shutdown`: the termination protocol

mod services;
mod shared_memory;
mod shutdown;

pub use shared_memory::SharedMemoryLayout;

use std::sync::Arc;

use hos_hal::host::HostHal;
use hos_hal::HAL;
use hos_kernel::KernelContext;
use hos_services::{ServiceTable, SmRegistry};
use log::info;

use crate::config::SupervisorConfig;
use crate::constants::WAKE_UP_MESSAGE;
use crate::context::{select_context, ContextKind, ServerSet};
use crate::error::SupervisorError;
use crate::logging;
use crate::messages::{AppletMessage, PerformanceMode, SystemEvents};
use crate::metrics::SystemMetrics;

pub struct Supervisor {
    config: SupervisorConfig,
    main: ServerSet,
    applet: Option<ServerSet>,
    shared_memory: SharedMemoryLayout,
    events: SystemEvents,
    docked: bool,
    performance_mode: PerformanceMode,
    paused: bool,
    shut_down: bool,
}

impl Supervisor {
    /// Create the main kernel over `hal` with the default service table.
    /// Services are not started; see `initialize_services`.
    pub fn new(config: SupervisorConfig, hal: Arc<dyn HAL>) -> Result<Self, SupervisorError> {
        let kernel = KernelContext::new(config.kernel.clone(), hal)?;
        let shared_memory = SharedMemoryLayout::allocate(&kernel)?;
        let docked = config.docked_mode;
        Ok(Self {
            main: ServerSet::new(kernel, ServiceTable::with_defaults()),
            applet: None,
            shared_memory,
            events: SystemEvents::new(),
            docked,
            performance_mode: PerformanceMode::for_docked(docked),
            paused: false,
            shut_down: false,
            config,
        })
    }

    /// Boot over host memory: install logging, create the kernel and
    /// start services.
    pub fn boot(config: SupervisorConfig) -> Result<Self, SupervisorError> {
        let hal: Arc<dyn HAL> = Arc::new(HostHal::new(config.kernel.memory_arrange.dram_size()));
        logging::init(Arc::clone(&hal), config.log_level);
        info!("Booting Horizon HLE");

        let mut supervisor = Self::new(config, hal)?;
        supervisor.initialize_services()?;
        Ok(supervisor)
    }

    /// Attach an applet context with its own kernel over `hal`, serving
    /// the default service table.
    pub fn attach_applet(&mut self, hal: Arc<dyn HAL>) -> Result<(), SupervisorError> {
        if self.applet.is_some() {
            return Err(SupervisorError::AppletAttached);
        }
        let kernel = KernelContext::new(self.config.kernel.clone(), hal)?;
        self.applet = Some(ServerSet::new(kernel, ServiceTable::with_defaults()));
        info!("Applet context attached");
        Ok(())
    }

    // ========================================================================
    // Context selection
    // ========================================================================

    pub fn active_context(&self) -> ContextKind {
        select_context(self.config.is_applet, self.applet.is_some())
    }

    /// The active context's server set.
    pub fn server_set(&self) -> &ServerSet {
        match (self.active_context(), &self.applet) {
            (ContextKind::Applet, Some(applet)) => applet,
            _ => &self.main,
        }
    }

    pub fn server_set_mut(&mut self) -> &mut ServerSet {
        match (self.active_context(), &mut self.applet) {
            (ContextKind::Applet, Some(applet)) => applet,
            _ => &mut self.main,
        }
    }

    pub fn registry(&self) -> &Arc<SmRegistry> {
        self.server_set().registry()
    }

    /// The active context's kernel.
    pub fn kernel(&self) -> &Arc<KernelContext> {
        self.server_set().kernel()
    }

    pub fn main_context(&self) -> &ServerSet {
        &self.main
    }

    pub fn applet_context(&self) -> Option<&ServerSet> {
        self.applet.as_ref()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn shared_memory(&self) -> &SharedMemoryLayout {
        &self.shared_memory
    }

    pub fn events(&self) -> &SystemEvents {
        &self.events
    }

    pub fn is_docked(&self) -> bool {
        self.docked
    }

    pub fn performance_mode(&self) -> PerformanceMode {
        self.performance_mode
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // ========================================================================
    // System events
    // ========================================================================

    /// Switch between docked and handheld. Applets learn about it through
    /// the applet message queue and the display resolution change event.
    pub fn change_docked_mode(&mut self, docked: bool) {
        if docked == self.docked {
            return;
        }
        self.docked = docked;
        self.performance_mode = PerformanceMode::for_docked(docked);
        info!(
            "Docked mode {} ({:?} performance)",
            if docked { "enabled" } else { "disabled" },
            self.performance_mode
        );

        let messages = self.events.applet_messages();
        messages.push(AppletMessage::OperationModeChanged);
        messages.push(AppletMessage::PerformanceModeChanged);
        self.events.signal_display_resolution_change();
    }

    pub fn simulate_wake_up_message(&self) {
        self.events.applet_messages().push(AppletMessage::Resume);
        self.events.push_to_general_channel(WAKE_UP_MESSAGE.to_vec());
    }

    pub fn push_to_general_channel(&self, data: Vec<u8>) {
        self.events.push_to_general_channel(data);
    }

    /// Freeze or thaw application processes and the logical clock of
    /// every context.
    pub fn toggle_pause_emulation(&mut self, pause: bool) {
        for set in std::iter::once(&self.main).chain(&self.applet) {
            if pause {
                set.kernel().pause();
            } else {
                set.kernel().resume();
            }
        }
        self.paused = pause;
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn metrics(&self) -> SystemMetrics {
        let mut metrics = SystemMetrics {
            ticks: self.main.kernel().ticks().ticks(),
            paused: self.paused,
            docked: self.docked,
            ..Default::default()
        };
        for set in std::iter::once(&self.main).chain(&self.applet) {
            metrics.add_kernel(&set.kernel().stats());
            metrics.sessions += set.session_count();
            metrics.registered_services += set.registry().len();
        }
        metrics
    }
}
