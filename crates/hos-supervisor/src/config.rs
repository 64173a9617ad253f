//! Supervisor configuration

use hos_kernel::KernelConfig;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;

/// Everything needed to boot a supervisor. Missing JSON fields take their
/// defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub kernel: KernelConfig,
    pub docked_mode: bool,
    /// Route registry and server access to the applet context.
    pub is_applet: bool,
    /// Hand out a dummy session for unregistered service names.
    pub ignore_missing_services: bool,
    pub log_level: LevelFilter,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            kernel: KernelConfig::default(),
            docked_mode: false,
            is_applet: false,
            ignore_missing_services: false,
            log_level: LevelFilter::Info,
        }
    }
}

impl SupervisorConfig {
    pub fn from_json(json: &str) -> Result<Self, SupervisorError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, SupervisorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
