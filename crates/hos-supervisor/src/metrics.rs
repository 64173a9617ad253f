//! Diagnostic snapshots

use hos_kernel::KernelStats;
use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;

/// Point-in-time view of the whole system, across contexts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub processes: usize,
    pub application_processes: usize,
    pub threads: usize,
    pub handles: usize,
    /// Open sessions on all servers, `sm:` included
    pub sessions: usize,
    pub registered_services: usize,
    pub free_pages: u64,
    /// Main context logical clock
    pub ticks: u64,
    pub paused: bool,
    pub docked: bool,
}

impl SystemMetrics {
    /// Fold one context's kernel stats into the totals.
    pub fn add_kernel(&mut self, stats: &KernelStats) {
        self.processes += stats.processes;
        self.application_processes += stats.application_processes;
        self.threads += stats.threads;
        self.handles += stats.handles;
        self.free_pages += stats.free_pages;
    }

    pub fn to_json(&self) -> Result<String, SupervisorError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_stats_accumulate() {
        let stats = KernelStats {
            processes: 2,
            application_processes: 1,
            threads: 3,
            handles: 10,
            named_ports: 1,
            free_pages: 100,
            ticks: 5,
            paused: false,
        };
        let mut metrics = SystemMetrics::default();
        metrics.add_kernel(&stats);
        metrics.add_kernel(&stats);
        assert_eq!(metrics.processes, 4);
        assert_eq!(metrics.handles, 20);
        assert_eq!(metrics.free_pages, 200);
        assert_eq!(metrics.ticks, 0);
    }

    #[test]
    fn test_serializes_to_json() {
        let json = SystemMetrics {
            sessions: 3,
            docked: true,
            ..Default::default()
        }
        .to_json()
        .unwrap();
        assert!(json.contains("\"sessions\":3"));
        assert!(json.contains("\"docked\":true"));
    }
}
