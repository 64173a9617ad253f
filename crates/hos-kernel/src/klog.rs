//! Kernel audit log
//!
//! A bounded record of structural events (process lifecycle, named ports,
//! service registration). Separate from the `log` facade: these entries are
//! data, kept for diagnostics and inspected by tests.

use std::collections::VecDeque;

use hos_kernel_core::ProcessId;
use serde::{Deserialize, Serialize};

/// A structural kernel event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelEvent {
    ProcessCreated {
        pid: ProcessId,
        name: String,
        is_application: bool,
    },
    ProcessTerminated {
        pid: ProcessId,
    },
    NamedPortRegistered {
        name: String,
    },
    ServiceRegistered {
        name: String,
    },
    ServiceUnregistered {
        name: String,
    },
    Paused,
    Resumed,
}

/// One audit log entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KernelLogEntry {
    /// Monotonic entry id
    pub id: u64,
    /// Guest nanoseconds when recorded
    pub timestamp: u64,
    pub event: KernelEvent,
}

/// Bounded audit log; the oldest entries are dropped first.
pub struct KernelLog {
    entries: VecDeque<KernelLogEntry>,
    capacity: usize,
    next_id: u64,
}

impl KernelLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            next_id: 0,
        }
    }

    /// Append an event, returning its id.
    pub fn record(&mut self, event: KernelEvent, timestamp: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(KernelLogEntry {
            id,
            timestamp,
            event,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        id
    }

    pub fn entries(&self) -> impl Iterator<Item = &KernelLogEntry> {
        self.entries.iter()
    }

    /// The most recent `count` entries, newest first.
    pub fn recent(&self, count: usize) -> Vec<&KernelLogEntry> {
        self.entries.iter().rev().take(count).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_assigns_monotonic_ids() {
        let mut log = KernelLog::new(8);
        let a = log.record(KernelEvent::Paused, 1);
        let b = log.record(KernelEvent::Resumed, 2);
        assert!(b > a);
        assert_eq!(log.len(), 2);
        assert_eq!(log.recent(1)[0].event, KernelEvent::Resumed);
    }

    #[test]
    fn test_oldest_entries_are_trimmed() {
        let mut log = KernelLog::new(2);
        log.record(KernelEvent::Paused, 1);
        log.record(KernelEvent::Resumed, 2);
        log.record(KernelEvent::ProcessTerminated { pid: ProcessId(1) }, 3);
        let ids: Vec<u64> = log.entries().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
