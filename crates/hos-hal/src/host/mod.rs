//! Host implementation of the HAL
//!
//! Runs the kernel inside an ordinary host process: DRAM is a sparse map of
//! host pages that materialize on first write, time comes from `Instant`.

mod logger;
mod memory;

pub use logger::HostLogger;
pub use memory::HostMemory;

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::{HalError, HAL};

/// Where debug output goes.
enum DebugSink {
    Stderr,
    Capture(Mutex<Vec<String>>),
}

/// HAL backed by the host process.
pub struct HostHal {
    memory: HostMemory,
    epoch: Instant,
    sink: DebugSink,
}

impl HostHal {
    /// A HAL with `memory_size` bytes of DRAM writing debug output to stderr.
    pub fn new(memory_size: u64) -> Self {
        Self {
            memory: HostMemory::new(memory_size),
            epoch: Instant::now(),
            sink: DebugSink::Stderr,
        }
    }

    /// A HAL that keeps debug output in memory for inspection.
    pub fn capturing(memory_size: u64) -> Self {
        Self {
            sink: DebugSink::Capture(Mutex::new(Vec::new())),
            ..Self::new(memory_size)
        }
    }

    /// Captured debug lines (empty when writing to stderr).
    pub fn debug_lines(&self) -> Vec<String> {
        match &self.sink {
            DebugSink::Stderr => Vec::new(),
            DebugSink::Capture(lines) => lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Check if any captured line contains `needle`.
    pub fn has_debug_line_containing(&self, needle: &str) -> bool {
        self.debug_lines().iter().any(|line| line.contains(needle))
    }

    /// Number of host pages currently materialized.
    pub fn resident_pages(&self) -> usize {
        self.memory.resident_pages()
    }
}

impl HAL for HostHal {
    fn memory_size(&self) -> u64 {
        self.memory.size()
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), HalError> {
        self.memory.read(address, buf)
    }

    fn write_memory(&self, address: u64, data: &[u8]) -> Result<(), HalError> {
        self.memory.write(address, data)
    }

    fn zero_memory(&self, address: u64, len: u64) -> Result<(), HalError> {
        self.memory.zero(address, len)
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn debug_write(&self, msg: &str) {
        match &self.sink {
            DebugSink::Stderr => eprintln!("{}", msg),
            DebugSink::Capture(lines) => lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(msg.to_string()),
        }
    }
}
