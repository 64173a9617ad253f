//! Host Abstraction Layer for the Horizon HLE kernel
//!
//! This crate defines the HAL trait the kernel uses for everything it does
//! not implement itself: the emulated physical memory (DRAM), a monotonic
//! clock and a debug output sink.
//!
//! # Implementations
//!
//! - **host**: sparse DRAM backed by host pages, `Instant`-based clock,
//!   stderr (or captured) debug output, and a `log::Log` bridge

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[cfg(feature = "std")]
pub mod host;

use thiserror::Error;

/// Page size of the emulated physical memory.
pub const PAGE_SIZE: u64 = 0x1000;

/// Hardware Abstraction Layer trait
///
/// Implementations provide:
/// - Physical memory access (byte-exact, address + length)
/// - Time measurement
/// - Debug output
///
/// Memory accesses are not synchronized beyond single bytes: concurrent
/// writers to the same range race exactly like they would on hardware.
pub trait HAL: Send + Sync + 'static {
    // === Physical Memory ===

    /// Size of the emulated DRAM in bytes.
    fn memory_size(&self) -> u64;

    /// Copy `buf.len()` bytes starting at physical `address` into `buf`.
    ///
    /// # Returns
    /// * `Err(HalError::OutOfRange)` - The range leaves the DRAM
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), HalError>;

    /// Copy `data` to physical `address`.
    fn write_memory(&self, address: u64, data: &[u8]) -> Result<(), HalError>;

    /// Zero `len` bytes starting at physical `address`.
    fn zero_memory(&self, address: u64, len: u64) -> Result<(), HalError> {
        const CHUNK: [u8; PAGE_SIZE as usize] = [0; PAGE_SIZE as usize];
        let mut offset = 0;
        while offset < len {
            let chunk = (len - offset).min(PAGE_SIZE) as usize;
            self.write_memory(address + offset, &CHUNK[..chunk])?;
            offset += chunk as u64;
        }
        Ok(())
    }

    // === Time ===

    /// Monotonic nanoseconds since an arbitrary epoch.
    fn now_nanos(&self) -> u64;

    // === Debug ===

    /// Write one line of debug output. Must not block.
    fn debug_write(&self, msg: &str);
}

/// HAL errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum HalError {
    /// The physical range is outside the emulated DRAM
    #[error("physical range {address:#x}+{len:#x} is outside DRAM")]
    OutOfRange { address: u64, len: u64 },
    /// Operation not supported on this platform
    #[error("operation not supported")]
    NotSupported,
}

/// Check that `address..address+len` lies within `size`.
pub fn check_range(size: u64, address: u64, len: u64) -> Result<(), HalError> {
    match address.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(HalError::OutOfRange { address, len }),
    }
}
