//! Centralized constants for the supervisor crate
//!
//! Shared memory sizes, message blobs and timeouts live here so they can be
//! audited in one place. Result codes and service descriptors stay in
//! `hos-ipc` / `hos-services`.

use std::time::Duration;

pub use hos_services::SERVICE_PRIORITY;

// =============================================================================
// Shared Memory Layout (NvServices region, in this order)
// =============================================================================

/// HID shared memory
pub const HID_SIZE: u64 = 0x40000;

/// Shared font data
pub const FONT_SIZE: u64 = 0x110_0000;

/// IR sensor shared memory
pub const IIRS_SIZE: u64 = 0x8000;

/// Time service shared memory
pub const TIME_SIZE: u64 = 0x1000;

/// Applet capture buffer, lent as transfer memory
pub const APPLET_CAPTURE_BUFFER_SIZE: u64 = 0x38_4000;

// =============================================================================
// General Channel
// =============================================================================

/// Pushed to the general channel by `simulate_wake_up_message`.
///
/// Reads as the words `0x534D4153 1 2 1`.
pub const WAKE_UP_MESSAGE: [u8; 16] = [
    0x53, 0x41, 0x4D, 0x53, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
    0x00,
];

// =============================================================================
// Timeouts
// =============================================================================

/// How long `initialize_services` waits for the service manager.
pub const SM_INIT_TIMEOUT: Duration = Duration::from_secs(5);
