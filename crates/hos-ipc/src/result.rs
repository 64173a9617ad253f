//! Guest-visible result codes
//!
//! A result code packs a 9-bit module and a 13-bit description:
//! `raw = module | (description << 9)`. Zero is success. Guest code compares
//! raw values, so every constant below is ABI.

use core::fmt;

use serde::{Deserialize, Serialize};

const MODULE_BITS: u32 = 9;
const MODULE_MASK: u32 = (1 << MODULE_BITS) - 1;
const DESCRIPTION_MASK: u32 = (1 << 13) - 1;

/// A packed Horizon result code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ResultCode(u32);

impl ResultCode {
    /// The success code.
    pub const SUCCESS: Self = Self(0);

    /// Pack a module and description.
    pub const fn new(module: u32, description: u32) -> Self {
        Self((module & MODULE_MASK) | ((description & DESCRIPTION_MASK) << MODULE_BITS))
    }

    /// Wrap a raw value read from a response header.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn module(self) -> u32 {
        self.0 & MODULE_MASK
    }

    pub const fn description(self) -> u32 {
        (self.0 >> MODULE_BITS) & DESCRIPTION_MASK
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    pub const fn is_failure(self) -> bool {
        !self.is_success()
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ResultCode({:04}-{:04}, {:#x})",
            2000 + self.module(),
            self.description(),
            self.0
        )
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:04}", 2000 + self.module(), self.description())
    }
}

// =============================================================================
// Kernel (module 1)
// =============================================================================

/// Kernel result codes.
pub mod kernel {
    use super::ResultCode;

    pub const MODULE: u32 = 1;

    pub const SESSION_COUNT_EXCEEDED: ResultCode = ResultCode::new(MODULE, 7);
    pub const INVALID_CAPABILITY: ResultCode = ResultCode::new(MODULE, 14);
    pub const THREAD_TERMINATING: ResultCode = ResultCode::new(MODULE, 59);
    pub const INVALID_SIZE: ResultCode = ResultCode::new(MODULE, 101);
    pub const INVALID_ADDRESS: ResultCode = ResultCode::new(MODULE, 102);
    pub const OUT_OF_RESOURCE: ResultCode = ResultCode::new(MODULE, 103);
    pub const OUT_OF_MEMORY: ResultCode = ResultCode::new(MODULE, 104);
    pub const OUT_OF_HANDLES: ResultCode = ResultCode::new(MODULE, 105);
    pub const INVALID_MEMORY_STATE: ResultCode = ResultCode::new(MODULE, 106);
    pub const INVALID_PERMISSION: ResultCode = ResultCode::new(MODULE, 108);
    pub const INVALID_MEMORY_RANGE: ResultCode = ResultCode::new(MODULE, 110);
    pub const INVALID_PRIORITY: ResultCode = ResultCode::new(MODULE, 112);
    pub const INVALID_CPU_CORE: ResultCode = ResultCode::new(MODULE, 113);
    pub const INVALID_HANDLE: ResultCode = ResultCode::new(MODULE, 114);
    pub const INVALID_COMBINATION: ResultCode = ResultCode::new(MODULE, 116);
    pub const TIMED_OUT: ResultCode = ResultCode::new(MODULE, 117);
    pub const CANCELLED: ResultCode = ResultCode::new(MODULE, 118);
    pub const MAXIMUM_EXCEEDED: ResultCode = ResultCode::new(MODULE, 119);
    pub const INVALID_ENUM_VALUE: ResultCode = ResultCode::new(MODULE, 120);
    pub const NOT_FOUND: ResultCode = ResultCode::new(MODULE, 121);
    pub const PORT_REMOTE_CLOSED: ResultCode = ResultCode::new(MODULE, 123);
    pub const INVALID_STATE: ResultCode = ResultCode::new(MODULE, 125);
    pub const RESERVED_VALUE: ResultCode = ResultCode::new(MODULE, 126);
    pub const PORT_CLOSED: ResultCode = ResultCode::new(MODULE, 131);
}

// =============================================================================
// Service framework (module 10)
// =============================================================================

/// Service framework (CMIF) result codes.
pub mod sf {
    use super::ResultCode;

    pub const MODULE: u32 = 10;

    pub const INVALID_HEADER_SIZE: ResultCode = ResultCode::new(MODULE, 202);
    /// A declared buffer is missing or smaller than the command requires.
    pub const INVALID_BUFFER_SIZE: ResultCode = ResultCode::new(MODULE, 203);
    pub const INVALID_IN_HEADER: ResultCode = ResultCode::new(MODULE, 211);
    pub const UNKNOWN_COMMAND_ID: ResultCode = ResultCode::new(MODULE, 221);
    /// Generic failure reported when a command handler faults.
    pub const HANDLER_FAILED: ResultCode = ResultCode::new(MODULE, 700);
}

// =============================================================================
// Service manager (module 21)
// =============================================================================

/// Service manager result codes.
pub mod sm {
    use super::ResultCode;

    pub const MODULE: u32 = 21;

    pub const OUT_OF_PROCESSES: ResultCode = ResultCode::new(MODULE, 1);
    pub const INVALID_CLIENT: ResultCode = ResultCode::new(MODULE, 2);
    pub const OUT_OF_SESSIONS: ResultCode = ResultCode::new(MODULE, 3);
    pub const ALREADY_REGISTERED: ResultCode = ResultCode::new(MODULE, 4);
    pub const OUT_OF_SERVICES: ResultCode = ResultCode::new(MODULE, 5);
    pub const INVALID_NAME: ResultCode = ResultCode::new(MODULE, 6);
    pub const NOT_REGISTERED: ResultCode = ResultCode::new(MODULE, 7);
    pub const NOT_ALLOWED: ResultCode = ResultCode::new(MODULE, 8);
}
