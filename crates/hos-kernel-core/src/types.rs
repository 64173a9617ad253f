//! Core kernel types

use core::fmt;

use serde::{Deserialize, Serialize};

/// Process identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub u64);

/// Thread identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

/// Kernel object identity, unique for the lifetime of a kernel context
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind tag of an object reachable through a handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectKind {
    Event = 1,
    SharedMemory = 2,
    TransferMemory = 3,
    Process = 4,
    Thread = 5,
    Port = 6,
    Session = 7,
}

impl ObjectKind {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Event),
            2 => Some(Self::SharedMemory),
            3 => Some(Self::TransferMemory),
            4 => Some(Self::Process),
            5 => Some(Self::Thread),
            6 => Some(Self::Port),
            7 => Some(Self::Session),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Event => "Event",
            Self::SharedMemory => "SharedMemory",
            Self::TransferMemory => "TransferMemory",
            Self::Process => "Process",
            Self::Thread => "Thread",
            Self::Port => "Port",
            Self::Session => "Session",
        }
    }
}

/// Whether a thread runs kernel housekeeping or guest code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadType {
    Kernel,
    Guest,
}

/// Memory access permission bits
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MemoryPermission(u8);

impl MemoryPermission {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const EXECUTE: Self = Self(4);
    pub const READ_WRITE: Self = Self(1 | 2);
    pub const READ_EXECUTE: Self = Self(1 | 4);
    /// Marker the guest passes to mean "whatever the object allows".
    pub const DONT_CARE: Self = Self(1 << 7);

    /// Parse the raw value passed by guest code.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 | 1 | 3 | 5 => Some(Self(bits as u8)),
            0x10000000 => Some(Self::DONT_CARE),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check if these permissions are a subset of another
    pub fn is_subset_of(self, other: Self) -> bool {
        other.contains(self)
    }

    pub fn readable(self) -> bool {
        self.contains(Self::READ)
    }

    pub fn writable(self) -> bool {
        self.contains(Self::WRITE)
    }
}

impl fmt::Debug for MemoryPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::DONT_CARE {
            return f.write_str("DontCare");
        }
        let r = if self.readable() { 'R' } else { '-' };
        let w = if self.writable() { 'W' } else { '-' };
        let x = if self.contains(Self::EXECUTE) { 'X' } else { '-' };
        write!(f, "{}{}{}", r, w, x)
    }
}
