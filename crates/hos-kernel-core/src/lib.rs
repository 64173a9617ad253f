//! Horizon HLE Kernel Core - pure data structures
//!
//! This crate contains the **host-free** parts of the kernel: everything
//! here is plain data plus deterministic transformations, with no threads,
//! locks or memory access.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    hos-kernel-core                          │
//! │                                                             │
//! │   ┌───────────────┐    ┌──────────────────┐                 │
//! │   │  HandleTable  │    │ KernelCapabilities│                │
//! │   │  generate     │    │  descriptor parse │                │
//! │   │  resolve      │    │  SvcMask          │                │
//! │   │  close        │    └──────────────────┘                 │
//! │   └───────────────┘                                         │
//! │   ┌───────────────┐    ┌───────────────┐                    │
//! │   │  lifecycle    │    │  Invariants   │                    │
//! │   │  transitions  │    │  Assertions   │                    │
//! │   └───────────────┘    └───────────────┘                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ used by
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      hos-kernel                             │
//! │   objects, processes, threads, host execution contexts      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - `types` - Identifiers, object kinds, memory permissions
//! - `handle` - Per-process handle table with generation-tagged handles
//! - `capability` - Capability descriptor parsing and the syscall mask
//! - `lifecycle` - Process and thread state machines
//! - `invariants` - Runtime-checkable invariants for tests

#![no_std]
extern crate alloc;

pub mod capability;
pub mod handle;
pub mod invariants;
pub mod lifecycle;
pub mod types;

pub use capability::{CapabilityError, KernelCapabilities, SvcMask};
pub use handle::{Handle, HandleError, HandleTable};
pub use invariants::{check_handle_table, InvariantViolation};
pub use lifecycle::{
    process_transition, thread_transition, ProcessEvent, ProcessState, ThreadEvent, ThreadState,
    TransitionError,
};
pub use types::{MemoryPermission, ObjectId, ObjectKind, ProcessId, ThreadId, ThreadType};
