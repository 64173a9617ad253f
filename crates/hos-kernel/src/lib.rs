//! Horizon HLE Kernel
//!
//! The runtime half of the kernel. Where `hos-kernel-core` holds plain data,
//! this crate binds it to host threads, locks and the emulated DRAM:
//!
//! - **Objects** (`objects`): events, shared/transfer memory, ports and
//!   sessions, all reachable through per-process handle tables
//! - **Processes and threads** (`process`): every guest thread runs on its
//!   own host thread; termination is cooperative
//! - **Kernel context** (`context`): the process set, physical memory
//!   regions, the logical clock and named ports
//! - **Syscalls** (`syscall`): the operations a running thread may invoke,
//!   always through an explicit [`ExecutionContext`]
//!
//! # Lock Ordering
//!
//! ```text
//! KernelContext::processes
//!   └─ Process::state
//!        └─ Process::handles ─ Process::address_space
//!             └─ object locks (event, port, session)
//!                  └─ WaitList ─ Parker
//! ```
//!
//! Guest memory I/O never happens under `KernelContext::processes`.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod klog;
pub mod memory;
pub mod objects;
pub mod process;
pub mod sync;
pub mod syscall;
mod termination;

#[cfg(all(test, feature = "loom"))]
mod loom_tests;

pub use clock::{TickSource, TICK_FREQUENCY};
pub use config::{KernelConfig, MemoryArrange};
pub use context::{KernelContext, KernelStats, ProcessCreationInfo, ProcessFlags};
pub use error::KernelError;
pub use klog::{KernelEvent, KernelLog, KernelLogEntry};
pub use memory::{AllocatedPages, MemoryRegion, MemoryRegionKind, PageList};
pub use objects::{
    create_port, create_session, ClientPort, ClientSession, Event, KernelObject, ObjectHeader,
    ResetMode, ServerPort, ServerSession, SessionRequest, SharedMemory, TransferMemory,
};
pub use process::{Process, Thread, ThreadEntry};
pub use sync::{SyncObject, Timeout};
pub use syscall::ExecutionContext;

pub use hos_kernel_core::{
    Handle, MemoryPermission, ObjectId, ObjectKind, ProcessId, ProcessState, ThreadId,
    ThreadState, ThreadType,
};

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
///
/// Guest entry points run under `catch_unwind`, so a poisoned lock only
/// means a guest thread died while holding it; every structure guarded
/// here stays consistent across a panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait on `condvar` until `done` holds or `deadline` passes.
///
/// Returns the guard and whether `done` held.
pub(crate) fn wait_until<'a, T>(
    condvar: &Condvar,
    mut guard: MutexGuard<'a, T>,
    deadline: Option<Instant>,
    mut done: impl FnMut(&T) -> bool,
) -> (MutexGuard<'a, T>, bool) {
    loop {
        if done(&guard) {
            return (guard, true);
        }
        match deadline {
            None => {
                guard = condvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return (guard, false);
                }
                guard = condvar
                    .wait_timeout(guard, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }
    }
}
