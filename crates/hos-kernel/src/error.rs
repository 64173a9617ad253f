//! Kernel error type

use hos_hal::HalError;
use hos_ipc::result::kernel;
use hos_ipc::ResultCode;
use hos_kernel_core::{CapabilityError, HandleError};
use thiserror::Error;

/// Errors returned by kernel operations.
///
/// Every variant maps onto a guest-visible result code through
/// [`KernelError::result_code`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("handle table exhausted")]
    OutOfHandles,
    #[error("invalid handle {0:#x}")]
    InvalidHandle(u32),
    /// A mapping conflicts with existing state, or asks for more than the
    /// object grants.
    #[error("invalid memory state")]
    InvalidMemoryState,
    #[error("invalid permission")]
    InvalidPermission,
    #[error("invalid address {0:#x}")]
    InvalidAddress(u64),
    #[error("invalid size {0:#x}")]
    InvalidSize(u64),
    #[error("out of memory")]
    OutOfMemory,
    #[error("timed out")]
    TimedOut,
    /// The calling thread was asked to terminate while blocked or at a
    /// checkpoint. Entry points propagate it with `?` to exit.
    #[error("thread termination requested")]
    TerminationRequested,
    #[error("supervisor call {0:#x} not permitted")]
    NotPermitted(u32),
    #[error("port closed")]
    PortClosed,
    #[error("session closed by the remote side")]
    SessionClosed,
    #[error("port session limit reached")]
    SessionLimit,
    #[error("not found")]
    NotFound,
    #[error("invalid state")]
    InvalidState,
    #[error("priority {0} not allowed")]
    InvalidPriority(u32),
    #[error("too many objects")]
    MaximumExceeded,
    #[error("capability: {0}")]
    Capability(#[from] CapabilityError),
    /// The termination thread never reached `Running`. Fatal: the session
    /// cannot be torn down safely.
    #[error("termination thread failed to start")]
    TerminationThreadStalled,
    #[error("host thread: {0}")]
    HostThread(String),
    #[error("hal: {0}")]
    Hal(#[from] HalError),
}

impl KernelError {
    /// The result code guest code observes for this error.
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::OutOfHandles => kernel::OUT_OF_HANDLES,
            Self::InvalidHandle(_) => kernel::INVALID_HANDLE,
            Self::InvalidMemoryState => kernel::INVALID_MEMORY_STATE,
            Self::InvalidPermission => kernel::INVALID_PERMISSION,
            Self::InvalidAddress(_) => kernel::INVALID_ADDRESS,
            Self::InvalidSize(_) => kernel::INVALID_SIZE,
            Self::OutOfMemory => kernel::OUT_OF_MEMORY,
            Self::TimedOut => kernel::TIMED_OUT,
            Self::TerminationRequested => kernel::THREAD_TERMINATING,
            Self::NotPermitted(_) => kernel::INVALID_CAPABILITY,
            Self::PortClosed => kernel::PORT_CLOSED,
            Self::SessionClosed => kernel::PORT_REMOTE_CLOSED,
            Self::SessionLimit => kernel::SESSION_COUNT_EXCEEDED,
            Self::NotFound => kernel::NOT_FOUND,
            Self::InvalidState | Self::TerminationThreadStalled => kernel::INVALID_STATE,
            Self::InvalidPriority(_) => kernel::INVALID_PRIORITY,
            Self::MaximumExceeded => kernel::MAXIMUM_EXCEEDED,
            Self::Capability(err) => err.result_code(),
            Self::HostThread(_) => kernel::OUT_OF_RESOURCE,
            Self::Hal(_) => kernel::INVALID_MEMORY_RANGE,
        }
    }

    /// Errors that make the emulated session unsafe to continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TerminationThreadStalled)
    }
}

impl From<HandleError> for KernelError {
    fn from(err: HandleError) -> Self {
        match err {
            HandleError::OutOfHandles { .. } => Self::OutOfHandles,
            HandleError::InvalidHandle(raw) => Self::InvalidHandle(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes_match_guest_values() {
        assert_eq!(KernelError::OutOfHandles.result_code().raw(), 0xD201);
        assert_eq!(KernelError::InvalidMemoryState.result_code().raw(), 0xD401);
        assert_eq!(KernelError::InvalidHandle(1).result_code().raw(), 0xE401);
        assert_eq!(KernelError::TimedOut.result_code().raw(), 0xEA01);
        assert_eq!(KernelError::TerminationRequested.result_code().raw(), 0x7601);
        assert_eq!(KernelError::SessionClosed.result_code().raw(), 0xF601);
    }

    #[test]
    fn test_handle_errors_convert() {
        let err: KernelError = HandleError::OutOfHandles { capacity: 4 }.into();
        assert_eq!(err, KernelError::OutOfHandles);
        let err: KernelError = HandleError::InvalidHandle(0x8001).into();
        assert_eq!(err, KernelError::InvalidHandle(0x8001));
    }

    #[test]
    fn test_only_stalled_termination_is_fatal() {
        assert!(KernelError::TerminationThreadStalled.is_fatal());
        assert!(!KernelError::OutOfMemory.is_fatal());
    }
}
