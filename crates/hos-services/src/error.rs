//! Service layer errors

use hos_ipc::result::{sf, sm};
use hos_ipc::{ProtocolError, ResultCode};
use hos_kernel::KernelError;
use thiserror::Error;

/// Service manager failures.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SmError {
    #[error("service {0} is already registered")]
    AlreadyRegistered(String),
    #[error("service {0} is not registered")]
    NotRegistered(String),
    /// Empty, longer than 8 bytes, non-ASCII, or with an interior NUL.
    #[error("invalid service name")]
    InvalidName,
}

impl SmError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::AlreadyRegistered(_) => sm::ALREADY_REGISTERED,
            Self::NotRegistered(_) => sm::NOT_REGISTERED,
            Self::InvalidName => sm::INVALID_NAME,
        }
    }
}

/// Errors a command handler can return.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A guest-visible failure. The session stays open.
    #[error("result {0}")]
    Result(ResultCode),
    /// The service instance can no longer serve this session; the
    /// dispatcher closes it after replying.
    #[error("session state corrupted: {0}")]
    Corrupted(String),
    #[error("kernel: {0}")]
    Kernel(#[from] KernelError),
    #[error("sm: {0}")]
    Sm(#[from] SmError),
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ServiceError {
    /// The code written into the response header.
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::Result(code) => *code,
            Self::Corrupted(_) => sf::HANDLER_FAILED,
            Self::Kernel(err) => err.result_code(),
            Self::Sm(err) => err.result_code(),
            Self::Protocol(_) => sf::INVALID_IN_HEADER,
        }
    }
}

impl From<ResultCode> for ServiceError {
    fn from(code: ResultCode) -> Self {
        Self::Result(code)
    }
}

pub type ServiceResult<T = ()> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sm_codes() {
        assert_eq!(
            SmError::AlreadyRegistered("foo".into()).result_code().raw(),
            0x815
        );
        assert_eq!(SmError::NotRegistered("foo".into()).result_code().raw(), 0xE15);
        assert_eq!(SmError::InvalidName.result_code().raw(), 0xC15);
    }

    #[test]
    fn test_kernel_errors_keep_their_code() {
        let err = ServiceError::from(KernelError::OutOfHandles);
        assert_eq!(err.result_code().raw(), 0xD201);
        assert_eq!(
            ServiceError::Corrupted("x".into()).result_code(),
            sf::HANDLER_FAILED
        );
    }
}
