//! Supervisor errors

use hos_kernel::KernelError;
use hos_services::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("kernel: {0}")]
    Kernel(#[from] KernelError),
    #[error("service: {0}")]
    Service(#[from] ServiceError),
    #[error("services are already initialized")]
    AlreadyInitialized,
    #[error("an applet context is already attached")]
    AppletAttached,
}

impl SupervisorError {
    /// The session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Kernel(err) | Self::Service(ServiceError::Kernel(err)) => err.is_fatal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hos_services::SmError;

    #[test]
    fn test_stalled_termination_is_fatal() {
        assert!(SupervisorError::from(KernelError::TerminationThreadStalled).is_fatal());
        assert!(!SupervisorError::from(KernelError::OutOfMemory).is_fatal());
        assert!(!SupervisorError::AlreadyInitialized.is_fatal());
    }

    #[test]
    fn test_sm_errors_pass_through() {
        let err = SupervisorError::from(ServiceError::from(SmError::AlreadyRegistered(
            "set:sys".into(),
        )));
        assert!(matches!(
            err,
            SupervisorError::Service(ServiceError::Sm(SmError::AlreadyRegistered(_)))
        ));
    }
}
