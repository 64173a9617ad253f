//! Events
//!
//! A signaled flag plus a wait list. Signals are level-triggered and
//! broadcast: every waiter blocked at the time of the signal wakes. A
//! manual-reset event stays signaled until cleared; an auto-reset event is
//! consumed by the first waiter that observes it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hos_kernel_core::ObjectKind;

use super::ObjectHeader;
use crate::error::KernelError;
use crate::lock;
use crate::sync::{wait_any, Parker, SyncObject, Timeout, WaitList};

/// How an event returns to the unsignaled state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetMode {
    Manual,
    Auto,
}

pub struct Event {
    header: ObjectHeader,
    reset_mode: ResetMode,
    signaled: Mutex<bool>,
    waiters: WaitList,
}

impl Event {
    /// A manual-reset event.
    pub fn new() -> Arc<Self> {
        Self::with_reset_mode(ResetMode::Manual)
    }

    pub fn with_reset_mode(reset_mode: ResetMode) -> Arc<Self> {
        Arc::new(Self {
            header: ObjectHeader::new(ObjectKind::Event),
            reset_mode,
            signaled: Mutex::new(false),
            waiters: WaitList::new(),
        })
    }

    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub fn reset_mode(&self) -> ResetMode {
        self.reset_mode
    }

    /// Set the signaled state and wake all current waiters.
    pub fn signal(&self) {
        *lock(&self.signaled) = true;
        self.waiters.notify_all();
    }

    /// Reset to unsignaled. Clearing an unsignaled event is allowed.
    pub fn clear(&self) {
        *lock(&self.signaled) = false;
    }

    /// Reset to unsignaled, failing if the event was not signaled.
    pub fn reset_signal(&self) -> Result<(), KernelError> {
        let mut signaled = lock(&self.signaled);
        if !*signaled {
            return Err(KernelError::InvalidState);
        }
        *signaled = false;
        Ok(())
    }

    pub fn is_signaled(&self) -> bool {
        *lock(&self.signaled)
    }

    /// Block the calling host thread until signaled.
    ///
    /// For callers outside any guest thread (host services, tests). Guest
    /// threads wait through their execution context so termination can
    /// interrupt them.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), KernelError> {
        let parker = Arc::new(Parker::new());
        let timeout = timeout.map_or(Timeout::Never, Timeout::After);
        let objects: [&dyn SyncObject; 1] = [self];
        wait_any(&parker, &|| false, &objects, timeout).map(|_| ())
    }
}

impl SyncObject for Event {
    fn try_acquire(&self) -> bool {
        let mut signaled = lock(&self.signaled);
        if !*signaled {
            return false;
        }
        if self.reset_mode == ResetMode::Auto {
            *signaled = false;
        }
        true
    }

    fn wait_list(&self) -> &WaitList {
        &self.waiters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_wait_after_signal_returns_immediately() {
        let event = Event::new();
        event.signal();
        assert_eq!(event.wait(Some(Duration::ZERO)), Ok(()));
        assert!(event.is_signaled());
    }

    #[test]
    fn test_unsignaled_wait_times_out() {
        let event = Event::new();
        assert_eq!(
            event.wait(Some(Duration::from_millis(1))),
            Err(KernelError::TimedOut)
        );
    }

    #[test]
    fn test_broadcast_wakes_every_waiter() {
        let event = Event::new();
        let ready = Arc::new(Barrier::new(4));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let event = Arc::clone(&event);
                let ready = Arc::clone(&ready);
                thread::spawn(move || {
                    ready.wait();
                    event.wait(Some(Duration::from_secs(5)))
                })
            })
            .collect();
        ready.wait();
        thread::sleep(Duration::from_millis(10));
        event.signal();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Ok(()));
        }
    }

    #[test]
    fn test_auto_reset_is_consumed_once() {
        let event = Event::with_reset_mode(ResetMode::Auto);
        event.signal();
        assert!(event.try_acquire());
        assert!(!event.try_acquire());
        assert!(!event.is_signaled());
    }

    #[test]
    fn test_reset_signal_requires_signaled() {
        let event = Event::new();
        assert_eq!(event.reset_signal(), Err(KernelError::InvalidState));
        event.signal();
        assert_eq!(event.reset_signal(), Ok(()));
        assert!(!event.is_signaled());
    }
}
