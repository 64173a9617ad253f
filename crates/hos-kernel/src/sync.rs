//! Blocking primitives
//!
//! Every blocking operation in the kernel goes through [`wait_any`]:
//!
//! 1. register the waiter's [`Parker`] on each object's [`WaitList`]
//! 2. poll the objects
//! 3. park until unparked, the deadline passes, or termination is requested
//!
//! Registration happens before the poll, and an unpark sticks until the
//! next park, so a signal landing between the poll and the park is never
//! lost. Signalers update state under the object's lock before notifying,
//! which gives waiters acquire/release ordering over the signaled flag.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::KernelError;
use crate::{lock, wait_until};

/// Maximum number of objects in one wait.
pub const MAX_WAIT_OBJECTS: usize = 64;

/// Per-waiter wake-up flag.
#[derive(Debug, Default)]
pub struct Parker {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until unparked or `deadline` passes. Consumes the wake-up.
    ///
    /// Returns `false` on timeout.
    pub fn park(&self, deadline: Option<Instant>) -> bool {
        let guard = lock(&self.notified);
        let (mut guard, woken) = wait_until(&self.condvar, guard, deadline, |notified| *notified);
        *guard = false;
        woken
    }

    pub fn unpark(&self) {
        *lock(&self.notified) = true;
        self.condvar.notify_all();
    }

    /// Drop a pending wake-up.
    pub fn reset(&self) {
        *lock(&self.notified) = false;
    }
}

/// Parkers blocked on one object.
#[derive(Debug, Default)]
pub struct WaitList {
    parkers: Mutex<Vec<Arc<Parker>>>,
}

impl WaitList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, parker: &Arc<Parker>) {
        lock(&self.parkers).push(Arc::clone(parker));
    }

    pub fn unregister(&self, parker: &Arc<Parker>) {
        let mut parkers = lock(&self.parkers);
        if let Some(pos) = parkers.iter().position(|p| Arc::ptr_eq(p, parker)) {
            parkers.swap_remove(pos);
        }
    }

    /// Wake every registered waiter.
    pub fn notify_all(&self) {
        for parker in lock(&self.parkers).iter() {
            parker.unpark();
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.parkers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An object a thread can wait on.
pub trait SyncObject: Send + Sync {
    /// Check the signaled state, consuming it if the object auto-resets.
    fn try_acquire(&self) -> bool;

    fn wait_list(&self) -> &WaitList;
}

/// How long a wait may block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// Poll once.
    Immediate,
    After(Duration),
    Never,
}

impl Timeout {
    /// Interpret a guest timeout: negative waits forever, zero polls.
    pub fn from_nanos(nanos: i64) -> Self {
        match nanos {
            n if n < 0 => Self::Never,
            0 => Self::Immediate,
            n => Self::After(Duration::from_nanos(n as u64)),
        }
    }

    fn deadline(self) -> Option<Instant> {
        match self {
            Self::Immediate => Some(Instant::now()),
            Self::After(duration) => Some(Instant::now() + duration),
            Self::Never => None,
        }
    }
}

fn poll(objects: &[&dyn SyncObject]) -> Option<usize> {
    objects.iter().position(|object| object.try_acquire())
}

/// Block until one of `objects` is signaled.
///
/// Returns the index of the first signaled object. With an empty object
/// list this is a cancellable sleep that ends in `TimedOut`.
///
/// # Errors
/// * `TerminationRequested` - `cancelled` became true
/// * `TimedOut` - the timeout elapsed with nothing signaled
pub fn wait_any(
    parker: &Arc<Parker>,
    cancelled: &dyn Fn() -> bool,
    objects: &[&dyn SyncObject],
    timeout: Timeout,
) -> Result<usize, KernelError> {
    if objects.len() > MAX_WAIT_OBJECTS {
        return Err(KernelError::MaximumExceeded);
    }
    if cancelled() {
        return Err(KernelError::TerminationRequested);
    }
    if let Some(index) = poll(objects) {
        return Ok(index);
    }
    if timeout == Timeout::Immediate {
        return Err(KernelError::TimedOut);
    }

    let deadline = timeout.deadline();
    for object in objects {
        object.wait_list().register(parker);
    }

    let result = loop {
        if cancelled() {
            break Err(KernelError::TerminationRequested);
        }
        if let Some(index) = poll(objects) {
            break Ok(index);
        }
        if !parker.park(deadline) {
            break poll(objects).ok_or(KernelError::TimedOut);
        }
    };

    for object in objects {
        object.wait_list().unregister(parker);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[derive(Default)]
    struct Flag {
        set: AtomicBool,
        waiters: WaitList,
    }

    impl Flag {
        fn raise(&self) {
            self.set.store(true, Ordering::SeqCst);
            self.waiters.notify_all();
        }
    }

    impl SyncObject for Flag {
        fn try_acquire(&self) -> bool {
            self.set.load(Ordering::SeqCst)
        }
        fn wait_list(&self) -> &WaitList {
            &self.waiters
        }
    }

    #[test]
    fn test_timeout_from_guest_nanos() {
        assert_eq!(Timeout::from_nanos(-1), Timeout::Never);
        assert_eq!(Timeout::from_nanos(0), Timeout::Immediate);
        assert_eq!(
            Timeout::from_nanos(5),
            Timeout::After(Duration::from_nanos(5))
        );
    }

    #[test]
    fn test_already_signaled_returns_immediately() {
        let parker = Arc::new(Parker::new());
        let a = Flag::default();
        let b = Flag::default();
        b.raise();
        let index = wait_any(&parker, &|| false, &[&a, &b], Timeout::Never).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_poll_times_out() {
        let parker = Arc::new(Parker::new());
        let flag = Flag::default();
        assert_eq!(
            wait_any(&parker, &|| false, &[&flag], Timeout::Immediate),
            Err(KernelError::TimedOut)
        );
        assert!(flag.waiters.is_empty());
    }

    #[test]
    fn test_signal_from_other_thread_wakes_waiter() {
        let parker = Arc::new(Parker::new());
        let flag = Arc::new(Flag::default());
        let signaler = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                flag.raise();
            })
        };
        let objects: [&dyn SyncObject; 1] = [&*flag];
        assert_eq!(wait_any(&parker, &|| false, &objects, Timeout::Never), Ok(0));
        signaler.join().unwrap();
        assert!(flag.waiters.is_empty());
    }

    #[test]
    fn test_cancellation_interrupts_wait() {
        let parker = Arc::new(Parker::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let canceller = {
            let parker = Arc::clone(&parker);
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                cancel.store(true, Ordering::SeqCst);
                parker.unpark();
            })
        };
        let flag = Flag::default();
        let result = wait_any(
            &parker,
            &|| cancel.load(Ordering::SeqCst),
            &[&flag],
            Timeout::Never,
        );
        assert_eq!(result, Err(KernelError::TerminationRequested));
        canceller.join().unwrap();
    }

    #[test]
    fn test_empty_wait_is_a_sleep() {
        let parker = Arc::new(Parker::new());
        let start = Instant::now();
        let result = wait_any(
            &parker,
            &|| false,
            &[],
            Timeout::After(Duration::from_millis(5)),
        );
        assert_eq!(result, Err(KernelError::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
