//! Loom models of the kernel's blocking handshakes
//!
//! The real objects use `std::sync`, which loom cannot instrument, so each
//! test rebuilds the relevant protocol from loom primitives with the same
//! lock and flag structure.
//!
//! # Running Loom Tests
//!
//! ```bash
//! cargo test --package hos-kernel --features loom -- --test-threads=1 loom
//! ```

#[cfg(all(test, feature = "loom"))]
mod tests {
    use loom::sync::atomic::{AtomicBool, Ordering};
    use loom::sync::{Arc, Condvar, Mutex};
    use loom::thread;

    use hos_kernel_core::{process_transition, ProcessEvent, ProcessState};

    /// `Parker` with the token semantics of the kernel one: an unpark before
    /// park is not lost.
    struct Parker {
        token: Mutex<bool>,
        condvar: Condvar,
    }

    impl Parker {
        fn new() -> Self {
            Self {
                token: Mutex::new(false),
                condvar: Condvar::new(),
            }
        }

        fn park(&self) {
            let mut token = self.token.lock().unwrap();
            while !*token {
                token = self.condvar.wait(token).unwrap();
            }
            *token = false;
        }

        fn unpark(&self) {
            *self.token.lock().unwrap() = true;
            self.condvar.notify_all();
        }
    }

    /// Event signal flag plus a single registered waiter.
    struct Event {
        signaled: AtomicBool,
        waiter: Mutex<Option<Arc<Parker>>>,
    }

    impl Event {
        fn signal(&self) {
            self.signaled.store(true, Ordering::Release);
            if let Some(parker) = self.waiter.lock().unwrap().as_ref() {
                parker.unpark();
            }
        }

        fn wait(&self, parker: &Arc<Parker>) {
            if self.signaled.load(Ordering::Acquire) {
                return;
            }
            *self.waiter.lock().unwrap() = Some(parker.clone());
            while !self.signaled.load(Ordering::Acquire) {
                parker.park();
            }
            *self.waiter.lock().unwrap() = None;
        }
    }

    /// Test: a signal racing with registration is never lost, and the
    /// signaler's prior write is visible to the woken waiter.
    #[test]
    fn loom_event_signal_not_lost() {
        loom::model(|| {
            let event = Arc::new(Event {
                signaled: AtomicBool::new(false),
                waiter: Mutex::new(None),
            });
            let data = Arc::new(AtomicBool::new(false));

            let signaler = {
                let event = event.clone();
                let data = data.clone();
                thread::spawn(move || {
                    data.store(true, Ordering::Relaxed);
                    event.signal();
                })
            };

            let parker = Arc::new(Parker::new());
            event.wait(&parker);
            assert!(data.load(Ordering::Relaxed));

            signaler.join().unwrap();
        });
    }

    /// Test: two concurrent terminations begin termination exactly once.
    #[test]
    fn loom_termination_begins_once() {
        loom::model(|| {
            let state = Arc::new(Mutex::new(ProcessState::Running));

            let begin = |state: &Mutex<ProcessState>| {
                let mut state = state.lock().unwrap();
                match process_transition(*state, ProcessEvent::BeginTermination) {
                    Ok(next) => {
                        *state = next;
                        true
                    }
                    Err(_) => false,
                }
            };

            let other = {
                let state = state.clone();
                thread::spawn(move || begin(&state))
            };
            let mine = begin(&state);
            let theirs = other.join().unwrap();

            assert!(mine ^ theirs);
            assert_eq!(*state.lock().unwrap(), ProcessState::Terminating);
        });
    }
}
