use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self as host, JoinHandle};
use std::time::{Duration, Instant};

use hos_kernel_core::{
    thread_transition, ObjectKind, ThreadEvent, ThreadId, ThreadState, ThreadType,
};
use log::{debug, error, warn};

use super::Process;
use crate::context::KernelContext;
use crate::error::KernelError;
use crate::objects::ObjectHeader;
use crate::sync::{Parker, SyncObject, WaitList};
use crate::syscall::ExecutionContext;
use crate::{lock, wait_until};

/// The body of a thread. Returning ends the thread; returning
/// `Err(TerminationRequested)` is the normal answer to a termination
/// request.
pub type ThreadEntry =
    Box<dyn FnOnce(&ExecutionContext) -> Result<(), KernelError> + Send + 'static>;

/// A kernel thread backed by a dedicated host thread.
pub struct Thread {
    header: ObjectHeader,
    id: ThreadId,
    process: Weak<Process>,
    priority: u32,
    thread_type: ThreadType,
    message_address: u64,
    state: Mutex<ThreadState>,
    state_changed: Condvar,
    termination_requested: AtomicBool,
    parker: Arc<Parker>,
    /// Woken when the thread reaches `Exited`.
    waiters: WaitList,
    entry: Mutex<Option<ThreadEntry>>,
    host: Mutex<Option<JoinHandle<()>>>,
}

impl Thread {
    pub(crate) fn new(
        id: ThreadId,
        process: Weak<Process>,
        priority: u32,
        thread_type: ThreadType,
        message_address: u64,
        entry: ThreadEntry,
    ) -> Arc<Self> {
        Arc::new(Self {
            header: ObjectHeader::new(ObjectKind::Thread),
            id,
            process,
            priority,
            thread_type,
            message_address,
            state: Mutex::new(ThreadState::Created),
            state_changed: Condvar::new(),
            termination_requested: AtomicBool::new(false),
            parker: Arc::new(Parker::new()),
            waiters: WaitList::new(),
            entry: Mutex::new(Some(entry)),
            host: Mutex::new(None),
        })
    }

    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn thread_type(&self) -> ThreadType {
        self.thread_type
    }

    /// Address of the IPC message buffer in the owner's thread local page.
    pub fn message_address(&self) -> u64 {
        self.message_address
    }

    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    pub fn state(&self) -> ThreadState {
        *lock(&self.state)
    }

    pub(crate) fn parker(&self) -> &Arc<Parker> {
        &self.parker
    }

    pub fn termination_requested(&self) -> bool {
        self.termination_requested.load(Ordering::Acquire)
    }

    /// Ask the thread to exit at its next checkpoint and interrupt any wait
    /// it is blocked in.
    pub fn request_termination(&self) {
        self.termination_requested.store(true, Ordering::Release);
        self.parker.unpark();
    }

    pub(crate) fn transition(&self, event: ThreadEvent) -> Result<ThreadState, KernelError> {
        let mut state = lock(&self.state);
        let next = thread_transition(*state, event).map_err(|err| {
            warn!("thread {}: {}", self.id, err);
            KernelError::InvalidState
        })?;
        *state = next;
        drop(state);
        self.state_changed.notify_all();
        if next == ThreadState::Exited {
            self.waiters.notify_all();
        }
        Ok(next)
    }

    /// Spawn the host thread and run the entry on it.
    pub(crate) fn start(self: &Arc<Self>, kernel: Arc<KernelContext>) -> Result<(), KernelError> {
        let entry = lock(&self.entry).take().ok_or(KernelError::InvalidState)?;
        self.transition(ThreadEvent::Start)?;

        let name = match self.process() {
            Some(process) => format!("{}:{}", process.name(), self.id),
            None => format!("thread:{}", self.id),
        };
        let thread = Arc::clone(self);
        let spawned = host::Builder::new()
            .name(name)
            .spawn(move || thread.run(kernel, entry));
        match spawned {
            Ok(handle) => {
                *lock(&self.host) = Some(handle);
                Ok(())
            }
            Err(err) => {
                error!("thread {}: host spawn failed: {}", self.id, err);
                // Never ran; nothing else will move it out of `Started`.
                *lock(&self.state) = ThreadState::Exited;
                self.state_changed.notify_all();
                self.waiters.notify_all();
                Err(KernelError::HostThread(err.to_string()))
            }
        }
    }

    fn run(self: Arc<Self>, kernel: Arc<KernelContext>, entry: ThreadEntry) {
        let Some(process) = self.process() else {
            return;
        };
        if self.transition(ThreadEvent::Run).is_err() {
            return;
        }
        debug!("{}: thread {} running", process.name(), self.id);

        let context = ExecutionContext::new(kernel, Arc::clone(&process), Arc::clone(&self));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry(&context)));
        drop(context);
        match outcome {
            Ok(Ok(())) | Ok(Err(KernelError::TerminationRequested)) => {
                debug!("{}: thread {} exited", process.name(), self.id);
            }
            Ok(Err(err)) => {
                warn!("{}: thread {} exited with error: {}", process.name(), self.id, err);
            }
            Err(_) => {
                error!("{}: thread {} panicked", process.name(), self.id);
            }
        }

        let _ = self.transition(ThreadEvent::Exit);
        let _ = self.transition(ThreadEvent::Finish);
        process.on_thread_exited();
    }

    /// Block until the state satisfies `reached`. Returns false on timeout.
    pub fn wait_for_state(
        &self,
        timeout: Option<Duration>,
        reached: impl Fn(ThreadState) -> bool,
    ) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let state = lock(&self.state);
        wait_until(&self.state_changed, state, deadline, |state| reached(*state)).1
    }

    /// Wait for `Exited` and reap the host thread. Joining from the thread
    /// itself only waits for the state.
    pub fn join(&self) {
        if self.state() == ThreadState::Created {
            return;
        }
        if self.is_current() {
            return;
        }
        self.wait_for_state(None, |state| state == ThreadState::Exited);
        if let Some(handle) = lock(&self.host).take() {
            let _ = handle.join();
        }
    }

    fn is_current(&self) -> bool {
        lock(&self.host)
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == host::current().id())
    }
}

impl SyncObject for Thread {
    fn try_acquire(&self) -> bool {
        self.state() == ThreadState::Exited
    }

    fn wait_list(&self) -> &WaitList {
        &self.waiters
    }
}
