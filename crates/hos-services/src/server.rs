//! Service servers
//!
//! A [`ServerBase`] owns one listening port and runs its accept/dispatch
//! loop as the only thread of a dedicated service host process. Each
//! accepted connection gets a fresh service instance from the factory.
//!
//! Stopping closes the port first, so no session can be accepted after
//! the server considers itself stopped, then closes every open session and
//! finally terminates (and joins) the host process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hos_ipc::capability::{service_core_priority, SERVICE_DEFAULT};
use hos_kernel::sync::MAX_WAIT_OBJECTS;
use hos_kernel::{
    ExecutionContext, KernelContext, KernelError, Process, ProcessCreationInfo, ProcessFlags,
    ServerPort, SyncObject, ThreadEntry, Timeout,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::command::SharedService;
use crate::dispatch::{Dispatcher, SessionEntry, DEFAULT_POINTER_BUFFER_SIZE};
use crate::error::ServiceResult;

/// Priority of every service host thread.
pub const SERVICE_PRIORITY: u32 = 44;

/// Code base of service host processes.
pub const SERVICE_CODE_ADDRESS: u64 = 0x800_0000;

/// Sessions one wait can hold next to the port.
const WAIT_WINDOW: usize = MAX_WAIT_OBJECTS - 1;

/// Longest wait on one window while sessions overflow it.
const WINDOW_ROTATION: Duration = Duration::from_millis(10);

/// Builds one service instance per accepted session.
pub type ServiceFactory = Arc<dyn Fn(&Arc<KernelContext>) -> SharedService + Send + Sync>;

/// Capability descriptors granted to service host processes.
pub fn service_capabilities(core_count: u32) -> Vec<u32> {
    let mut capabilities = vec![service_core_priority(core_count)];
    capabilities.extend_from_slice(&SERVICE_DEFAULT);
    capabilities
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOptions {
    pub priority: u32,
    pub pointer_buffer_size: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            priority: SERVICE_PRIORITY,
            pointer_buffer_size: DEFAULT_POINTER_BUFFER_SIZE,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the handle and the loop thread.
struct Shared {
    name: String,
    port: Arc<ServerPort>,
    sessions: Mutex<Vec<SessionEntry>>,
    factory: ServiceFactory,
    options: ServerOptions,
}

impl Shared {
    fn remove(&self, session: &SessionEntry) {
        lock(&self.sessions).retain(|entry| !Arc::ptr_eq(&entry.session, &session.session));
        session.session.close();
    }

    fn close_all(&self) {
        let sessions = std::mem::take(&mut *lock(&self.sessions));
        for entry in sessions {
            entry.session.close();
        }
    }

    fn accept(&self, kernel: &Arc<KernelContext>) {
        while let Some(session) = self.port.accept() {
            let service = (self.factory)(kernel);
            debug!("{}: accepted session", self.name);
            lock(&self.sessions).push(SessionEntry::new(session, service));
        }
    }
}

/// A running server.
pub struct ServerBase {
    shared: Arc<Shared>,
    process: Arc<Process>,
    stopped: AtomicBool,
}

impl ServerBase {
    /// Start serving `port` in a new service host process.
    ///
    /// # Errors
    /// Kernel errors from process creation.
    pub fn start(
        kernel: &Arc<KernelContext>,
        name: &str,
        port: Arc<ServerPort>,
        factory: ServiceFactory,
        options: ServerOptions,
    ) -> ServiceResult<Arc<Self>> {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            port,
            sessions: Mutex::new(Vec::new()),
            factory,
            options,
        });
        let entry: ThreadEntry = {
            let shared = Arc::clone(&shared);
            Box::new(move |context: &ExecutionContext| serve(context, &shared))
        };
        let info = ProcessCreationInfo::new(
            "Service",
            1,
            0,
            SERVICE_CODE_ADDRESS,
            1,
            ProcessFlags::service(),
        );
        let capabilities = service_capabilities(kernel.config().cpu_core_count);
        let process = kernel.start_initial_process(info, &capabilities, options.priority, entry)?;
        info!("{}: server started (pid {})", name, process.pid());
        Ok(Arc::new(Self {
            shared,
            process,
            stopped: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The service host process.
    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn port(&self) -> &Arc<ServerPort> {
        &self.shared.port
    }

    pub fn session_count(&self) -> usize {
        lock(&self.shared.sessions).len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Close the port, close every session, then terminate and join the
    /// host process. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.port.close();
        self.shared.close_all();
        self.process.terminate();
        info!("{} successfully stopped.", self.shared.name);
    }
}

impl Drop for ServerBase {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Loop thread entry. Sessions still open when the loop ends are closed
/// here; the loop may have accepted one after `stop` drained the list.
fn serve(context: &ExecutionContext, shared: &Shared) -> Result<(), KernelError> {
    let result = serve_loop(context, shared);
    shared.close_all();
    match result {
        Err(KernelError::TerminationRequested) => Ok(()),
        other => other,
    }
}

fn serve_loop(context: &ExecutionContext, shared: &Shared) -> Result<(), KernelError> {
    let dispatcher = Dispatcher::new(
        context.kernel(),
        context.process(),
        shared.options.pointer_buffer_size,
    );
    let mut window_start = 0;
    loop {
        context.checkpoint()?;
        let (sessions, timeout) = wait_window(shared, &mut window_start);
        let mut objects: Vec<&dyn SyncObject> = Vec::with_capacity(sessions.len() + 1);
        objects.push(&*shared.port);
        objects.extend(
            sessions
                .iter()
                .map(|entry| &*entry.session as &dyn SyncObject),
        );

        let index = match context.wait_objects(&objects, timeout) {
            Ok(index) => index,
            Err(KernelError::TimedOut) => continue,
            Err(err) => return Err(err),
        };
        if index == 0 {
            shared.accept(context.kernel());
            continue;
        }

        let entry = &sessions[index - 1];
        match entry.session.receive() {
            Some(request) => {
                let outcome = dispatcher.handle(entry, &request);
                if !outcome.new_sessions.is_empty() {
                    lock(&shared.sessions).extend(outcome.new_sessions);
                }
                if outcome.close {
                    shared.remove(entry);
                }
            }
            None if entry.session.is_client_closed() => {
                debug!("{}: client closed its session", shared.name);
                shared.remove(entry);
            }
            None => warn!("{}: session signaled without a request", shared.name),
        }
    }
}

/// Sessions to wait on this pass. Past `WAIT_WINDOW` sessions the window
/// moves on every pass and each wait is bounded, so every session is
/// reached within a few rotations.
fn wait_window(shared: &Shared, start: &mut usize) -> (Vec<SessionEntry>, Timeout) {
    let sessions = lock(&shared.sessions);
    if sessions.len() <= WAIT_WINDOW {
        *start = 0;
        return (sessions.to_vec(), Timeout::Never);
    }
    let first = *start % sessions.len();
    *start = first + WAIT_WINDOW;
    let window = sessions
        .iter()
        .cycle()
        .skip(first)
        .take(WAIT_WINDOW)
        .cloned()
        .collect();
    (window, Timeout::After(WINDOW_ROTATION))
}
