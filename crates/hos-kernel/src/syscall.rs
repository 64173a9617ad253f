//! Supervisor calls
//!
//! Every operation a running thread can ask of the kernel goes through
//! the thread's [`ExecutionContext`]. There is no ambient "current thread":
//! the context is handed to the entry point and carries the kernel, the
//! calling process and the calling thread.
//!
//! Each call first checks the process's syscall mask (guest threads only)
//! and then passes a checkpoint, which blocks while the process is paused
//! and fails with `TerminationRequested` once termination was requested.

use std::sync::Arc;
use std::thread as host;

use hos_ipc::hipc::MESSAGE_BUFFER_SIZE;
use hos_ipc::svc;
use hos_kernel_core::{Handle, MemoryPermission, ProcessId, ThreadEvent, ThreadType};
use log::{info, warn};

use crate::context::KernelContext;
use crate::error::KernelError;
use crate::objects::{
    ClientSession, Event, KernelObject, ResetMode, SessionRequest, SharedMemory, TransferMemory,
};
use crate::process::{Process, Thread};
use crate::sync::{wait_any, SyncObject, Timeout, MAX_WAIT_OBJECTS};

/// Marks the thread `Waiting` for the lifetime of the guard.
struct WaitGuard<'a>(&'a Thread);

impl<'a> WaitGuard<'a> {
    fn new(thread: &'a Thread) -> Self {
        let _ = thread.transition(ThreadEvent::BeginWait);
        Self(thread)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let _ = self.0.transition(ThreadEvent::EndWait);
    }
}

/// The calling thread's view of the kernel.
pub struct ExecutionContext {
    kernel: Arc<KernelContext>,
    process: Arc<Process>,
    thread: Arc<Thread>,
}

impl ExecutionContext {
    pub(crate) fn new(
        kernel: Arc<KernelContext>,
        process: Arc<Process>,
        thread: Arc<Thread>,
    ) -> Self {
        Self {
            kernel,
            process,
            thread,
        }
    }

    pub fn kernel(&self) -> &Arc<KernelContext> {
        &self.kernel
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn thread(&self) -> &Arc<Thread> {
        &self.thread
    }

    fn enter(&self, id: u32) -> Result<(), KernelError> {
        if self.thread.thread_type() == ThreadType::Guest
            && !self.process.capabilities().allows_svc(id)
        {
            warn!(
                "{}: supervisor call {:#x} denied by capabilities",
                self.process.name(),
                id
            );
            return Err(KernelError::NotPermitted(id));
        }
        self.checkpoint()
    }

    /// Block while the process is paused.
    ///
    /// # Errors
    /// * `TerminationRequested` - the thread must return from its entry
    pub fn checkpoint(&self) -> Result<(), KernelError> {
        if self.thread.termination_requested() {
            return Err(KernelError::TerminationRequested);
        }
        self.process.wait_while_paused(&self.thread);
        if self.thread.termination_requested() {
            return Err(KernelError::TerminationRequested);
        }
        Ok(())
    }

    /// Resolve `handle`, including the current process/thread pseudo-handles.
    pub fn resolve(&self, handle: Handle) -> Result<KernelObject, KernelError> {
        match handle {
            Handle::CURRENT_PROCESS => Ok(KernelObject::Process(Arc::clone(&self.process))),
            Handle::CURRENT_THREAD => Ok(KernelObject::Thread(Arc::clone(&self.thread))),
            handle => self.process.resolve_handle(handle),
        }
    }

    fn resolve_as<T>(
        &self,
        handle: Handle,
        downcast: fn(KernelObject) -> Option<Arc<T>>,
    ) -> Result<Arc<T>, KernelError> {
        downcast(self.resolve(handle)?).ok_or(KernelError::InvalidHandle(handle.raw()))
    }

    /// Bind `object` to a new handle in the calling process.
    pub fn generate_handle(&self, object: KernelObject) -> Result<Handle, KernelError> {
        self.process.generate_handle(object)
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn create_event(&self, reset_mode: ResetMode) -> Result<Handle, KernelError> {
        self.enter(svc::CREATE_EVENT)?;
        self.process
            .generate_handle(KernelObject::Event(Event::with_reset_mode(reset_mode)))
    }

    pub fn signal_event(&self, handle: Handle) -> Result<(), KernelError> {
        self.enter(svc::SIGNAL_EVENT)?;
        self.resolve_as(handle, KernelObject::into_event)?.signal();
        Ok(())
    }

    pub fn clear_event(&self, handle: Handle) -> Result<(), KernelError> {
        self.enter(svc::CLEAR_EVENT)?;
        self.resolve_as(handle, KernelObject::into_event)?.clear();
        Ok(())
    }

    /// # Errors
    /// * `InvalidState` - the event was not signaled
    pub fn reset_signal(&self, handle: Handle) -> Result<(), KernelError> {
        self.enter(svc::RESET_SIGNAL)?;
        self.resolve_as(handle, KernelObject::into_event)?
            .reset_signal()
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Wait for any of `handles`; returns the index of the first signaled.
    /// A negative timeout waits forever, zero polls.
    ///
    /// # Errors
    /// * `MaximumExceeded` - more than 64 handles
    /// * `InvalidHandle` - a handle is unbound or not waitable
    /// * `TimedOut`
    /// * `TerminationRequested`
    pub fn wait_synchronization(
        &self,
        handles: &[Handle],
        timeout_nanos: i64,
    ) -> Result<usize, KernelError> {
        self.enter(svc::WAIT_SYNCHRONIZATION)?;
        if handles.len() > MAX_WAIT_OBJECTS {
            return Err(KernelError::MaximumExceeded);
        }
        let objects = handles
            .iter()
            .map(|&handle| self.resolve(handle))
            .collect::<Result<Vec<_>, _>>()?;
        let sync = objects
            .iter()
            .zip(handles)
            .map(|(object, handle)| {
                object
                    .as_sync_object()
                    .ok_or(KernelError::InvalidHandle(handle.raw()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.wait_objects(&sync, Timeout::from_nanos(timeout_nanos))
    }

    /// Wait on objects the caller already holds. Host-side service loops
    /// use this instead of going through handles.
    pub fn wait_objects(
        &self,
        objects: &[&dyn SyncObject],
        timeout: Timeout,
    ) -> Result<usize, KernelError> {
        let _waiting = WaitGuard::new(&self.thread);
        wait_any(
            self.thread.parker(),
            &|| self.thread.termination_requested(),
            objects,
            timeout,
        )
    }

    /// Sleep for `nanos`; zero or negative yields.
    pub fn sleep_thread(&self, nanos: i64) -> Result<(), KernelError> {
        self.enter(svc::SLEEP_THREAD)?;
        if nanos <= 0 {
            host::yield_now();
            return Ok(());
        }
        match self.wait_objects(&[], Timeout::from_nanos(nanos)) {
            Err(KernelError::TimedOut) => Ok(()),
            Err(err) => Err(err),
            Ok(_) => Ok(()),
        }
    }

    // ========================================================================
    // Handles
    // ========================================================================

    pub fn close_handle(&self, handle: Handle) -> Result<(), KernelError> {
        self.enter(svc::CLOSE_HANDLE)?;
        if handle.is_pseudo() {
            return Err(KernelError::InvalidHandle(handle.raw()));
        }
        self.process.close_handle(handle)
    }

    // ========================================================================
    // Memory
    // ========================================================================

    /// Allocate zeroed heap memory; returns its address.
    pub fn allocate_memory(
        &self,
        size: u64,
        permission: MemoryPermission,
    ) -> Result<u64, KernelError> {
        self.enter(svc::SET_HEAP_SIZE)?;
        self.process.allocate_heap(size, permission)
    }

    pub fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), KernelError> {
        self.process.read_memory(address, buf)
    }

    pub fn write_memory(&self, address: u64, data: &[u8]) -> Result<(), KernelError> {
        self.process.write_memory(address, data)
    }

    pub fn create_transfer_memory(
        &self,
        address: u64,
        size: u64,
        permission: MemoryPermission,
    ) -> Result<Handle, KernelError> {
        self.enter(svc::CREATE_TRANSFER_MEMORY)?;
        let memory = TransferMemory::from_process(&self.process, address, size, permission)?;
        self.process
            .generate_handle(KernelObject::TransferMemory(memory))
    }

    pub fn map_shared_memory(
        &self,
        handle: Handle,
        address: u64,
        size: u64,
        permission: MemoryPermission,
    ) -> Result<u64, KernelError> {
        self.enter(svc::MAP_SHARED_MEMORY)?;
        let memory: Arc<SharedMemory> =
            self.resolve_as(handle, KernelObject::into_shared_memory)?;
        memory.map(&self.process, address, size, permission)
    }

    pub fn unmap_shared_memory(
        &self,
        handle: Handle,
        address: u64,
        size: u64,
    ) -> Result<(), KernelError> {
        self.enter(svc::UNMAP_SHARED_MEMORY)?;
        self.resolve_as(handle, KernelObject::into_shared_memory)?
            .unmap(&self.process, address, size)
    }

    pub fn map_transfer_memory(
        &self,
        handle: Handle,
        address: u64,
        size: u64,
        permission: MemoryPermission,
    ) -> Result<u64, KernelError> {
        self.enter(svc::MAP_TRANSFER_MEMORY)?;
        self.resolve_as(handle, KernelObject::into_transfer_memory)?
            .map(&self.process, address, size, permission)
    }

    pub fn unmap_transfer_memory(
        &self,
        handle: Handle,
        address: u64,
        size: u64,
    ) -> Result<(), KernelError> {
        self.enter(svc::UNMAP_TRANSFER_MEMORY)?;
        self.resolve_as(handle, KernelObject::into_transfer_memory)?
            .unmap(&self.process, address, size)
    }

    /// Change a transfer memory's permission, including live mappings.
    pub fn protect_transfer_memory(
        &self,
        handle: Handle,
        permission: MemoryPermission,
    ) -> Result<(), KernelError> {
        self.enter(svc::SET_MEMORY_PERMISSION)?;
        self.resolve_as(handle, KernelObject::into_transfer_memory)?
            .protect(permission)
    }

    // ========================================================================
    // IPC
    // ========================================================================

    pub fn connect_to_named_port(&self, name: &str) -> Result<Handle, KernelError> {
        self.enter(svc::CONNECT_TO_NAMED_PORT)?;
        let session = self.kernel.connect_to_named_port(name)?;
        self.bind_client_session(session)
    }

    /// Bind a fresh client session, closing it if no handle can be made.
    pub fn bind_client_session(
        &self,
        session: Arc<ClientSession>,
    ) -> Result<Handle, KernelError> {
        self.process
            .generate_handle(KernelObject::ClientSession(Arc::clone(&session)))
            .inspect_err(|_| session.close())
    }

    /// Send the message in this thread's message buffer over `handle` and
    /// block until the server replies.
    ///
    /// # Errors
    /// * `SessionClosed` - the server side closed before replying
    /// * `TerminationRequested` - the wait was cancelled
    pub fn send_sync_request(&self, handle: Handle) -> Result<(), KernelError> {
        self.enter(svc::SEND_SYNC_REQUEST)?;
        let session = self.resolve_as(handle, KernelObject::into_client_session)?;
        let request = SessionRequest::new(Arc::clone(&self.process), self.thread.message_address());
        session.send(Arc::clone(&request))?;

        let objects: [&dyn SyncObject; 1] = [&*request];
        if let Err(err) = self.wait_objects(&objects, Timeout::Never) {
            request.complete(Err(KernelError::TerminationRequested));
            return Err(err);
        }
        request.result().unwrap_or(Err(KernelError::SessionClosed))
    }

    /// Copy `data` to the start of this thread's message buffer.
    pub fn write_message(&self, data: &[u8]) -> Result<(), KernelError> {
        if data.len() > MESSAGE_BUFFER_SIZE {
            return Err(KernelError::InvalidSize(data.len() as u64));
        }
        self.process
            .write_memory(self.thread.message_address(), data)
    }

    /// The whole message buffer.
    pub fn read_message(&self) -> Result<Vec<u8>, KernelError> {
        let mut message = vec![0; MESSAGE_BUFFER_SIZE];
        self.process
            .read_memory(self.thread.message_address(), &mut message)?;
        Ok(message)
    }

    pub fn message_address(&self) -> u64 {
        self.thread.message_address()
    }

    // ========================================================================
    // Misc
    // ========================================================================

    pub fn get_system_tick(&self) -> Result<u64, KernelError> {
        self.enter(svc::GET_SYSTEM_TICK)?;
        Ok(self.kernel.ticks().ticks())
    }

    /// The pid of a process handle, or of a thread handle's owner.
    pub fn get_process_id(&self, handle: Handle) -> Result<ProcessId, KernelError> {
        self.enter(svc::GET_PROCESS_ID)?;
        match self.resolve(handle)? {
            KernelObject::Process(process) => Ok(process.pid()),
            KernelObject::Thread(thread) => thread
                .process()
                .map(|process| process.pid())
                .ok_or(KernelError::InvalidHandle(handle.raw())),
            _ => Err(KernelError::InvalidHandle(handle.raw())),
        }
    }

    pub fn output_debug_string(&self, message: &str) -> Result<(), KernelError> {
        self.enter(svc::OUTPUT_DEBUG_STRING)?;
        info!("{}: {}", self.process.name(), message);
        self.kernel.hal().debug_write(message);
        Ok(())
    }

    /// Terminate the calling process. On success this returns
    /// `Err(TerminationRequested)` so the entry point unwinds with `?`.
    pub fn exit_process(&self) -> Result<(), KernelError> {
        self.enter(svc::EXIT_PROCESS)?;
        self.process.terminate_from(Some(self.thread.id()));
        Err(KernelError::TerminationRequested)
    }
}
