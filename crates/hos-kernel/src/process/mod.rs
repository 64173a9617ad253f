//! Processes
//!
//! A process owns an address space, a handle table and a set of threads.
//! Termination is cooperative: [`Process::terminate`] asks every thread to
//! stop, joins them, and only then releases handles and mappings. A thread
//! is never destroyed from outside; it exits by returning from its entry.

mod thread;

pub use thread::{Thread, ThreadEntry};

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use hos_hal::{HAL, PAGE_SIZE};
use hos_kernel_core::{
    check_handle_table, process_transition, Handle, HandleError, HandleTable, InvariantViolation,
    KernelCapabilities, MemoryPermission, ObjectId, ObjectKind, ProcessEvent, ProcessId,
    ProcessState, ThreadId, ThreadState, ThreadType,
};
use log::{debug, info, warn};

use crate::context::KernelContext;
use crate::error::KernelError;
use crate::klog::KernelEvent;
use crate::memory::{
    page_align_up, Access, AddressSpace, AllocatedPages, Mapping, MemoryRegion, MemoryState,
    PageList, ALIAS_REGION_BASE, ALIAS_REGION_SIZE, HEAP_REGION_BASE, HEAP_REGION_SIZE,
    TLS_REGION_BASE, TLS_REGION_SIZE,
};
use crate::objects::{KernelObject, ObjectHeader};
use crate::sync::{SyncObject, WaitList};
use crate::{lock, wait_until};

/// Everything needed to construct a process.
pub(crate) struct ProcessParams {
    pub pid: ProcessId,
    pub name: String,
    pub program_id: u64,
    pub is_application: bool,
    pub creation_order: u64,
    pub capabilities: KernelCapabilities,
    pub handle_table_size: usize,
    pub hal: Arc<dyn HAL>,
    pub region: Arc<MemoryRegion>,
    pub kernel: Weak<KernelContext>,
}

pub struct Process {
    header: ObjectHeader,
    pid: ProcessId,
    name: String,
    program_id: u64,
    is_application: bool,
    creation_order: u64,
    capabilities: KernelCapabilities,
    hal: Arc<dyn HAL>,
    region: Arc<MemoryRegion>,
    kernel: Weak<KernelContext>,
    state: Mutex<ProcessState>,
    state_changed: Condvar,
    handles: Mutex<HandleTable<KernelObject>>,
    threads: Mutex<Vec<Arc<Thread>>>,
    address_space: Mutex<AddressSpace>,
    paused: Mutex<bool>,
    activity_changed: Condvar,
    /// Woken when the process reaches `Terminated`.
    waiters: WaitList,
}

impl Process {
    pub(crate) fn new(params: ProcessParams) -> Arc<Self> {
        Arc::new(Self {
            header: ObjectHeader::new(ObjectKind::Process),
            pid: params.pid,
            name: params.name,
            program_id: params.program_id,
            is_application: params.is_application,
            creation_order: params.creation_order,
            capabilities: params.capabilities,
            hal: params.hal,
            region: params.region,
            kernel: params.kernel,
            state: Mutex::new(ProcessState::Created),
            state_changed: Condvar::new(),
            handles: Mutex::new(HandleTable::new(params.handle_table_size)),
            threads: Mutex::new(Vec::new()),
            address_space: Mutex::new(AddressSpace::new()),
            paused: Mutex::new(false),
            activity_changed: Condvar::new(),
            waiters: WaitList::new(),
        })
    }

    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program_id(&self) -> u64 {
        self.program_id
    }

    /// The guest title, as opposed to an HLE service host process.
    pub fn is_application(&self) -> bool {
        self.is_application
    }

    pub(crate) fn creation_order(&self) -> u64 {
        self.creation_order
    }

    pub fn capabilities(&self) -> &KernelCapabilities {
        &self.capabilities
    }

    pub fn hal(&self) -> &Arc<dyn HAL> {
        &self.hal
    }

    pub fn state(&self) -> ProcessState {
        *lock(&self.state)
    }

    pub(crate) fn start(&self) -> Result<(), KernelError> {
        self.apply(ProcessEvent::Start)
    }

    fn apply(&self, event: ProcessEvent) -> Result<(), KernelError> {
        let mut state = lock(&self.state);
        *state = process_transition(*state, event).map_err(|_| KernelError::InvalidState)?;
        drop(state);
        self.state_changed.notify_all();
        Ok(())
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Bind `object` to a fresh handle in this process's table.
    ///
    /// # Errors
    /// * `OutOfHandles` - the table is full
    pub fn generate_handle(&self, object: KernelObject) -> Result<Handle, KernelError> {
        let mut table = lock(&self.handles);
        let handle = table.generate(object.clone()).map_err(|err| {
            if let HandleError::OutOfHandles { capacity } = err {
                warn!(
                    "{} ({}): handle table exhausted at {} entries",
                    self.name, self.pid, capacity
                );
            }
            KernelError::from(err)
        })?;
        object.on_handle_opened();
        Ok(handle)
    }

    /// Look up `handle` in this process's table only.
    pub fn resolve_handle(&self, handle: Handle) -> Result<KernelObject, KernelError> {
        lock(&self.handles)
            .resolve(handle)
            .cloned()
            .ok_or(KernelError::InvalidHandle(handle.raw()))
    }

    /// Remove the binding; the object is released when its last binding
    /// and host reference are gone.
    pub fn close_handle(&self, handle: Handle) -> Result<(), KernelError> {
        let object = lock(&self.handles).close(handle)?;
        object.on_handle_closed();
        Ok(())
    }

    pub fn handle_count(&self) -> usize {
        lock(&self.handles).len()
    }

    pub fn handle_capacity(&self) -> usize {
        lock(&self.handles).capacity()
    }

    /// Run the handle table invariant checks.
    pub fn check_handles(&self) -> Vec<InvariantViolation> {
        check_handle_table(&lock(&self.handles))
    }

    // ========================================================================
    // Memory
    // ========================================================================

    /// Install a mapping built by `make` at `address`, or at the lowest free
    /// alias-region address when `address` is zero.
    pub fn map_alias(
        &self,
        address: u64,
        size: u64,
        make: impl FnOnce(u64) -> Mapping,
    ) -> Result<u64, KernelError> {
        if self.state().is_terminating() {
            return Err(KernelError::InvalidState);
        }
        let mut space = lock(&self.address_space);
        let address = if address == 0 {
            space.find_free(ALIAS_REGION_BASE, ALIAS_REGION_SIZE, size)?
        } else {
            address
        };
        space.map(make(address))?;
        Ok(address)
    }

    pub fn unmap_object(
        &self,
        address: u64,
        size: u64,
        object: ObjectId,
    ) -> Result<Mapping, KernelError> {
        lock(&self.address_space).unmap(address, size, Some(object))
    }

    pub fn set_mapping_permission(
        &self,
        address: u64,
        permission: MemoryPermission,
    ) -> Result<(), KernelError> {
        lock(&self.address_space).set_permission(address, permission)
    }

    pub fn page_list(
        &self,
        address: u64,
        size: u64,
    ) -> Result<(PageList, Vec<Arc<AllocatedPages>>), KernelError> {
        lock(&self.address_space).page_list(address, size)
    }

    /// Allocate zeroed heap memory from the process's region.
    pub fn allocate_heap(
        &self,
        size: u64,
        permission: MemoryPermission,
    ) -> Result<u64, KernelError> {
        if size == 0 {
            return Err(KernelError::InvalidSize(0));
        }
        let size = page_align_up(size);
        let backing = self.region.allocate(&self.hal, size / PAGE_SIZE)?;
        let mut space = lock(&self.address_space);
        let address = space.find_free(HEAP_REGION_BASE, HEAP_REGION_SIZE, size)?;
        space.map(Mapping::owned(
            address,
            backing,
            permission,
            MemoryState::Normal,
        ))?;
        Ok(address)
    }

    pub(crate) fn map_code(&self, address: u64, pages: u64) -> Result<(), KernelError> {
        if pages == 0 {
            return Ok(());
        }
        let backing = self.region.allocate(&self.hal, pages)?;
        lock(&self.address_space).map(Mapping::owned(
            address,
            backing,
            MemoryPermission::READ_EXECUTE,
            MemoryState::Code,
        ))
    }

    /// Map one thread local page; its start holds the IPC message buffer.
    fn allocate_tls(&self) -> Result<u64, KernelError> {
        let backing = self.region.allocate(&self.hal, 1)?;
        let mut space = lock(&self.address_space);
        let address = space.find_free(TLS_REGION_BASE, TLS_REGION_SIZE, PAGE_SIZE)?;
        space.map(Mapping::owned(
            address,
            backing,
            MemoryPermission::READ_WRITE,
            MemoryState::ThreadLocal,
        ))?;
        Ok(address)
    }

    /// Copy guest memory at `address` into `buf`.
    ///
    /// # Errors
    /// * `InvalidAddress` - part of the range is unmapped
    /// * `InvalidPermission` - part of the range is not readable
    pub fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), KernelError> {
        let space = lock(&self.address_space);
        let chunks = space.translate(address, buf.len() as u64, Access::Read)?;
        let mut done = 0;
        for (physical, len) in chunks {
            self.hal.read_memory(physical, &mut buf[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    /// Copy `data` into guest memory at `address`.
    pub fn write_memory(&self, address: u64, data: &[u8]) -> Result<(), KernelError> {
        let space = lock(&self.address_space);
        let chunks = space.translate(address, data.len() as u64, Access::Write)?;
        let mut done = 0;
        for (physical, len) in chunks {
            self.hal.write_memory(physical, &data[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    pub fn is_mapped(&self, address: u64) -> bool {
        lock(&self.address_space).mapping_at(address).is_some()
    }

    pub fn mapped_size(&self) -> u64 {
        lock(&self.address_space).mapped_size()
    }

    // ========================================================================
    // Threads
    // ========================================================================

    pub(crate) fn create_thread(
        self: &Arc<Self>,
        id: ThreadId,
        priority: u32,
        thread_type: ThreadType,
        entry: ThreadEntry,
    ) -> Result<Arc<Thread>, KernelError> {
        if self.state().is_terminating() {
            return Err(KernelError::InvalidState);
        }
        if thread_type == ThreadType::Guest && !self.capabilities.allows_priority(priority) {
            return Err(KernelError::InvalidPriority(priority));
        }
        let message_address = self.allocate_tls()?;
        let thread = Thread::new(
            id,
            Arc::downgrade(self),
            priority,
            thread_type,
            message_address,
            entry,
        );
        lock(&self.threads).push(Arc::clone(&thread));
        debug!("{} ({}): created thread {}", self.name, self.pid, id);
        Ok(thread)
    }

    pub fn threads(&self) -> Vec<Arc<Thread>> {
        lock(&self.threads).clone()
    }

    /// Snapshot of every thread's state, in creation order.
    pub fn thread_states(&self) -> Vec<(ThreadId, ThreadState)> {
        lock(&self.threads)
            .iter()
            .map(|thread| (thread.id(), thread.state()))
            .collect()
    }

    // ========================================================================
    // Activity
    // ========================================================================

    /// Pause or resume guest execution. Threads stop at their next
    /// checkpoint; their lifecycle state is untouched.
    pub fn set_paused(&self, paused: bool) {
        *lock(&self.paused) = paused;
        self.activity_changed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *lock(&self.paused)
    }

    /// Block `thread` while the process is paused.
    pub(crate) fn wait_while_paused(&self, thread: &Thread) {
        let paused = lock(&self.paused);
        let _ = wait_until(&self.activity_changed, paused, None, |paused| {
            !*paused || thread.termination_requested()
        });
    }

    // ========================================================================
    // Termination
    // ========================================================================

    /// Terminate the process from outside it.
    ///
    /// Requests termination of every thread, joins them, then releases all
    /// handles and mappings. Terminating a process that is already
    /// terminating or terminated does nothing.
    pub fn terminate(&self) {
        self.terminate_from(None);
    }

    /// Terminate on behalf of `caller`, one of this process's own threads.
    /// The caller is not joined; the process finishes terminating when it
    /// exits.
    pub(crate) fn terminate_from(&self, caller: Option<ThreadId>) {
        if !self.begin_termination() {
            return;
        }
        info!("Terminating process {} ({})", self.name, self.pid);

        let threads = self.threads();
        for thread in &threads {
            thread.request_termination();
        }
        self.set_paused(false);

        for thread in threads.iter().filter(|t| Some(t.id()) != caller) {
            thread.join();
        }
        let caller_alive = threads
            .iter()
            .any(|t| Some(t.id()) == caller && t.state() != ThreadState::Exited);
        if !caller_alive {
            self.finish_termination();
        }
    }

    fn begin_termination(&self) -> bool {
        self.apply(ProcessEvent::BeginTermination).is_ok()
    }

    /// Called by each thread after it reaches `Exited`.
    pub(crate) fn on_thread_exited(&self) {
        let all_exited = lock(&self.threads)
            .iter()
            .all(|thread| thread.state() == ThreadState::Exited);
        if !all_exited {
            return;
        }
        if self.state() == ProcessState::Running {
            debug!("{} ({}): last thread exited", self.name, self.pid);
            self.begin_termination();
        }
        self.finish_termination();
    }

    /// Release resources and enter `Terminated`. Idempotent.
    fn finish_termination(&self) {
        {
            let mut state = lock(&self.state);
            let Ok(next) = process_transition(*state, ProcessEvent::FinishTermination) else {
                return;
            };
            let objects = lock(&self.handles).drain();
            let mappings = lock(&self.address_space).clear();
            for (_, object) in objects {
                object.on_handle_closed();
            }
            drop(mappings);
            *state = next;
        }
        self.state_changed.notify_all();
        self.waiters.notify_all();
        info!("Process {} ({}) terminated", self.name, self.pid);
        if let Some(kernel) = self.kernel.upgrade() {
            kernel.log_event(KernelEvent::ProcessTerminated { pid: self.pid });
        }
    }

    /// Block until `Terminated`. Returns false on timeout.
    pub fn wait_for_termination(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let state = lock(&self.state);
        wait_until(&self.state_changed, state, deadline, |state| {
            *state == ProcessState::Terminated
        })
        .1
    }
}

impl SyncObject for Process {
    fn try_acquire(&self) -> bool {
        self.state() == ProcessState::Terminated
    }

    fn wait_list(&self) -> &WaitList {
        &self.waiters
    }
}
