//! Kernel context
//!
//! The root of the kernel: the authoritative process set, the physical
//! memory regions, the logical clock and the named port table. One
//! context lives for the whole emulated session.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use hos_hal::HAL;
use hos_kernel_core::{KernelCapabilities, ProcessId, ProcessState, ThreadId, ThreadType};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::TickSource;
use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::klog::{KernelEvent, KernelLog, KernelLogEntry};
use crate::lock;
use crate::memory::{MemoryRegion, MemoryRegionKind};
use crate::objects::{create_port, ClientPort, ClientSession, ServerPort};
use crate::process::{Process, ProcessParams, ThreadEntry};

/// First pid handed to initial (service host) processes.
const INITIAL_PROCESS_ID_MIN: u64 = 1;
/// First pid handed to applications.
const APPLICATION_PROCESS_ID_MIN: u64 = 0x51;

/// Process creation flags, in the layout of the Horizon creation info.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessFlags(pub u32);

impl ProcessFlags {
    pub const IS_APPLICATION: u32 = 1 << 6;
    const POOL_PARTITION_SHIFT: u32 = 7;
    const POOL_PARTITION_MASK: u32 = 0xF << Self::POOL_PARTITION_SHIFT;

    pub const POOL_APPLICATION: u32 = 0 << Self::POOL_PARTITION_SHIFT;
    pub const POOL_APPLET: u32 = 1 << Self::POOL_PARTITION_SHIFT;
    pub const POOL_SYSTEM: u32 = 2 << Self::POOL_PARTITION_SHIFT;
    pub const POOL_SYSTEM_NON_SECURE: u32 = 3 << Self::POOL_PARTITION_SHIFT;

    /// An application allocating from the application pool.
    pub const fn application() -> Self {
        Self(Self::IS_APPLICATION | Self::POOL_APPLICATION)
    }

    /// A system process allocating from the service pool.
    pub const fn service() -> Self {
        Self(Self::POOL_SYSTEM)
    }

    pub const fn is_application(self) -> bool {
        self.0 & Self::IS_APPLICATION != 0
    }

    /// The region the process allocates from. Unknown partitions fall back
    /// to the service region.
    pub fn memory_region(self) -> MemoryRegionKind {
        match self.0 & Self::POOL_PARTITION_MASK {
            Self::POOL_APPLICATION => MemoryRegionKind::Application,
            Self::POOL_APPLET => MemoryRegionKind::Applet,
            Self::POOL_SYSTEM_NON_SECURE => MemoryRegionKind::NvServices,
            _ => MemoryRegionKind::Service,
        }
    }
}

/// What the loader knows about a process before it exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCreationInfo {
    pub name: String,
    pub version: u32,
    pub program_id: u64,
    pub code_address: u64,
    pub code_pages: u64,
    pub flags: ProcessFlags,
}

impl ProcessCreationInfo {
    pub fn new(
        name: impl Into<String>,
        version: u32,
        program_id: u64,
        code_address: u64,
        code_pages: u64,
        flags: ProcessFlags,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            program_id,
            code_address,
            code_pages,
            flags,
        }
    }
}

/// Diagnostic snapshot of the kernel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelStats {
    pub processes: usize,
    pub application_processes: usize,
    pub threads: usize,
    pub handles: usize,
    pub named_ports: usize,
    pub free_pages: u64,
    pub ticks: u64,
    pub paused: bool,
}

pub struct KernelContext {
    config: KernelConfig,
    hal: Arc<dyn HAL>,
    regions: Vec<Arc<MemoryRegion>>,
    ticks: TickSource,
    processes: Mutex<BTreeMap<ProcessId, Arc<Process>>>,
    named_ports: Mutex<BTreeMap<String, Arc<ClientPort>>>,
    next_initial_pid: AtomicU64,
    next_application_pid: AtomicU64,
    next_thread_id: AtomicU64,
    next_creation_order: AtomicU64,
    klog: Mutex<KernelLog>,
    paused: AtomicBool,
    shutting_down: AtomicBool,
    this: Weak<KernelContext>,
}

impl KernelContext {
    /// Create the kernel over `hal`, laying out physical memory per
    /// `config.memory_arrange`.
    ///
    /// # Errors
    /// * `InvalidSize` - the HAL exposes less memory than the arrangement needs
    pub fn new(config: KernelConfig, hal: Arc<dyn HAL>) -> Result<Arc<Self>, KernelError> {
        let dram_size = config.memory_arrange.dram_size();
        if hal.memory_size() < dram_size {
            return Err(KernelError::InvalidSize(hal.memory_size()));
        }
        info!(
            "Kernel starting: {:#x} bytes DRAM, {} cores",
            dram_size, config.cpu_core_count
        );
        let regions = MemoryRegion::layout(config.memory_arrange);
        let ticks = TickSource::new(Arc::clone(&hal));
        let klog = KernelLog::new(config.kernel_log_capacity);
        Ok(Arc::new_cyclic(|this| Self {
            config,
            hal,
            regions,
            ticks,
            processes: Mutex::new(BTreeMap::new()),
            named_ports: Mutex::new(BTreeMap::new()),
            next_initial_pid: AtomicU64::new(INITIAL_PROCESS_ID_MIN),
            next_application_pid: AtomicU64::new(APPLICATION_PROCESS_ID_MIN),
            next_thread_id: AtomicU64::new(1),
            next_creation_order: AtomicU64::new(0),
            klog: Mutex::new(klog),
            paused: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            this: this.clone(),
        }))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn hal(&self) -> &Arc<dyn HAL> {
        &self.hal
    }

    pub fn ticks(&self) -> &TickSource {
        &self.ticks
    }

    pub fn region(&self, kind: MemoryRegionKind) -> &Arc<MemoryRegion> {
        let index = MemoryRegionKind::ALL
            .iter()
            .position(|&k| k == kind)
            .unwrap_or(0);
        &self.regions[index]
    }

    pub fn regions(&self) -> &[Arc<MemoryRegion>] {
        &self.regions
    }

    pub(crate) fn arc(&self) -> Result<Arc<Self>, KernelError> {
        self.this.upgrade().ok_or(KernelError::InvalidState)
    }

    pub(crate) fn next_thread_id(&self) -> ThreadId {
        ThreadId(self.next_thread_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    // ========================================================================
    // Processes
    // ========================================================================

    /// Create a process, grant it `capabilities`, and start its first thread
    /// running `entry` at `priority`.
    ///
    /// # Errors
    /// * `Capability` - a descriptor is malformed
    /// * `InvalidPriority` - `priority` is outside the granted range
    /// * `OutOfMemory` - the process's region cannot hold its code or TLS
    /// * `InvalidState` - the kernel is shutting down
    pub fn start_initial_process(
        &self,
        info: ProcessCreationInfo,
        capabilities: &[u32],
        priority: u32,
        entry: ThreadEntry,
    ) -> Result<Arc<Process>, KernelError> {
        if self.is_shutting_down() {
            return Err(KernelError::InvalidState);
        }
        let capabilities = KernelCapabilities::parse(capabilities, self.config.cpu_core_count)?;
        if !capabilities.allows_priority(priority) {
            warn!("{}: priority {} not granted", info.name, priority);
            return Err(KernelError::InvalidPriority(priority));
        }

        let process = self.create_process(&info, capabilities)?;
        process.map_code(info.code_address, info.code_pages)?;
        let thread =
            process.create_thread(self.next_thread_id(), priority, ThreadType::Guest, entry)?;
        process.start()?;

        self.reap_terminated();
        {
            let mut processes = lock(&self.processes);
            // `pause` flips the flag under this lock, so the process cannot
            // miss it.
            if process.is_application() && self.is_paused() {
                process.set_paused(true);
            }
            processes.insert(process.pid(), Arc::clone(&process));
        }
        info!(
            "Created process {} (pid {}, program {:#018x}, version {})",
            info.name,
            process.pid(),
            info.program_id,
            info.version
        );
        self.log_event(KernelEvent::ProcessCreated {
            pid: process.pid(),
            name: info.name.clone(),
            is_application: info.flags.is_application(),
        });

        if let Err(err) = thread.start(self.arc()?) {
            process.terminate();
            return Err(err);
        }
        Ok(process)
    }

    fn create_process(
        &self,
        info: &ProcessCreationInfo,
        capabilities: KernelCapabilities,
    ) -> Result<Arc<Process>, KernelError> {
        let is_application = info.flags.is_application();
        let counter = if is_application {
            &self.next_application_pid
        } else {
            &self.next_initial_pid
        };
        let handle_table_size = capabilities
            .handle_table_size
            .map(usize::from)
            .filter(|&size| size > 0)
            .unwrap_or(self.config.default_handle_table_size);
        Ok(Process::new(ProcessParams {
            pid: ProcessId(counter.fetch_add(1, Ordering::Relaxed)),
            name: info.name.clone(),
            program_id: info.program_id,
            is_application,
            creation_order: self.next_creation_order.fetch_add(1, Ordering::Relaxed),
            capabilities,
            handle_table_size,
            hal: Arc::clone(&self.hal),
            region: Arc::clone(self.region(info.flags.memory_region())),
            kernel: self.this.clone(),
        }))
    }

    /// A process that is never entered into the process set, for kernel
    /// threads.
    pub(crate) fn create_kernel_process(&self, name: &str) -> Result<Arc<Process>, KernelError> {
        let capabilities = KernelCapabilities::parse(&[], self.config.cpu_core_count)?;
        let info = ProcessCreationInfo::new(name, 0, 0, 0, 0, ProcessFlags::service());
        let process = self.create_process(&info, capabilities)?;
        process.start()?;
        Ok(process)
    }

    pub fn process(&self, pid: ProcessId) -> Option<Arc<Process>> {
        lock(&self.processes).get(&pid).cloned()
    }

    /// All live processes, in pid order.
    pub fn processes(&self) -> Vec<Arc<Process>> {
        lock(&self.processes).values().cloned().collect()
    }

    pub fn application_processes(&self) -> Vec<Arc<Process>> {
        lock(&self.processes)
            .values()
            .filter(|process| process.is_application())
            .cloned()
            .collect()
    }

    /// Drop terminated processes from the process set. Returns how many
    /// were removed.
    pub fn reap_terminated(&self) -> usize {
        let mut processes = lock(&self.processes);
        let before = processes.len();
        processes.retain(|_, process| process.state() != ProcessState::Terminated);
        let reaped = before - processes.len();
        if reaped > 0 {
            debug!("Reaped {} terminated processes", reaped);
        }
        reaped
    }

    pub(crate) fn lock_processes(&self) -> MutexGuard<'_, BTreeMap<ProcessId, Arc<Process>>> {
        lock(&self.processes)
    }

    // ========================================================================
    // Activity
    // ========================================================================

    /// Freeze application processes and the logical clock. Service host
    /// processes keep running. Applications created while paused start
    /// paused.
    pub fn pause(&self) {
        {
            let processes = lock(&self.processes);
            if self.paused.swap(true, Ordering::AcqRel) {
                return;
            }
            for process in processes.values().filter(|p| p.is_application()) {
                process.set_paused(true);
            }
        }
        self.ticks.suspend();
        info!("Emulation paused");
        self.log_event(KernelEvent::Paused);
    }

    pub fn resume(&self) {
        {
            let processes = lock(&self.processes);
            if !self.paused.swap(false, Ordering::AcqRel) {
                return;
            }
            for process in processes.values().filter(|p| p.is_application()) {
                process.set_paused(false);
            }
        }
        self.ticks.resume();
        info!("Emulation resumed");
        self.log_event(KernelEvent::Resumed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    // ========================================================================
    // Named ports
    // ========================================================================

    /// Create a port reachable by name through `connect_to_named_port`.
    ///
    /// # Errors
    /// * `InvalidState` - the name is taken
    pub fn register_named_port(
        &self,
        name: &str,
        max_sessions: u32,
    ) -> Result<Arc<ServerPort>, KernelError> {
        let mut ports = lock(&self.named_ports);
        if ports.contains_key(name) {
            return Err(KernelError::InvalidState);
        }
        let (server, client) = create_port(name, max_sessions);
        ports.insert(name.to_string(), client);
        drop(ports);
        debug!("Registered named port {}", name);
        self.log_event(KernelEvent::NamedPortRegistered {
            name: name.to_string(),
        });
        Ok(server)
    }

    pub fn unregister_named_port(&self, name: &str) -> Result<(), KernelError> {
        lock(&self.named_ports)
            .remove(name)
            .map(|_| ())
            .ok_or(KernelError::NotFound)
    }

    /// # Errors
    /// * `NotFound` - no port has that name
    /// * `PortClosed` / `SessionLimit` - from the port
    pub fn connect_to_named_port(&self, name: &str) -> Result<Arc<ClientSession>, KernelError> {
        let port = lock(&self.named_ports)
            .get(name)
            .cloned()
            .ok_or(KernelError::NotFound)?;
        port.connect()
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn log_event(&self, event: KernelEvent) -> u64 {
        let timestamp = self.ticks.elapsed_nanos();
        lock(&self.klog).record(event, timestamp)
    }

    /// The audit log, oldest entry first.
    pub fn kernel_log(&self) -> Vec<KernelLogEntry> {
        lock(&self.klog).entries().cloned().collect()
    }

    pub fn stats(&self) -> KernelStats {
        let processes = self.processes();
        KernelStats {
            processes: processes.len(),
            application_processes: processes.iter().filter(|p| p.is_application()).count(),
            threads: processes.iter().map(|p| p.threads().len()).sum(),
            handles: processes.iter().map(|p| p.handle_count()).sum(),
            named_ports: lock(&self.named_ports).len(),
            free_pages: self.regions.iter().map(|r| r.free_pages()).sum(),
            ticks: self.ticks.ticks(),
            paused: self.is_paused(),
        }
    }
}
