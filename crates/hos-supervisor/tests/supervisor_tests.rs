//! Supervisor integration tests
//!
//! Boot a supervisor over host memory and drive it the way a frontend
//! would: service lifecycle, system events, pause and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use hos_hal::host::HostHal;
use hos_hal::HAL;
use hos_ipc::{CmifResponse, RequestBuilder, ResultCode};
use hos_kernel::memory::CODE_REGION_BASE;
use hos_kernel::{
    ExecutionContext, Handle, KernelContext, KernelError, MemoryPermission, Process,
    ProcessCreationInfo, ProcessFlags, ProcessState,
};
use hos_kernel_core::{KernelCapabilities, SvcMask};
use hos_services::{ServiceError, ServiceName, SmError};
use hos_supervisor::constants::{
    APPLET_CAPTURE_BUFFER_SIZE, FONT_SIZE, HID_SIZE, IIRS_SIZE, TIME_SIZE, WAKE_UP_MESSAGE,
};
use hos_supervisor::{
    AppletMessage, ContextKind, PerformanceMode, Supervisor, SupervisorConfig, SupervisorError,
};

const GIB: u64 = 1 << 30;
const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Helpers
// ============================================================================

fn host() -> Arc<dyn HAL> {
    Arc::new(HostHal::new(4 * GIB))
}

fn supervisor(config: SupervisorConfig) -> Supervisor {
    Supervisor::new(config, host()).unwrap()
}

fn started() -> Supervisor {
    let mut supervisor = supervisor(SupervisorConfig::default());
    supervisor.initialize_services().unwrap();
    supervisor
}

fn name(value: &str) -> ServiceName {
    ServiceName::new(value).unwrap()
}

fn spawn_app(
    kernel: &Arc<KernelContext>,
    body: impl FnOnce(&ExecutionContext) -> Result<(), KernelError> + Send + 'static,
) -> Arc<Process> {
    let mut caps = SvcMask::all().to_descriptors();
    caps.push(KernelCapabilities::core_priority_descriptor(24, 63, 0, 3));
    let info = ProcessCreationInfo::new(
        "app",
        1,
        0x0100_0000_0000_1000,
        CODE_REGION_BASE,
        1,
        ProcessFlags::application(),
    );
    kernel
        .start_initial_process(info, &caps, 44, Box::new(body))
        .unwrap()
}

fn call(
    ctx: &ExecutionContext,
    session: Handle,
    request: RequestBuilder,
) -> Result<CmifResponse, KernelError> {
    ctx.write_message(&request.encode().unwrap())?;
    ctx.send_sync_request(session)?;
    Ok(CmifResponse::parse(&ctx.read_message()?).unwrap())
}

// ============================================================================
// Service lifecycle
// ============================================================================

#[test]
fn test_initialize_services_serves_guests() {
    let supervisor = started();
    let set = supervisor.server_set();
    assert!(set.is_initialized());
    assert!(supervisor.registry().init_done().is_signaled());
    let names: Vec<&str> = set.servers().iter().map(|s| s.name()).collect();
    assert_eq!(names, ["set:sys", "ldn:m", "ns:am"]);

    let (tx, rx) = mpsc::channel();
    spawn_app(supervisor.kernel(), move |ctx| {
        let sm = ctx.connect_to_named_port("sm:")?;
        call(ctx, sm, RequestBuilder::new(0).send_pid().arg_u64(0))?;
        let lookup = call(
            ctx,
            sm,
            RequestBuilder::new(1).arg_u64(ServiceName::new("set:sys").unwrap().to_u64()),
        )?;
        let set_sys = Handle(lookup.move_handles[0]);
        let flag = call(ctx, set_sys, RequestBuilder::new(7))?;
        let _ = tx.send(flag.result);
        Ok(())
    });
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), ResultCode::SUCCESS);
}

#[test]
fn test_initialize_twice_fails() {
    let mut supervisor = started();
    assert!(matches!(
        supervisor.initialize_services(),
        Err(SupervisorError::AlreadyInitialized)
    ));
}

#[test]
fn test_taken_name_aborts_initialization() {
    let mut supervisor = supervisor(SupervisorConfig::default());
    let _squatter = supervisor.registry().register(&name("ldn:m"), 1).unwrap();

    let result = supervisor.initialize_services();
    assert!(matches!(
        result,
        Err(SupervisorError::Service(ServiceError::Sm(
            SmError::AlreadyRegistered(_)
        )))
    ));
    let set = supervisor.server_set();
    assert!(set.server("set:sys").is_some());
    assert!(set.server("ldn:m").is_none());
    assert!(set.server("ns:am").is_none());
    assert!(!supervisor.registry().contains(&name("ns:am")));
}

#[test]
fn test_deinitialize_stops_everything() {
    let mut supervisor = started();
    let servers: Vec<_> = supervisor.server_set().servers().to_vec();
    let sm = Arc::clone(supervisor.server_set().sm_server().unwrap());

    supervisor.deinitialize_services();

    for server in &servers {
        assert!(server.is_stopped());
        assert!(server.port().is_closed());
        assert!(server.process().wait_for_termination(Some(WAIT)));
    }
    assert!(sm.is_stopped());
    assert!(supervisor.registry().is_empty());
    assert!(supervisor.server_set().table().is_empty());
    assert!(!supervisor.server_set().is_initialized());
    assert_eq!(
        supervisor.kernel().connect_to_named_port("sm:").map(|_| ()),
        Err(KernelError::NotFound)
    );

    // sm: can come back on its own.
    supervisor.initialize_services().unwrap();
    assert!(supervisor.server_set().servers().is_empty());
    assert!(supervisor.kernel().connect_to_named_port("sm:").is_ok());
}

// ============================================================================
// Contexts
// ============================================================================

#[test]
fn test_applet_context_takes_service_access() {
    let config = SupervisorConfig {
        is_applet: true,
        ..Default::default()
    };
    let mut supervisor = supervisor(config);
    assert_eq!(supervisor.active_context(), ContextKind::Main);

    supervisor.attach_applet(host()).unwrap();
    assert_eq!(supervisor.active_context(), ContextKind::Applet);
    assert!(matches!(
        supervisor.attach_applet(host()),
        Err(SupervisorError::AppletAttached)
    ));

    supervisor.initialize_services().unwrap();
    let applet = supervisor.applet_context().unwrap();
    assert!(applet.registry().contains(&name("set:sys")));
    assert!(Arc::ptr_eq(supervisor.kernel(), applet.kernel()));
    assert!(supervisor.main_context().registry().is_empty());
    assert!(!supervisor.main_context().is_initialized());
}

// ============================================================================
// Shared memory
// ============================================================================

#[test]
fn test_shared_memory_layout_is_contiguous() {
    let supervisor = supervisor(SupervisorConfig::default());
    let layout = supervisor.shared_memory();
    let sizes = [HID_SIZE, FONT_SIZE, IIRS_SIZE, TIME_SIZE];

    let blocks = layout.blocks();
    for ((name, block), size) in blocks.iter().zip(sizes) {
        assert_eq!(block.size(), size, "{}", name);
        assert_eq!(block.permission(), MemoryPermission::READ, "{}", name);
    }
    for pair in blocks.windows(2) {
        let (_, prev) = pair[0];
        let (_, next) = pair[1];
        assert_eq!(prev.physical_address() + prev.size(), next.physical_address());
    }

    let (_, time) = blocks[3];
    let capture = &layout.applet_capture_buffer;
    assert_eq!(capture.size(), APPLET_CAPTURE_BUFFER_SIZE);
    assert_eq!(
        capture.page_list().ranges()[0].address,
        time.physical_address() + TIME_SIZE
    );
}

// ============================================================================
// System events
// ============================================================================

#[test]
fn test_docked_mode_change_notifies_applets() {
    let mut supervisor = supervisor(SupervisorConfig::default());
    let events = supervisor.events();
    assert!(!events.display_resolution_change().is_signaled());

    supervisor.change_docked_mode(false);
    assert!(supervisor.events().applet_messages().is_empty());

    supervisor.change_docked_mode(true);
    assert!(supervisor.is_docked());
    assert_eq!(supervisor.performance_mode(), PerformanceMode::Boost);
    let events = supervisor.events();
    assert!(events.display_resolution_change().is_signaled());
    assert!(events.applet_messages().event().is_signaled());
    assert_eq!(
        events.applet_messages().pop(),
        Some(AppletMessage::OperationModeChanged)
    );
    assert_eq!(
        events.applet_messages().pop(),
        Some(AppletMessage::PerformanceModeChanged)
    );
    assert_eq!(events.applet_messages().pop(), None);
}

#[test]
fn test_wake_up_message() {
    let supervisor = supervisor(SupervisorConfig::default());
    supervisor.simulate_wake_up_message();
    let events = supervisor.events();
    assert_eq!(events.applet_messages().pop(), Some(AppletMessage::Resume));
    assert_eq!(
        events.general_channel().pop(),
        Some(WAKE_UP_MESSAGE.to_vec())
    );

    supervisor.push_to_general_channel(Vec::new());
    assert!(events.general_channel().is_empty());
}

#[test]
fn test_pause_freezes_the_clock() {
    let mut supervisor = started();
    supervisor.toggle_pause_emulation(true);
    assert!(supervisor.is_paused());
    assert!(supervisor.kernel().is_paused());

    let before = supervisor.metrics().ticks;
    thread::sleep(Duration::from_millis(20));
    assert_eq!(supervisor.metrics().ticks, before);
    assert!(supervisor.metrics().paused);

    supervisor.toggle_pause_emulation(false);
    assert!(!supervisor.kernel().is_paused());
    thread::sleep(Duration::from_millis(5));
    assert!(supervisor.metrics().ticks > before);
}

#[test]
fn test_metrics_snapshot() {
    let supervisor = started();
    let metrics = supervisor.metrics();
    assert_eq!(metrics.registered_services, 3);
    assert!(metrics.processes >= 4);
    assert!(metrics.threads >= 4);
    assert!(!metrics.docked);
    assert!(metrics.to_json().unwrap().contains("\"registered_services\":3"));
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_shutdown_terminates_applications_before_teardown_hook() {
    let mut supervisor = started();
    let app = spawn_app(supervisor.kernel(), |ctx| loop {
        ctx.checkpoint()?;
        ctx.sleep_thread(1_000_000)?;
    });
    supervisor.toggle_pause_emulation(true);

    let observed = Arc::new(Mutex::new(None));
    let ran = Arc::new(AtomicBool::new(false));
    let hook = {
        let app = Arc::clone(&app);
        let observed = Arc::clone(&observed);
        let ran = Arc::clone(&ran);
        move || {
            *observed.lock().unwrap() = Some(app.state());
            ran.store(true, Ordering::SeqCst);
        }
    };

    supervisor.shutdown(hook).unwrap();
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(*observed.lock().unwrap(), Some(ProcessState::Terminated));
    assert!(supervisor.is_shut_down());
    assert!(!supervisor.is_paused());
    assert!(supervisor.kernel().processes().is_empty());
    assert!(supervisor.registry().is_empty());

    // Already down.
    supervisor.shutdown(|| {}).unwrap();
}

#[test]
fn test_shutdown_keeps_services_up_until_applications_are_gone() {
    let mut supervisor = started();
    let (ready_tx, ready_rx) = mpsc::channel();
    let (first_error_tx, first_error_rx) = mpsc::channel();
    spawn_app(supervisor.kernel(), move |ctx| {
        let sm = ctx.connect_to_named_port("sm:")?;
        call(ctx, sm, RequestBuilder::new(0).send_pid().arg_u64(0))?;
        let lookup = call(
            ctx,
            sm,
            RequestBuilder::new(1).arg_u64(name("set:sys").to_u64()),
        )?;
        let set_sys = Handle(lookup.move_handles[0]);
        let _ = ready_tx.send(());
        loop {
            let outcome = ctx
                .checkpoint()
                .and_then(|()| call(ctx, set_sys, RequestBuilder::new(7)));
            if let Err(err) = outcome {
                let _ = first_error_tx.send(err.clone());
                return Err(err);
            }
        }
    });
    ready_rx.recv_timeout(WAIT).unwrap();

    let servers = supervisor.server_set().stop_order();
    let running_in_hook = Arc::new(Mutex::new(Vec::new()));
    let hook = {
        let running_in_hook = Arc::clone(&running_in_hook);
        move || {
            *running_in_hook.lock().unwrap() =
                servers.iter().map(|server| !server.is_stopped()).collect();
        }
    };
    supervisor.shutdown(hook).unwrap();

    assert_eq!(
        first_error_rx.recv_timeout(WAIT).unwrap(),
        KernelError::TerminationRequested
    );
    let running = running_in_hook.lock().unwrap().clone();
    assert_eq!(running.len(), 4);
    assert!(running.iter().all(|&up| up));
    assert!(supervisor.kernel().processes().is_empty());
    assert!(!supervisor.server_set().is_initialized());
}

#[test]
fn test_boot_from_json_config() {
    let config = SupervisorConfig::from_json(r#"{ "docked_mode": true }"#).unwrap();
    let mut supervisor = Supervisor::new(config, host()).unwrap();
    assert!(supervisor.is_docked());
    assert_eq!(supervisor.performance_mode(), PerformanceMode::Boost);
    supervisor.initialize_services().unwrap();
    supervisor.shutdown(|| {}).unwrap();
}
