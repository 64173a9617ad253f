//! Service layer integration tests
//!
//! Each test boots a kernel over host memory, starts the `sm:` server and
//! a service table, then talks to the services from a guest application
//! through real IPC: request images in the thread's message buffer, sync
//! requests over client session handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hos_hal::host::HostHal;
use hos_ipc::result::{kernel as kernel_result, sf, sm};
use hos_ipc::{CmifResponse, RequestBuilder, ResultCode};
use hos_kernel::memory::CODE_REGION_BASE;
use hos_kernel::{
    Event, ExecutionContext, Handle, KernelConfig, KernelContext, KernelError, KernelObject,
    MemoryPermission, ProcessCreationInfo, ProcessFlags, ResetMode,
};
use hos_kernel_core::{KernelCapabilities, SvcMask};
use hos_services::{
    shared, start_sm_server, Command, HandleMode, ServerBase, ServerOptions, ServiceCommands,
    ServiceCtx, ServiceError, ServiceFactory, ServiceName, ServiceResult, ServiceTable,
    SmRegistry,
};

const GIB: u64 = 1 << 30;
const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test service
// ============================================================================

/// Misbehaves on request.
#[derive(Default)]
struct Faulty {
    calls: u32,
    slow: Arc<SlowCalls>,
}

/// Progress of `Slow` calls, shared with the test.
#[derive(Default)]
struct SlowCalls {
    started: AtomicBool,
    finished: AtomicBool,
}

impl Faulty {
    fn panic(&mut self, _ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        panic!("handler fault");
    }

    fn corrupt(&mut self, _ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        Err(ServiceError::Corrupted("lost track of the client".into()))
    }

    fn count(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        self.calls += 1;
        ctx.write_u32(self.calls);
        Ok(())
    }

    fn fail_after_write(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        ctx.write_out_buffer(0, &[0xAA; 16])?;
        ctx.write_u32(0xDEAD);
        Err(ServiceError::Result(ResultCode::new(99, 1)))
    }

    fn signal(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        let mode = if ctx.read_bool()? {
            HandleMode::Move
        } else {
            HandleMode::Copy
        };
        match ctx.in_object(mode, 0)? {
            KernelObject::Event(event) => {
                event.signal();
                Ok(())
            }
            _ => Err(ServiceError::Result(kernel_result::INVALID_HANDLE)),
        }
    }

    fn slow(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        self.slow.started.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(600));
        self.slow.finished.store(true, Ordering::SeqCst);
        ctx.write_u32(1);
        Ok(())
    }

    fn read_huge(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        ctx.read_u32()?;
        ctx.read_bytes(usize::MAX)?;
        Ok(())
    }

    fn publish(&mut self, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        ctx.write_out_buffer(0, &[0xBB; 16])?;
        ctx.copy_out(KernelObject::Event(Event::new()));
        Ok(())
    }
}

impl ServiceCommands for Faulty {
    const INTERFACE: &'static str = "faulty";
    const COMMANDS: &'static [Command<Self>] = &[
        Command::new(0, "Panic", &[], Self::panic),
        Command::new(1, "Corrupt", &[], Self::corrupt),
        Command::new(2, "Count", &[], Self::count),
        Command::new(3, "FailAfterWrite", &[], Self::fail_after_write),
        Command::new(4, "Signal", &[], Self::signal),
        Command::new(5, "Slow", &[], Self::slow),
        Command::new(6, "ReadHuge", &[], Self::read_huge),
        Command::new(7, "Publish", &[], Self::publish),
    ];
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    kernel: Arc<KernelContext>,
    registry: Arc<SmRegistry>,
    sm: Arc<ServerBase>,
    servers: Vec<Arc<ServerBase>>,
    slow: Arc<SlowCalls>,
}

impl Harness {
    fn boot(ignore_missing: bool) -> Self {
        let hal = Arc::new(HostHal::new(4 * GIB));
        let kernel = KernelContext::new(KernelConfig::default(), hal).unwrap();
        let registry = SmRegistry::new(Arc::clone(&kernel));
        let sm = start_sm_server(&kernel, &registry, ignore_missing).unwrap();
        registry.wait_init_done(Some(WAIT)).unwrap();

        let mut table = ServiceTable::with_defaults();
        let slow = Arc::new(SlowCalls::default());
        table.add("faulty", 4, faulty_factory(&slow)).unwrap();
        let servers = table
            .entries()
            .iter()
            .map(|entry| {
                entry
                    .start(&kernel, &registry, ServerOptions::default())
                    .unwrap()
            })
            .collect();
        Self {
            kernel,
            registry,
            sm,
            servers,
            slow,
        }
    }

    /// Start an extra `faulty` server on a fresh named port.
    fn start_faulty(&self, port_name: &str, max_sessions: u32) -> Arc<ServerBase> {
        let port = self
            .kernel
            .register_named_port(port_name, max_sessions)
            .unwrap();
        ServerBase::start(
            &self.kernel,
            port_name,
            port,
            faulty_factory(&self.slow),
            ServerOptions::default(),
        )
        .unwrap()
    }

    fn server(&self, name: &str) -> &Arc<ServerBase> {
        self.servers.iter().find(|s| s.name() == name).unwrap()
    }

    /// Run `body` in a fresh guest application and return its value.
    fn run<T, F>(&self, body: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&ExecutionContext) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let process = self
            .kernel
            .start_initial_process(
                app_info(),
                &app_capabilities(),
                44,
                Box::new(move |ctx: &ExecutionContext| {
                    let _ = tx.send(body(ctx));
                    Ok(())
                }),
            )
            .unwrap();
        let value = rx.recv_timeout(WAIT).unwrap();
        assert!(process.wait_for_termination(Some(WAIT)));
        value
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for server in self.servers.iter().rev() {
            server.stop();
        }
        self.sm.stop();
    }
}

fn faulty_factory(slow: &Arc<SlowCalls>) -> ServiceFactory {
    let slow = Arc::clone(slow);
    Arc::new(move |_: &Arc<KernelContext>| {
        shared(Faulty {
            calls: 0,
            slow: Arc::clone(&slow),
        })
    })
}

fn app_info() -> ProcessCreationInfo {
    ProcessCreationInfo::new(
        "client",
        1,
        0x0100_0000_0000_2000,
        CODE_REGION_BASE,
        1,
        ProcessFlags::application(),
    )
}

fn app_capabilities() -> Vec<u32> {
    let mut caps = SvcMask::all().to_descriptors();
    caps.push(KernelCapabilities::core_priority_descriptor(24, 63, 0, 3));
    caps
}

/// Send `request` over `session` and parse the reply.
fn call(
    ctx: &ExecutionContext,
    session: Handle,
    request: RequestBuilder,
) -> Result<CmifResponse, KernelError> {
    ctx.write_message(&request.encode().unwrap())?;
    ctx.send_sync_request(session)?;
    Ok(CmifResponse::parse(&ctx.read_message()?).unwrap())
}

fn name_arg(name: &str) -> u64 {
    ServiceName::new(name).unwrap().to_u64()
}

/// Connect to `sm:` and initialize the session.
fn open_sm(ctx: &ExecutionContext) -> Result<Handle, KernelError> {
    let sm = ctx.connect_to_named_port("sm:")?;
    let response = call(ctx, sm, RequestBuilder::new(0).send_pid().arg_u64(0))?;
    assert_eq!(response.result, ResultCode::SUCCESS);
    Ok(sm)
}

fn get_service(ctx: &ExecutionContext, sm: Handle, name: &str) -> Result<Handle, KernelError> {
    let response = call(ctx, sm, RequestBuilder::new(1).arg_u64(name_arg(name)))?;
    assert_eq!(response.result, ResultCode::SUCCESS, "GetService({})", name);
    Ok(Handle(response.move_handles[0]))
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn test_firmware_version_then_unknown_command_then_valid_call() {
    let harness = Harness::boot(false);
    let (first, unknown, again, record) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let set_sys = get_service(ctx, sm, "set:sys").unwrap();
        let buffer = ctx
            .allocate_memory(0x1000, MemoryPermission::READ_WRITE)
            .unwrap();
        ctx.write_memory(buffer + 0x100, &[0xCC; 0x100]).unwrap();

        let first = call(ctx, set_sys, RequestBuilder::new(3).recv_buffer(buffer, 0x200)).unwrap();
        let mut record = vec![0; 0x200];
        ctx.read_memory(buffer, &mut record).unwrap();
        let unknown = call(ctx, set_sys, RequestBuilder::new(9999)).unwrap();
        let again = call(ctx, set_sys, RequestBuilder::new(3).recv_buffer(buffer, 0x100)).unwrap();
        (first, unknown, again, record)
    });

    assert_eq!(first.result, ResultCode::SUCCESS);
    assert_eq!(&record[0..3], &[3, 0, 0]);
    assert_eq!(&record[8..10], b"NX");
    assert_eq!(&record[0x68..0x6D], b"3.0.0");
    assert!(record[0x100..].iter().all(|&b| b == 0xCC));
    assert_eq!(unknown.result, sf::UNKNOWN_COMMAND_ID);
    assert_eq!(again.result, ResultCode::SUCCESS);
}

#[test]
fn test_firmware_version_through_receive_list() {
    let harness = Harness::boot(false);
    let (response, head) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let set_sys = get_service(ctx, sm, "set:sys").unwrap();
        let buffer = ctx
            .allocate_memory(0x1000, MemoryPermission::READ_WRITE)
            .unwrap();
        let response = call(ctx, set_sys, RequestBuilder::new(4).recv_static(buffer, 0x100)).unwrap();
        let mut head = [0u8; 4];
        ctx.read_memory(buffer, &mut head).unwrap();
        (response, head)
    });
    assert_eq!(response.result, ResultCode::SUCCESS);
    assert_eq!(response.send_statics.len(), 1);
    assert_eq!(response.send_statics[0].size, 0x100);
    assert_eq!(head, [3, 0, 0, 0]);
}

#[test]
fn test_short_receive_buffer_is_invalid_buffer_size() {
    let harness = Harness::boot(false);
    let (short, flag) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let set_sys = get_service(ctx, sm, "set:sys").unwrap();
        let buffer = ctx
            .allocate_memory(0x1000, MemoryPermission::READ_WRITE)
            .unwrap();
        let short = call(ctx, set_sys, RequestBuilder::new(3).recv_buffer(buffer, 0x80)).unwrap();
        let flag = call(ctx, set_sys, RequestBuilder::new(7)).unwrap();
        (short, flag)
    });
    assert_eq!(short.result, sf::INVALID_BUFFER_SIZE);
    assert_eq!(flag.result, ResultCode::SUCCESS);
    assert_eq!(flag.read_u32(0).map(|v| v & 0xFF), Some(0));
}

#[test]
fn test_handler_panic_is_contained() {
    let harness = Harness::boot(false);
    let (panicked, next) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let faulty = get_service(ctx, sm, "faulty").unwrap();
        let panicked = call(ctx, faulty, RequestBuilder::new(0)).unwrap();
        let next = call(ctx, faulty, RequestBuilder::new(2)).unwrap();
        (panicked, next)
    });
    assert_eq!(panicked.result, sf::HANDLER_FAILED);
    assert_eq!(next.result, ResultCode::SUCCESS);
    assert_eq!(next.read_u32(0), Some(1));
}

#[test]
fn test_corrupted_handler_closes_session() {
    let harness = Harness::boot(false);
    let (corrupted, after) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let faulty = get_service(ctx, sm, "faulty").unwrap();
        let corrupted = call(ctx, faulty, RequestBuilder::new(1)).unwrap();
        let after = call(ctx, faulty, RequestBuilder::new(2)).map(|r| r.result);
        (corrupted, after)
    });
    assert_eq!(corrupted.result, sf::HANDLER_FAILED);
    assert_eq!(after, Err(KernelError::SessionClosed));
}

#[test]
fn test_failed_handler_leaves_no_partial_output() {
    let harness = Harness::boot(false);
    let (response, contents) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let faulty = get_service(ctx, sm, "faulty").unwrap();
        let buffer = ctx
            .allocate_memory(0x1000, MemoryPermission::READ_WRITE)
            .unwrap();
        let response = call(ctx, faulty, RequestBuilder::new(3).recv_buffer(buffer, 16)).unwrap();
        let mut contents = [0u8; 16];
        ctx.read_memory(buffer, &mut contents).unwrap();
        (response, contents)
    });
    assert_eq!(response.result, ResultCode::new(99, 1));
    assert!(response.payload.iter().all(|&b| b == 0));
    assert_eq!(contents, [0; 16]);
}

#[test]
fn test_copy_and_move_handles_reach_the_service() {
    let harness = Harness::boot(false);
    let (copied, signaled, moved, source_after_move) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let faulty = get_service(ctx, sm, "faulty").unwrap();

        let event = ctx.create_event(ResetMode::Manual).unwrap();
        let copied = call(ctx, faulty, RequestBuilder::new(4).arg_u32(0).copy_handle(event.raw()))
            .unwrap();
        let signaled = ctx.wait_synchronization(&[event], 0);

        let other = ctx.create_event(ResetMode::Manual).unwrap();
        let moved = call(ctx, faulty, RequestBuilder::new(4).arg_u32(1).move_handle(other.raw()))
            .unwrap();
        let source_after_move = ctx.resolve(other).map(|_| ());
        (copied, signaled, moved, source_after_move)
    });
    assert_eq!(copied.result, ResultCode::SUCCESS);
    assert_eq!(signaled, Ok(0));
    assert_eq!(moved.result, ResultCode::SUCCESS);
    assert!(matches!(
        source_after_move,
        Err(KernelError::InvalidHandle(_))
    ));
}

#[test]
fn test_close_request_ends_session() {
    let harness = Harness::boot(false);
    let after = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let set_sys = get_service(ctx, sm, "set:sys").unwrap();
        ctx.write_message(&RequestBuilder::close()).unwrap();
        ctx.send_sync_request(set_sys).unwrap();
        call(ctx, set_sys, RequestBuilder::new(7)).map(|r| r.result)
    });
    assert_eq!(after, Err(KernelError::SessionClosed));
}

// ============================================================================
// Control requests and sub-interfaces
// ============================================================================

#[test]
fn test_query_pointer_buffer_size() {
    let harness = Harness::boot(false);
    let response = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        call(ctx, sm, RequestBuilder::control(3)).unwrap()
    });
    assert_eq!(response.result, ResultCode::SUCCESS);
    assert_eq!(response.read_u32(0).map(|v| v & 0xFFFF), Some(0x8000));
}

#[test]
fn test_cloned_session_shares_the_instance() {
    let harness = Harness::boot(false);
    let (first, clone, second) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let faulty = get_service(ctx, sm, "faulty").unwrap();
        let first = call(ctx, faulty, RequestBuilder::new(2)).unwrap();
        let clone = call(ctx, faulty, RequestBuilder::control(2)).unwrap();
        let cloned = Handle(clone.move_handles[0]);
        let second = call(ctx, cloned, RequestBuilder::new(2)).unwrap();
        (first, clone, second)
    });
    assert_eq!(first.read_u32(0), Some(1));
    assert_eq!(clone.result, ResultCode::SUCCESS);
    assert_eq!(second.read_u32(0), Some(2));
}

#[test]
fn test_convert_to_domain_is_unsupported() {
    let harness = Harness::boot(false);
    let response = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        call(ctx, sm, RequestBuilder::control(0)).unwrap()
    });
    assert_eq!(response.result, sf::UNKNOWN_COMMAND_ID);
}

#[test]
fn test_ldn_monitor_sub_interface() {
    let harness = Harness::boot(false);
    let (created, state) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let ldn = get_service(ctx, sm, "ldn:m").unwrap();
        let created = call(ctx, ldn, RequestBuilder::new(0)).unwrap();
        let monitor = Handle(created.move_handles[0]);
        let state = call(ctx, monitor, RequestBuilder::new(0)).unwrap();
        (created, state)
    });
    assert_eq!(created.result, ResultCode::SUCCESS);
    assert_eq!(state.result, ResultCode::SUCCESS);
    assert_eq!(state.read_u32(0), Some(0));
}

#[test]
fn test_ns_event_belongs_to_the_instance() {
    let harness = Harness::boot(false);
    let (same_instance, other_instance) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let event_id = |session: Handle| {
            let response = call(ctx, session, RequestBuilder::new(2)).unwrap();
            ctx.resolve(Handle(response.copy_handles[0])).unwrap().id()
        };
        let first = get_service(ctx, sm, "ns:am").unwrap();
        let second = get_service(ctx, sm, "ns:am").unwrap();
        let a = event_id(first);
        let b = event_id(first);
        let c = event_id(second);
        (a == b, a == c)
    });
    assert!(same_instance);
    assert!(!other_instance);
}

// ============================================================================
// sm:
// ============================================================================

#[test]
fn test_register_service_twice_keeps_first() {
    let harness = Harness::boot(false);
    let (first, second, lookup) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let register = || {
            RequestBuilder::new(2)
                .arg_u64(name_arg("foo"))
                .arg_u32(0)
                .arg_u32(8)
        };
        let first = call(ctx, sm, register()).unwrap();
        let second = call(ctx, sm, register()).unwrap();
        let lookup = call(ctx, sm, RequestBuilder::new(1).arg_u64(name_arg("foo"))).unwrap();
        (first, second, lookup)
    });
    assert_eq!(first.result, ResultCode::SUCCESS);
    assert_eq!(first.move_handles.len(), 1);
    assert_eq!(second.result, sm::ALREADY_REGISTERED);
    assert_eq!(lookup.result, ResultCode::SUCCESS);
    assert!(harness
        .registry
        .contains(&ServiceName::new("foo").unwrap()));
}

#[test]
fn test_unknown_service_is_not_registered() {
    let harness = Harness::boot(false);
    let (missing, bad_name) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let missing = call(ctx, sm, RequestBuilder::new(1).arg_u64(name_arg("nope"))).unwrap();
        let bad_name = call(ctx, sm, RequestBuilder::new(1).arg_u64(0)).unwrap();
        (missing, bad_name)
    });
    assert_eq!(missing.result, sm::NOT_REGISTERED);
    assert_eq!(bad_name.result, sm::INVALID_NAME);
}

#[test]
fn test_missing_service_is_ignored_when_configured() {
    let harness = Harness::boot(true);
    let (lookup, answer) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let lookup = call(ctx, sm, RequestBuilder::new(1).arg_u64(name_arg("nope"))).unwrap();
        let dummy = Handle(lookup.move_handles[0]);
        let answer = call(ctx, dummy, RequestBuilder::new(1234)).unwrap();
        (lookup, answer)
    });
    assert_eq!(lookup.result, ResultCode::SUCCESS);
    assert_eq!(answer.result, ResultCode::SUCCESS);
}

#[test]
fn test_uninitialized_sm_session_is_rejected() {
    let harness = Harness::boot(false);
    let result = harness.run(|ctx| {
        let sm = ctx.connect_to_named_port("sm:").unwrap();
        call(ctx, sm, RequestBuilder::new(1).arg_u64(name_arg("set:sys")))
            .unwrap()
            .result
    });
    assert_eq!(result, sm::INVALID_CLIENT);
}

// ============================================================================
// Server lifecycle
// ============================================================================

#[test]
fn test_stopped_server_refuses_new_and_open_sessions() {
    let harness = Harness::boot(false);
    let (ready_tx, ready_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel();

    harness
        .kernel
        .start_initial_process(
            app_info(),
            &app_capabilities(),
            44,
            Box::new(move |ctx: &ExecutionContext| {
                let sm = open_sm(ctx)?;
                let set_sys = get_service(ctx, sm, "set:sys")?;
                let _ = ready_tx.send(());
                let _ = go_rx.recv_timeout(WAIT);
                let open = call(ctx, set_sys, RequestBuilder::new(7)).map(|r| r.result);
                let reconnect = call(ctx, sm, RequestBuilder::new(1).arg_u64(name_arg("set:sys")))
                    .map(|r| r.result);
                let _ = done_tx.send((open, reconnect));
                Ok(())
            }),
        )
        .unwrap();

    ready_rx.recv_timeout(WAIT).unwrap();
    let server = harness.server("set:sys");
    server.stop();
    assert!(server.is_stopped());
    assert!(server.port().is_closed());
    assert!(server.process().wait_for_termination(Some(WAIT)));
    go_tx.send(()).unwrap();

    let (open, reconnect) = done_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(open, Err(KernelError::SessionClosed));
    assert_eq!(reconnect, Ok(kernel_result::PORT_CLOSED));

    // A second stop is a no-op.
    server.stop();
}

#[test]
fn test_stop_lets_the_request_being_handled_finish() {
    let harness = Harness::boot(false);
    let (done_tx, done_rx) = mpsc::channel();
    let slow = Arc::clone(&harness.slow);
    harness
        .kernel
        .start_initial_process(
            app_info(),
            &app_capabilities(),
            44,
            Box::new(move |ctx: &ExecutionContext| {
                let sm = open_sm(ctx)?;
                let faulty = get_service(ctx, sm, "faulty")?;
                let response =
                    call(ctx, faulty, RequestBuilder::new(5)).map(|r| (r.result, r.read_u32(0)));
                let _ = done_tx.send((response, slow.finished.load(Ordering::SeqCst)));
                Ok(())
            }),
        )
        .unwrap();

    let deadline = std::time::Instant::now() + WAIT;
    while !harness.slow.started.load(Ordering::SeqCst) {
        assert!(std::time::Instant::now() < deadline, "handler never started");
        thread::sleep(Duration::from_millis(1));
    }
    harness.server("faulty").stop();

    let (response, finished_first) = done_rx.recv_timeout(WAIT).unwrap();
    assert!(finished_first);
    assert_eq!(response, Ok((ResultCode::SUCCESS, Some(1))));
}

#[test]
fn test_sessions_past_one_wait_are_served() {
    let harness = Harness::boot(false);
    let server = harness.start_faulty("many", 200);
    let (last, first, open) = harness.run(|ctx| {
        let sessions: Vec<Handle> = (0..70)
            .map(|_| ctx.connect_to_named_port("many").unwrap())
            .collect();
        let last = call(ctx, sessions[69], RequestBuilder::new(2)).unwrap();
        let first = call(ctx, sessions[0], RequestBuilder::new(2)).unwrap();
        (last, first, sessions.len())
    });
    assert_eq!(open, 70);
    assert_eq!(last.result, ResultCode::SUCCESS);
    assert_eq!(last.read_u32(0), Some(1));
    assert_eq!(first.read_u32(0), Some(1));
    server.stop();
}

// ============================================================================
// Reply delivery
// ============================================================================

#[test]
fn test_full_handle_table_leaves_output_buffer_untouched() {
    let harness = Harness::boot(false);
    let (response, contents, filled) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let faulty = get_service(ctx, sm, "faulty").unwrap();
        let buffer = ctx
            .allocate_memory(0x1000, MemoryPermission::READ_WRITE)
            .unwrap();
        let capacity = ctx.process().handle_capacity();
        let filled = (0..capacity)
            .take_while(|_| ctx.create_event(ResetMode::Manual).is_ok())
            .count();
        let response = call(ctx, faulty, RequestBuilder::new(7).recv_buffer(buffer, 16)).unwrap();
        let mut contents = [0u8; 16];
        ctx.read_memory(buffer, &mut contents).unwrap();
        (response, contents, filled)
    });
    assert!(filled > 0);
    assert_eq!(response.result, kernel_result::OUT_OF_HANDLES);
    assert!(response.copy_handles.is_empty());
    assert_eq!(contents, [0; 16]);
}

#[test]
fn test_oversized_raw_read_is_invalid_buffer_size() {
    let harness = Harness::boot(false);
    let (huge, next) = harness.run(|ctx| {
        let sm = open_sm(ctx).unwrap();
        let faulty = get_service(ctx, sm, "faulty").unwrap();
        let huge = call(ctx, faulty, RequestBuilder::new(6).arg_u32(0)).unwrap();
        let next = call(ctx, faulty, RequestBuilder::new(2)).unwrap();
        (huge, next)
    });
    assert_eq!(huge.result, sf::INVALID_BUFFER_SIZE);
    assert_eq!(next.read_u32(0), Some(1));
}
