//! IPC command dispatch
//!
//! Turns one request message into one response message:
//!
//! 1. Decode the HIPC envelope and CMIF header
//! 2. Close requests end the session; control requests are answered here
//! 3. Look the command up in the session's service table
//! 4. Validate declared buffers, duplicate attached handles
//! 5. Run the handler under `catch_unwind`
//! 6. Commit or discard its staged effects and encode the response
//!
//! Malformed requests, unknown commands and handler failures all become
//! result codes in the response. The session is only closed for close
//! requests and for handlers that report corrupted state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, MutexGuard, PoisonError};

use hos_ipc::cmif::control;
use hos_ipc::hipc::{HipcMessage, MESSAGE_BUFFER_SIZE};
use hos_ipc::result::sf;
use hos_ipc::{CmifRequest, CommandType, ResponseBuilder, ResultCode};
use hos_kernel::{
    create_session, Handle, KernelContext, KernelObject, Process, ServerSession, SessionRequest,
};
use log::{debug, error, trace, warn};

use crate::command::{validate_buffers, IpcService, SharedService};
use crate::context::ServiceCtx;
use crate::error::ServiceError;

/// Default size of a server's pointer buffer.
pub const DEFAULT_POINTER_BUFFER_SIZE: u16 = 0x8000;

/// A server session and the service instance answering it.
#[derive(Clone)]
pub struct SessionEntry {
    pub session: Arc<ServerSession>,
    pub service: SharedService,
}

impl SessionEntry {
    pub fn new(session: Arc<ServerSession>, service: SharedService) -> Self {
        Self { session, service }
    }
}

/// What the server loop must do after a request.
#[derive(Default)]
pub struct Dispatched {
    /// Response image; empty for close requests.
    pub response: Vec<u8>,
    /// Close the session after replying.
    pub close: bool,
    /// Sessions to start serving.
    pub new_sessions: Vec<SessionEntry>,
}

impl Dispatched {
    fn reply(response: Vec<u8>) -> Self {
        Self {
            response,
            ..Default::default()
        }
    }

    fn failure(code: ResultCode) -> Self {
        Self::reply(error_response(code))
    }
}

/// Encode a response carrying only `code`.
pub fn error_response(code: ResultCode) -> Vec<u8> {
    // A bare header always fits the message buffer.
    ResponseBuilder::new(code).encode().unwrap_or_default()
}

fn lock_service(service: &SharedService) -> MutexGuard<'_, dyn IpcService> {
    service.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Dispatches requests for the sessions of one server process.
pub struct Dispatcher<'a> {
    kernel: &'a Arc<KernelContext>,
    server: &'a Arc<Process>,
    pointer_buffer_size: u16,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        kernel: &'a Arc<KernelContext>,
        server: &'a Arc<Process>,
        pointer_buffer_size: u16,
    ) -> Self {
        Self {
            kernel,
            server,
            pointer_buffer_size,
        }
    }

    /// Serve `request`, the current request of `entry`: read the client's
    /// message buffer, dispatch, write the response back and reply.
    pub fn handle(&self, entry: &SessionEntry, request: &SessionRequest) -> Dispatched {
        let client = request.client();
        let address = request.message_address();
        let mut message = vec![0; MESSAGE_BUFFER_SIZE];
        if let Err(err) = client.read_memory(address, &mut message) {
            warn!("{}: unreadable message buffer at {:#x}: {}", client.name(), address, err);
            let _ = entry.session.reply(Err(err));
            return Dispatched::default();
        }

        let outcome = self.dispatch(entry, client, &message);

        let written = if outcome.response.is_empty() {
            Ok(())
        } else {
            client.write_memory(address, &outcome.response)
        };
        if let Err(err) = &written {
            warn!("{}: response not written: {}", client.name(), err);
        }
        let _ = entry.session.reply(written);
        outcome
    }

    /// Produce the response for one message image sent by `client`.
    pub fn dispatch(
        &self,
        entry: &SessionEntry,
        client: &Arc<Process>,
        message: &[u8],
    ) -> Dispatched {
        let message = match HipcMessage::decode(message) {
            Ok(message) => message,
            Err(err) => {
                warn!("{}: malformed request: {}", client.name(), err);
                return Dispatched::failure(sf::INVALID_HEADER_SIZE);
            }
        };
        match CommandType::from_u16(message.message_type) {
            Some(CommandType::Close) => {
                debug!("{}: session closed by client", client.name());
                Dispatched {
                    close: true,
                    ..Default::default()
                }
            }
            Some(command_type) if command_type.is_request() => {
                match CmifRequest::from_message(command_type, message) {
                    Ok(request) => self.dispatch_request(entry, client, &request),
                    Err(err) => {
                        warn!("{}: bad request header: {}", client.name(), err);
                        Dispatched::failure(sf::INVALID_IN_HEADER)
                    }
                }
            }
            Some(command_type) if command_type.is_control() => {
                match CmifRequest::from_message(command_type, message) {
                    Ok(request) => self.dispatch_control(entry, client, &request),
                    Err(err) => {
                        warn!("{}: bad control header: {}", client.name(), err);
                        Dispatched::failure(sf::INVALID_IN_HEADER)
                    }
                }
            }
            _ => {
                warn!(
                    "{}: unsupported message type {}",
                    client.name(),
                    message.message_type
                );
                Dispatched::failure(sf::INVALID_IN_HEADER)
            }
        }
    }

    fn dispatch_request(
        &self,
        entry: &SessionEntry,
        client: &Arc<Process>,
        request: &CmifRequest,
    ) -> Dispatched {
        let id = request.command_id();
        let mut service = lock_service(&entry.service);
        let interface = service.interface_name();

        let Some(command) = service.find_command(id) else {
            warn!("{}: unknown command {}", interface, id);
            return Dispatched::failure(sf::UNKNOWN_COMMAND_ID);
        };
        if let Err(err) = validate_buffers(command.buffers, &request.message) {
            warn!("{}: {} ({}) rejected: {}", interface, command.name, id, err);
            return Dispatched::failure(err.result_code());
        }
        let mut ctx = match ServiceCtx::new(self.kernel, self.server, client, request) {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!("{}: {} ({}) bad handle: {}", interface, command.name, id, err);
                return Dispatched::failure(err.result_code());
            }
        };

        trace!("{}: {} ({})", interface, command.name, id);
        let result = panic::catch_unwind(AssertUnwindSafe(|| service.invoke(id, &mut ctx)));
        drop(service);

        match result {
            Ok(Ok(())) => self.complete(&mut ctx),
            Ok(Err(ServiceError::Corrupted(reason))) => {
                error!(
                    "{}: {} ({}) corrupted its session: {}",
                    interface, command.name, id, reason
                );
                ctx.discard();
                Dispatched {
                    response: error_response(sf::HANDLER_FAILED),
                    close: true,
                    new_sessions: Vec::new(),
                }
            }
            Ok(Err(err)) => {
                debug!("{}: {} ({}) failed: {}", interface, command.name, id, err);
                ctx.discard();
                Dispatched::failure(err.result_code())
            }
            Err(_) => {
                error!("{}: {} ({}) panicked", interface, command.name, id);
                ctx.discard();
                Dispatched::failure(sf::HANDLER_FAILED)
            }
        }
    }

    fn complete(&self, ctx: &mut ServiceCtx<'_>) -> Dispatched {
        let handles = match ctx.commit() {
            Ok(handles) => handles,
            Err(err) => {
                warn!("{}: reply not delivered: {}", self.server.name(), err);
                ctx.discard();
                return Dispatched::failure(err.result_code());
            }
        };
        let encoded = ResponseBuilder::new(ResultCode::SUCCESS)
            .payload(ctx.output().to_vec())
            .copy_handles(handles.copy.clone())
            .move_handles(handles.moved.clone())
            .send_statics(ctx.statics().to_vec())
            .encode();
        match encoded {
            Ok(response) => Dispatched {
                response,
                close: false,
                new_sessions: ctx.take_new_sessions(),
            },
            Err(err) => {
                error!("{}: response does not fit: {}", self.server.name(), err);
                for raw in handles.copy.into_iter().chain(handles.moved) {
                    let _ = ctx.client().close_handle(Handle(raw));
                }
                ctx.discard();
                Dispatched::failure(sf::HANDLER_FAILED)
            }
        }
    }

    fn dispatch_control(
        &self,
        entry: &SessionEntry,
        client: &Arc<Process>,
        request: &CmifRequest,
    ) -> Dispatched {
        match request.command_id() {
            control::QUERY_POINTER_BUFFER_SIZE => {
                let mut payload = self.pointer_buffer_size.to_le_bytes().to_vec();
                payload.resize(4, 0);
                Dispatched::reply(
                    ResponseBuilder::new(ResultCode::SUCCESS)
                        .payload(payload)
                        .encode()
                        .unwrap_or_default(),
                )
            }
            control::CLONE_CURRENT_OBJECT | control::CLONE_CURRENT_OBJECT_EX => {
                self.clone_session(entry, client)
            }
            other => {
                warn!("{}: unsupported control command {}", client.name(), other);
                Dispatched::failure(sf::UNKNOWN_COMMAND_ID)
            }
        }
    }

    /// A second session to the same service instance.
    fn clone_session(&self, entry: &SessionEntry, client: &Arc<Process>) -> Dispatched {
        let (server_session, client_session) = create_session();
        let handle = match client
            .generate_handle(KernelObject::ClientSession(Arc::clone(&client_session)))
        {
            Ok(handle) => handle,
            Err(err) => {
                client_session.close();
                return Dispatched::failure(err.result_code());
            }
        };
        let response = ResponseBuilder::new(ResultCode::SUCCESS)
            .move_handles(vec![handle.raw()])
            .encode()
            .unwrap_or_default();
        Dispatched {
            response,
            close: false,
            new_sessions: vec![SessionEntry::new(
                server_session,
                Arc::clone(&entry.service),
            )],
        }
    }
}
