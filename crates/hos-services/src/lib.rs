//! Horizon HLE Service Layer
//!
//! Host-implemented services answering guest IPC:
//!
//! - **Command tables** (`command`): each service type declares a static
//!   table of `(id, name, buffers, handler)` entries
//! - **Dispatch** (`dispatch`): decodes a request, validates it, runs the
//!   handler and encodes the response bit-exact
//! - **Servers** (`server`): one accept/dispatch loop per port, running in
//!   its own service host process
//! - **Service manager** (`sm`): the name registry and the `sm:` port
//! - **Services** (`services`): `set:sys`, `ldn:m`, `ns:am`
//!
//! # Handler contract
//!
//! A handler reads arguments and buffers through its [`ServiceCtx`] and
//! stages outputs there. Nothing reaches the client unless the handler
//! returns `Ok`; an error or panic becomes a result code and the staged
//! effects are dropped.

pub mod command;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod services;
pub mod sm;

pub use command::{
    shared, BufferKind, BufferSpec, Command, CommandInfo, IpcService, ServiceCommands,
    SharedService,
};
pub use context::{HandleMode, ServiceCtx};
pub use dispatch::{Dispatched, Dispatcher, SessionEntry, DEFAULT_POINTER_BUFFER_SIZE};
pub use error::{ServiceError, ServiceResult, SmError};
pub use server::{
    service_capabilities, ServerBase, ServerOptions, ServiceFactory, SERVICE_PRIORITY,
};
pub use services::{ServiceEntry, ServiceTable};
pub use sm::{start_sm_server, ServiceName, SmRegistry, SM_PORT_NAME};
