//! Static command tables
//!
//! A service is a plain struct plus a `const` slice of [`Command`]s mapping
//! each command id to a method. The table also declares the buffers each
//! command needs; the dispatcher checks them before the handler runs.
//!
//! ```ignore
//! impl ServiceCommands for SystemSettings {
//!     const INTERFACE: &'static str = "set:sys";
//!     const COMMANDS: &'static [Command<Self>] = &[
//!         Command::new(7, "GetLockScreenFlag", &[], Self::get_lock_screen_flag),
//!     ];
//! }
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use hos_ipc::hipc::HipcMessage;
use hos_ipc::result::sf;

use crate::context::ServiceCtx;
use crate::error::{ServiceError, ServiceResult};

// =============================================================================
// Buffer shapes
// =============================================================================

/// Which descriptor list a declared buffer lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// Type-A send buffer.
    In,
    /// Type-B receive buffer.
    Out,
    /// Type-W exchange buffer.
    InOut,
    /// Type-X send static, matched by static index.
    InPointer,
    /// Type-C receive list entry.
    OutPointer,
    /// A receive buffer if the client sent a non-empty one, else the
    /// receive list entry at the same index.
    AutoOut,
}

/// One declared buffer: its kind, index within its list, and the smallest
/// size the handler accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSpec {
    pub kind: BufferKind,
    pub index: usize,
    pub min_size: u64,
}

impl BufferSpec {
    pub const fn new(kind: BufferKind, index: usize, min_size: u64) -> Self {
        Self {
            kind,
            index,
            min_size,
        }
    }

    pub const fn input(index: usize, min_size: u64) -> Self {
        Self::new(BufferKind::In, index, min_size)
    }

    pub const fn output(index: usize, min_size: u64) -> Self {
        Self::new(BufferKind::Out, index, min_size)
    }

    pub const fn auto_out(index: usize, min_size: u64) -> Self {
        Self::new(BufferKind::AutoOut, index, min_size)
    }

    /// Size of the matching descriptor in `message`, if the client sent one.
    pub fn actual_size(&self, message: &HipcMessage) -> Option<u64> {
        let index = self.index;
        match self.kind {
            BufferKind::In => message.send_buffers.get(index).map(|b| b.size),
            BufferKind::Out => message.recv_buffers.get(index).map(|b| b.size),
            BufferKind::InOut => message.exch_buffers.get(index).map(|b| b.size),
            BufferKind::InPointer => message
                .send_statics
                .iter()
                .find(|s| usize::from(s.index) == index)
                .map(|s| u64::from(s.size)),
            BufferKind::OutPointer => message.recv_list.get(index).map(|r| u64::from(r.size)),
            BufferKind::AutoOut => message
                .recv_buffers
                .get(index)
                .filter(|b| b.size > 0)
                .map(|b| b.size)
                .or_else(|| message.recv_list.get(index).map(|r| u64::from(r.size))),
        }
    }
}

/// Check every declared buffer against the request.
///
/// # Errors
/// `sf::INVALID_BUFFER_SIZE` when a buffer is missing or too small.
pub fn validate_buffers(specs: &[BufferSpec], message: &HipcMessage) -> ServiceResult {
    for spec in specs {
        match spec.actual_size(message) {
            Some(size) if size >= spec.min_size => {}
            _ => return Err(ServiceError::Result(sf::INVALID_BUFFER_SIZE)),
        }
    }
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

pub type Handler<S> = fn(&mut S, &mut ServiceCtx<'_>) -> ServiceResult;

/// One command table entry.
pub struct Command<S> {
    pub id: u32,
    pub name: &'static str,
    pub buffers: &'static [BufferSpec],
    pub handler: Handler<S>,
}

impl<S> Command<S> {
    pub const fn new(
        id: u32,
        name: &'static str,
        buffers: &'static [BufferSpec],
        handler: Handler<S>,
    ) -> Self {
        Self {
            id,
            name,
            buffers,
            handler,
        }
    }

    pub fn info(&self) -> CommandInfo {
        CommandInfo {
            id: self.id,
            name: self.name,
            buffers: self.buffers,
        }
    }
}

/// The handler-free part of a command, for lookups through `dyn`.
#[derive(Clone, Copy, Debug)]
pub struct CommandInfo {
    pub id: u32,
    pub name: &'static str,
    pub buffers: &'static [BufferSpec],
}

/// Implemented by every concrete service type.
pub trait ServiceCommands: Sized + Send + 'static {
    /// Interface name used in log lines.
    const INTERFACE: &'static str;
    const COMMANDS: &'static [Command<Self>];
}

/// Object-safe view of a service, as stored per session.
pub trait IpcService: Send + 'static {
    fn interface_name(&self) -> &'static str;

    fn find_command(&self, id: u32) -> Option<CommandInfo>;

    /// Run command `id`.
    ///
    /// # Errors
    /// `sf::UNKNOWN_COMMAND_ID` if the table has no such entry, otherwise
    /// whatever the handler returns.
    fn invoke(&mut self, id: u32, ctx: &mut ServiceCtx<'_>) -> ServiceResult;
}

impl<S: ServiceCommands> IpcService for S {
    fn interface_name(&self) -> &'static str {
        S::INTERFACE
    }

    fn find_command(&self, id: u32) -> Option<CommandInfo> {
        S::COMMANDS
            .iter()
            .find(|command| command.id == id)
            .map(Command::info)
    }

    fn invoke(&mut self, id: u32, ctx: &mut ServiceCtx<'_>) -> ServiceResult {
        let command = S::COMMANDS
            .iter()
            .find(|command| command.id == id)
            .ok_or(ServiceError::Result(sf::UNKNOWN_COMMAND_ID))?;
        (command.handler)(self, ctx)
    }
}

/// A service instance shared by every session bound to it.
pub type SharedService = Arc<Mutex<dyn IpcService>>;

pub fn shared<S: IpcService>(service: S) -> SharedService {
    Arc::new(Mutex::new(service))
}

impl fmt::Debug for dyn IpcService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcService")
            .field("interface", &self.interface_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hos_ipc::cmif::RequestBuilder;

    fn message(builder: RequestBuilder) -> HipcMessage {
        builder.build()
    }

    #[test]
    fn test_auto_out_prefers_receive_buffer() {
        let spec = BufferSpec::auto_out(0, 0x100);
        let with_buffer = message(RequestBuilder::new(3).recv_buffer(0x1000, 0x100));
        assert_eq!(spec.actual_size(&with_buffer), Some(0x100));

        let with_pointer = message(RequestBuilder::new(3).recv_static(0x2000, 0x200));
        assert_eq!(spec.actual_size(&with_pointer), Some(0x200));

        let empty_buffer = message(
            RequestBuilder::new(3)
                .recv_buffer(0, 0)
                .recv_static(0x2000, 0x100),
        );
        assert_eq!(spec.actual_size(&empty_buffer), Some(0x100));
    }

    #[test]
    fn test_validate_rejects_missing_and_short_buffers() {
        let specs = [BufferSpec::output(0, 0x100)];
        let short = message(RequestBuilder::new(3).recv_buffer(0x1000, 0x80));
        assert!(matches!(
            validate_buffers(&specs, &short),
            Err(ServiceError::Result(code)) if code == sf::INVALID_BUFFER_SIZE
        ));
        assert!(validate_buffers(&specs, &message(RequestBuilder::new(3))).is_err());

        let larger = message(RequestBuilder::new(3).recv_buffer(0x1000, 0x200));
        assert!(validate_buffers(&specs, &larger).is_ok());
    }

    #[test]
    fn test_send_static_matched_by_index() {
        let spec = BufferSpec::new(BufferKind::InPointer, 1, 4);
        let msg = message(
            RequestBuilder::new(0)
                .send_static(0, 0x1000, 2)
                .send_static(1, 0x2000, 8),
        );
        assert_eq!(spec.actual_size(&msg), Some(8));
    }
}
