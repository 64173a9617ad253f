//! Per-call handler context
//!
//! A [`ServiceCtx`] lives for exactly one command. It exposes the request
//! arguments, the client's buffers and handles, and collects everything the
//! handler produces. Side effects on the client are staged: guest memory
//! writes and out-handles are applied only if the handler succeeds, so a
//! failing or panicking handler leaves no partial response behind.
//!
//! Handles the client attaches are duplicated into the server process for
//! the duration of the call and closed afterwards unless the handler keeps
//! them. Move handles are closed in the client once the call completes.

use std::sync::Arc;

use hos_ipc::hipc::{BufferDescriptor, StaticDescriptor};
use hos_ipc::result::sf;
use hos_ipc::CmifRequest;
use hos_kernel::{
    create_session, Handle, KernelContext, KernelError, KernelObject, Process, ProcessId,
};
use log::debug;

use crate::command::{shared, IpcService};
use crate::dispatch::SessionEntry;
use crate::error::{ServiceError, ServiceResult};

/// How a handle was attached to the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleMode {
    Copy,
    Move,
}

struct InHandle {
    /// Handle in the server process's table.
    handle: Handle,
    kept: bool,
}

/// Out-handles bound into the client, ready for the response header.
pub(crate) struct BoundHandles {
    pub copy: Vec<u32>,
    pub moved: Vec<u32>,
}

pub struct ServiceCtx<'a> {
    kernel: &'a Arc<KernelContext>,
    server: &'a Arc<Process>,
    client: &'a Arc<Process>,
    request: &'a CmifRequest,
    cursor: usize,
    output: Vec<u8>,
    copy_in: Vec<InHandle>,
    move_in: Vec<InHandle>,
    /// Client handles to close after the call.
    moved_sources: Vec<Handle>,
    copy_out: Vec<KernelObject>,
    move_out: Vec<KernelObject>,
    writes: Vec<(u64, Vec<u8>)>,
    statics: Vec<StaticDescriptor>,
    new_sessions: Vec<SessionEntry>,
}

impl<'a> ServiceCtx<'a> {
    /// Prepare a context, duplicating the request's handles into `server`.
    ///
    /// # Errors
    /// The kernel error of the first handle that cannot be resolved in the
    /// client or bound in the server.
    pub(crate) fn new(
        kernel: &'a Arc<KernelContext>,
        server: &'a Arc<Process>,
        client: &'a Arc<Process>,
        request: &'a CmifRequest,
    ) -> Result<Self, KernelError> {
        let mut ctx = Self {
            kernel,
            server,
            client,
            request,
            cursor: 0,
            output: Vec::new(),
            copy_in: Vec::new(),
            move_in: Vec::new(),
            moved_sources: Vec::new(),
            copy_out: Vec::new(),
            move_out: Vec::new(),
            writes: Vec::new(),
            statics: Vec::new(),
            new_sessions: Vec::new(),
        };
        for &raw in &request.message.copy_handles {
            let handle = ctx.import(Handle(raw))?;
            ctx.copy_in.push(handle);
        }
        for &raw in &request.message.move_handles {
            let handle = ctx.import(Handle(raw))?;
            ctx.move_in.push(handle);
            ctx.moved_sources.push(Handle(raw));
        }
        Ok(ctx)
    }

    fn import(&self, handle: Handle) -> Result<InHandle, KernelError> {
        let object = if handle == Handle::CURRENT_PROCESS {
            KernelObject::Process(Arc::clone(self.client))
        } else {
            self.client.resolve_handle(handle)?
        };
        Ok(InHandle {
            handle: self.server.generate_handle(object)?,
            kept: false,
        })
    }

    pub fn kernel(&self) -> &Arc<KernelContext> {
        self.kernel
    }

    /// The process hosting this service.
    pub fn server(&self) -> &Arc<Process> {
        self.server
    }

    pub fn client(&self) -> &Arc<Process> {
        self.client
    }

    pub fn command_id(&self) -> u32 {
        self.request.command_id()
    }

    /// The caller's pid, if the request asked for it to be sent.
    pub fn client_pid(&self) -> Option<ProcessId> {
        self.request.message.pid.map(|_| self.client.pid())
    }

    // =========================================================================
    // Arguments
    // =========================================================================

    fn read_array<const N: usize>(&mut self) -> ServiceResult<[u8; N]> {
        let start = self.cursor.next_multiple_of(N);
        let bytes = self
            .request
            .payload
            .get(start..start + N)
            .ok_or(ServiceError::Result(sf::INVALID_HEADER_SIZE))?;
        self.cursor = start + N;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> ServiceResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> ServiceResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> ServiceResult<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> ServiceResult<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Unaligned raw argument bytes.
    pub fn read_bytes(&mut self, len: usize) -> ServiceResult<Vec<u8>> {
        let end = self
            .cursor
            .checked_add(len)
            .ok_or(ServiceError::Result(sf::INVALID_BUFFER_SIZE))?;
        let bytes = self
            .request
            .payload
            .get(self.cursor..end)
            .ok_or(ServiceError::Result(sf::INVALID_HEADER_SIZE))?;
        self.cursor = end;
        Ok(bytes.to_vec())
    }

    // =========================================================================
    // Output fields
    // =========================================================================

    fn write_aligned(&mut self, bytes: &[u8]) {
        let start = self.output.len().next_multiple_of(bytes.len());
        self.output.resize(start, 0);
        self.output.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.output.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_aligned(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_aligned(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    /// Contents of send buffer `index`.
    pub fn read_in_buffer(&self, index: usize) -> ServiceResult<Vec<u8>> {
        let descriptor = self
            .request
            .message
            .send_buffers
            .get(index)
            .ok_or(ServiceError::Result(sf::INVALID_BUFFER_SIZE))?;
        self.read_memory(descriptor.address, descriptor.size as usize)
    }

    /// Contents of the send static with static index `index`.
    pub fn read_in_pointer(&self, index: u8) -> ServiceResult<Vec<u8>> {
        let descriptor = self
            .request
            .message
            .send_statics
            .iter()
            .find(|s| s.index == index)
            .ok_or(ServiceError::Result(sf::INVALID_BUFFER_SIZE))?;
        self.read_memory(descriptor.address, usize::from(descriptor.size))
    }

    pub fn out_buffer(&self, index: usize) -> Option<BufferDescriptor> {
        self.request.message.recv_buffers.get(index).copied()
    }

    /// Stage `data` into receive buffer `index`.
    pub fn write_out_buffer(&mut self, index: usize, data: &[u8]) -> ServiceResult {
        let descriptor = self
            .out_buffer(index)
            .filter(|b| b.size >= data.len() as u64)
            .ok_or(ServiceError::Result(sf::INVALID_BUFFER_SIZE))?;
        self.write_memory(descriptor.address, data);
        Ok(())
    }

    /// Stage `data` into receive list entry `index` and report its size in
    /// the response.
    pub fn write_out_pointer(&mut self, index: usize, data: &[u8]) -> ServiceResult {
        let entry = self
            .request
            .message
            .recv_list
            .get(index)
            .copied()
            .filter(|e| usize::from(e.size) >= data.len())
            .ok_or(ServiceError::Result(sf::INVALID_BUFFER_SIZE))?;
        let index = u8::try_from(index).map_err(|_| ServiceError::Result(sf::INVALID_BUFFER_SIZE))?;
        self.write_memory(entry.address, data);
        self.statics.push(StaticDescriptor {
            index,
            address: entry.address,
            // Bounded by entry.size above.
            size: data.len() as u16,
        });
        Ok(())
    }

    /// Write to a receive buffer when the client sent a non-empty one,
    /// otherwise to the receive list entry.
    pub fn write_auto_out(&mut self, index: usize, data: &[u8]) -> ServiceResult {
        match self.out_buffer(index) {
            Some(buffer) if buffer.size > 0 => self.write_out_buffer(index, data),
            _ => self.write_out_pointer(index, data),
        }
    }

    /// Read client memory directly.
    pub fn read_memory(&self, address: u64, len: usize) -> ServiceResult<Vec<u8>> {
        let mut buf = vec![0; len];
        self.client.read_memory(address, &mut buf)?;
        Ok(buf)
    }

    /// Stage a write to client memory.
    pub fn write_memory(&mut self, address: u64, data: &[u8]) {
        self.writes.push((address, data.to_vec()));
    }

    // =========================================================================
    // Handles
    // =========================================================================

    fn in_list(&self, mode: HandleMode) -> &[InHandle] {
        match mode {
            HandleMode::Copy => &self.copy_in,
            HandleMode::Move => &self.move_in,
        }
    }

    /// Server-side handle for attached handle `index`, valid until the call
    /// returns.
    pub fn in_handle(&self, mode: HandleMode, index: usize) -> ServiceResult<Handle> {
        self.in_list(mode)
            .get(index)
            .map(|h| h.handle)
            .ok_or(ServiceError::Kernel(KernelError::InvalidHandle(0)))
    }

    /// Like [`Self::in_handle`], but the handle stays open in the server
    /// after the call.
    pub fn keep_in_handle(&mut self, mode: HandleMode, index: usize) -> ServiceResult<Handle> {
        let list = match mode {
            HandleMode::Copy => &mut self.copy_in,
            HandleMode::Move => &mut self.move_in,
        };
        let entry = list
            .get_mut(index)
            .ok_or(ServiceError::Kernel(KernelError::InvalidHandle(0)))?;
        entry.kept = true;
        Ok(entry.handle)
    }

    pub fn in_object(&self, mode: HandleMode, index: usize) -> ServiceResult<KernelObject> {
        let handle = self.in_handle(mode, index)?;
        Ok(self.server.resolve_handle(handle)?)
    }

    /// Emit `object` as a copy handle.
    pub fn copy_out(&mut self, object: KernelObject) {
        self.copy_out.push(object);
    }

    /// Emit `object` as a move handle.
    pub fn move_out(&mut self, object: KernelObject) {
        self.move_out.push(object);
    }

    /// Open a sub-interface: a new session on this server bound to
    /// `service`, emitted as a move handle.
    pub fn make_object<S: IpcService>(&mut self, service: S) {
        let (server_session, client_session) = create_session();
        debug!("{}: new object {}", self.server.name(), service.interface_name());
        self.new_sessions.push(SessionEntry::new(server_session, shared(service)));
        self.move_out(KernelObject::ClientSession(client_session));
    }

    // =========================================================================
    // Completion
    // =========================================================================

    pub(crate) fn output(&self) -> &[u8] {
        &self.output
    }

    pub(crate) fn statics(&self) -> &[StaticDescriptor] {
        &self.statics
    }

    /// Bind out-handles into the client, then apply staged writes.
    ///
    /// On error nothing stays bound. Writes are only attempted once every
    /// handle is bound, so a binding failure leaves client memory untouched.
    pub(crate) fn commit(&mut self) -> ServiceResult<BoundHandles> {
        let copy = self.bind(HandleMode::Copy)?;
        let moved = match self.bind(HandleMode::Move) {
            Ok(moved) => moved,
            Err(err) => {
                self.unbind(&copy);
                return Err(err);
            }
        };
        for (address, data) in std::mem::take(&mut self.writes) {
            if let Err(err) = self.client.write_memory(address, &data) {
                self.unbind(&copy);
                self.unbind(&moved);
                return Err(err.into());
            }
        }
        self.copy_out.clear();
        self.move_out.clear();
        Ok(BoundHandles { copy, moved })
    }

    fn unbind(&self, bound: &[u32]) {
        for &raw in bound {
            let _ = self.client.close_handle(Handle(raw));
        }
    }

    fn bind(&self, mode: HandleMode) -> ServiceResult<Vec<u32>> {
        let objects = match mode {
            HandleMode::Copy => &self.copy_out,
            HandleMode::Move => &self.move_out,
        };
        let mut bound = Vec::with_capacity(objects.len());
        for object in objects {
            match self.client.generate_handle(object.clone()) {
                Ok(handle) => bound.push(handle.raw()),
                Err(err) => {
                    self.unbind(&bound);
                    return Err(err.into());
                }
            }
        }
        Ok(bound)
    }

    /// Sessions opened by `make_object`, to be served once the reply is out.
    pub(crate) fn take_new_sessions(&mut self) -> Vec<SessionEntry> {
        std::mem::take(&mut self.new_sessions)
    }

    /// Drop everything the handler produced. Client sessions that were
    /// never handed out are closed so their servers see it.
    pub(crate) fn discard(&mut self) {
        self.writes.clear();
        self.statics.clear();
        self.output.clear();
        for object in self.copy_out.drain(..).chain(self.move_out.drain(..)) {
            if let KernelObject::ClientSession(session) = object {
                session.close();
            }
        }
        for entry in self.new_sessions.drain(..) {
            entry.session.close();
        }
    }
}

impl Drop for ServiceCtx<'_> {
    fn drop(&mut self) {
        for entry in self.copy_in.iter().chain(&self.move_in) {
            if !entry.kept {
                let _ = self.server.close_handle(entry.handle);
            }
        }
        for &handle in &self.moved_sources {
            let _ = self.client.close_handle(handle);
        }
    }
}
