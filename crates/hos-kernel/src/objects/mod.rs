//! Kernel objects
//!
//! Everything a handle can name. Objects are shared through `Arc`; the
//! [`ObjectHeader`] additionally counts handle-table bindings so that
//! closing the last handle to a session or port runs its teardown path
//! even while host code still holds an `Arc`.

mod event;
mod port;
mod session;
mod shared_memory;
mod transfer_memory;

pub use event::{Event, ResetMode};
pub use port::{create_port, ClientPort, ServerPort};
pub use session::{create_session, ClientSession, ServerSession, SessionRequest};
pub use shared_memory::SharedMemory;
pub use transfer_memory::TransferMemory;

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use hos_kernel_core::{ObjectId, ObjectKind};

use crate::process::{Process, Thread};
use crate::sync::SyncObject;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity and handle count shared by all kernel objects.
#[derive(Debug)]
pub struct ObjectHeader {
    id: ObjectId,
    kind: ObjectKind,
    handles: AtomicU32,
}

impl ObjectHeader {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            id: ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            handles: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Live handle-table bindings across all processes.
    pub fn handle_count(&self) -> u32 {
        self.handles.load(Ordering::Acquire)
    }

    fn open(&self) {
        self.handles.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true when this released the last binding.
    fn close(&self) -> bool {
        self.handles.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// Any object a handle table can hold.
#[derive(Clone)]
pub enum KernelObject {
    Event(Arc<Event>),
    SharedMemory(Arc<SharedMemory>),
    TransferMemory(Arc<TransferMemory>),
    Process(Arc<Process>),
    Thread(Arc<Thread>),
    ServerPort(Arc<ServerPort>),
    ClientPort(Arc<ClientPort>),
    ServerSession(Arc<ServerSession>),
    ClientSession(Arc<ClientSession>),
}

impl KernelObject {
    pub fn header(&self) -> &ObjectHeader {
        match self {
            Self::Event(o) => o.header(),
            Self::SharedMemory(o) => o.header(),
            Self::TransferMemory(o) => o.header(),
            Self::Process(o) => o.header(),
            Self::Thread(o) => o.header(),
            Self::ServerPort(o) => o.header(),
            Self::ClientPort(o) => o.header(),
            Self::ServerSession(o) => o.header(),
            Self::ClientSession(o) => o.header(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.header().id()
    }

    pub fn kind(&self) -> ObjectKind {
        self.header().kind()
    }

    /// The waitable view of this object, if it has one.
    pub fn as_sync_object(&self) -> Option<&dyn SyncObject> {
        match self {
            Self::Event(o) => Some(&**o),
            Self::Process(o) => Some(&**o),
            Self::Thread(o) => Some(&**o),
            Self::ServerPort(o) => Some(&**o),
            Self::ServerSession(o) => Some(&**o),
            _ => None,
        }
    }

    /// Bookkeeping for a new handle binding.
    pub(crate) fn on_handle_opened(&self) {
        self.header().open();
    }

    /// Bookkeeping for a removed handle binding. Must run outside the
    /// handle table lock: teardown may notify other threads.
    pub(crate) fn on_handle_closed(&self) {
        if !self.header().close() {
            return;
        }
        match self {
            Self::ClientSession(session) => session.close(),
            Self::ServerSession(session) => session.close(),
            Self::ServerPort(port) => port.close(),
            _ => {}
        }
    }
}

macro_rules! downcasts {
    ($($name:ident => $variant:ident($ty:ty)),* $(,)?) => {
        impl KernelObject {
            $(
                pub fn $name(self) -> Option<Arc<$ty>> {
                    match self {
                        Self::$variant(object) => Some(object),
                        _ => None,
                    }
                }
            )*
        }
    };
}

downcasts! {
    into_event => Event(Event),
    into_shared_memory => SharedMemory(SharedMemory),
    into_transfer_memory => TransferMemory(TransferMemory),
    into_process => Process(Process),
    into_thread => Thread(Thread),
    into_server_port => ServerPort(ServerPort),
    into_client_port => ClientPort(ClientPort),
    into_server_session => ServerSession(ServerSession),
    into_client_session => ClientSession(ClientSession),
}

impl fmt::Debug for KernelObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind().name(), self.id().0)
    }
}

impl From<Arc<Event>> for KernelObject {
    fn from(event: Arc<Event>) -> Self {
        Self::Event(event)
    }
}

impl From<Arc<SharedMemory>> for KernelObject {
    fn from(memory: Arc<SharedMemory>) -> Self {
        Self::SharedMemory(memory)
    }
}

impl From<Arc<TransferMemory>> for KernelObject {
    fn from(memory: Arc<TransferMemory>) -> Self {
        Self::TransferMemory(memory)
    }
}

impl From<Arc<ClientSession>> for KernelObject {
    fn from(session: Arc<ClientSession>) -> Self {
        Self::ClientSession(session)
    }
}

impl From<Arc<ServerSession>> for KernelObject {
    fn from(session: Arc<ServerSession>) -> Self {
        Self::ServerSession(session)
    }
}

impl From<Arc<ServerPort>> for KernelObject {
    fn from(port: Arc<ServerPort>) -> Self {
        Self::ServerPort(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ids_are_unique() {
        let a = ObjectHeader::new(ObjectKind::Event);
        let b = ObjectHeader::new(ObjectKind::Event);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_last_handle_close_tears_down_session() {
        let (server, client) = create_session();
        let object = KernelObject::from(Arc::clone(&client));
        object.on_handle_opened();
        object.on_handle_opened();
        object.on_handle_closed();
        assert!(!server.is_client_closed());
        object.on_handle_closed();
        assert!(server.is_client_closed());
        assert_eq!(client.header().handle_count(), 0);
    }

    #[test]
    fn test_downcast_checks_kind() {
        let object = KernelObject::from(Event::new());
        assert_eq!(object.kind(), ObjectKind::Event);
        assert!(object.clone().into_client_session().is_none());
        assert!(object.into_event().is_some());
    }
}
