//! Ports
//!
//! A port is the listening end of a service. Clients connect through the
//! [`ClientPort`]; each connection creates a session pair whose server side
//! queues on the [`ServerPort`] until accepted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use hos_kernel_core::ObjectKind;
use log::debug;

use super::session::{create_port_session, ClientSession, ServerSession};
use super::ObjectHeader;
use crate::error::KernelError;
use crate::lock;
use crate::sync::{SyncObject, WaitList};

struct PortState {
    incoming: VecDeque<Arc<ServerSession>>,
    /// Sessions created through this port and not yet closed by the server.
    sessions: u32,
    open: bool,
}

pub(crate) struct Port {
    name: String,
    max_sessions: u32,
    state: Mutex<PortState>,
    waiters: WaitList,
}

impl Port {
    pub(crate) fn release_session(&self) {
        let mut state = lock(&self.state);
        state.sessions = state.sessions.saturating_sub(1);
    }
}

/// Create a port named `name` accepting at most `max_sessions` concurrent
/// sessions.
pub fn create_port(name: &str, max_sessions: u32) -> (Arc<ServerPort>, Arc<ClientPort>) {
    let port = Arc::new(Port {
        name: name.to_string(),
        max_sessions,
        state: Mutex::new(PortState {
            incoming: VecDeque::new(),
            sessions: 0,
            open: true,
        }),
        waiters: WaitList::new(),
    });
    let server = Arc::new(ServerPort {
        header: ObjectHeader::new(ObjectKind::Port),
        port: Arc::clone(&port),
    });
    let client = Arc::new(ClientPort {
        header: ObjectHeader::new(ObjectKind::Port),
        port,
    });
    (server, client)
}

/// Listening side of a port.
pub struct ServerPort {
    header: ObjectHeader,
    port: Arc<Port>,
}

impl ServerPort {
    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        &self.port.name
    }

    /// Take the oldest pending connection.
    pub fn accept(&self) -> Option<Arc<ServerSession>> {
        lock(&self.port.state).incoming.pop_front()
    }

    /// Stop accepting connections. Pending, unaccepted sessions are closed.
    pub fn close(&self) {
        let pending: Vec<_> = {
            let mut state = lock(&self.port.state);
            if !state.open {
                return;
            }
            state.open = false;
            state.incoming.drain(..).collect()
        };
        debug!("port {} closed ({} pending dropped)", self.port.name, pending.len());
        for session in pending {
            session.close();
        }
        self.port.waiters.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        !lock(&self.port.state).open
    }

    pub fn session_count(&self) -> u32 {
        lock(&self.port.state).sessions
    }
}

impl SyncObject for ServerPort {
    fn try_acquire(&self) -> bool {
        !lock(&self.port.state).incoming.is_empty()
    }

    fn wait_list(&self) -> &WaitList {
        &self.port.waiters
    }
}

/// Connecting side of a port.
pub struct ClientPort {
    header: ObjectHeader,
    port: Arc<Port>,
}

impl ClientPort {
    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        &self.port.name
    }

    /// Open a new session to the port's server.
    ///
    /// # Errors
    /// * `PortClosed` - the server closed the port
    /// * `SessionLimit` - `max_sessions` sessions are already open
    pub fn connect(&self) -> Result<Arc<ClientSession>, KernelError> {
        let client = {
            let mut state = lock(&self.port.state);
            if !state.open {
                return Err(KernelError::PortClosed);
            }
            if state.sessions >= self.port.max_sessions {
                return Err(KernelError::SessionLimit);
            }
            state.sessions += 1;
            let (server, client) = create_port_session(Some(Arc::clone(&self.port)));
            state.incoming.push_back(server);
            client
        };
        self.port.waiters.notify_all();
        Ok(client)
    }

    pub fn is_closed(&self) -> bool {
        !lock(&self.port.state).open
    }
}
