//! Sessions
//!
//! A session is one connection between a client and a server. Requests
//! are synchronous: the client queues a [`SessionRequest`] naming its
//! message buffer and blocks on it until the server replies or the
//! session closes.
//!
//! A server never sees its current request cancelled: closing the client
//! side only marks the session, and the server notices between requests.
//! Closing the server side fails the queued requests but leaves the current
//! one to its handler, so its client resumes only once the reply is written.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use hos_kernel_core::ObjectKind;

use super::port::Port;
use super::ObjectHeader;
use crate::error::KernelError;
use crate::lock;
use crate::process::Process;
use crate::sync::{SyncObject, WaitList};

struct SessionState {
    pending: VecDeque<Arc<SessionRequest>>,
    current: Option<Arc<SessionRequest>>,
    client_open: bool,
    server_open: bool,
}

struct Session {
    state: Mutex<SessionState>,
    /// Server-side waiters: new requests, client close.
    waiters: WaitList,
    port: Option<Arc<Port>>,
}

/// Create a session pair not bound to any port.
pub fn create_session() -> (Arc<ServerSession>, Arc<ClientSession>) {
    create_port_session(None)
}

/// Create a session pair. Sessions created through a port release their
/// port slot when the server side closes.
pub(crate) fn create_port_session(
    port: Option<Arc<Port>>,
) -> (Arc<ServerSession>, Arc<ClientSession>) {
    let session = Arc::new(Session {
        state: Mutex::new(SessionState {
            pending: VecDeque::new(),
            current: None,
            client_open: true,
            server_open: true,
        }),
        waiters: WaitList::new(),
        port,
    });
    let server = Arc::new(ServerSession {
        header: ObjectHeader::new(ObjectKind::Session),
        session: Arc::clone(&session),
    });
    let client = Arc::new(ClientSession {
        header: ObjectHeader::new(ObjectKind::Session),
        session,
    });
    (server, client)
}

/// One synchronous request in flight.
pub struct SessionRequest {
    client: Arc<Process>,
    message_address: u64,
    result: Mutex<Option<Result<(), KernelError>>>,
    waiters: WaitList,
}

impl SessionRequest {
    /// A request whose message lives at `message_address` in `client`.
    pub fn new(client: Arc<Process>, message_address: u64) -> Arc<Self> {
        Arc::new(Self {
            client,
            message_address,
            result: Mutex::new(None),
            waiters: WaitList::new(),
        })
    }

    pub fn client(&self) -> &Arc<Process> {
        &self.client
    }

    pub fn message_address(&self) -> u64 {
        self.message_address
    }

    /// Record the outcome and wake the client. Later completions are
    /// ignored.
    pub fn complete(&self, result: Result<(), KernelError>) {
        {
            let mut slot = lock(&self.result);
            if slot.is_some() {
                return;
            }
            *slot = Some(result);
        }
        self.waiters.notify_all();
    }

    pub fn result(&self) -> Option<Result<(), KernelError>> {
        lock(&self.result).clone()
    }
}

impl SyncObject for SessionRequest {
    fn try_acquire(&self) -> bool {
        lock(&self.result).is_some()
    }

    fn wait_list(&self) -> &WaitList {
        &self.waiters
    }
}

/// Server end of a session.
pub struct ServerSession {
    header: ObjectHeader,
    session: Arc<Session>,
}

impl ServerSession {
    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    /// Take the next queued request, making it current.
    ///
    /// Returns `None` when nothing is queued or a request is already being
    /// served.
    pub fn receive(&self) -> Option<Arc<SessionRequest>> {
        let mut state = lock(&self.session.state);
        if state.current.is_some() || !state.server_open {
            return None;
        }
        let request = state.pending.pop_front()?;
        state.current = Some(Arc::clone(&request));
        Some(request)
    }

    /// Complete the current request.
    pub fn reply(&self, result: Result<(), KernelError>) -> Result<(), KernelError> {
        let request = lock(&self.session.state)
            .current
            .take()
            .ok_or(KernelError::InvalidState)?;
        request.complete(result);
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !lock(&self.session.state).pending.is_empty()
    }

    pub fn is_client_closed(&self) -> bool {
        !lock(&self.session.state).client_open
    }

    pub fn is_closed(&self) -> bool {
        !lock(&self.session.state).server_open
    }

    /// Close the server side. Queued requests fail with `SessionClosed`; a
    /// request already being served keeps its client blocked until `reply`.
    pub fn close(&self) {
        let failed: Vec<_> = {
            let mut state = lock(&self.session.state);
            if !state.server_open {
                return;
            }
            state.server_open = false;
            state.pending.drain(..).collect()
        };
        for request in failed {
            request.complete(Err(KernelError::SessionClosed));
        }
        if let Some(port) = &self.session.port {
            port.release_session();
        }
        self.session.waiters.notify_all();
    }

    /// True while a received request has not been replied to.
    pub fn is_serving(&self) -> bool {
        lock(&self.session.state).current.is_some()
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.close();
        // Nobody is left to reply.
        let orphan = lock(&self.session.state).current.take();
        if let Some(request) = orphan {
            request.complete(Err(KernelError::SessionClosed));
        }
    }
}

impl SyncObject for ServerSession {
    fn try_acquire(&self) -> bool {
        let state = lock(&self.session.state);
        (state.current.is_none() && !state.pending.is_empty()) || !state.client_open
    }

    fn wait_list(&self) -> &WaitList {
        &self.session.waiters
    }
}

/// Client end of a session.
pub struct ClientSession {
    header: ObjectHeader,
    session: Arc<Session>,
}

impl ClientSession {
    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    /// Queue `request` for the server.
    ///
    /// # Errors
    /// * `SessionClosed` - the server side is gone
    pub fn send(&self, request: Arc<SessionRequest>) -> Result<(), KernelError> {
        {
            let mut state = lock(&self.session.state);
            if !state.server_open {
                return Err(KernelError::SessionClosed);
            }
            if !state.client_open {
                return Err(KernelError::InvalidState);
            }
            state.pending.push_back(request);
        }
        self.session.waiters.notify_all();
        Ok(())
    }

    /// Close the client side. The server observes it between requests.
    pub fn close(&self) {
        {
            let mut state = lock(&self.session.state);
            if !state.client_open {
                return;
            }
            state.client_open = false;
        }
        self.session.waiters.notify_all();
    }

    pub fn is_server_closed(&self) -> bool {
        !lock(&self.session.state).server_open
    }
}
