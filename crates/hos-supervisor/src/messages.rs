//! System events and message queues
//!
//! Host-side events guest services hand out handles to:
//! - **Vsync** and **DisplayResolutionChange**: plain signals
//! - **GeneralChannel**: a queue of byte blobs
//! - **AppletMessage**: a queue of [`AppletMessage`] values
//!
//! A queue's event is signaled while the queue is non-empty.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hos_kernel::Event;
use serde::{Deserialize, Serialize};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Messages delivered to the foreground applet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum AppletMessage {
    Resume = 16,
    OperationModeChanged = 30,
    PerformanceModeChanged = 31,
}

impl AppletMessage {
    pub fn raw(self) -> u32 {
        self as u32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceMode {
    #[default]
    Default,
    Boost,
}

impl PerformanceMode {
    /// Docked consoles run boosted.
    pub fn for_docked(docked: bool) -> Self {
        if docked {
            Self::Boost
        } else {
            Self::Default
        }
    }
}

// =============================================================================
// Message Queue
// =============================================================================

/// A FIFO paired with an event that is signaled while it holds items.
pub struct MessageQueue<T> {
    event: Arc<Event>,
    queue: Mutex<VecDeque<T>>,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            event: Event::new(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    pub fn push(&self, item: T) {
        lock(&self.queue).push_back(item);
        self.event.signal();
    }

    /// Pop the oldest item, clearing the event once the queue drains.
    pub fn pop(&self) -> Option<T> {
        let mut queue = lock(&self.queue);
        let item = queue.pop_front();
        if queue.is_empty() {
            self.event.clear();
        }
        item
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// System Events
// =============================================================================

pub struct SystemEvents {
    vsync: Arc<Event>,
    display_resolution_change: Arc<Event>,
    general_channel: MessageQueue<Vec<u8>>,
    applet_messages: MessageQueue<AppletMessage>,
}

impl SystemEvents {
    pub fn new() -> Self {
        Self {
            vsync: Event::new(),
            display_resolution_change: Event::new(),
            general_channel: MessageQueue::new(),
            applet_messages: MessageQueue::new(),
        }
    }

    pub fn vsync(&self) -> &Arc<Event> {
        &self.vsync
    }

    pub fn display_resolution_change(&self) -> &Arc<Event> {
        &self.display_resolution_change
    }

    pub fn general_channel(&self) -> &MessageQueue<Vec<u8>> {
        &self.general_channel
    }

    pub fn applet_messages(&self) -> &MessageQueue<AppletMessage> {
        &self.applet_messages
    }

    pub fn signal_vsync(&self) {
        self.vsync.signal();
    }

    pub fn signal_display_resolution_change(&self) {
        self.display_resolution_change.signal();
    }

    /// Queue `data` on the general channel. Empty blobs are dropped.
    pub fn push_to_general_channel(&self, data: Vec<u8>) {
        if !data.is_empty() {
            self.general_channel.push(data);
        }
    }
}

impl Default for SystemEvents {
    fn default() -> Self {
        Self::new()
    }
}
