//! Process and thread lifecycle state machines
//!
//! Pure transition functions. The runtime kernel stores the state behind a
//! lock, applies these functions, and signals a condition variable on every
//! successful transition so waiters never poll.
//!
//! ```text
//! Thread:  Created ─Start─▶ Started ─Run─▶ Running ⇄ Waiting
//!                                             │
//!                                           Exit (self only)
//!                                             ▼
//!                                          Exiting ─Finish─▶ Exited
//!
//! Process: Created ─Start─▶ Running ─BeginTermination─▶ Terminating
//!                                                            │
//!                                              FinishTermination
//!                                                            ▼
//!                                                       Terminated
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Thread lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreadState {
    Created,
    Started,
    Running,
    /// Blocked in a wait on one or more synchronization objects
    Waiting,
    Exiting,
    Exited,
}

/// Events driving a thread's state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadEvent {
    Start,
    Run,
    BeginWait,
    EndWait,
    Exit,
    Finish,
}

/// Process lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessState {
    Created,
    Running,
    Terminating,
    Terminated,
}

/// Events driving a process's state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    Start,
    BeginTermination,
    FinishTermination,
}

/// A transition not allowed from the current state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("thread cannot handle {event:?} in state {state:?}")]
    Thread {
        state: ThreadState,
        event: ThreadEvent,
    },
    #[error("process cannot handle {event:?} in state {state:?}")]
    Process {
        state: ProcessState,
        event: ProcessEvent,
    },
}

/// Apply `event` to a thread in `state`.
pub fn thread_transition(
    state: ThreadState,
    event: ThreadEvent,
) -> Result<ThreadState, TransitionError> {
    use ThreadEvent as E;
    use ThreadState as S;

    match (state, event) {
        (S::Created, E::Start) => Ok(S::Started),
        (S::Started, E::Run) => Ok(S::Running),
        (S::Running, E::BeginWait) => Ok(S::Waiting),
        (S::Waiting, E::EndWait) => Ok(S::Running),
        (S::Running, E::Exit) => Ok(S::Exiting),
        (S::Exiting, E::Finish) => Ok(S::Exited),
        (state, event) => Err(TransitionError::Thread { state, event }),
    }
}

/// Apply `event` to a process in `state`.
pub fn process_transition(
    state: ProcessState,
    event: ProcessEvent,
) -> Result<ProcessState, TransitionError> {
    use ProcessEvent as E;
    use ProcessState as S;

    match (state, event) {
        (S::Created, E::Start) => Ok(S::Running),
        (S::Created | S::Running, E::BeginTermination) => Ok(S::Terminating),
        (S::Terminating, E::FinishTermination) => Ok(S::Terminated),
        (state, event) => Err(TransitionError::Process { state, event }),
    }
}

impl ThreadState {
    /// The thread has started executing and not yet finished.
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Started | Self::Running | Self::Waiting | Self::Exiting)
    }
}

impl ProcessState {
    /// Termination has begun or completed.
    pub fn is_terminating(self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }
}
