//! Horizon HLE Supervisor
//!
//! The host-facing facade over the kernel and service layer:
//!
//! - **Boot**: kernel creation, logging, shared memory layout and system
//!   events
//! - **Service lifecycle**: `initialize_services` / `deinitialize_services`
//!   for the active context's server set
//! - **System events**: docked mode, the general channel, applet messages
//!   and pause/resume
//! - **Shutdown**: the kernel termination protocol with a display teardown
//!   hook
//!
//! # Contexts
//!
//! A supervisor always owns a main context and may have an applet context
//! attached. Each context has its own kernel and server set; registry and
//! server access goes through [`select_context`].

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod logging;
pub mod messages;
pub mod metrics;
mod supervisor;

pub use config::SupervisorConfig;
pub use context::{select_context, ContextKind, ServerSet};
pub use error::SupervisorError;
pub use messages::{AppletMessage, MessageQueue, PerformanceMode, SystemEvents};
pub use metrics::SystemMetrics;
pub use supervisor::{SharedMemoryLayout, Supervisor};
