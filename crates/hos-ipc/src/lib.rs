//! ABI constants and wire format for the Horizon HLE kernel
//!
//! This crate is the **single source of truth** for every guest-visible
//! number the kernel and the services agree on:
//!
//! - **Result codes** (`result`): module/description pairs packed the way
//!   guest code compares them
//! - **Supervisor call ids** (`svc`): the numbers gated by the syscall mask
//! - **Capability descriptors** (`capability`): descriptor type markers
//! - **HIPC message layout** (`hipc`): header, special header, handle and
//!   buffer descriptors, receive list
//! - **CMIF layer** (`cmif`): the `SFCI`/`SFCO` headers that sit inside the
//!   HIPC data words, request building and response parsing
//!
//! # Message Buffer Layout
//!
//! ```text
//! +0x00  HIPC header (2 words)
//!        special header (1 word, optional)
//!        process id (2 words, optional)
//!        copy handles, move handles
//!        X descriptors (2 words each)
//!        A, B, W descriptors (3 words each)
//!        data words:  padding to 16 bytes | CMIF header | payload
//!        C receive list (2 words each)
//! ```
//!
//! Field order and widths are part of the guest ABI and must stay bit-exact.

#![no_std]
extern crate alloc;

pub mod capability;
pub mod cmif;
pub mod error;
pub mod hipc;
pub mod result;
pub mod svc;

mod wire;

pub use cmif::{
    CmifInHeader, CmifOutHeader, CmifRequest, CmifResponse, CommandType, RequestBuilder,
    ResponseBuilder,
};
pub use error::ProtocolError;
pub use hipc::{
    BufferDescriptor, BufferMode, HipcMessage, RecvListEntry, StaticDescriptor,
    MESSAGE_BUFFER_SIZE,
};
pub use result::ResultCode;
