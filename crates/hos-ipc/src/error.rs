//! Wire format errors

use thiserror::Error;

/// Errors produced while decoding or encoding a message buffer.
///
/// Decoding never panics on hostile input; every out-of-bounds access is
/// reported through one of these variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The buffer ended before a field could be read.
    #[error("message truncated: needed {needed} bytes at offset {offset}, buffer is {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A CMIF header did not start with the expected magic.
    #[error("invalid CMIF magic {0:#010x}")]
    InvalidMagic(u32),

    /// A descriptor count does not fit its header field.
    #[error("too many {kind} descriptors: {count}")]
    TooManyDescriptors { kind: &'static str, count: usize },

    /// The encoded message does not fit the message buffer.
    #[error("message of {size} bytes exceeds buffer of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    /// The data section is too small to hold a CMIF header.
    #[error("data section of {0} bytes cannot hold a CMIF header")]
    MissingCmifHeader(usize),

    /// A buffer descriptor used the reserved mode value.
    #[error("invalid buffer mode {0}")]
    InvalidBufferMode(u32),

    /// The receive list would start inside the data words.
    #[error("receive list at word {offset} overlaps data ending at word {data_end}")]
    InvalidRecvListOffset { offset: u16, data_end: usize },
}
