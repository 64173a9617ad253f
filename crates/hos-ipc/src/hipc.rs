//! HIPC message layout
//!
//! Encodes and decodes the kernel-level part of a message buffer: header,
//! special header, handle lists, buffer descriptors, raw data words and the
//! receive list. The CMIF layer in [`crate::cmif`] interprets the data words.

use alloc::vec::Vec;

use crate::error::ProtocolError;
use crate::wire::{decode_u32, decode_u64, put_u32, put_u64};

/// Size of the per-thread IPC message buffer.
pub const MESSAGE_BUFFER_SIZE: usize = 0x100;

/// Maximum count representable by a 4-bit header field.
const MAX_DESCRIPTORS: usize = 0xF;

/// Maximum data words representable by the 10-bit header field.
const MAX_DATA_WORDS: usize = 0x3FF;

/// Mask of the 11-bit receive-list offset field.
const RECV_LIST_OFFSET_MASK: u32 = 0x7FF;

/// Receive-list mode meaning "no receive list".
pub const RECV_LIST_NONE: u8 = 0;
/// Receive-list mode meaning "one entry covering the pointer buffer".
pub const RECV_LIST_SINGLE: u8 = 2;
/// First mode value that carries an explicit entry count (`mode - 2`).
const RECV_LIST_EXPLICIT_BASE: u8 = 2;

/// Memory attribute of a mapped buffer (A/B/W descriptor).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferMode {
    #[default]
    Normal = 0,
    NonSecure = 1,
    NonDevice = 3,
}

impl BufferMode {
    fn from_bits(bits: u32) -> Result<Self, ProtocolError> {
        match bits {
            0 => Ok(Self::Normal),
            1 => Ok(Self::NonSecure),
            3 => Ok(Self::NonDevice),
            other => Err(ProtocolError::InvalidBufferMode(other)),
        }
    }
}

/// A send static (X) descriptor: client data copied into the server's
/// pointer buffer, or on a response, the size the server wrote into a
/// receive-list entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StaticDescriptor {
    pub index: u8,
    pub address: u64,
    pub size: u16,
}

/// A mapped buffer (A = send, B = receive, W = exchange) descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub address: u64,
    pub size: u64,
    pub mode: BufferMode,
}

/// A receive list (C) entry: client memory the server may write pointer
/// output into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecvListEntry {
    pub address: u64,
    pub size: u16,
}

/// A decoded HIPC message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HipcMessage {
    /// Message type (see [`crate::cmif::CommandType`]).
    pub message_type: u16,
    /// Process id attached by the kernel when `send_pid` is set.
    pub pid: Option<u64>,
    pub copy_handles: Vec<u32>,
    pub move_handles: Vec<u32>,
    /// X descriptors.
    pub send_statics: Vec<StaticDescriptor>,
    /// A descriptors.
    pub send_buffers: Vec<BufferDescriptor>,
    /// B descriptors.
    pub recv_buffers: Vec<BufferDescriptor>,
    /// W descriptors.
    pub exch_buffers: Vec<BufferDescriptor>,
    /// C entries.
    pub recv_list: Vec<RecvListEntry>,
    /// Word offset of the receive list in the buffer. Zero places it right
    /// after the data words.
    pub recv_list_offset: u16,
    /// Raw data words, including the CMIF alignment padding.
    pub data: Vec<u8>,
    /// Byte offset of the first data word within the message buffer.
    pub data_offset: usize,
}

impl HipcMessage {
    /// Byte offset the data words start at for this descriptor layout.
    pub fn compute_data_offset(&self) -> usize {
        let has_special = self.has_special_header();
        let mut words = 2;
        if has_special {
            words += 1;
            if self.pid.is_some() {
                words += 2;
            }
            words += self.copy_handles.len() + self.move_handles.len();
        }
        words += self.send_statics.len() * 2;
        words += (self.send_buffers.len() + self.recv_buffers.len() + self.exch_buffers.len()) * 3;
        words * 4
    }

    fn has_special_header(&self) -> bool {
        self.pid.is_some() || !self.copy_handles.is_empty() || !self.move_handles.is_empty()
    }

    fn recv_list_mode(&self) -> u8 {
        if self.recv_list.is_empty() {
            RECV_LIST_NONE
        } else {
            RECV_LIST_EXPLICIT_BASE + self.recv_list.len() as u8
        }
    }

    /// Encode into a message buffer image.
    ///
    /// `data` is padded to a whole number of words. Fails if any count does
    /// not fit its header field or the result exceeds [`MESSAGE_BUFFER_SIZE`].
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        check_count("send static", self.send_statics.len())?;
        check_count("send buffer", self.send_buffers.len())?;
        check_count("receive buffer", self.recv_buffers.len())?;
        check_count("exchange buffer", self.exch_buffers.len())?;
        check_count("copy handle", self.copy_handles.len())?;
        check_count("move handle", self.move_handles.len())?;
        if self.recv_list.len() > MAX_DESCRIPTORS - RECV_LIST_EXPLICIT_BASE as usize {
            return Err(ProtocolError::TooManyDescriptors {
                kind: "receive list",
                count: self.recv_list.len(),
            });
        }

        let data_words = self.data.len().div_ceil(4);
        if data_words > MAX_DATA_WORDS {
            return Err(ProtocolError::MessageTooLarge {
                size: self.data.len(),
                limit: MAX_DATA_WORDS * 4,
            });
        }

        let has_special = self.has_special_header();
        let mut out = Vec::with_capacity(MESSAGE_BUFFER_SIZE);

        let word0 = (self.message_type as u32)
            | ((self.send_statics.len() as u32) << 16)
            | ((self.send_buffers.len() as u32) << 20)
            | ((self.recv_buffers.len() as u32) << 24)
            | ((self.exch_buffers.len() as u32) << 28);
        let word1 = (data_words as u32)
            | ((self.recv_list_mode() as u32) << 10)
            | ((self.recv_list_offset as u32 & RECV_LIST_OFFSET_MASK) << 20)
            | ((has_special as u32) << 31);
        put_u32(&mut out, word0);
        put_u32(&mut out, word1);

        if has_special {
            let special = (self.pid.is_some() as u32)
                | ((self.copy_handles.len() as u32) << 1)
                | ((self.move_handles.len() as u32) << 5);
            put_u32(&mut out, special);
            if let Some(pid) = self.pid {
                put_u64(&mut out, pid);
            }
            for handle in self.copy_handles.iter().chain(self.move_handles.iter()) {
                put_u32(&mut out, *handle);
            }
        }

        for desc in &self.send_statics {
            put_u32(&mut out, encode_static_word0(desc));
            put_u32(&mut out, desc.address as u32);
        }
        for desc in self
            .send_buffers
            .iter()
            .chain(self.recv_buffers.iter())
            .chain(self.exch_buffers.iter())
        {
            encode_buffer(&mut out, desc);
        }

        out.extend_from_slice(&self.data);
        out.resize(out.len() + (data_words * 4 - self.data.len()), 0);

        if self.recv_list_offset != 0 {
            let start = recv_list_start(self.recv_list_offset, out.len())?;
            out.resize(start, 0);
        }
        for entry in &self.recv_list {
            put_u32(&mut out, entry.address as u32);
            put_u32(
                &mut out,
                ((entry.address >> 32) as u32 & 0xFFFF) | ((entry.size as u32) << 16),
            );
        }

        if out.len() > MESSAGE_BUFFER_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: out.len(),
                limit: MESSAGE_BUFFER_SIZE,
            });
        }
        Ok(out)
    }

    /// Decode a message buffer image.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = 0;
        let word0 = decode_u32(buf, &mut cursor)?;
        let word1 = decode_u32(buf, &mut cursor)?;

        let message_type = (word0 & 0xFFFF) as u16;
        let num_statics = ((word0 >> 16) & 0xF) as usize;
        let num_send = ((word0 >> 20) & 0xF) as usize;
        let num_recv = ((word0 >> 24) & 0xF) as usize;
        let num_exch = ((word0 >> 28) & 0xF) as usize;
        let data_words = (word1 & 0x3FF) as usize;
        let recv_mode = ((word1 >> 10) & 0xF) as u8;
        let recv_list_offset = ((word1 >> 20) & RECV_LIST_OFFSET_MASK) as u16;
        let has_special = (word1 >> 31) != 0;

        let mut message = HipcMessage {
            message_type,
            recv_list_offset,
            ..Default::default()
        };

        if has_special {
            let special = decode_u32(buf, &mut cursor)?;
            let send_pid = (special & 1) != 0;
            let num_copy = ((special >> 1) & 0xF) as usize;
            let num_move = ((special >> 5) & 0xF) as usize;
            if send_pid {
                message.pid = Some(decode_u64(buf, &mut cursor)?);
            }
            for _ in 0..num_copy {
                message.copy_handles.push(decode_u32(buf, &mut cursor)?);
            }
            for _ in 0..num_move {
                message.move_handles.push(decode_u32(buf, &mut cursor)?);
            }
        }

        for _ in 0..num_statics {
            let w0 = decode_u32(buf, &mut cursor)?;
            let low = decode_u32(buf, &mut cursor)?;
            message.send_statics.push(decode_static(w0, low));
        }
        for _ in 0..num_send {
            message.send_buffers.push(decode_buffer(buf, &mut cursor)?);
        }
        for _ in 0..num_recv {
            message.recv_buffers.push(decode_buffer(buf, &mut cursor)?);
        }
        for _ in 0..num_exch {
            message.exch_buffers.push(decode_buffer(buf, &mut cursor)?);
        }

        message.data_offset = cursor;
        message.data = crate::wire::take(buf, &mut cursor, data_words * 4)?.to_vec();

        let recv_entries = match recv_mode {
            RECV_LIST_NONE | 1 => 0,
            RECV_LIST_SINGLE => 1,
            explicit => (explicit - RECV_LIST_EXPLICIT_BASE) as usize,
        };
        if recv_entries > 0 && recv_list_offset != 0 {
            cursor = recv_list_start(recv_list_offset, cursor)?;
        }
        for _ in 0..recv_entries {
            let low = decode_u32(buf, &mut cursor)? as u64;
            let w1 = decode_u32(buf, &mut cursor)?;
            message.recv_list.push(RecvListEntry {
                address: low | (((w1 & 0xFFFF) as u64) << 32),
                size: (w1 >> 16) as u16,
            });
        }

        Ok(message)
    }
}

/// Byte position of a receive list placed at word `offset`, given the
/// data words end at byte `data_end`.
fn recv_list_start(offset: u16, data_end: usize) -> Result<usize, ProtocolError> {
    let start = offset as usize * 4;
    if start < data_end {
        return Err(ProtocolError::InvalidRecvListOffset {
            offset,
            data_end: data_end / 4,
        });
    }
    Ok(start)
}

fn check_count(kind: &'static str, count: usize) -> Result<(), ProtocolError> {
    if count > MAX_DESCRIPTORS {
        return Err(ProtocolError::TooManyDescriptors { kind, count });
    }
    Ok(())
}

fn encode_static_word0(desc: &StaticDescriptor) -> u32 {
    let address_mid = ((desc.address >> 32) & 0xF) as u32;
    let address_high = ((desc.address >> 36) & 0x3F) as u32;
    (desc.index as u32 & 0x3F) | (address_high << 6) | (address_mid << 12) | ((desc.size as u32) << 16)
}

fn decode_static(word0: u32, low: u32) -> StaticDescriptor {
    let address_high = ((word0 >> 6) & 0x3F) as u64;
    let address_mid = ((word0 >> 12) & 0xF) as u64;
    StaticDescriptor {
        index: (word0 & 0x3F) as u8,
        address: low as u64 | (address_mid << 32) | (address_high << 36),
        size: (word0 >> 16) as u16,
    }
}

fn encode_buffer(out: &mut Vec<u8>, desc: &BufferDescriptor) {
    let address_mid = ((desc.address >> 32) & 0xF) as u32;
    let address_high = ((desc.address >> 36) & 0x3F_FFFF) as u32;
    let size_high = ((desc.size >> 32) & 0xF) as u32;
    put_u32(out, desc.size as u32);
    put_u32(out, desc.address as u32);
    put_u32(
        out,
        (desc.mode as u32) | (address_high << 2) | (size_high << 24) | (address_mid << 28),
    );
}

fn decode_buffer(buf: &[u8], cursor: &mut usize) -> Result<BufferDescriptor, ProtocolError> {
    let size_low = decode_u32(buf, cursor)? as u64;
    let address_low = decode_u32(buf, cursor)? as u64;
    let word2 = decode_u32(buf, cursor)?;
    let address_high = ((word2 >> 2) & 0x3F_FFFF) as u64;
    let size_high = ((word2 >> 24) & 0xF) as u64;
    let address_mid = ((word2 >> 28) & 0xF) as u64;
    Ok(BufferDescriptor {
        address: address_low | (address_mid << 32) | (address_high << 36),
        size: size_low | (size_high << 32),
        mode: BufferMode::from_bits(word2 & 0x3)?,
    })
}
