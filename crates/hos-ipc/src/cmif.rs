//! CMIF layer
//!
//! CMIF frames a remote procedure call inside the HIPC data words. The
//! frame starts at the first 16-byte aligned offset of the data section
//! (measured from the start of the message buffer) and begins with a
//! 16-byte header: `SFCI` on requests, `SFCO` on responses.

use alloc::vec::Vec;

use crate::error::ProtocolError;
use crate::hipc::{
    BufferDescriptor, BufferMode, HipcMessage, RecvListEntry, StaticDescriptor,
};
use crate::result::ResultCode;
use crate::wire::{align_up, decode_u32, put_u32};

/// `"SFCI"` little-endian.
pub const IN_HEADER_MAGIC: u32 = 0x4943_4653;
/// `"SFCO"` little-endian.
pub const OUT_HEADER_MAGIC: u32 = 0x4F43_4653;
/// Size of both CMIF headers.
pub const HEADER_SIZE: usize = 16;
/// Alignment of the CMIF frame inside the message buffer.
pub const DATA_ALIGNMENT: usize = 16;

/// HIPC message type values interpreted by the CMIF layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum CommandType {
    Invalid = 0,
    LegacyRequest = 1,
    Close = 2,
    LegacyControl = 3,
    Request = 4,
    Control = 5,
    RequestWithContext = 6,
    ControlWithContext = 7,
}

impl CommandType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Invalid),
            1 => Some(Self::LegacyRequest),
            2 => Some(Self::Close),
            3 => Some(Self::LegacyControl),
            4 => Some(Self::Request),
            5 => Some(Self::Control),
            6 => Some(Self::RequestWithContext),
            7 => Some(Self::ControlWithContext),
            _ => None,
        }
    }

    pub fn is_request(self) -> bool {
        matches!(self, Self::Request | Self::RequestWithContext)
    }

    pub fn is_control(self) -> bool {
        matches!(self, Self::Control | Self::ControlWithContext)
    }
}

/// Control command ids (message type 5/7).
pub mod control {
    pub const CONVERT_CURRENT_OBJECT_TO_DOMAIN: u32 = 0;
    pub const COPY_FROM_CURRENT_DOMAIN: u32 = 1;
    pub const CLONE_CURRENT_OBJECT: u32 = 2;
    pub const QUERY_POINTER_BUFFER_SIZE: u32 = 3;
    pub const CLONE_CURRENT_OBJECT_EX: u32 = 4;
}

/// Request header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CmifInHeader {
    pub magic: u32,
    pub version: u32,
    pub command_id: u32,
    pub token: u32,
}

impl CmifInHeader {
    pub fn new(command_id: u32) -> Self {
        Self {
            magic: IN_HEADER_MAGIC,
            version: 0,
            command_id,
            token: 0,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, self.magic);
        put_u32(out, self.version);
        put_u32(out, self.command_id);
        put_u32(out, self.token);
    }

    fn decode(data: &[u8], cursor: &mut usize) -> Result<Self, ProtocolError> {
        let magic = decode_u32(data, cursor)?;
        if magic != IN_HEADER_MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }
        Ok(Self {
            magic,
            version: decode_u32(data, cursor)?,
            command_id: decode_u32(data, cursor)?,
            token: decode_u32(data, cursor)?,
        })
    }
}

/// Response header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CmifOutHeader {
    pub magic: u32,
    pub version: u32,
    pub result: ResultCode,
    pub token: u32,
}

impl CmifOutHeader {
    pub fn new(result: ResultCode) -> Self {
        Self {
            magic: OUT_HEADER_MAGIC,
            version: 0,
            result,
            token: 0,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, self.magic);
        put_u32(out, self.version);
        put_u32(out, self.result.raw());
        put_u32(out, self.token);
    }

    fn decode(data: &[u8], cursor: &mut usize) -> Result<Self, ProtocolError> {
        let magic = decode_u32(data, cursor)?;
        if magic != OUT_HEADER_MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }
        Ok(Self {
            magic,
            version: decode_u32(data, cursor)?,
            result: ResultCode::from_raw(decode_u32(data, cursor)?),
            token: decode_u32(data, cursor)?,
        })
    }
}

/// Slice of the data words where the CMIF frame starts.
fn frame(message: &HipcMessage) -> Result<&[u8], ProtocolError> {
    let padding = align_up(message.data_offset, DATA_ALIGNMENT) - message.data_offset;
    if message.data.len() < padding + HEADER_SIZE {
        return Err(ProtocolError::MissingCmifHeader(message.data.len()));
    }
    Ok(&message.data[padding..])
}

/// Build the data words for a frame: alignment padding, header, payload and
/// the trailing slack guest code always reserves.
fn build_data(data_offset: usize, header: impl FnOnce(&mut Vec<u8>), payload: &[u8]) -> Vec<u8> {
    let padding = align_up(data_offset, DATA_ALIGNMENT) - data_offset;
    let reserved = align_up(DATA_ALIGNMENT + HEADER_SIZE + payload.len(), 4);
    let mut data = Vec::with_capacity(reserved);
    data.resize(padding, 0);
    header(&mut data);
    data.extend_from_slice(payload);
    if data.len() < reserved {
        data.resize(reserved, 0);
    }
    data
}

// =============================================================================
// Requests
// =============================================================================

/// A parsed CMIF request (message type 4-7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CmifRequest {
    pub command_type: CommandType,
    pub header: CmifInHeader,
    /// Raw argument bytes following the header, including trailing slack.
    pub payload: Vec<u8>,
    /// The HIPC envelope carrying handles and buffer descriptors.
    pub message: HipcMessage,
}

impl CmifRequest {
    /// Interpret an already decoded HIPC message as a CMIF request.
    pub fn from_message(
        command_type: CommandType,
        message: HipcMessage,
    ) -> Result<Self, ProtocolError> {
        let frame = frame(&message)?;
        let mut cursor = 0;
        let header = CmifInHeader::decode(frame, &mut cursor)?;
        let payload = frame[cursor..].to_vec();
        Ok(Self {
            command_type,
            header,
            payload,
            message,
        })
    }

    /// Decode a full message buffer.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        let message = HipcMessage::decode(buf)?;
        let command_type =
            CommandType::from_u16(message.message_type).unwrap_or(CommandType::Invalid);
        Self::from_message(command_type, message)
    }

    pub fn command_id(&self) -> u32 {
        self.header.command_id
    }
}

/// Builds request message buffers the way guest client code lays them out.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    command_id: u32,
    payload: Vec<u8>,
    message: HipcMessage,
}

impl RequestBuilder {
    /// A plain request (type 4).
    pub fn new(command_id: u32) -> Self {
        Self::with_type(CommandType::Request, command_id)
    }

    /// A control request (type 5).
    pub fn control(command_id: u32) -> Self {
        Self::with_type(CommandType::Control, command_id)
    }

    pub fn with_type(command_type: CommandType, command_id: u32) -> Self {
        Self {
            command_id,
            payload: Vec::new(),
            message: HipcMessage {
                message_type: command_type as u16,
                ..Default::default()
            },
        }
    }

    /// A close request (type 2). Carries no CMIF frame.
    pub fn close() -> Vec<u8> {
        let message = HipcMessage {
            message_type: CommandType::Close as u16,
            ..Default::default()
        };
        // Two header words always fit the buffer.
        message.encode().unwrap_or_default()
    }

    pub fn send_pid(mut self) -> Self {
        self.message.pid = Some(0);
        self
    }

    pub fn copy_handle(mut self, handle: u32) -> Self {
        self.message.copy_handles.push(handle);
        self
    }

    pub fn move_handle(mut self, handle: u32) -> Self {
        self.message.move_handles.push(handle);
        self
    }

    pub fn send_static(mut self, index: u8, address: u64, size: u16) -> Self {
        self.message.send_statics.push(StaticDescriptor {
            index,
            address,
            size,
        });
        self
    }

    pub fn send_buffer(mut self, address: u64, size: u64) -> Self {
        self.message.send_buffers.push(mapped(address, size));
        self
    }

    pub fn recv_buffer(mut self, address: u64, size: u64) -> Self {
        self.message.recv_buffers.push(mapped(address, size));
        self
    }

    pub fn exch_buffer(mut self, address: u64, size: u64) -> Self {
        self.message.exch_buffers.push(mapped(address, size));
        self
    }

    pub fn recv_static(mut self, address: u64, size: u16) -> Self {
        self.message.recv_list.push(RecvListEntry { address, size });
        self
    }

    pub fn arg_u32(mut self, value: u32) -> Self {
        self.payload.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn arg_u64(mut self, value: u64) -> Self {
        self.payload.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn arg_bytes(mut self, bytes: &[u8]) -> Self {
        self.payload.extend_from_slice(bytes);
        self
    }

    /// Produce the HIPC message with its CMIF frame in place.
    pub fn build(self) -> HipcMessage {
        let mut message = self.message;
        message.data_offset = message.compute_data_offset();
        let header = CmifInHeader::new(self.command_id);
        message.data = build_data(message.data_offset, |out| header.encode(out), &self.payload);
        message
    }

    /// Encode straight to a message buffer image.
    pub fn encode(self) -> Result<Vec<u8>, ProtocolError> {
        self.build().encode()
    }
}

fn mapped(address: u64, size: u64) -> BufferDescriptor {
    BufferDescriptor {
        address,
        size,
        mode: BufferMode::Normal,
    }
}

// =============================================================================
// Responses
// =============================================================================

/// A parsed CMIF response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CmifResponse {
    pub result: ResultCode,
    pub payload: Vec<u8>,
    pub copy_handles: Vec<u32>,
    pub move_handles: Vec<u32>,
    /// Sizes written into receive-list entries.
    pub send_statics: Vec<StaticDescriptor>,
}

impl CmifResponse {
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        let message = HipcMessage::decode(buf)?;
        let frame = frame(&message)?;
        let mut cursor = 0;
        let header = CmifOutHeader::decode(frame, &mut cursor)?;
        Ok(Self {
            result: header.result,
            payload: frame[cursor..].to_vec(),
            copy_handles: message.copy_handles,
            move_handles: message.move_handles,
            send_statics: message.send_statics,
        })
    }

    /// Read a little-endian `u32` output field at `offset` in the payload.
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.payload.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian `u64` output field at `offset` in the payload.
    pub fn read_u64(&self, offset: usize) -> Option<u64> {
        let low = self.read_u32(offset)? as u64;
        let high = self.read_u32(offset + 4)? as u64;
        Some(low | (high << 32))
    }
}

/// Builds response message buffers written back by the dispatcher.
#[derive(Clone, Debug, Default)]
pub struct ResponseBuilder {
    result: ResultCode,
    payload: Vec<u8>,
    copy_handles: Vec<u32>,
    move_handles: Vec<u32>,
    send_statics: Vec<StaticDescriptor>,
}

impl ResponseBuilder {
    pub fn new(result: ResultCode) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn copy_handles(mut self, handles: Vec<u32>) -> Self {
        self.copy_handles = handles;
        self
    }

    pub fn move_handles(mut self, handles: Vec<u32>) -> Self {
        self.move_handles = handles;
        self
    }

    pub fn send_statics(mut self, statics: Vec<StaticDescriptor>) -> Self {
        self.send_statics = statics;
        self
    }

    pub fn encode(self) -> Result<Vec<u8>, ProtocolError> {
        let mut message = HipcMessage {
            message_type: 0,
            copy_handles: self.copy_handles,
            move_handles: self.move_handles,
            send_statics: self.send_statics,
            ..Default::default()
        };
        message.data_offset = message.compute_data_offset();
        let header = CmifOutHeader::new(self.result);
        message.data = build_data(message.data_offset, |out| header.encode(out), &self.payload);
        message.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_request_roundtrip_preserves_command_and_buffers() {
        let bytes = RequestBuilder::new(0x1234)
            .send_buffer(0x1000_0000, 0x40)
            .recv_buffer(0x1000_1000, 0x80)
            .exch_buffer(0x1000_2000, 0x10)
            .send_static(0, 0x2000_0000, 0x20)
            .recv_static(0x3000_0000, 0x100)
            .arg_u32(7)
            .encode()
            .unwrap();

        let request = CmifRequest::parse(&bytes).unwrap();
        assert_eq!(request.command_type, CommandType::Request);
        assert_eq!(request.command_id(), 0x1234);
        assert_eq!(request.message.send_buffers, vec![mapped(0x1000_0000, 0x40)]);
        assert_eq!(request.message.recv_buffers, vec![mapped(0x1000_1000, 0x80)]);
        assert_eq!(request.message.exch_buffers, vec![mapped(0x1000_2000, 0x10)]);
        assert_eq!(
            request.message.send_statics,
            vec![StaticDescriptor {
                index: 0,
                address: 0x2000_0000,
                size: 0x20
            }]
        );
        assert_eq!(
            request.message.recv_list,
            vec![RecvListEntry {
                address: 0x3000_0000,
                size: 0x100
            }]
        );
        assert_eq!(&request.payload[..4], &7u32.to_le_bytes());
    }

    #[test]
    fn test_frame_is_sixteen_byte_aligned() {
        // Header, special header and one handle end exactly on 16 bytes.
        let bytes = RequestBuilder::new(1).copy_handle(0x8001).encode().unwrap();
        let message = HipcMessage::decode(&bytes).unwrap();
        assert_eq!(message.data_offset, 16);

        let bytes = RequestBuilder::new(1)
            .copy_handle(0x8001)
            .copy_handle(0x8002)
            .encode()
            .unwrap();
        let message = HipcMessage::decode(&bytes).unwrap();
        assert_eq!(message.data_offset, 20);
        let magic_at = 32;
        assert_eq!(
            u32::from_le_bytes([
                bytes[magic_at],
                bytes[magic_at + 1],
                bytes[magic_at + 2],
                bytes[magic_at + 3]
            ]),
            IN_HEADER_MAGIC
        );
    }

    #[test]
    fn test_request_rejects_bad_magic() {
        let mut message = RequestBuilder::new(3).build();
        let padding = align_up(message.data_offset, DATA_ALIGNMENT) - message.data_offset;
        message.data[padding] ^= 0xFF;
        let bytes = message.encode().unwrap();
        assert!(matches!(
            CmifRequest::parse(&bytes),
            Err(ProtocolError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_response_roundtrip() {
        let bytes = ResponseBuilder::new(ResultCode::new(21, 4))
            .payload(vec![1, 2, 3, 4, 5, 6, 7, 8])
            .move_handles(vec![0x10003])
            .encode()
            .unwrap();
        let response = CmifResponse::parse(&bytes).unwrap();
        assert_eq!(response.result.raw(), 0x815);
        assert_eq!(response.move_handles, vec![0x10003]);
        assert_eq!(response.read_u64(0), Some(0x0807_0605_0403_0201));
    }

    #[test]
    fn test_close_request_has_no_frame() {
        let bytes = RequestBuilder::close();
        let message = HipcMessage::decode(&bytes).unwrap();
        assert_eq!(message.message_type, CommandType::Close as u16);
        assert!(message.data.is_empty());
    }

    #[test]
    fn test_command_type_classification() {
        assert!(CommandType::RequestWithContext.is_request());
        assert!(CommandType::Control.is_control());
        assert!(!CommandType::Close.is_request());
        assert_eq!(CommandType::from_u16(8), None);
    }
}
