//! Little-endian cursor helpers shared by the HIPC and CMIF codecs.

use alloc::vec::Vec;

use crate::error::ProtocolError;

pub(crate) fn decode_u32(data: &[u8], cursor: &mut usize) -> Result<u32, ProtocolError> {
    let bytes = take(data, cursor, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn decode_u64(data: &[u8], cursor: &mut usize) -> Result<u64, ProtocolError> {
    let low = decode_u32(data, cursor)? as u64;
    let high = decode_u32(data, cursor)? as u64;
    Ok(low | (high << 32))
}

pub(crate) fn take<'a>(
    data: &'a [u8],
    cursor: &mut usize,
    len: usize,
) -> Result<&'a [u8], ProtocolError> {
    let end = cursor.checked_add(len).filter(|end| *end <= data.len());
    match end {
        Some(end) => {
            let slice = &data[*cursor..end];
            *cursor = end;
            Ok(slice)
        }
        None => Err(ProtocolError::Truncated {
            offset: *cursor,
            needed: len,
            available: data.len(),
        }),
    }
}

pub(crate) fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
