// ABOUTME: Protobuf wire primitives: varint, zigzag, fixed-width and field-header codecs.
// ABOUTME: Pure functions over a slice cursor for reads and a byte buffer for writes.

use crate::error::{Error, Result, WireContext};

/// The low-level encoding category of a field's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    /// Base-128 varint payload.
    Varint = 0,
    /// 8-byte little-endian payload.
    Fixed64 = 1,
    /// `varint(length) ++ bytes` payload (strings, bytes, sub-messages).
    LengthDelimited = 2,
    /// Start of a group-framed sub-item.
    StartGroup = 3,
    /// End of a group-framed sub-item.
    EndGroup = 4,
    /// 4-byte little-endian payload.
    Fixed32 = 5,
}

impl WireType {
    /// Decode the low three bits of a field header.
    pub fn from_raw(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::Fixed32),
            _ => Err(Error::UnsupportedWireType {
                raw,
                context: WireContext::default(),
            }),
        }
    }
}

/// Maximum encoded size of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode a base-128 varint into `buf`.
#[inline]
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Encode a varint into a fixed scratch array, returning the byte count.
#[inline]
pub fn encode_varint(mut value: u64, scratch: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut n = 0;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            scratch[n] = byte;
            return n + 1;
        }
        scratch[n] = byte | 0x80;
        n += 1;
    }
}

/// Number of bytes `value` occupies as a varint.
#[inline]
#[must_use]
pub fn varint_len(value: u64) -> usize {
    // 1 + floor(bits / 7); a zero value still takes one byte.
    (((64 - (value | 1).leading_zeros() as usize) + 6) / 7).max(1)
}

/// Decode a base-128 varint at `*pos`, advancing the cursor.
///
/// Fails with [`Error::MalformedVarint`] if more than 10 continuation bytes
/// are present and with [`Error::TruncatedOrCorrupt`] if input runs out.
#[inline]
pub fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let start = *pos;
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let Some(&byte) = data.get(*pos) else {
            return Err(Error::TruncatedOrCorrupt(offset_context(start)));
        };
        *pos += 1;
        if shift == 63 && byte > 1 {
            // 10th byte may only contribute the final bit.
            return Err(Error::MalformedVarint(offset_context(start)));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(Error::MalformedVarint(offset_context(start)));
        }
    }
}

/// Decode a varint that must fit a 32-bit target.
#[inline]
pub fn read_varint32(data: &[u8], pos: &mut usize) -> Result<u32> {
    let start = *pos;
    let value = read_varint(data, pos)?;
    u32::try_from(value).map_err(|_| Error::MalformedVarint(offset_context(start)))
}

/// Zigzag-encode a signed 32-bit value.
#[inline]
#[must_use]
pub fn zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Zigzag-encode a signed 64-bit value.
#[inline]
#[must_use]
pub fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Reverse of [`zigzag32`].
#[inline]
#[must_use]
pub fn unzigzag32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Reverse of [`zigzag64`].
#[inline]
#[must_use]
pub fn unzigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Write a 4-byte little-endian payload.
#[inline]
pub fn write_fixed32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Write an 8-byte little-endian payload.
#[inline]
pub fn write_fixed64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Read a 4-byte little-endian payload.
#[inline]
pub fn read_fixed32(data: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = take(data, pos, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read an 8-byte little-endian payload.
#[inline]
pub fn read_fixed64(data: &[u8], pos: &mut usize) -> Result<u64> {
    let bytes = take(data, pos, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

/// Take exactly `n` bytes from the cursor.
#[inline]
pub fn take<'a>(data: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    let end = pos.checked_add(n).filter(|&e| e <= data.len());
    let Some(end) = end else {
        return Err(Error::TruncatedOrCorrupt(offset_context(*pos)));
    };
    let bytes = &data[*pos..end];
    *pos = end;
    Ok(bytes)
}

/// Combine a field number and wire type into a field-header tag.
#[inline]
#[must_use]
pub fn make_tag(field: u32, wire: WireType) -> u32 {
    (field << 3) | wire as u32
}

/// Split a field-header tag into field number and wire type.
#[inline]
pub fn split_tag(tag: u32) -> Result<(u32, WireType)> {
    let wire = WireType::from_raw((tag & 0x7) as u8)?;
    Ok((tag >> 3, wire))
}

/// Write a field header for `(field, wire)`.
#[inline]
pub fn write_header(buf: &mut Vec<u8>, field: u32, wire: WireType) {
    write_varint(buf, u64::from(make_tag(field, wire)));
}

#[inline]
fn offset_context(offset: usize) -> WireContext {
    WireContext {
        offset,
        ..WireContext::default()
    }
}
