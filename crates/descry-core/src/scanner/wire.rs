//! Low-level protobuf wire format parsing.
//!
//! This module implements the wire format arithmetic needed to walk
//! serialized descriptor records byte by byte.
//!
//! ## Wire Format Overview
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (strings, bytes, embedded messages, packed repeated fields)
//! - 5: I32 (fixed32, sfixed32, float)

use crate::error::{Error, Result};

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// Start group (deprecated)
    StartGroup = 3,
    /// End group (deprecated)
    EndGroup = 4,
    /// 32-bit fixed-width
    I32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::I32),
            _ => Err(Error::invalid_wire_format(
                0,
                format!("unknown wire type: {}", value),
            )),
        }
    }
}

/// Decode a varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= 10 {
            // Varints are at most 10 bytes for a 64-bit value
            return Err(Error::varint_decode(i));
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(Error::varint_decode(data.len()))
}

/// Compute how many bytes a field payload occupies.
///
/// `data` must start at the first byte after the field tag. Offsets in
/// returned errors are relative to the start of `data`.
pub fn payload_len(data: &[u8], wire_type: WireType) -> Result<usize> {
    match wire_type {
        WireType::Varint => {
            let (_, varint_len) = decode_varint(data)
                .map_err(|_| Error::invalid_wire_format(0, "failed to decode varint value"))?;
            Ok(varint_len)
        }
        WireType::I64 => {
            if data.len() < 8 {
                return Err(Error::invalid_wire_format(0, "not enough bytes for I64"));
            }
            Ok(8)
        }
        WireType::Len => {
            let (length, length_varint_len) = decode_varint(data)
                .map_err(|_| Error::invalid_wire_format(0, "failed to decode length prefix"))?;

            let total = length_varint_len + length as usize;
            if data.len() < total {
                return Err(Error::invalid_wire_format(
                    0,
                    format!(
                        "not enough bytes for LEN field (need {}, have {})",
                        length,
                        data.len() - length_varint_len
                    ),
                ));
            }
            Ok(total)
        }
        // Group markers carry no payload of their own
        WireType::StartGroup | WireType::EndGroup => Ok(0),
        WireType::I32 => {
            if data.len() < 4 {
                return Err(Error::invalid_wire_format(0, "not enough bytes for I32"));
            }
            Ok(4)
        }
    }
}
