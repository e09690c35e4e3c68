//! Protocol codec
//!
//! Encoding and decoding functions for binary frames.
//!
//! ## Wire Format (all integers little-endian)
//!
//! ### Frame Header
//! ```text
//! ┌──────────────────┬────────────────┬────────────────┐
//! │ payload_size (4) │ field_count(2) │  debug_seq (2) │
//! └──────────────────┴────────────────┴────────────────┘
//! ```
//!
//! ### Field (repeated `field_count` times, `payload_size` bytes total)
//! ```text
//! ┌──────────────┬─────────────┬───────────────┬──────────────────┐
//! │ data_type(2) │ field_id(2) │ data_size (4) │ data (data_size) │
//! └──────────────┴─────────────┴───────────────┴──────────────────┘
//! ```
//!
//! A frame that fails any check is unrecoverable: the stream is considered
//! desynchronized and the connection must be dropped.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TesseraError};
use super::command::{DataType, FieldId};
use super::frame::{Data, Field, Frame};

/// Header size: 4 bytes payload size + 2 bytes field count + 2 bytes debug seq
pub const HEADER_SIZE: usize = 8;

/// Field header size: 2 bytes type + 2 bytes id + 4 bytes data size
pub const FIELD_HEADER_SIZE: usize = 8;

/// Maximum payload size (64 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_size: u32,
    pub field_count: u16,
    pub debug_seq: u16,
}

impl FrameHeader {
    /// Parse a header from the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(TesseraError::Protocol(format!(
                "Incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut buf = &bytes[..HEADER_SIZE];
        let header = Self {
            payload_size: buf.get_u32_le(),
            field_count: buf.get_u16_le(),
            debug_seq: buf.get_u16_le(),
        };

        if header.payload_size > MAX_PAYLOAD_SIZE {
            return Err(TesseraError::Protocol(format!(
                "Payload too large: {} bytes (max {})",
                header.payload_size, MAX_PAYLOAD_SIZE
            )));
        }

        Ok(header)
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a frame to bytes
pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
    let field_count = u16::try_from(frame.fields.len()).map_err(|_| {
        TesseraError::Protocol(format!("Too many fields: {}", frame.fields.len()))
    })?;

    let payload_size: usize = frame
        .fields
        .iter()
        .map(|f| FIELD_HEADER_SIZE + f.data.encoded_len())
        .sum();

    if payload_size > MAX_PAYLOAD_SIZE as usize {
        return Err(TesseraError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_size, MAX_PAYLOAD_SIZE
        )));
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload_size);
    buf.put_u32_le(payload_size as u32);
    buf.put_u16_le(field_count);
    buf.put_u16_le(frame.debug_seq);

    for field in &frame.fields {
        buf.put_u16_le(field.data.data_type() as u16);
        buf.put_u16_le(field.id as u16);
        buf.put_u32_le(field.data.encoded_len() as u32);
        match &field.data {
            Data::None => {}
            Data::String(s) => buf.put_slice(s),
            Data::Int(v) => buf.put_i32_le(*v),
            Data::Double(v) => buf.put_f64_le(*v),
        }
    }

    Ok(buf.freeze())
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a complete frame (header + payload) from bytes
///
/// The buffer must hold exactly one frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    let header = FrameHeader::parse(bytes)?;

    let remaining = bytes.len() - HEADER_SIZE;
    if remaining != header.payload_size as usize {
        return Err(TesseraError::Protocol(format!(
            "Payload size mismatch: header says {} bytes, got {}",
            header.payload_size, remaining
        )));
    }

    decode_payload(&header, &bytes[HEADER_SIZE..])
}

/// Decode the fields of a payload whose header was already read
pub fn decode_payload(header: &FrameHeader, payload: &[u8]) -> Result<Frame> {
    let mut buf = payload;
    let mut fields = Vec::with_capacity(header.field_count as usize);

    for index in 0..header.field_count {
        if buf.remaining() < FIELD_HEADER_SIZE {
            return Err(TesseraError::Protocol(format!(
                "Field {}: header truncated ({} bytes left)",
                index,
                buf.remaining()
            )));
        }

        let raw_type = buf.get_u16_le();
        let raw_id = buf.get_u16_le();
        let size = buf.get_u32_le() as usize;

        let id = FieldId::from_u16(raw_id).ok_or_else(|| {
            TesseraError::Protocol(format!("Field {}: invalid field id {}", index, raw_id))
        })?;
        let data_type = DataType::from_u16(raw_type).ok_or_else(|| {
            TesseraError::Protocol(format!("Field {}: invalid data type {}", index, raw_type))
        })?;

        if buf.remaining() < size {
            return Err(TesseraError::Protocol(format!(
                "Field {}: {} data bytes declared, only {} left in payload",
                index,
                size,
                buf.remaining()
            )));
        }

        let data = decode_data(data_type, &buf[..size]).map_err(|e| match e {
            TesseraError::Protocol(msg) => {
                TesseraError::Protocol(format!("Field {} ({}): {}", index, id.name(), msg))
            }
            other => other,
        })?;
        buf.advance(size);

        fields.push(Field { id, data });
    }

    if buf.has_remaining() {
        return Err(TesseraError::Protocol(format!(
            "Field sizes do not add up to payload size ({} trailing bytes)",
            buf.remaining()
        )));
    }

    Ok(Frame {
        debug_seq: header.debug_seq,
        fields,
    })
}

fn decode_data(data_type: DataType, mut raw: &[u8]) -> Result<Data> {
    let expected = match data_type {
        DataType::None => Some(0),
        DataType::String => None,
        DataType::Int => Some(4),
        DataType::Double => Some(8),
    };

    if let Some(len) = expected {
        if raw.len() != len {
            return Err(TesseraError::Protocol(format!(
                "{} payload must be {} bytes, got {}",
                data_type.name(),
                len,
                raw.len()
            )));
        }
    }

    let data = match data_type {
        DataType::None => Data::None,
        DataType::String => Data::String(raw.to_vec()),
        DataType::Int => Data::Int(raw.get_i32_le()),
        DataType::Double => Data::Double(raw.get_f64_le()),
    };
    Ok(data)
}

// =============================================================================
// Stream I/O
// =============================================================================

/// Read a frame from a reader
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf)?;
    let header = FrameHeader::parse(&header_buf)?;

    let mut payload = vec![0u8; header.payload_size as usize];
    reader.read_exact(&mut payload)?;

    decode_payload(&header, &payload)
}

/// Write a frame to a writer
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    let encoded = encode_frame(frame)?;
    writer.write_all(&encoded)?;
    writer.flush()?;
    Ok(())
}
