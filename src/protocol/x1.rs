//! X1 text encoding
//!
//! A human readable dump of a list of values, used only for client trace
//! output and log replay tooling. Never sent on a live connection.
//!
//! ```text
//! X1 0003 C 0005S 0002I 0000X ␠ hello␠ 42␠
//!    └count  └size+type per field   └values, each followed by a space
//! ```
//! (shown with separators for readability; the real encoding has none before
//! the single space that precedes the values)

use std::io::Write as _;

use crate::error::{Result, TesseraError};
use super::frame::Data;

const MAGIC: &[u8] = b"X1";

/// `"X1"` + 4 hex digits + `"C"`
const SPEC_START: usize = 7;

/// 4 hex digits of size + 1 type letter
const SPEC_SIZE: usize = 5;

/// Largest value a four digit size can announce; longer values are cut
pub const MAX_X1_VALUE_SIZE: usize = 0xffff;

/// Encode values into the X1 format
///
/// String values are written as their raw bytes.
pub fn encode_x1<'a, I>(values: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Data>,
{
    let mut specs = Vec::new();
    let mut body = Vec::new();
    let mut count = 0usize;

    for value in values {
        count += 1;
        let (code, raw): (u8, Option<Vec<u8>>) = match value {
            Data::None => (b'X', None),
            Data::String(bytes) => (b'S', Some(bytes.clone())),
            Data::Int(_) => (b'I', Some(value.to_text().into_bytes())),
            Data::Double(_) => (b'D', Some(value.to_text().into_bytes())),
        };

        let raw = raw.map(|mut raw| {
            raw.truncate(MAX_X1_VALUE_SIZE);
            raw
        });
        let size = raw.as_ref().map(Vec::len).unwrap_or(0);
        let _ = write!(specs, "{:04x}", size);
        specs.push(code);

        if let Some(raw) = raw {
            body.extend_from_slice(&raw);
            body.push(b' ');
        }
    }

    let mut encoded = Vec::with_capacity(SPEC_START + specs.len() + 1 + body.len());
    encoded.extend_from_slice(MAGIC);
    let _ = write!(encoded, "{:04x}C", count.min(0xffff));
    encoded.extend_from_slice(&specs);
    encoded.push(b' ');
    encoded.extend_from_slice(&body);
    encoded
}

/// Decode an X1 buffer back into values
///
/// Int and double values are parsed back from their textual form.
pub fn decode_x1(encoded: &[u8]) -> Result<Vec<Data>> {
    if !encoded.starts_with(MAGIC) || encoded.len() < SPEC_START {
        return Err(TesseraError::Protocol("X1: missing header".to_string()));
    }

    let count = hex_at(encoded, 2)?;
    if encoded[6] != b'C' {
        return Err(TesseraError::Protocol("X1: malformed field count".to_string()));
    }

    // specs, then the single separating space
    let mut offset = SPEC_START + SPEC_SIZE * count + 1;
    if encoded.len() < offset {
        return Err(TesseraError::Protocol("X1: truncated field specs".to_string()));
    }

    let mut values = Vec::with_capacity(count);
    for index in 0..count {
        let spec = SPEC_START + SPEC_SIZE * index;
        let size = hex_at(encoded, spec)?;
        let code = encoded[spec + 4];

        if code == b'X' {
            values.push(Data::None);
            continue;
        }

        let raw = encoded.get(offset..offset + size).ok_or_else(|| {
            TesseraError::Protocol(format!("X1: field {} runs past the end", index))
        })?;
        offset += size + 1;

        let value = match code {
            b'S' => Data::String(raw.to_vec()),
            b'I' => Data::Int(number(raw, index, "an int")?),
            b'D' => Data::Double(number(raw, index, "a double")?),
            other => {
                return Err(TesseraError::Protocol(format!(
                    "X1: field {} has unknown type code {}",
                    index, other as char
                )))
            }
        };
        values.push(value);
    }

    Ok(values)
}

fn number<T: std::str::FromStr>(raw: &[u8], index: usize, what: &str) -> Result<T> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| {
            TesseraError::Protocol(format!(
                "X1: field {} is not {}: {}",
                index,
                what,
                String::from_utf8_lossy(raw)
            ))
        })
}

/// Four hex digits starting at `start`
fn hex_at(encoded: &[u8], start: usize) -> Result<usize> {
    let digits = encoded
        .get(start..start + 4)
        .ok_or_else(|| TesseraError::Protocol("X1: truncated hex number".to_string()))?;
    std::str::from_utf8(digits)
        .ok()
        .and_then(|digits| usize::from_str_radix(digits, 16).ok())
        .ok_or_else(|| {
            TesseraError::Protocol(format!(
                "X1: bad hex number {:?}",
                String::from_utf8_lossy(digits)
            ))
        })
}
