//! Text protocol
//!
//! Line oriented protocol for interactive (telnet style) clients.
//!
//! ## Command Line
//! ```text
//! <command> [param ...]\r\n
//! ```
//! Parameters are separated by spaces or commas. Commands that carry record
//! data end with one or more field triplets announcing a data block:
//! ```text
//! set 1 key string 3 value string 5\r\n
//! foo\r\n
//! hello\r\n
//! ```
//! The data block holds each field's bytes followed by `\r\n`, in the order
//! the triplets were given.
//!
//! ## Answers
//! ```text
//! answer ok [word ...]\r\n
//! answer error <description>\r\n
//! answer ok data key string 3 value string 5\r\n<data block>
//! event <handle> <event> [triplets]\r\n<data block>
//! query <id> item [triplets]\r\n<data block>
//! ```

use crate::error::{Result, TesseraError};
use super::codec::MAX_PAYLOAD_SIZE;
use super::command::{DataType, FieldId};
use super::frame::Data;

/// Line terminator written after every answer line and data block entry
pub const CRLF: &str = "\r\n";

/// Maximum length of a command line
pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// Largest data block a command may announce, shared with the binary frame limit
pub const MAX_DATA_BLOCK_SIZE: usize = MAX_PAYLOAD_SIZE as usize;

/// One tokenized command line
#[derive(Debug, Clone, PartialEq)]
pub struct TextCommand {
    pub name: String,
    pub params: Vec<String>,
}

impl TextCommand {
    /// Tokenize a line. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line
            .trim_end_matches(['\r', '\n'])
            .split([' ', ',', '\t'])
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let name = tokens.next()?;
        Some(Self {
            name,
            params: tokens.collect(),
        })
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Parameter parsed as a handle
    pub fn handle(&self) -> Result<i32> {
        self.param(0)
            .ok_or_else(|| TesseraError::MissingParameter("handle expected".to_string()))?
            .parse()
            .map_err(|_| TesseraError::Protocol("invalid handle".to_string()))
    }

    pub fn require_param(&self, index: usize, what: &str) -> Result<&str> {
        self.param(index)
            .ok_or_else(|| TesseraError::MissingParameter(format!("{} expected", what)))
    }
}

// =============================================================================
// Field Sets
// =============================================================================

/// Announcement of one field inside a data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub id: FieldId,
    pub data_type: DataType,
    pub size: usize,
}

/// Record fields extracted from a data block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFields {
    pub key: Data,
    pub value: Data,
    pub metadata: Data,
}

/// Parse `<field> <type> <size>` triplets
pub fn parse_field_specs(params: &[String]) -> Result<Vec<FieldSpec>> {
    if params.len() % 3 != 0 {
        return Err(TesseraError::Protocol(
            "field set must be made of <field> <type> <size> triplets".to_string(),
        ));
    }

    params
        .chunks(3)
        .map(|triplet| {
            let id = match triplet[0].as_str() {
                "key" => FieldId::Key,
                "value" => FieldId::Value,
                "metadata" => FieldId::Metadata,
                other => {
                    return Err(TesseraError::Protocol(format!("invalid field name {}", other)))
                }
            };
            let data_type = DataType::from_name(&triplet[1]).ok_or_else(|| {
                TesseraError::Protocol(format!("invalid data type {}", triplet[1]))
            })?;
            let size: usize = triplet[2]
                .parse()
                .map_err(|_| TesseraError::Protocol(format!("invalid field size {}", triplet[2])))?;
            if size > MAX_DATA_BLOCK_SIZE {
                return Err(block_too_large());
            }
            Ok(FieldSpec { id, data_type, size })
        })
        .collect()
}

/// Total number of data block bytes announced by the specs
pub fn data_block_size(specs: &[FieldSpec]) -> Result<usize> {
    let total = specs.iter().try_fold(0usize, |total, spec| {
        total.checked_add(spec.size)?.checked_add(CRLF.len())
    });
    match total {
        Some(total) if total <= MAX_DATA_BLOCK_SIZE => Ok(total),
        _ => Err(block_too_large()),
    }
}

fn block_too_large() -> TesseraError {
    TesseraError::Protocol("data block too large".to_string())
}

/// Split a complete data block into record fields
pub fn decode_data_block(specs: &[FieldSpec], block: &[u8]) -> Result<RecordFields> {
    let mut fields = RecordFields::default();
    let mut offset = 0;

    for spec in specs {
        let end = offset + spec.size;
        if block.len() < end + CRLF.len() {
            return Err(TesseraError::Protocol("data block shorter than announced".to_string()));
        }
        if &block[end..end + CRLF.len()] != CRLF.as_bytes() {
            return Err(TesseraError::Protocol(format!(
                "{} data not terminated by CRLF",
                spec.id.name()
            )));
        }

        let raw = &block[offset..end];
        let data = parse_typed(spec.data_type, raw)?;
        offset = end + CRLF.len();

        match spec.id {
            FieldId::Key => fields.key = data,
            FieldId::Value => fields.value = data,
            _ => fields.metadata = data,
        }
    }

    Ok(fields)
}

fn parse_typed(data_type: DataType, raw: &[u8]) -> Result<Data> {
    let text = || String::from_utf8_lossy(raw).trim().to_string();
    match data_type {
        DataType::None => Ok(Data::None),
        DataType::String => Ok(Data::String(raw.to_vec())),
        DataType::Int => text()
            .parse()
            .map(Data::Int)
            .map_err(|_| TesseraError::Protocol(format!("invalid int {}", text()))),
        DataType::Double => text()
            .parse()
            .map(Data::Double)
            .map_err(|_| TesseraError::Protocol(format!("invalid double {}", text()))),
    }
}

/// Interpret a bare parameter the way the text protocol does: numbers become
/// ints, everything else is a string
pub fn param_to_data(param: &str) -> Data {
    match param.parse::<i32>() {
        Ok(v) => Data::Int(v),
        Err(_) => Data::from(param),
    }
}

// =============================================================================
// Answer Formatting
// =============================================================================

/// `answer ok[ words]`
pub fn answer_ok(words: &[&str]) -> Vec<u8> {
    let mut line = String::from("answer ok");
    for word in words {
        line.push(' ');
        line.push_str(word);
    }
    line.push_str(CRLF);
    line.into_bytes()
}

/// `answer error <description>`
pub fn answer_error(description: &str) -> Vec<u8> {
    format!("answer error {}{}", description.replace(['\r', '\n'], " "), CRLF).into_bytes()
}

/// `answer ok data <triplets>` + data block
pub fn answer_data(key: &Data, value: &Data, metadata: &Data) -> Vec<u8> {
    with_fields("answer ok data".to_string(), key, value, metadata)
}

/// `event <handle> <event> [triplets]` + data block
pub fn event(handle: i32, event_name: &str, key: &Data, value: &Data, metadata: &Data) -> Vec<u8> {
    with_fields(format!("event {} {}", handle, event_name), key, value, metadata)
}

/// `answer ok query <id>`
pub fn query_start(query_id: u32) -> Vec<u8> {
    answer_ok(&["query", &query_id.to_string()])
}

/// `query <id> item [triplets]` + data block
pub fn query_item(query_id: u32, key: &Data, value: &Data, metadata: &Data) -> Vec<u8> {
    with_fields(format!("query {} item", query_id), key, value, metadata)
}

/// `query <id> end`
pub fn query_end(query_id: u32) -> Vec<u8> {
    format!("query {} end{}", query_id, CRLF).into_bytes()
}

fn with_fields(mut line: String, key: &Data, value: &Data, metadata: &Data) -> Vec<u8> {
    let mut block = Vec::new();

    for (name, data) in [("key", key), ("value", value), ("metadata", metadata)] {
        if data.is_none() {
            continue;
        }
        let raw = match data {
            Data::String(s) => s.clone(),
            other => other.to_text().into_bytes(),
        };
        line.push_str(&format!(" {} {} {}", name, data.data_type().name(), raw.len()));
        block.extend_from_slice(&raw);
        block.extend_from_slice(CRLF.as_bytes());
    }

    line.push_str(CRLF);
    let mut out = line.into_bytes();
    out.extend_from_slice(&block);
    out
}
