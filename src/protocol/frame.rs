//! Frame model
//!
//! A [`Frame`] is an ordered list of typed [`Field`]s. The command is just
//! another field (`FieldId::Command`), which is why a frame can be well formed
//! and still lack one.

use std::fmt;

use crate::error::{ErrorCode, Result, TesseraError};
use super::command::{Command, DataType, FieldId};

/// A single typed value carried by a field
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Data {
    #[default]
    None,
    /// Raw bytes, no terminator
    String(Vec<u8>),
    Int(i32),
    Double(f64),
}

impl Data {
    pub fn data_type(&self) -> DataType {
        match self {
            Data::None => DataType::None,
            Data::String(_) => DataType::String,
            Data::Int(_) => DataType::Int,
            Data::Double(_) => DataType::Double,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Data::None)
    }

    /// Size of the payload once encoded in a binary field
    pub fn encoded_len(&self) -> usize {
        match self {
            Data::None => 0,
            Data::String(s) => s.len(),
            Data::Int(_) => 4,
            Data::Double(_) => 8,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Data::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    /// String payload as text (lossy for non UTF-8 bytes)
    pub fn as_string(&self) -> Option<String> {
        self.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Textual rendering of any variant; `None` renders as an empty string
    pub fn to_text(&self) -> String {
        match self {
            Data::None => String::new(),
            Data::String(s) => String::from_utf8_lossy(s).into_owned(),
            Data::Int(v) => v.to_string(),
            Data::Double(v) => v.to_string(),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::None => write!(f, "(none)"),
            _ => write!(f, "{}", self.to_text()),
        }
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::String(s.as_bytes().to_vec())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::String(s.into_bytes())
    }
}

impl From<&String> for Data {
    fn from(s: &String) -> Self {
        Data::String(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Data {
    fn from(b: Vec<u8>) -> Self {
        Data::String(b)
    }
}

impl From<i32> for Data {
    fn from(v: i32) -> Self {
        Data::Int(v)
    }
}

impl From<f64> for Data {
    fn from(v: f64) -> Self {
        Data::Double(v)
    }
}

impl<T: Into<Data>> From<Option<T>> for Data {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Data::None)
    }
}

/// One field of a frame
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: FieldId,
    pub data: Data,
}

/// One binary protocol message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    /// Free-running sequence number for diagnostics, not interpreted
    pub debug_seq: u16,
    pub fields: Vec<Field>,
}

impl Frame {
    /// Empty frame without a command field
    pub fn empty() -> Self {
        Self::default()
    }

    /// Frame whose first field is the given command
    pub fn new(command: Command) -> Self {
        Self::empty().with(FieldId::Command, command as i32)
    }

    /// Plain success answer
    pub fn answer() -> Self {
        Self::new(Command::Answer)
    }

    /// Error answer with code and description
    pub fn error_answer(code: ErrorCode, description: &str) -> Self {
        Self::answer()
            .with(FieldId::ErrorCode, code as i32)
            .with(FieldId::ErrorDesc, description)
    }

    /// Builder-style field append
    pub fn with(mut self, id: FieldId, data: impl Into<Data>) -> Self {
        self.push(id, data);
        self
    }

    /// Append a field unless the data is `None`
    pub fn with_present(mut self, id: FieldId, data: &Data) -> Self {
        if !data.is_none() {
            self.push(id, data.clone());
        }
        self
    }

    pub fn push(&mut self, id: FieldId, data: impl Into<Data>) {
        self.fields.push(Field { id, data: data.into() });
    }

    /// First field with the given id
    pub fn get(&self, id: FieldId) -> Option<&Data> {
        self.fields.iter().find(|f| f.id == id).map(|f| &f.data)
    }

    /// Field value, or `Data::None` when absent
    pub fn data(&self, id: FieldId) -> Data {
        self.get(id).cloned().unwrap_or_default()
    }

    pub fn int(&self, id: FieldId) -> Option<i32> {
        self.get(id).and_then(Data::as_int)
    }

    pub fn string(&self, id: FieldId) -> Option<String> {
        self.get(id).and_then(Data::as_string)
    }

    /// Raw value of the command field
    pub fn command_id(&self) -> Option<i32> {
        self.int(FieldId::Command)
    }

    pub fn command(&self) -> Option<Command> {
        self.command_id().and_then(Command::from_i32)
    }

    pub fn is_command(&self, command: Command) -> bool {
        self.command() == Some(command)
    }

    /// Required int field
    pub fn require_int(&self, id: FieldId) -> Result<i32> {
        self.int(id)
            .ok_or_else(|| TesseraError::MissingParameter(format!("{} (int) expected", id.name())))
    }

    /// Required string field
    pub fn require_string(&self, id: FieldId) -> Result<String> {
        self.string(id)
            .ok_or_else(|| TesseraError::MissingParameter(format!("{} (string) expected", id.name())))
    }

    /// Returns the error carried by an answer frame, if any
    pub fn answer_error(&self) -> Option<TesseraError> {
        let code = self.int(FieldId::ErrorCode)?;
        if code == ErrorCode::Success as i32 {
            return None;
        }
        let description = self
            .string(FieldId::ErrorDesc)
            .unwrap_or_else(|| ErrorCode::from_i32(code).as_str().to_string());
        Some(TesseraError::Remote {
            code: ErrorCode::from_i32(code),
            description,
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match (field.id, &field.data) {
                (FieldId::Command, Data::Int(c)) | (FieldId::EventCode, Data::Int(c)) => {
                    match Command::from_i32(*c) {
                        Some(cmd) => write!(f, "{}={}", field.id.name(), cmd.name())?,
                        None => write!(f, "{}={}", field.id.name(), c)?,
                    }
                }
                (id, data) => write!(f, "{}={}", id.name(), data)?,
            }
        }
        write!(f, "]")
    }
}
