//! Command, field and data type identifiers
//!
//! All three are closed enumerations. Anything outside them is a protocol error.

/// Command identifier carried in the `command` field (and reused as the
/// `event_code` of event frames)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Server -> client
    Answer = 0x01,
    Event = 0x02,
    QueryItem = 0x03,

    // Client -> server
    Ping = 0x10,
    Open = 0x11,
    Create = 0x12,
    Close = 0x13,
    Set = 0x14,
    Insert = 0x15,
    Delete = 0x16,
    PushBack = 0x17,
    PushFront = 0x18,
    PopBack = 0x19,
    PopFront = 0x1A,
    Clear = 0x1B,
    Count = 0x1C,
    Get = 0x1D,
    Subscribe = 0x1E,
    Unsubscribe = 0x1F,
    Query = 0x20,
    WaitAndPopNext = 0x21,
    WaitAndPopKey = 0x22,

    // Event-only code
    SnapshotEnd = 0x23,

    PropGet = 0x30,
    PropSet = 0x31,
    GroupAdd = 0x33,
    GroupSubscribe = 0x34,
    NewGroupContainer = 0x35,
}

impl Command {
    const ALL: [Command; 28] = [
        Command::Answer,
        Command::Event,
        Command::QueryItem,
        Command::Ping,
        Command::Open,
        Command::Create,
        Command::Close,
        Command::Set,
        Command::Insert,
        Command::Delete,
        Command::PushBack,
        Command::PushFront,
        Command::PopBack,
        Command::PopFront,
        Command::Clear,
        Command::Count,
        Command::Get,
        Command::Subscribe,
        Command::Unsubscribe,
        Command::Query,
        Command::WaitAndPopNext,
        Command::WaitAndPopKey,
        Command::SnapshotEnd,
        Command::PropGet,
        Command::PropSet,
        Command::GroupAdd,
        Command::GroupSubscribe,
        Command::NewGroupContainer,
    ];

    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| *c as i32 == value)
    }

    /// Lower-case name used in text-mode events and logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Answer => "answer",
            Command::Event => "event",
            Command::QueryItem => "query_item",
            Command::Ping => "ping",
            Command::Open => "open",
            Command::Create => "create",
            Command::Close => "close",
            Command::Set => "set",
            Command::Insert => "insert",
            Command::Delete => "delete",
            Command::PushBack => "push_back",
            Command::PushFront => "push_front",
            Command::PopBack => "pop_back",
            Command::PopFront => "pop_front",
            Command::Clear => "clear",
            Command::Count => "count",
            Command::Get => "get",
            Command::Subscribe => "subscribe",
            Command::Unsubscribe => "unsubscribe",
            Command::Query => "query",
            Command::WaitAndPopNext => "wait_and_pop_next",
            Command::WaitAndPopKey => "wait_and_pop_key",
            Command::SnapshotEnd => "snapshot_end",
            Command::PropGet => "propget",
            Command::PropSet => "propset",
            Command::GroupAdd => "group_add",
            Command::GroupSubscribe => "group_subscribe",
            Command::NewGroupContainer => "new_group_container",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }
}

/// Identifier of a field inside a frame
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldId {
    Command = 1,
    Handle = 2,
    Key = 3,
    Value = 4,
    Metadata = 5,
    Name = 6,
    Type = 7,
    ErrorCode = 8,
    ErrorDesc = 9,
    EventCode = 10,
    StartRecord = 11,
    End = 12,
    QueryId = 13,
    GroupName = 14,
    ContainerType = 15,
    ContainerName = 16,
    QueryExpression = 17,
}

impl FieldId {
    pub fn from_u16(value: u16) -> Option<Self> {
        let id = match value {
            1 => FieldId::Command,
            2 => FieldId::Handle,
            3 => FieldId::Key,
            4 => FieldId::Value,
            5 => FieldId::Metadata,
            6 => FieldId::Name,
            7 => FieldId::Type,
            8 => FieldId::ErrorCode,
            9 => FieldId::ErrorDesc,
            10 => FieldId::EventCode,
            11 => FieldId::StartRecord,
            12 => FieldId::End,
            13 => FieldId::QueryId,
            14 => FieldId::GroupName,
            15 => FieldId::ContainerType,
            16 => FieldId::ContainerName,
            17 => FieldId::QueryExpression,
            _ => return None,
        };
        Some(id)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldId::Command => "command",
            FieldId::Handle => "handle",
            FieldId::Key => "key",
            FieldId::Value => "value",
            FieldId::Metadata => "metadata",
            FieldId::Name => "name",
            FieldId::Type => "type",
            FieldId::ErrorCode => "error_code",
            FieldId::ErrorDesc => "error_desc",
            FieldId::EventCode => "event_code",
            FieldId::StartRecord => "start_record",
            FieldId::End => "end",
            FieldId::QueryId => "query_id",
            FieldId::GroupName => "group_name",
            FieldId::ContainerType => "container_type",
            FieldId::ContainerName => "container_name",
            FieldId::QueryExpression => "query_expression",
        }
    }
}

/// Type tag of a field payload
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    None = 1,
    String = 2,
    Int = 3,
    Double = 4,
}

impl DataType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(DataType::None),
            2 => Some(DataType::String),
            3 => Some(DataType::Int),
            4 => Some(DataType::Double),
            _ => None,
        }
    }

    /// Name used in text-mode field triplets
    pub fn name(&self) -> &'static str {
        match self {
            DataType::None => "none",
            DataType::String => "string",
            DataType::Int => "int",
            DataType::Double => "double",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(DataType::None),
            "string" => Some(DataType::String),
            "int" => Some(DataType::Int),
            "double" => Some(DataType::Double),
            _ => None,
        }
    }
}
