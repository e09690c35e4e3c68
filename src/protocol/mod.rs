//! Protocol Module
//!
//! Defines the wire protocols for client-server communication.
//!
//! ## Negotiation
//! Every connection starts in text mode. A first line of exactly
//! `protocol binary` switches it to binary mode; the server confirms with the
//! 12 bytes `going binary` (no terminator).
//!
//! ## Binary Frames
//! ```text
//! ┌──────────────────┬────────────────┬────────────────┐
//! │ payload_size (4) │ field_count(2) │  debug_seq (2) │  header
//! ├──────────────┬───┴─────────┬──────┴────────┬───────┴──────────┐
//! │ data_type(2) │ field_id(2) │ data_size (4) │ data (data_size) │  x field_count
//! └──────────────┴─────────────┴───────────────┴──────────────────┘
//! ```
//!
//! ### Data Types
//! - 1: NONE   - no data
//! - 2: STRING - raw bytes
//! - 3: INT    - i32, 4 bytes
//! - 4: DOUBLE - f64, 8 bytes
//!
//! ### Answers
//! Every request gets exactly one frame with `command=answer`; failures add
//! `error_code` and `error_desc`. Events and query items are separate frames
//! (`command=event`, `command=query_item`, `command=new_group_container`).

mod command;
mod frame;
mod codec;
pub mod text;
pub mod x1;

pub use command::{Command, DataType, FieldId};
pub use frame::{Data, Field, Frame};
pub use codec::{
    decode_frame, decode_payload, encode_frame, read_frame, write_frame, FrameHeader,
    FIELD_HEADER_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use text::TextCommand;
pub use x1::{decode_x1, encode_x1};

/// Line that switches a connection to binary mode
pub const BINARY_HANDSHAKE: &str = "protocol binary";

/// Server reply to [`BINARY_HANDSHAKE`]
pub const BINARY_HANDSHAKE_REPLY: &[u8] = b"going binary";
