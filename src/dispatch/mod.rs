//! Command dispatch
//!
//! Maps decoded commands to handlers and turns their failures into error
//! answers. Nothing a handler does can take the session down: errors become
//! answers and panics are caught at this boundary.
//!
//! ```text
//!  Binary frame ──► dispatch_binary ──┐
//!                                     ├──► CommandTable ──► handler ──► ops ──► Container
//!  Text line ─────► dispatch_text ────┘                                   └──► publish
//! ```

mod binary;
pub mod http;
mod ops;
mod table;
mod text;

pub use table::{BinaryHandler, CommandTable, TextHandler};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::ErrorCode;
use crate::network::Session;
use crate::protocol::{self, Frame, TextCommand};

/// What a binary handler produced
#[derive(Debug)]
pub enum BinaryReply {
    /// Send this answer
    Answer(Frame),
    /// The handler already queued its answer itself
    Sent,
}

/// What a text handler produced
#[derive(Debug)]
pub enum TextReply {
    Answer(Vec<u8>),
    /// Read this many data block bytes, then run the handler again
    NeedMoreData(usize),
    Sent,
}

/// Run one binary request. Returns the answer to send, if any.
pub fn dispatch_binary(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Option<Frame> {
    let Some(command_id) = frame.command_id() else {
        tracing::warn!("Session {}: frame without command field", session.id());
        return Some(Frame::error_answer(
            ErrorCode::MissingParameter,
            "command field expected",
        ));
    };

    let Some(handler) = engine.commands().binary(command_id) else {
        tracing::warn!("Session {}: invalid command {:#x}", session.id(), command_id);
        return Some(Frame::error_answer(ErrorCode::Protocol, "invalid command"));
    };

    match catch_unwind(AssertUnwindSafe(|| handler(engine, session, frame))) {
        Ok(Ok(BinaryReply::Answer(answer))) => Some(answer),
        Ok(Ok(BinaryReply::Sent)) => None,
        Ok(Err(e)) => {
            tracing::debug!("Session {}: {} failed: {}", session.id(), frame, e);
            Some(Frame::error_answer(e.code(), &e.description()))
        }
        Err(_) => {
            tracing::error!("Session {}: handler panicked on {}", session.id(), frame);
            Some(Frame::error_answer(ErrorCode::Generic, "internal error"))
        }
    }
}

/// Run one text command (possibly again, now with its data block)
pub fn dispatch_text(
    engine: &Engine,
    session: &Arc<Session>,
    command: &TextCommand,
    data: &[u8],
) -> TextReply {
    let Some(handler) = engine.commands().text(&command.name) else {
        return TextReply::Answer(protocol::text::answer_error("invalid command"));
    };

    match catch_unwind(AssertUnwindSafe(|| handler(engine, session, command, data))) {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            tracing::debug!("Session {}: {} failed: {}", session.id(), command.name, e);
            TextReply::Answer(protocol::text::answer_error(&e.description()))
        }
        Err(_) => {
            tracing::error!("Session {}: handler panicked on {}", session.id(), command.name);
            TextReply::Answer(protocol::text::answer_error("internal error"))
        }
    }
}
