//! Session
//!
//! One per connection. The reading side runs on the connection's own thread
//! and drives the protocol state machine:
//!
//! ```text
//!               ┌──────────── "protocol binary" ───────────► Binary ─┐
//! Negotiating ──┼──────────── "GET /x HTTP/1.1" ───────────► Http ───┼─► Closed
//!               └──── anything else ──► Text ◄─┐                     │
//!                                        │     │ data block          │
//!                                        └─► AwaitingMoreData        │
//!                                        └───────────────────────────┘
//! ```
//! Writes go through the [`Outbound`] queue. The mutable per-session state
//! (handles, auth tokens) sits behind one lock, because the delivery worker
//! registers group handles from its own thread.

use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::container::Container;
use crate::dispatch::{self, http, TextReply};
use crate::engine::Engine;
use crate::error::{Result, TesseraError};
use crate::protocol::{
    encode_frame, read_frame, text, Command, FieldId, Frame, TextCommand, BINARY_HANDSHAKE,
    BINARY_HANDSHAKE_REPLY,
};
use crate::pubsub::{EventInfo, Subscriber};
use super::outbound::{Outbound, SendAccounting};
use super::stream::{is_disconnect, Stream};

// =============================================================================
// Handle Table
// =============================================================================

/// What a handle refers to
#[derive(Clone)]
pub struct HandleInfo {
    pub container: Arc<dyn Container>,
    pub name: String,
    pub container_type: String,
    /// Set for handles created through a group subscription
    pub group: Option<String>,
}

impl HandleInfo {
    pub fn new(container: Arc<dyn Container>, group: Option<String>) -> Self {
        Self {
            name: container.name().to_string(),
            container_type: container.container_type().to_string(),
            container,
            group,
        }
    }
}

/// Handles are 1-based positions in a growable arena
///
/// Closed slots are left empty and never handed out again.
#[derive(Default)]
pub struct HandleTable {
    slots: Vec<Option<HandleInfo>>,
}

impl HandleTable {
    pub fn register(&mut self, info: HandleInfo) -> i32 {
        self.slots.push(Some(info));
        self.slots.len() as i32
    }

    pub fn get(&self, handle: i32) -> Option<&HandleInfo> {
        let index = usize::try_from(handle).ok()?.checked_sub(1)?;
        self.slots.get(index)?.as_ref()
    }

    pub fn close(&mut self, handle: i32) -> Option<HandleInfo> {
        let index = usize::try_from(handle).ok()?.checked_sub(1)?;
        self.slots.get_mut(index)?.take()
    }

    /// Open handles in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (i32, &HandleInfo)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|info| (i as i32 + 1, info)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct SessionState {
    handles: HandleTable,
    tokens: Vec<String>,
}

// =============================================================================
// Session
// =============================================================================

/// One client connection
pub struct Session {
    id: u64,
    peer: String,
    engine: Arc<Engine>,
    state: Mutex<SessionState>,
    outbound: Outbound,
    writer: Mutex<Option<JoinHandle<()>>>,
    /// Clone of the transport kept to force-close it
    control: Stream,
    valid: Arc<AtomicBool>,
    binary: AtomicBool,
    /// Next debug sequence; held while a frame is queued so numbers hit the wire in order
    debug_seq: Mutex<u16>,
}

impl Session {
    /// Wrap an accepted stream, starting its writer thread
    pub fn new(id: u64, stream: &Stream, engine: Arc<Engine>) -> Result<Arc<Self>> {
        let config = engine.config();
        stream.set_nodelay(true)?;
        stream.set_read_timeout(config.read_timeout())?;
        stream.set_write_timeout(config.write_timeout())?;

        let accounting = Arc::new(SendAccounting::new(
            config.pending_send_low_watermark,
            config.pending_send_high_watermark,
        ));
        let valid = Arc::new(AtomicBool::new(true));
        let (outbound, writer) = Outbound::spawn(
            stream.try_clone()?,
            accounting,
            Arc::clone(&valid),
            id.to_string(),
        )?;

        Ok(Arc::new(Self {
            id,
            peer: stream.peer_label(),
            engine,
            state: Mutex::new(SessionState::default()),
            outbound,
            writer: Mutex::new(Some(writer)),
            control: stream.try_clone()?,
            valid,
            binary: AtomicBool::new(false),
            debug_seq: Mutex::new(0),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn is_binary(&self) -> bool {
        self.binary.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------------
    // Handles
    // -------------------------------------------------------------------------

    pub fn register_container(&self, container: Arc<dyn Container>) -> i32 {
        self.state.lock().handles.register(HandleInfo::new(container, None))
    }

    /// Resolve a handle, failing with an error answer for unknown ones
    pub fn container(&self, handle: i32) -> Result<HandleInfo> {
        self.state
            .lock()
            .handles
            .get(handle)
            .cloned()
            .ok_or(TesseraError::InvalidHandle(handle))
    }

    pub fn close_handle(&self, handle: i32) -> Result<HandleInfo> {
        let info = self
            .state
            .lock()
            .handles
            .close(handle)
            .ok_or(TesseraError::InvalidHandle(handle))?;
        self.engine.subscriptions().unsubscribe(self.id, handle);
        Ok(info)
    }

    /// `(handle, name, type)` of every open handle
    pub fn handles(&self) -> Vec<(i32, String, String)> {
        self.state
            .lock()
            .handles
            .iter()
            .map(|(h, info)| (h, info.name.clone(), info.container_type.clone()))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Auth
    // -------------------------------------------------------------------------

    pub fn add_token(&self, token: &str) {
        let mut state = self.state.lock();
        if !state.tokens.iter().any(|t| t == token) {
            state.tokens.push(token.to_string());
        }
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().tokens.clone()
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Queue raw bytes
    pub fn send_bytes(&self, bytes: impl Into<Bytes>) -> Result<()> {
        if !self.is_valid() {
            return Err(TesseraError::Network(format!("session {} is closed", self.id)));
        }
        self.outbound.send(bytes.into())
    }

    /// Queue a frame, stamping the session's debug sequence
    pub fn send_frame(&self, mut frame: Frame) -> Result<()> {
        let mut seq = self.debug_seq.lock();
        frame.debug_seq = *seq;
        *seq = seq.wrapping_add(1);
        tracing::trace!("Session {} <- {}", self.id, frame);
        self.send_bytes(encode_frame(&frame)?)
    }

    pub fn accounting(&self) -> &Arc<SendAccounting> {
        self.outbound.accounting()
    }

    pub fn pending_send_size(&self) -> usize {
        self.accounting().pending_send_size()
    }

    pub fn is_pending_send_size_too_big(&self) -> bool {
        self.accounting().is_too_big()
    }

    /// Run `callback` once queued bytes drop below the low watermark
    pub fn register_low_pending_bytes_callback<F: FnOnce() + Send + 'static>(&self, callback: F) {
        self.accounting().on_low_pending_bytes(callback);
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Invalidate and disconnect. Safe to call more than once.
    pub fn close(&self) {
        if self.valid.swap(false, Ordering::AcqRel) {
            tracing::debug!("Session {} ({}) closing", self.id, self.peer);
        }
        self.outbound.close();
        self.control.shutdown();
    }

    /// Serve the connection until it closes
    pub fn run(self: &Arc<Self>, stream: Stream) -> Result<()> {
        tracing::debug!("Session {} established from {}", self.id, self.peer);

        let mut reader = BufReader::new(stream);
        let result = match read_line(&mut reader) {
            Ok(Some(first)) => self.negotiate(&mut reader, first),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        // let queued answers reach the peer before the socket goes down
        self.outbound.close();
        if let Some(writer) = self.writer.lock().take() {
            let _ = writer.join();
        }
        self.close();

        match result {
            Err(TesseraError::Io(ref e)) if is_disconnect(e) => {
                tracing::debug!("Session {} disconnected", self.id);
                Ok(())
            }
            other => other,
        }
    }

    fn negotiate<R: BufRead>(self: &Arc<Self>, reader: &mut R, first: String) -> Result<()> {
        let line = first.trim_end_matches(['\r', '\n']);

        if line == BINARY_HANDSHAKE {
            self.binary.store(true, Ordering::Release);
            self.send_bytes(BINARY_HANDSHAKE_REPLY)?;
            tracing::debug!("Session {} switched to binary", self.id);
            return self.run_binary(reader);
        }

        if http::is_request_line(line) {
            tracing::debug!("Session {} is an HTTP request: {}", self.id, line);
            return http::serve(&self.engine, self, reader, line);
        }

        self.run_text(reader, first)
    }

    fn run_binary<R: Read>(self: &Arc<Self>, reader: &mut R) -> Result<()> {
        while self.is_valid() {
            let frame = match read_frame(reader) {
                Ok(frame) => frame,
                Err(TesseraError::Io(e)) if is_disconnect(&e) => return Ok(()),
                Err(TesseraError::Protocol(msg)) => {
                    tracing::warn!("Session {}: malformed frame, closing: {}", self.id, msg);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            tracing::trace!("Session {} -> {}", self.id, frame);

            if let Some(answer) = dispatch::dispatch_binary(&self.engine, self, &frame) {
                self.send_frame(answer)?;
            }
        }
        Ok(())
    }

    fn run_text<R: BufRead>(self: &Arc<Self>, reader: &mut R, first: String) -> Result<()> {
        let mut next_line = Some(first);

        while self.is_valid() {
            let line = match next_line.take() {
                Some(line) => line,
                None => match read_line(reader)? {
                    Some(line) => line,
                    None => return Ok(()),
                },
            };

            let Some(command) = TextCommand::parse(&line) else {
                continue;
            };
            tracing::trace!("Session {} -> {:?}", self.id, command);

            // AwaitingMoreData: the same handler runs again once the block is in
            let mut data = Vec::new();
            loop {
                match dispatch::dispatch_text(&self.engine, self, &command, &data) {
                    TextReply::Answer(bytes) => {
                        self.send_bytes(bytes)?;
                        break;
                    }
                    TextReply::Sent => break,
                    TextReply::NeedMoreData(size) if size > text::MAX_DATA_BLOCK_SIZE => {
                        self.send_bytes(text::answer_error("data block too large"))?;
                        break;
                    }
                    TextReply::NeedMoreData(size) if size > data.len() => {
                        let mut block = vec![0u8; size];
                        reader.read_exact(&mut block)?;
                        data = block;
                    }
                    TextReply::NeedMoreData(_) => {
                        self.send_bytes(text::answer_error("data block size mismatch"))?;
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.outbound.close();
    }
}

/// Read one `\n` terminated line; `None` at end of stream
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let read = reader
        .by_ref()
        .take(text::MAX_LINE_SIZE as u64)
        .read_until(b'\n', &mut buf)?;

    if read == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') && read >= text::MAX_LINE_SIZE {
        return Err(TesseraError::Protocol("command line too long".to_string()));
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

// =============================================================================
// Event Delivery
// =============================================================================

impl Subscriber for Session {
    fn subscriber_id(&self) -> u64 {
        self.id
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn publish_event(&self, handle: i32, event: &EventInfo) -> Result<()> {
        if self.is_binary() {
            let frame = Frame::new(Command::Event)
                .with(FieldId::Handle, handle)
                .with(FieldId::EventCode, event.event_code as i32)
                .with_present(FieldId::Key, &event.key)
                .with_present(FieldId::Value, &event.value)
                .with_present(FieldId::Metadata, &event.metadata);
            self.send_frame(frame)
        } else {
            self.send_bytes(text::event(
                handle,
                event.event_code.name(),
                &event.key,
                &event.value,
                &event.metadata,
            ))
        }
    }

    fn register_group_container(&self, group: &str, container: Arc<dyn Container>) -> Result<i32> {
        if !self.is_valid() {
            return Err(TesseraError::Network(format!("session {} is closed", self.id)));
        }
        Ok(self
            .state
            .lock()
            .handles
            .register(HandleInfo::new(container, Some(group.to_string()))))
    }

    fn publish_new_group_container(&self, group: &str, handle: i32, container: &dyn Container) -> Result<()> {
        if self.is_binary() {
            let frame = Frame::new(Command::NewGroupContainer)
                .with(FieldId::Handle, handle)
                .with(FieldId::GroupName, group)
                .with(FieldId::ContainerName, container.name())
                .with(FieldId::ContainerType, container.container_type());
            self.send_frame(frame)
        } else {
            self.send_bytes(format!(
                "event {} {} {} {} {}{}",
                handle,
                Command::NewGroupContainer.name(),
                group,
                container.name(),
                container.container_type(),
                text::CRLF
            ))
        }
    }
}
