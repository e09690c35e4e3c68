//! Outbound queue
//!
//! Every session owns one writer thread fed through a channel, so exactly one
//! write is in flight per connection and bytes leave in the order they were
//! queued. The byte counter drives backpressure.

use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{Result, TesseraError};
use super::stream::{is_disconnect, Stream};

type ResumeCallback = Box<dyn FnOnce() + Send>;

/// Queued-bytes accounting with high/low watermarks
pub struct SendAccounting {
    pending: AtomicUsize,
    low_watermark: usize,
    high_watermark: usize,
    resume_callbacks: Mutex<Vec<ResumeCallback>>,
}

impl SendAccounting {
    pub fn new(low_watermark: usize, high_watermark: usize) -> Self {
        Self {
            pending: AtomicUsize::new(0),
            low_watermark,
            high_watermark,
            resume_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Bytes queued but not yet written
    pub fn pending_send_size(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Above the high watermark: callers should slow down or drop
    pub fn is_too_big(&self) -> bool {
        self.pending_send_size() > self.high_watermark
    }

    pub fn queued(&self, bytes: usize) {
        self.pending.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Account for written bytes, firing resume callbacks below the low watermark
    pub fn sent(&self, bytes: usize) {
        let before = self.pending.fetch_sub(bytes, Ordering::AcqRel);
        let now = before.saturating_sub(bytes);
        if now < self.low_watermark {
            self.fire_resume_callbacks();
        }
    }

    /// Run `callback` once the queue drains below the low watermark
    ///
    /// Runs immediately if it already is.
    pub fn on_low_pending_bytes<F: FnOnce() + Send + 'static>(&self, callback: F) {
        {
            let mut callbacks = self.resume_callbacks.lock();
            if self.pending_send_size() >= self.low_watermark {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    fn fire_resume_callbacks(&self) {
        let callbacks = std::mem::take(&mut *self.resume_callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }
}

enum Outgoing {
    Data(Bytes),
    Close,
}

/// Sending side of a session's outbound queue
pub struct Outbound {
    tx: Sender<Outgoing>,
    accounting: Arc<SendAccounting>,
}

impl Outbound {
    /// Start the writer thread for `stream`
    ///
    /// `valid` is cleared by the writer when the transport fails.
    pub fn spawn(
        stream: Stream,
        accounting: Arc<SendAccounting>,
        valid: Arc<AtomicBool>,
        label: String,
    ) -> Result<(Self, JoinHandle<()>)> {
        let (tx, rx) = channel::unbounded();
        let writer_accounting = Arc::clone(&accounting);
        let handle = thread::Builder::new()
            .name(format!("writer-{}", label))
            .spawn(move || run_writer(stream, rx, writer_accounting, valid, label))?;

        Ok((Self { tx, accounting }, handle))
    }

    /// Queue bytes for writing
    pub fn send(&self, bytes: Bytes) -> Result<()> {
        let len = bytes.len();
        self.accounting.queued(len);
        self.tx.send(Outgoing::Data(bytes)).map_err(|_| {
            self.accounting.sent(len);
            TesseraError::Network("session writer is gone".to_string())
        })
    }

    /// Flush what is queued and stop the writer
    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }

    pub fn accounting(&self) -> &Arc<SendAccounting> {
        &self.accounting
    }
}

fn run_writer(
    stream: Stream,
    rx: Receiver<Outgoing>,
    accounting: Arc<SendAccounting>,
    valid: Arc<AtomicBool>,
    label: String,
) {
    let mut writer = BufWriter::new(stream);

    while let Ok(message) = rx.recv() {
        let bytes = match message {
            Outgoing::Data(bytes) => bytes,
            Outgoing::Close => break,
        };

        let mut result = writer.write_all(&bytes);
        // batch small writes while more is already queued
        if result.is_ok() && rx.is_empty() {
            result = writer.flush();
        }
        accounting.sent(bytes.len());

        if let Err(e) = result {
            if is_disconnect(&e) {
                tracing::debug!("Session {}: peer gone while writing", label);
            } else {
                tracing::warn!("Session {}: write failed: {}", label, e);
            }
            valid.store(false, Ordering::Release);
            writer.get_ref().shutdown();
            return;
        }
    }

    let _ = writer.flush();
    tracing::trace!("Session {}: writer stopped", label);
}
