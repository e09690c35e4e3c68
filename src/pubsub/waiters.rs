//! One-shot `wait_and_pop_next` waiters
//!
//! A waiter is served exactly once, by the first record that is available
//! either when it registers or after it registered. A record whose delivery
//! fails goes back to the front of its container.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::container::{Container, Record};
use crate::error::{Result, TesseraError};
use crate::protocol::{Command, Data};
use super::engine::{EventInfo, Subscriber};

struct Waiter {
    session: Weak<dyn Subscriber>,
    session_id: u64,
    handle: i32,
}

/// Pending waiters per storage id
#[derive(Default)]
pub struct WaitQueue {
    waiters: Mutex<HashMap<u64, VecDeque<Waiter>>>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve the caller right away if the container has a record, else queue it
    ///
    /// Returns the `delete` event to publish for a record popped here. When
    /// the caller cannot take the record it is put back and the delivery
    /// error is returned.
    pub fn wait(
        &self,
        session: Weak<dyn Subscriber>,
        session_id: u64,
        handle: i32,
        container: &Arc<dyn Container>,
    ) -> Result<Option<EventInfo>> {
        let mut waiters = self.waiters.lock();
        let queue = waiters.entry(container.id()).or_default();

        if queue.is_empty() && container.record_count() > 0 {
            if let Ok(record) = container.pop_front() {
                let delivered = match session.upgrade() {
                    Some(live) => live.publish_event(handle, &popped_event(container.id(), &record)),
                    None => Err(TesseraError::Network(format!("session {} is gone", session_id))),
                };
                return match delivered {
                    Ok(()) => Ok(Some(delete_event(container.id(), record))),
                    Err(e) => {
                        tracing::warn!(
                            "Session {}: wait_and_pop_next delivery failed: {}",
                            session_id,
                            e
                        );
                        match restore(container, record) {
                            Ok(()) => Err(e),
                            Err(record) => Ok(Some(delete_event(container.id(), record))),
                        }
                    }
                };
            }
        }

        queue.push_back(Waiter {
            session,
            session_id,
            handle,
        });
        Ok(None)
    }

    /// Hand records to queued waiters while both are available
    ///
    /// Returns the `delete` events of the records handed out.
    pub fn serve(&self, container: &Arc<dyn Container>) -> Vec<EventInfo> {
        let mut deleted = Vec::new();
        let mut waiters = self.waiters.lock();
        let Some(queue) = waiters.get_mut(&container.id()) else {
            return deleted;
        };

        while let Some(waiter) = queue.pop_front() {
            let Some(session) = waiter.session.upgrade().filter(|s| s.is_valid()) else {
                continue;
            };

            let record = match container.pop_front() {
                Ok(record) => record,
                Err(_) => {
                    queue.push_front(waiter);
                    break;
                }
            };

            match session.publish_event(waiter.handle, &popped_event(container.id(), &record)) {
                Ok(()) => deleted.push(delete_event(container.id(), record)),
                Err(e) => {
                    tracing::warn!(
                        "Session {}: wait_and_pop_next delivery failed: {}",
                        waiter.session_id,
                        e
                    );
                    // the next waiter gets the record instead
                    if let Err(record) = restore(container, record) {
                        deleted.push(delete_event(container.id(), record));
                    }
                }
            }
        }

        if queue.is_empty() {
            waiters.remove(&container.id());
        }
        deleted
    }

    pub fn remove_session(&self, session_id: u64) {
        let mut waiters = self.waiters.lock();
        for queue in waiters.values_mut() {
            queue.retain(|w| w.session_id != session_id);
        }
        waiters.retain(|_, q| !q.is_empty());
    }

    /// Number of waiters queued on a container
    pub fn pending(&self, storage_id: u64) -> usize {
        self.waiters.lock().get(&storage_id).map(VecDeque::len).unwrap_or(0)
    }
}

/// Put a popped record back at the front of its container
///
/// Hands the record back when the container refuses it; it is then gone and
/// its `delete` must still be published.
fn restore(container: &Arc<dyn Container>, record: Record) -> std::result::Result<(), Record> {
    // list keys are positions, so key 0 is the front
    match container.insert(record.key.clone(), record.value.clone(), record.metadata.clone()) {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!("{}: cannot restore undelivered record: {}", container.name(), e);
            Err(record)
        }
    }
}

fn popped_event(storage_id: u64, record: &Record) -> EventInfo {
    EventInfo::new(
        storage_id,
        Command::WaitAndPopNext,
        record.key.clone(),
        record.value.clone(),
        record.metadata.clone(),
    )
}

fn delete_event(storage_id: u64, record: Record) -> EventInfo {
    EventInfo::new(storage_id, Command::Delete, record.key, Data::None, Data::None)
}
