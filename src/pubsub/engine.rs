//! Subscription engine
//!
//! ## Locking
//! `subscribers` is always taken before `queue`. Registration and publication
//! both hold the pair while they touch the queue, so a mutation can never
//! slip between a new subscriber being listed and its sentinel being queued.
//! The worker takes each lock on its own and never holds either one while
//! talking to a session.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::container::{records, Container, ContainerKind, ContainerManager};
use crate::error::Result;
use crate::protocol::{Command, Data};
use super::group::{GroupManager, GroupSubscriber};
use super::waiters::WaitQueue;

/// A container mutation (or the snapshot-end marker) as seen by subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct EventInfo {
    pub storage_id: u64,
    pub event_code: Command,
    pub key: Data,
    pub value: Data,
    pub metadata: Data,
}

impl EventInfo {
    pub fn new(storage_id: u64, event_code: Command, key: Data, value: Data, metadata: Data) -> Self {
        Self {
            storage_id,
            event_code,
            key,
            value,
            metadata,
        }
    }

    /// Payload-less marker closing a snapshot
    pub fn snapshot_end(storage_id: u64) -> Self {
        Self::new(storage_id, Command::SnapshotEnd, Data::None, Data::None, Data::None)
    }

    pub fn is_snapshot_end(&self) -> bool {
        self.event_code == Command::SnapshotEnd
    }
}

/// Something events can be delivered to (a session, in the server)
pub trait Subscriber: Send + Sync {
    /// Unique id, used to find the subscriber's registrations on teardown
    fn subscriber_id(&self) -> u64;

    /// False once the transport is gone
    fn is_valid(&self) -> bool;

    /// Deliver one event for the given handle
    fn publish_event(&self, handle: i32, event: &EventInfo) -> Result<()>;

    /// Allocate a handle for a container reached through a group
    fn register_group_container(&self, group: &str, container: Arc<dyn Container>) -> Result<i32>;

    /// Tell the peer which container a group handle refers to
    fn publish_new_group_container(&self, group: &str, handle: i32, container: &dyn Container) -> Result<()>;
}

/// One registration of a subscriber on a container
pub struct SubscriptionInfo {
    pub handle: i32,
    /// Empty for plain subscriptions
    pub group_name: String,
    pub container: Arc<dyn Container>,
    pub session: Weak<dyn Subscriber>,
    pub session_id: u64,
    /// Snapshot cursor; empty means "live events only"
    pub start: String,
    snapshot_pending: AtomicBool,
    last_rev_num: AtomicU64,
}

impl SubscriptionInfo {
    pub fn is_snapshot_pending(&self) -> bool {
        self.snapshot_pending.load(Ordering::Acquire)
    }

    /// Number of live events delivered so far
    pub fn last_rev_num(&self) -> u64 {
        self.last_rev_num.load(Ordering::Relaxed)
    }
}

/// What the worker consumes
enum QueuedEvent {
    Mutation(EventInfo),
    /// Sentinel of one specific registration
    SnapshotEnd(Arc<SubscriptionInfo>),
}

struct Shared {
    /// storage id -> registrations
    subscribers: Mutex<HashMap<u64, Vec<Arc<SubscriptionInfo>>>>,
    queue: Mutex<Vec<QueuedEvent>>,
    queue_ready: Condvar,
    running: AtomicBool,
}

/// Server-wide event fan-out
pub struct SubscriptionEngine {
    shared: Arc<Shared>,
    groups: GroupManager,
    waiters: WaitQueue,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionEngine {
    /// Create the engine and start its delivery worker
    pub fn start(containers: Arc<ContainerManager>) -> Result<Self> {
        let shared = Arc::new(Shared {
            subscribers: Mutex::new(HashMap::new()),
            queue: Mutex::new(Vec::new()),
            queue_ready: Condvar::new(),
            running: AtomicBool::new(true),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("event-delivery".to_string())
            .spawn(move || run_worker(worker_shared))?;

        Ok(Self {
            shared,
            groups: GroupManager::new(containers),
            waiters: WaitQueue::new(),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }

    pub fn waiters(&self) -> &WaitQueue {
        &self.waiters
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Subscribe `session` to `container` under `handle`
    ///
    /// Returns immediately; the snapshot (if `start` is not empty) and all
    /// later events are sent from the delivery worker.
    pub fn subscribe<S: Subscriber + 'static>(
        &self,
        session: &Arc<S>,
        handle: i32,
        container: Arc<dyn Container>,
        start: &str,
    ) {
        let weak: Weak<dyn Subscriber> = Arc::downgrade(session) as Weak<dyn Subscriber>;
        self.register(weak, session.subscriber_id(), handle, container, start, "");
    }

    fn register(
        &self,
        session: Weak<dyn Subscriber>,
        session_id: u64,
        handle: i32,
        container: Arc<dyn Container>,
        start: &str,
        group_name: &str,
    ) {
        let storage_id = container.id();
        let info = Arc::new(SubscriptionInfo {
            handle,
            group_name: group_name.to_string(),
            container,
            session,
            session_id,
            start: start.to_string(),
            snapshot_pending: AtomicBool::new(true),
            last_rev_num: AtomicU64::new(0),
        });

        let mut subscribers = self.shared.subscribers.lock();
        subscribers.entry(storage_id).or_default().push(Arc::clone(&info));

        let mut queue = self.shared.queue.lock();
        queue.push(QueuedEvent::SnapshotEnd(info));
        self.shared.queue_ready.notify_one();

        tracing::debug!(
            "Session {} subscribed handle {} (storage {}) from {:?}",
            session_id,
            handle,
            storage_id,
            start
        );
    }

    /// Drop the registration of one handle
    pub fn unsubscribe(&self, session_id: u64, handle: i32) -> bool {
        let mut removed = false;
        let mut subscribers = self.shared.subscribers.lock();
        for list in subscribers.values_mut() {
            let before = list.len();
            list.retain(|s| {
                let keep = !(s.session_id == session_id && s.handle == handle);
                if !keep {
                    s.snapshot_pending.store(false, Ordering::Release);
                }
                keep
            });
            removed |= list.len() != before;
        }
        subscribers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Drop everything a session registered (subscriptions, groups, waiters)
    pub fn remove_session(&self, session_id: u64) {
        let mut subscribers = self.shared.subscribers.lock();
        for list in subscribers.values_mut() {
            list.retain(|s| {
                let keep = s.session_id != session_id;
                if !keep {
                    s.snapshot_pending.store(false, Ordering::Release);
                }
                keep
            });
        }
        subscribers.retain(|_, list| !list.is_empty());
        drop(subscribers);

        self.groups.remove_session(session_id);
        self.waiters.remove_session(session_id);
    }

    pub fn is_subscribed(&self, session_id: u64, handle: i32) -> bool {
        self.shared
            .subscribers
            .lock()
            .values()
            .flatten()
            .any(|s| s.session_id == session_id && s.handle == handle)
    }

    /// Number of registrations on a container
    pub fn subscriber_count(&self, storage_id: u64) -> usize {
        self.shared
            .subscribers
            .lock()
            .get(&storage_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    // =========================================================================
    // Publication
    // =========================================================================

    /// Queue a mutation event for delivery
    ///
    /// Cheap no-op when nobody listens to the container.
    pub fn publish(&self, event: EventInfo) {
        let subscribers = self.shared.subscribers.lock();
        if subscribers.get(&event.storage_id).map_or(true, Vec::is_empty) {
            return;
        }

        let mut queue = self.shared.queue.lock();
        queue.push(QueuedEvent::Mutation(event));
        self.shared.queue_ready.notify_one();
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// Add a container to a group and stream it to current group subscribers
    ///
    /// Returns false (and does nothing else) when it was already a member.
    pub fn group_add(&self, group: &str, container: Arc<dyn Container>) -> Result<bool> {
        let subscribers = match self.groups.add_container(group, Arc::clone(&container))? {
            Some(subscribers) => subscribers,
            None => return Ok(false),
        };

        for GroupSubscriber { session, session_id } in subscribers {
            let Some(live) = session.upgrade().filter(|s| s.is_valid()) else {
                continue;
            };

            match live.register_group_container(group, Arc::clone(&container)) {
                Ok(handle) => {
                    self.register(session, session_id, handle, Arc::clone(&container), "0", group)
                }
                Err(e) => tracing::warn!(
                    "Session {}: cannot register {} from group {}: {}",
                    session_id,
                    container.name(),
                    group,
                    e
                ),
            }
        }

        Ok(true)
    }

    /// Subscribe a session to every current and future member of a group
    pub fn group_subscribe<S: Subscriber + 'static>(
        &self,
        session: &Arc<S>,
        group: &str,
        start: &str,
    ) -> Result<()> {
        let weak: Weak<dyn Subscriber> = Arc::downgrade(session) as Weak<dyn Subscriber>;
        let session_id = session.subscriber_id();
        let members = self.groups.add_subscriber(group, weak.clone(), session_id)?;

        for container in members {
            let handle = session.register_group_container(group, Arc::clone(&container))?;
            self.register(weak.clone(), session_id, handle, container, start, group);
        }

        Ok(())
    }

    // =========================================================================
    // Wait and pop
    // =========================================================================

    /// Pop the next record for `session`, now or as soon as one is pushed
    pub fn wait_and_pop_next<S: Subscriber + 'static>(
        &self,
        session: &Arc<S>,
        handle: i32,
        container: Arc<dyn Container>,
    ) -> Result<()> {
        let weak: Weak<dyn Subscriber> = Arc::downgrade(session) as Weak<dyn Subscriber>;
        if let Some(event) = self.waiters.wait(weak, session.subscriber_id(), handle, &container)? {
            self.publish(event);
        }
        Ok(())
    }

    /// Hand freshly pushed records to waiting sessions
    pub fn serve_waiters(&self, container: &Arc<dyn Container>) {
        for event in self.waiters.serve(container) {
            self.publish(event);
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop the worker once the queue is drained
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::Release);
        {
            let _queue = self.shared.queue.lock();
            self.shared.queue_ready.notify_all();
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Event delivery worker panicked");
            }
        }
    }
}

impl Drop for SubscriptionEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Delivery Worker
// =============================================================================

fn run_worker(shared: Arc<Shared>) {
    tracing::debug!("Event delivery worker started");

    loop {
        let batch = {
            let mut queue = shared.queue.lock();
            while queue.is_empty() && shared.running.load(Ordering::Acquire) {
                shared.queue_ready.wait(&mut queue);
            }
            if queue.is_empty() {
                break;
            }
            std::mem::take(&mut *queue)
        };

        for event in batch {
            match event {
                QueuedEvent::SnapshotEnd(info) => deliver_snapshot(&info),
                QueuedEvent::Mutation(event) => deliver_live(&shared, &event),
            }
        }
    }

    tracing::debug!("Event delivery worker stopped");
}

/// Run `f` against one subscriber, logging instead of propagating failures
fn isolated<F>(info: &SubscriptionInfo, what: &str, f: F) -> bool
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(
                "Session {} handle {}: {} failed: {}",
                info.session_id,
                info.handle,
                what,
                e
            );
            false
        }
        Err(_) => {
            tracing::error!(
                "Session {} handle {}: {} panicked",
                info.session_id,
                info.handle,
                what
            );
            false
        }
    }
}

fn deliver_snapshot(info: &Arc<SubscriptionInfo>) {
    if !info.is_snapshot_pending() {
        return;
    }

    let session = match info.session.upgrade() {
        Some(s) if s.is_valid() => s,
        _ => {
            info.snapshot_pending.store(false, Ordering::Release);
            return;
        }
    };

    isolated(info, "snapshot", || {
        if !info.group_name.is_empty() {
            session.publish_new_group_container(&info.group_name, info.handle, info.container.as_ref())?;
        }

        if info.start.is_empty() {
            return Ok(());
        }

        let start = info.start.trim().parse::<i32>().unwrap_or(0);
        let container = &info.container;
        let event_code = match container.kind() {
            ContainerKind::Map => Command::Set,
            ContainerKind::Sequence => Command::PushBack,
        };

        let result_set = container.query(start, 0, &Data::None)?;
        for record in records(result_set) {
            let event = EventInfo::new(container.id(), event_code, record.key, record.value, record.metadata);
            session.publish_event(info.handle, &event)?;
        }

        session.publish_event(info.handle, &EventInfo::snapshot_end(container.id()))
    });

    info.snapshot_pending.store(false, Ordering::Release);
}

fn deliver_live(shared: &Shared, event: &EventInfo) {
    let subscribers = match shared.subscribers.lock().get(&event.storage_id) {
        Some(list) => list.clone(),
        None => return,
    };

    for info in subscribers.iter().filter(|s| !s.is_snapshot_pending()) {
        let Some(session) = info.session.upgrade() else {
            continue;
        };
        if !session.is_valid() {
            continue;
        }

        if isolated(info, event.event_code.name(), || session.publish_event(info.handle, event)) {
            info.last_rev_num.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for SubscriptionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionInfo")
            .field("handle", &self.handle)
            .field("group_name", &self.group_name)
            .field("container", &self.container.name())
            .field("session_id", &self.session_id)
            .field("start", &self.start)
            .field("snapshot_pending", &self.is_snapshot_pending())
            .finish()
    }
}

