//! Client connection
//!
//! Synchronous client for the binary protocol. Every call sends one request
//! and waits for its answer; events that arrive meanwhile are queued and
//! handed out by [`Connection::next_event`] or dispatched to the callbacks
//! registered with `subscribe`.
//!
//! ## Cluster routing
//! ```text
//! open("x") on primary ── ok ──────────────────────────────► handle (primary)
//!        │ NoSuchObject
//!        ▼
//! __meta__/clusters["x"] = "host:port" ── connect (reused) ─► handle (cluster link)
//!        │ any failure
//!        ▼
//! the original NoSuchObject
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Select;
use parking_lot::Mutex;

use crate::config::ClientOptions;
use crate::container::Record;
use crate::engine::CLUSTERS_META;
use crate::error::{Result, TesseraError};
use crate::protocol::{encode_x1, Command, Data, FieldId, Frame};
use super::link::{Link, LinkId};

/// A container handle, scoped to the link it was obtained on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    link: LinkId,
    id: i32,
}

impl Handle {
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Server side handle number
    pub fn id(&self) -> i32 {
        self.id
    }
}

/// An event received for a subscribed container
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub handle: Handle,
    /// Name of the container, when the handle is known to this connection
    pub container_name: String,
    pub event_code: Command,
    pub key: Data,
    pub value: Data,
    pub metadata: Data,
}

/// Direction of a traced frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceDirection {
    Sent,
    Received,
}

pub type EventCallback = Box<dyn FnMut(&Event) + Send>;

/// Receives an X1 dump of every frame sent or received
pub type TraceHook = Box<dyn FnMut(LinkId, TraceDirection, &[u8]) + Send>;

type SharedCallback = Arc<Mutex<EventCallback>>;

struct ContainerState {
    name: String,
    container_type: String,
    group: Option<String>,
    callback: Option<SharedCallback>,
}

/// A connection to a server, plus whatever cluster servers it was routed to
pub struct Connection {
    options: ClientOptions,
    primary: Link,
    clusters: Vec<Link>,
    containers: HashMap<Handle, ContainerState>,
    /// (link, group) -> callback shared by every container of the group
    group_callbacks: HashMap<(LinkId, String), SharedCallback>,
    /// One-shot `wait_and_pop_next` callbacks, oldest first
    pop_callbacks: HashMap<Handle, VecDeque<EventCallback>>,
    pending_events: VecDeque<(LinkId, Frame)>,
    cluster_map: Option<Handle>,
    /// Answers still owed per link while a network batch is open
    batch: Option<HashMap<LinkId, usize>>,
    trace: Option<TraceHook>,
}

impl Connection {
    /// Connect and switch to the binary protocol
    ///
    /// A host starting with `/` is a local socket path.
    pub fn connect(host: &str, port: u16, options: ClientOptions) -> Result<Self> {
        let primary = Link::connect(LinkId::Primary, host, port, &options)?;
        let mut connection = Self {
            options,
            primary,
            clusters: Vec::new(),
            containers: HashMap::new(),
            group_callbacks: HashMap::new(),
            pop_callbacks: HashMap::new(),
            pending_events: VecDeque::new(),
            cluster_map: None,
            batch: None,
            trace: None,
        };

        if connection.options.open_cluster_map {
            match connection.create_or_open_on(LinkId::Primary, Command::Open, CLUSTERS_META, None) {
                Ok(handle) => connection.cluster_map = Some(handle),
                Err(e) => tracing::debug!("No cluster map on {}:{}: {}", host, port, e),
            }
        }

        Ok(connection)
    }

    pub fn set_trace_hook(&mut self, hook: TraceHook) {
        self.trace = Some(hook);
    }

    /// Number of cluster servers this connection talks to
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Link of an already established cluster connection
    pub fn cluster_link(&self, host: &str, port: u16) -> Option<LinkId> {
        self.clusters
            .iter()
            .find(|l| l.host() == host && l.port() == port && l.is_connected())
            .map(Link::id)
    }

    /// Name of the container behind a handle
    pub fn container_name(&self, handle: Handle) -> Option<&str> {
        self.containers.get(&handle).map(|c| c.name.as_str())
    }

    /// Type of the container behind a handle
    pub fn container_type(&self, handle: Handle) -> Option<&str> {
        self.containers.get(&handle).map(|c| c.container_type.as_str())
    }

    /// Group a handle was delivered through, if any
    pub fn container_group(&self, handle: Handle) -> Option<&str> {
        self.containers.get(&handle).and_then(|c| c.group.as_deref())
    }

    /// Close every link
    pub fn disconnect(&mut self) {
        for link in &mut self.clusters {
            link.disconnect();
        }
        self.primary.disconnect();
    }

    // =========================================================================
    // Request / Answer
    // =========================================================================

    fn link_mut(&mut self, id: LinkId) -> Result<&mut Link> {
        match id {
            LinkId::Primary => Ok(&mut self.primary),
            LinkId::Cluster(i) => self
                .clusters
                .get_mut(i)
                .ok_or_else(|| TesseraError::Network(format!("unknown link {}", id))),
        }
    }

    fn trace_frame(&mut self, link: LinkId, direction: TraceDirection, frame: &Frame) {
        tracing::trace!("{} {:?} {}", link, direction, frame);
        if let Some(hook) = self.trace.as_mut() {
            hook(link, direction, &encode_x1(frame.fields.iter().map(|f| &f.data)));
        }
    }

    fn send(&mut self, link: LinkId, mut frame: Frame) -> Result<()> {
        self.link_mut(link)?.send(&mut frame)?;
        self.trace_frame(link, TraceDirection::Sent, &frame);
        Ok(())
    }

    /// Queue events and register group containers; hand back anything else
    fn absorb(&mut self, link: LinkId, frame: Frame) -> Option<Frame> {
        match frame.command() {
            Some(Command::Event) => {
                self.pending_events.push_back((link, frame));
                None
            }
            Some(Command::NewGroupContainer) => {
                self.on_new_group_container(link, &frame);
                None
            }
            _ => Some(frame),
        }
    }

    /// Next non-event frame from one link
    fn recv_from(&mut self, link: LinkId) -> Result<Frame> {
        let timeout = self.options.answer_timeout;
        loop {
            let frame = self.link_mut(link)?.recv(timeout)?;
            self.trace_frame(link, TraceDirection::Received, &frame);
            if let Some(frame) = self.absorb(link, frame) {
                return Ok(frame);
            }
        }
    }

    fn wait_answer(&mut self, link: LinkId) -> Result<Frame> {
        loop {
            let frame = self.recv_from(link)?;
            if frame.is_command(Command::Answer) {
                return Ok(frame);
            }
            tracing::warn!("Unexpected frame while waiting for an answer: {}", frame);
        }
    }

    /// Send and wait for the answer, turning error answers into errors
    fn request(&mut self, link: LinkId, frame: Frame) -> Result<Frame> {
        if self.batch.is_some() {
            return Err(TesseraError::Protocol(
                "command needs an answer and cannot run inside a network batch".to_string(),
            ));
        }
        self.send(link, frame)?;
        let answer = self.wait_answer(link)?;
        match answer.answer_error() {
            Some(e) => Err(e),
            None => Ok(answer),
        }
    }

    /// Like `request`, but only counted while a network batch is open
    fn execute(&mut self, link: LinkId, frame: Frame) -> Result<()> {
        if self.batch.is_some() {
            self.send(link, frame)?;
            if let Some(batch) = self.batch.as_mut() {
                *batch.entry(link).or_default() += 1;
            }
            return Ok(());
        }
        self.request(link, frame).map(|_| ())
    }

    /// Start sending commands without waiting for their answers
    pub fn begin_network_batch(&mut self) -> Result<()> {
        if self.batch.is_some() {
            return Err(TesseraError::Protocol("network batch already open".to_string()));
        }
        self.batch = Some(HashMap::new());
        Ok(())
    }

    /// Drain every answer owed since [`Connection::begin_network_batch`]
    ///
    /// All answers are read even when some carry errors; the first error is
    /// returned.
    pub fn finish_network_batch(&mut self) -> Result<()> {
        let owed = self
            .batch
            .take()
            .ok_or_else(|| TesseraError::Protocol("no network batch open".to_string()))?;

        let mut first_error = None;
        for (link, count) in owed {
            for _ in 0..count {
                let answer = self.wait_answer(link)?;
                if let Some(e) = answer.answer_error() {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Containers
    // =========================================================================

    pub fn ping(&mut self, value: impl Into<Data>) -> Result<Data> {
        let answer = self.request(LinkId::Primary, Frame::new(Command::Ping).with(FieldId::Value, value))?;
        Ok(answer.data(FieldId::Value))
    }

    pub fn create(&mut self, name: &str, container_type: Option<&str>) -> Result<Handle> {
        self.create_or_open(Command::Create, name, container_type)
    }

    pub fn open(&mut self, name: &str, container_type: Option<&str>) -> Result<Handle> {
        self.create_or_open(Command::Open, name, container_type)
    }

    fn create_or_open(&mut self, command: Command, name: &str, container_type: Option<&str>) -> Result<Handle> {
        match self.create_or_open_on(LinkId::Primary, command, name, container_type) {
            Err(local) if local.is_no_such_object() => {
                match self.create_or_open_on_cluster(command, name, container_type) {
                    Ok(handle) => Ok(handle),
                    Err(e) => {
                        tracing::debug!("Cluster lookup of {} failed: {}", name, e);
                        Err(local)
                    }
                }
            }
            other => other,
        }
    }

    fn create_or_open_on(
        &mut self,
        link: LinkId,
        command: Command,
        name: &str,
        container_type: Option<&str>,
    ) -> Result<Handle> {
        let mut frame = Frame::new(command).with(FieldId::Name, name);
        if let Some(container_type) = container_type {
            frame.push(FieldId::Type, container_type);
        }

        let answer = self.request(link, frame)?;
        let handle = Handle {
            link,
            id: answer.require_int(FieldId::Handle)?,
        };
        let container_type = answer
            .string(FieldId::Type)
            .or_else(|| container_type.map(str::to_string))
            .unwrap_or_default();

        self.containers.insert(
            handle,
            ContainerState {
                name: name.to_string(),
                container_type,
                group: None,
                callback: None,
            },
        );
        Ok(handle)
    }

    fn create_or_open_on_cluster(&mut self, command: Command, name: &str, container_type: Option<&str>) -> Result<Handle> {
        let map = match self.cluster_map {
            Some(map) => map,
            None if self.options.open_cluster_map => {
                let map = self.create_or_open_on(LinkId::Primary, Command::Open, CLUSTERS_META, None)?;
                self.cluster_map = Some(map);
                map
            }
            None => return Err(TesseraError::NoSuchObject("no cluster map".to_string())),
        };

        let target = self.get(map, name)?.value;
        let (host, port) = parse_cluster_target(&target, self.primary.host(), self.primary.port())?;
        let link = self.connect_cluster(&host, port)?;
        tracing::debug!("{} lives on {}:{} ({})", name, host, port, link);
        self.create_or_open_on(link, command, name, container_type)
    }

    /// Reuse the link to `(host, port)` or open a new one
    fn connect_cluster(&mut self, host: &str, port: u16) -> Result<LinkId> {
        if let Some(link) = self.cluster_link(host, port) {
            return Ok(link);
        }
        let id = LinkId::Cluster(self.clusters.len());
        let link = Link::connect(id, host, port, &self.options)?;
        self.clusters.push(link);
        Ok(id)
    }

    pub fn close(&mut self, handle: Handle) -> Result<()> {
        self.request(handle.link, Frame::new(Command::Close).with(FieldId::Handle, handle.id))?;
        self.containers.remove(&handle);
        self.pop_callbacks.remove(&handle);
        Ok(())
    }

    // =========================================================================
    // Records
    // =========================================================================

    fn handle_frame(command: Command, handle: Handle) -> Frame {
        Frame::new(command).with(FieldId::Handle, handle.id)
    }

    fn record_from(answer: &Frame) -> Record {
        Record {
            key: answer.data(FieldId::Key),
            value: answer.data(FieldId::Value),
            metadata: answer.data(FieldId::Metadata),
        }
    }

    pub fn push_back(&mut self, handle: Handle, value: impl Into<Data>, metadata: impl Into<Data>) -> Result<()> {
        let frame = Self::handle_frame(Command::PushBack, handle)
            .with_present(FieldId::Value, &value.into())
            .with_present(FieldId::Metadata, &metadata.into());
        self.execute(handle.link, frame)
    }

    pub fn push_front(&mut self, handle: Handle, value: impl Into<Data>, metadata: impl Into<Data>) -> Result<()> {
        let frame = Self::handle_frame(Command::PushFront, handle)
            .with_present(FieldId::Value, &value.into())
            .with_present(FieldId::Metadata, &metadata.into());
        self.execute(handle.link, frame)
    }

    pub fn pop_back(&mut self, handle: Handle) -> Result<Record> {
        let answer = self.request(handle.link, Self::handle_frame(Command::PopBack, handle))?;
        Ok(Self::record_from(&answer))
    }

    pub fn pop_front(&mut self, handle: Handle) -> Result<Record> {
        let answer = self.request(handle.link, Self::handle_frame(Command::PopFront, handle))?;
        Ok(Self::record_from(&answer))
    }

    pub fn set(
        &mut self,
        handle: Handle,
        key: impl Into<Data>,
        value: impl Into<Data>,
        metadata: impl Into<Data>,
    ) -> Result<()> {
        let frame = Self::handle_frame(Command::Set, handle)
            .with_present(FieldId::Key, &key.into())
            .with_present(FieldId::Value, &value.into())
            .with_present(FieldId::Metadata, &metadata.into());
        self.execute(handle.link, frame)
    }

    pub fn insert(
        &mut self,
        handle: Handle,
        key: impl Into<Data>,
        value: impl Into<Data>,
        metadata: impl Into<Data>,
    ) -> Result<()> {
        let frame = Self::handle_frame(Command::Insert, handle)
            .with_present(FieldId::Key, &key.into())
            .with_present(FieldId::Value, &value.into())
            .with_present(FieldId::Metadata, &metadata.into());
        self.execute(handle.link, frame)
    }

    pub fn delete(&mut self, handle: Handle, key: impl Into<Data>) -> Result<()> {
        let frame = Self::handle_frame(Command::Delete, handle).with_present(FieldId::Key, &key.into());
        self.execute(handle.link, frame)
    }

    pub fn clear(&mut self, handle: Handle) -> Result<()> {
        self.execute(handle.link, Self::handle_frame(Command::Clear, handle))
    }

    pub fn get(&mut self, handle: Handle, key: impl Into<Data>) -> Result<Record> {
        let frame = Self::handle_frame(Command::Get, handle).with(FieldId::Key, key);
        let answer = self.request(handle.link, frame)?;
        Ok(Self::record_from(&answer))
    }

    pub fn count(&mut self, handle: Handle) -> Result<usize> {
        let answer = self.request(handle.link, Self::handle_frame(Command::Count, handle))?;
        let count = answer.require_int(FieldId::Value)?;
        usize::try_from(count).map_err(|_| TesseraError::Protocol(format!("negative count {}", count)))
    }

    pub fn get_property(&mut self, handle: Handle, key: &str) -> Result<String> {
        let frame = Self::handle_frame(Command::PropGet, handle).with(FieldId::Key, key);
        let answer = self.request(handle.link, frame)?;
        answer.require_string(FieldId::Value)
    }

    pub fn set_property(&mut self, handle: Handle, key: &str, value: &str) -> Result<()> {
        let frame = Self::handle_frame(Command::PropSet, handle)
            .with(FieldId::Key, key)
            .with(FieldId::Value, value);
        self.execute(handle.link, frame)
    }

    /// Records in `[start, end)`; with an expression, string keys matching it
    /// (and `end` limits the number of results)
    pub fn query(&mut self, handle: Handle, start: i32, end: i32, expression: Option<&str>) -> Result<Vec<Record>> {
        let mut frame = Self::handle_frame(Command::Query, handle)
            .with(FieldId::StartRecord, start)
            .with(FieldId::End, end);
        if let Some(expression) = expression {
            frame.push(FieldId::QueryExpression, expression);
        }

        let answer = self.request(handle.link, frame)?;
        let query_id = answer.require_int(FieldId::QueryId)?;

        let mut results = Vec::new();
        loop {
            let item = self.recv_from(handle.link)?;
            if !item.is_command(Command::QueryItem) || item.int(FieldId::QueryId) != Some(query_id) {
                tracing::warn!("Unexpected frame while reading query {}: {}", query_id, item);
                continue;
            }
            if item.get(FieldId::Key).is_none() {
                return Ok(results);
            }
            results.push(Self::record_from(&item));
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to a container's events
    ///
    /// With a `start`, the records from that position on are replayed first,
    /// followed by a `snapshot_end` event.
    pub fn subscribe<F>(&mut self, handle: Handle, start: Option<Data>, callback: F) -> Result<()>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let mut frame = Self::handle_frame(Command::Subscribe, handle);
        if let Some(start) = start {
            frame.push(FieldId::Key, start);
        }
        self.request(handle.link, frame)?;

        let callback: SharedCallback = Arc::new(Mutex::new(Box::new(callback)));
        if let Some(state) = self.containers.get_mut(&handle) {
            state.callback = Some(callback);
        }
        Ok(())
    }

    pub fn unsubscribe(&mut self, handle: Handle) -> Result<()> {
        self.request(handle.link, Self::handle_frame(Command::Unsubscribe, handle))?;
        if let Some(state) = self.containers.get_mut(&handle) {
            state.callback = None;
        }
        Ok(())
    }

    /// Pop the next record as soon as there is one; `callback` gets it once
    pub fn wait_and_pop_next<F>(&mut self, handle: Handle, callback: F) -> Result<()>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.request(handle.link, Self::handle_frame(Command::WaitAndPopNext, handle))?;
        self.pop_callbacks
            .entry(handle)
            .or_default()
            .push_back(Box::new(callback));
        Ok(())
    }

    pub fn group_add(&mut self, group: &str, container_name: &str) -> Result<()> {
        let frame = Frame::new(Command::GroupAdd)
            .with(FieldId::GroupName, group)
            .with(FieldId::ContainerName, container_name);
        self.execute(LinkId::Primary, frame)
    }

    /// Subscribe to every current and future member of a group
    ///
    /// Members arrive as new handles; `callback` receives the events of all
    /// of them.
    pub fn group_subscribe<F>(&mut self, group: &str, start: Option<&str>, callback: F) -> Result<()>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let callback: SharedCallback = Arc::new(Mutex::new(Box::new(callback)));
        self.group_callbacks
            .insert((LinkId::Primary, group.to_string()), callback);

        let mut frame = Frame::new(Command::GroupSubscribe).with(FieldId::GroupName, group);
        if let Some(start) = start {
            frame.push(FieldId::StartRecord, start);
        }
        if let Err(e) = self.request(LinkId::Primary, frame) {
            self.group_callbacks.remove(&(LinkId::Primary, group.to_string()));
            return Err(e);
        }
        Ok(())
    }

    fn on_new_group_container(&mut self, link: LinkId, frame: &Frame) {
        let (Some(id), Some(group), Some(name)) = (
            frame.int(FieldId::Handle),
            frame.string(FieldId::GroupName),
            frame.string(FieldId::ContainerName),
        ) else {
            tracing::warn!("Malformed group notification: {}", frame);
            return;
        };

        let callback = self.group_callbacks.get(&(link, group.clone())).cloned();
        tracing::debug!("Group {} delivered {} as handle {} on {}", group, name, id, link);
        self.containers.insert(
            Handle { link, id },
            ContainerState {
                name,
                container_type: frame.string(FieldId::ContainerType).unwrap_or_default(),
                group: Some(group),
                callback,
            },
        );
    }

    // =========================================================================
    // Receiving
    // =========================================================================

    /// Wait on every link at once
    ///
    /// Returns the link a frame came from together with the frame, or `None`
    /// on timeout. A `None` timeout waits forever.
    pub fn receive_any(&mut self, timeout: Option<Duration>) -> Result<Option<(LinkId, Frame)>> {
        let (link, received) = {
            let links: Vec<&Link> = std::iter::once(&self.primary)
                .chain(self.clusters.iter())
                .filter(|l| l.is_connected())
                .collect();
            if links.is_empty() {
                return Err(TesseraError::Network("no connected link".to_string()));
            }

            let mut select = Select::new();
            for link in &links {
                select.recv(link.frames());
            }
            let operation = match timeout {
                Some(timeout) => match select.select_timeout(timeout) {
                    Ok(operation) => operation,
                    Err(_) => return Ok(None),
                },
                None => select.select(),
            };
            let index = operation.index();
            let link = &links[index];
            (link.id(), operation.recv(link.frames()))
        };

        let frame = match received {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                self.link_mut(link)?.disconnect();
                return Err(e);
            }
            Err(_) => {
                self.link_mut(link)?.disconnect();
                return Err(TesseraError::Network(format!("{} link is closed", link)));
            }
        };

        self.trace_frame(link, TraceDirection::Received, &frame);
        Ok(Some((link, frame)))
    }

    fn event_from(&self, link: LinkId, frame: &Frame) -> Result<Event> {
        let handle = Handle {
            link,
            id: frame.require_int(FieldId::Handle)?,
        };
        let code = frame.require_int(FieldId::EventCode)?;
        let event_code = Command::from_i32(code)
            .ok_or_else(|| TesseraError::Protocol(format!("invalid event code {}", code)))?;

        Ok(Event {
            handle,
            container_name: self.container_name(handle).unwrap_or_default().to_string(),
            event_code,
            key: frame.data(FieldId::Key),
            value: frame.data(FieldId::Value),
            metadata: frame.data(FieldId::Metadata),
        })
    }

    /// Next event from any link, without dispatching it
    pub fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<Event>> {
        if let Some((link, frame)) = self.pending_events.pop_front() {
            return self.event_from(link, &frame).map(Some);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let Some((link, frame)) = self.receive_any(remaining)? else {
                return Ok(None);
            };

            match self.absorb(link, frame) {
                None => {
                    if let Some((link, frame)) = self.pending_events.pop_front() {
                        return self.event_from(link, &frame).map(Some);
                    }
                }
                Some(other) => tracing::warn!("Unexpected frame outside a request: {}", other),
            }
        }
    }

    /// Run the callback an event belongs to
    pub fn dispatch_event(&mut self, event: &Event) {
        if event.event_code == Command::WaitAndPopNext {
            let callback = self
                .pop_callbacks
                .get_mut(&event.handle)
                .and_then(VecDeque::pop_front);
            match callback {
                Some(mut callback) => callback(event),
                None => tracing::warn!("wait_and_pop_next event without a waiter on {:?}", event.handle),
            }
            return;
        }

        let callback = self
            .containers
            .get(&event.handle)
            .and_then(|c| c.callback.clone());
        match callback {
            Some(callback) => {
                let mut callback = callback.lock();
                (*callback)(event)
            }
            None => tracing::debug!("No callback for event on {:?}", event.handle),
        }
    }

    /// Wait for one event and dispatch it. Returns false on timeout.
    pub fn receive_next_pending_event(&mut self, timeout: Option<Duration>) -> Result<bool> {
        match self.next_event(timeout)? {
            Some(event) => {
                self.dispatch_event(&event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Dispatch events that already arrived, at most `max`
    pub fn dispatch_pending_events(&mut self, max: usize) -> Result<usize> {
        let mut dispatched = 0;
        while dispatched < max && self.receive_next_pending_event(Some(Duration::ZERO))? {
            dispatched += 1;
        }
        Ok(dispatched)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Parse a cluster map value: `"host:port"`, a bare port, or a bare host
fn parse_cluster_target(target: &Data, default_host: &str, default_port: u16) -> Result<(String, u16)> {
    let invalid = || TesseraError::Protocol(format!("invalid cluster address {}", target));

    match target {
        Data::Int(port) => Ok((default_host.to_string(), u16::try_from(*port).map_err(|_| invalid())?)),
        Data::String(_) => {
            let text = target.to_text();
            let text = text.trim();
            match text.rsplit_once(':') {
                Some((host, port)) => Ok((host.to_string(), port.parse().map_err(|_| invalid())?)),
                None => match text.parse::<u16>() {
                    Ok(port) => Ok((default_host.to_string(), port)),
                    Err(_) if !text.is_empty() => Ok((text.to_string(), default_port)),
                    Err(_) => Err(invalid()),
                },
            }
        }
        _ => Err(invalid()),
    }
}
