//! Container Module
//!
//! The storage objects sessions operate on. The server core only talks to
//! them through the [`Container`] trait; the concrete in-memory variants live
//! in [`volatile`].
//!
//! ## Architecture
//! - `Container`: capability interface (push/pop/set/insert/delete/query...)
//! - `ResultSet`: forward-only cursor returned by `Container::query`
//! - `ContainerManager`: name -> container registry, type aliases, storage ids

pub mod volatile;
mod manager;

pub use manager::{ContainerManager, VOLATILE_LIST, VOLATILE_MAP};
pub use volatile::{VolatileList, VolatileMap};

use crate::error::Result;
use crate::protocol::Data;

/// One `(key, value, metadata)` triple
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub key: Data,
    pub value: Data,
    pub metadata: Data,
}

impl Record {
    pub fn new(key: impl Into<Data>, value: impl Into<Data>, metadata: impl Into<Data>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            metadata: metadata.into(),
        }
    }
}

/// Shape of a container, decides which event code a snapshot replays with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Integer keyed, ordered by position (snapshots replay as `push_back`)
    Sequence,
    /// String keyed (snapshots replay as `set`)
    Map,
}

/// Forward-only, single-pass cursor over query results
pub trait ResultSet: Send {
    /// Record under the cursor, `None` once exhausted
    fn current(&self) -> Option<&Record>;

    /// Move to the next record. Returns false when there is none.
    fn advance(&mut self) -> bool;
}

/// Iterator adapter over a boxed result set
pub struct Records(Box<dyn ResultSet>);

impl Iterator for Records {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let record = self.0.current().cloned()?;
        self.0.advance();
        Some(record)
    }
}

/// Consume a result set as an iterator
pub fn records(result_set: Box<dyn ResultSet>) -> Records {
    Records(result_set)
}

/// Result set over records that were already materialized
pub struct VecResultSet {
    records: Vec<Record>,
    position: usize,
}

impl VecResultSet {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records, position: 0 }
    }
}

impl ResultSet for VecResultSet {
    fn current(&self) -> Option<&Record> {
        self.records.get(self.position)
    }

    fn advance(&mut self) -> bool {
        if self.position < self.records.len() {
            self.position += 1;
        }
        self.position < self.records.len()
    }
}

/// The capability interface every container variant exposes
///
/// Implementations are shared across sessions and must do their own
/// synchronization; the server never serializes calls into a container.
pub trait Container: Send + Sync {
    /// Storage id, unique per server process. Events are routed by it.
    fn id(&self) -> u64;

    fn name(&self) -> &str;

    fn container_type(&self) -> &str;

    fn kind(&self) -> ContainerKind;

    fn record_count(&self) -> usize;

    /// Append a record. Returns the key it was stored under.
    fn push_back(&self, value: Data, metadata: Data) -> Result<Data>;

    /// Prepend a record. Returns the key it was stored under.
    fn push_front(&self, value: Data, metadata: Data) -> Result<Data>;

    fn pop_back(&self) -> Result<Record>;

    fn pop_front(&self) -> Result<Record>;

    fn set(&self, key: Data, value: Data, metadata: Data) -> Result<()>;

    fn insert(&self, key: Data, value: Data, metadata: Data) -> Result<()>;

    fn delete(&self, key: &Data) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn get_record(&self, key: &Data) -> Result<Record>;

    fn set_property(&self, name: &str, value: &str) -> Result<()>;

    fn get_property(&self, name: &str) -> Result<String>;

    /// Escape hatch for container specific verbs
    fn command(&self, command: &str) -> Result<String>;

    /// Records in `[start, end)`, after [`normalize_query_limits`]
    fn query(&self, start: i32, end: i32, filter: &Data) -> Result<Box<dyn ResultSet>>;
}

/// Turn possibly negative, possibly zero query limits into a concrete range
///
/// - negative values count from the end
/// - `end == 0` means "up to the last record"
/// - everything is clamped to `[0, count]`, and `start > end` is empty
pub fn normalize_query_limits(start: i32, end: i32, count: usize) -> (usize, usize) {
    let count_i = count as i64;
    let resolve = |v: i32| -> i64 {
        let v = v as i64;
        if v < 0 {
            (count_i + v).max(0)
        } else {
            v.min(count_i)
        }
    };

    let start = resolve(start);
    let end = if end == 0 { count_i } else { resolve(end) };

    if start >= end {
        (start as usize, start as usize)
    } else {
        (start as usize, end as usize)
    }
}

impl std::fmt::Debug for dyn Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}
