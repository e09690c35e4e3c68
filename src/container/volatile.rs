//! In-memory containers
//!
//! `VolatileList` is a position indexed sequence, `VolatileMap` a sorted
//! string keyed map. Neither survives a restart.

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::RwLock;

use crate::error::{Result, TesseraError};
use crate::protocol::Data;
use super::{normalize_query_limits, Container, ContainerKind, Record, ResultSet, VecResultSet};

// =============================================================================
// Shared Pieces
// =============================================================================

/// String properties attached to a container
#[derive(Default)]
struct Properties(RwLock<HashMap<String, String>>);

impl Properties {
    fn set(&self, name: &str, value: &str) {
        self.0.write().insert(name.to_string(), value.to_string());
    }

    fn get(&self, container: &str, name: &str) -> Result<String> {
        self.0
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TesseraError::NoSuchObject(format!("{}: no property {}", container, name)))
    }
}

fn reject_filter(filter: &Data) -> Result<()> {
    if filter.is_none() {
        Ok(())
    } else {
        Err(TesseraError::Container("query filters are not supported by volatile containers".to_string()))
    }
}

/// Answers for the verbs every volatile container understands
fn common_command(container: &dyn Container, command: &str) -> Result<String> {
    match command.trim() {
        "count" => Ok(container.record_count().to_string()),
        "type" => Ok(container.container_type().to_string()),
        "name" => Ok(container.name().to_string()),
        other => Err(TesseraError::Container(format!("command not supported: {}", other))),
    }
}

// =============================================================================
// VolatileList
// =============================================================================

/// Position indexed in-memory list
///
/// Keys are integer positions; negative positions count from the end.
pub struct VolatileList {
    id: u64,
    name: String,
    container_type: String,
    items: RwLock<VecDeque<(Data, Data)>>,
    properties: Properties,
}

impl VolatileList {
    pub fn new(id: u64, name: impl Into<String>, container_type: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            container_type: container_type.into(),
            items: RwLock::new(VecDeque::new()),
            properties: Properties::default(),
        }
    }

    /// Resolve a key into a position inside `[0, len)`
    fn index(&self, key: &Data, len: usize) -> Result<usize> {
        let raw = match key {
            Data::Int(v) => *v as i64,
            Data::String(_) => key
                .to_text()
                .trim()
                .parse::<i64>()
                .map_err(|_| TesseraError::Container(format!("{}: invalid index {}", self.name, key)))?,
            _ => {
                return Err(TesseraError::MissingParameter(format!(
                    "{}: integer key expected",
                    self.name
                )))
            }
        };

        let resolved = if raw < 0 { len as i64 + raw } else { raw };
        if resolved < 0 || resolved >= len as i64 {
            return Err(TesseraError::NoSuchObject(format!(
                "{}: index {} out of range (count {})",
                self.name, raw, len
            )));
        }
        Ok(resolved as usize)
    }

    fn record_at(index: usize, item: &(Data, Data)) -> Record {
        Record {
            key: Data::Int(index as i32),
            value: item.0.clone(),
            metadata: item.1.clone(),
        }
    }
}

impl Container for VolatileList {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn container_type(&self) -> &str {
        &self.container_type
    }

    fn kind(&self) -> ContainerKind {
        ContainerKind::Sequence
    }

    fn record_count(&self) -> usize {
        self.items.read().len()
    }

    fn push_back(&self, value: Data, metadata: Data) -> Result<Data> {
        let mut items = self.items.write();
        items.push_back((value, metadata));
        Ok(Data::Int(items.len() as i32 - 1))
    }

    fn push_front(&self, value: Data, metadata: Data) -> Result<Data> {
        self.items.write().push_front((value, metadata));
        Ok(Data::Int(0))
    }

    fn pop_back(&self) -> Result<Record> {
        let mut items = self.items.write();
        let index = items.len().saturating_sub(1);
        let item = items
            .pop_back()
            .ok_or_else(|| TesseraError::NoSuchObject(format!("{}: empty", self.name)))?;
        Ok(Self::record_at(index, &item))
    }

    fn pop_front(&self) -> Result<Record> {
        let item = self
            .items
            .write()
            .pop_front()
            .ok_or_else(|| TesseraError::NoSuchObject(format!("{}: empty", self.name)))?;
        Ok(Self::record_at(0, &item))
    }

    fn set(&self, key: Data, value: Data, metadata: Data) -> Result<()> {
        let mut items = self.items.write();
        let index = self.index(&key, items.len())?;
        items[index] = (value, metadata);
        Ok(())
    }

    fn insert(&self, key: Data, value: Data, metadata: Data) -> Result<()> {
        let mut items = self.items.write();
        let len = items.len();
        // inserting at `len` appends
        let index = if key == Data::Int(len as i32) {
            len
        } else {
            self.index(&key, len)?
        };
        items.insert(index, (value, metadata));
        Ok(())
    }

    fn delete(&self, key: &Data) -> Result<()> {
        let mut items = self.items.write();
        let index = self.index(key, items.len())?;
        items.remove(index);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.items.write().clear();
        Ok(())
    }

    fn get_record(&self, key: &Data) -> Result<Record> {
        let items = self.items.read();
        let index = self.index(key, items.len())?;
        Ok(Self::record_at(index, &items[index]))
    }

    fn set_property(&self, name: &str, value: &str) -> Result<()> {
        self.properties.set(name, value);
        Ok(())
    }

    fn get_property(&self, name: &str) -> Result<String> {
        self.properties.get(&self.name, name)
    }

    fn command(&self, command: &str) -> Result<String> {
        common_command(self, command)
    }

    fn query(&self, start: i32, end: i32, filter: &Data) -> Result<Box<dyn ResultSet>> {
        reject_filter(filter)?;
        let items = self.items.read();
        let (start, end) = normalize_query_limits(start, end, items.len());
        let records = (start..end)
            .map(|i| Self::record_at(i, &items[i]))
            .collect();
        Ok(Box::new(VecResultSet::new(records)))
    }
}

// =============================================================================
// VolatileMap
// =============================================================================

/// Sorted, string keyed in-memory map
///
/// Integer keys are accepted and stored under their decimal text.
pub struct VolatileMap {
    id: u64,
    name: String,
    container_type: String,
    items: RwLock<BTreeMap<Vec<u8>, (Data, Data)>>,
    properties: Properties,
}

impl VolatileMap {
    pub fn new(id: u64, name: impl Into<String>, container_type: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            container_type: container_type.into(),
            items: RwLock::new(BTreeMap::new()),
            properties: Properties::default(),
        }
    }

    fn map_key(&self, key: &Data) -> Result<Vec<u8>> {
        match key {
            Data::String(s) => Ok(s.clone()),
            Data::Int(_) | Data::Double(_) => Ok(key.to_text().into_bytes()),
            Data::None => Err(TesseraError::MissingParameter(format!("{}: key expected", self.name))),
        }
    }

    fn record(key: &[u8], item: &(Data, Data)) -> Record {
        Record {
            key: Data::String(key.to_vec()),
            value: item.0.clone(),
            metadata: item.1.clone(),
        }
    }

    fn missing(&self, key: &[u8]) -> TesseraError {
        TesseraError::NoSuchObject(format!(
            "{}: key not found: {}",
            self.name,
            String::from_utf8_lossy(key)
        ))
    }
}

impl Container for VolatileMap {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn container_type(&self) -> &str {
        &self.container_type
    }

    fn kind(&self) -> ContainerKind {
        ContainerKind::Map
    }

    fn record_count(&self) -> usize {
        self.items.read().len()
    }

    fn push_back(&self, _value: Data, _metadata: Data) -> Result<Data> {
        Err(TesseraError::Container(format!("{}: maps do not support push_back", self.name)))
    }

    fn push_front(&self, _value: Data, _metadata: Data) -> Result<Data> {
        Err(TesseraError::Container(format!("{}: maps do not support push_front", self.name)))
    }

    fn pop_back(&self) -> Result<Record> {
        let (key, item) = self
            .items
            .write()
            .pop_last()
            .ok_or_else(|| TesseraError::NoSuchObject(format!("{}: empty", self.name)))?;
        Ok(Self::record(&key, &item))
    }

    fn pop_front(&self) -> Result<Record> {
        let (key, item) = self
            .items
            .write()
            .pop_first()
            .ok_or_else(|| TesseraError::NoSuchObject(format!("{}: empty", self.name)))?;
        Ok(Self::record(&key, &item))
    }

    fn set(&self, key: Data, value: Data, metadata: Data) -> Result<()> {
        let key = self.map_key(&key)?;
        self.items.write().insert(key, (value, metadata));
        Ok(())
    }

    fn insert(&self, key: Data, value: Data, metadata: Data) -> Result<()> {
        let key = self.map_key(&key)?;
        let mut items = self.items.write();
        if items.contains_key(&key) {
            return Err(TesseraError::Container(format!(
                "{}: key already exists: {}",
                self.name,
                String::from_utf8_lossy(&key)
            )));
        }
        items.insert(key, (value, metadata));
        Ok(())
    }

    fn delete(&self, key: &Data) -> Result<()> {
        let key = self.map_key(key)?;
        match self.items.write().remove(&key) {
            Some(_) => Ok(()),
            None => Err(self.missing(&key)),
        }
    }

    fn clear(&self) -> Result<()> {
        self.items.write().clear();
        Ok(())
    }

    fn get_record(&self, key: &Data) -> Result<Record> {
        let key = self.map_key(key)?;
        let items = self.items.read();
        let item = items.get(&key).ok_or_else(|| self.missing(&key))?;
        Ok(Self::record(&key, item))
    }

    fn set_property(&self, name: &str, value: &str) -> Result<()> {
        self.properties.set(name, value);
        Ok(())
    }

    fn get_property(&self, name: &str) -> Result<String> {
        self.properties.get(&self.name, name)
    }

    fn command(&self, command: &str) -> Result<String> {
        common_command(self, command)
    }

    fn query(&self, start: i32, end: i32, filter: &Data) -> Result<Box<dyn ResultSet>> {
        reject_filter(filter)?;
        let items = self.items.read();
        let (start, end) = normalize_query_limits(start, end, items.len());
        let records = items
            .iter()
            .skip(start)
            .take(end - start)
            .map(|(k, v)| Self::record(k, v))
            .collect();
        Ok(Box::new(VecResultSet::new(records)))
    }
}
