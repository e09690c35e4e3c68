//! Container registry
//!
//! Containers are looked up by name alone; the type only matters on creation
//! (and is checked on open when the caller names one).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, TesseraError};
use super::{Container, VolatileList, VolatileMap};

/// Type name of [`VolatileList`]
pub const VOLATILE_LIST: &str = "volatile_list";

/// Type name of [`VolatileMap`]
pub const VOLATILE_MAP: &str = "volatile_map";

/// Owns every container of the server
pub struct ContainerManager {
    containers: RwLock<HashMap<String, Arc<dyn Container>>>,

    /// alias -> real type
    aliases: RwLock<HashMap<String, String>>,

    /// Next storage id handed out
    next_id: AtomicU64,
}

impl Default for ContainerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerManager {
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Make `alias` usable wherever a container type is expected
    pub fn add_alias(&self, alias: &str, real_type: &str) -> Result<()> {
        let resolved = self.resolve_type(real_type);
        if !Self::is_supported(&resolved) {
            return Err(TesseraError::Config(format!(
                "alias {} points to unknown container type {}",
                alias, real_type
            )));
        }
        tracing::debug!("Container type alias {} -> {}", alias, resolved);
        self.aliases.write().insert(alias.to_string(), resolved);
        Ok(())
    }

    /// Follow aliases until a real type name is reached
    pub fn resolve_type(&self, container_type: &str) -> String {
        let aliases = self.aliases.read();
        let mut current = container_type.to_string();
        // aliases cannot be longer than the table itself, so this ends
        for _ in 0..=aliases.len() {
            match aliases.get(&current) {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        current
    }

    fn is_supported(container_type: &str) -> bool {
        container_type == VOLATILE_LIST || container_type == VOLATILE_MAP
    }

    /// Create a container, or return the existing one with that name
    ///
    /// Fails if a container with the same name but another type exists.
    pub fn create(&self, container_type: &str, name: &str) -> Result<Arc<dyn Container>> {
        if name.is_empty() {
            return Err(TesseraError::MissingParameter("container name expected".to_string()));
        }

        let resolved = self.resolve_type(container_type);
        let mut containers = self.containers.write();

        if let Some(existing) = containers.get(name) {
            if existing.container_type() != resolved {
                return Err(TesseraError::Container(format!(
                    "container {} already exists with type {}",
                    name,
                    existing.container_type()
                )));
            }
            return Ok(Arc::clone(existing));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let container: Arc<dyn Container> = match resolved.as_str() {
            VOLATILE_LIST => Arc::new(VolatileList::new(id, name, VOLATILE_LIST)),
            VOLATILE_MAP => Arc::new(VolatileMap::new(id, name, VOLATILE_MAP)),
            other => {
                return Err(TesseraError::Container(format!(
                    "unsupported container type: {}",
                    other
                )))
            }
        };

        tracing::debug!("Created container {} ({}), storage id {}", name, resolved, id);
        containers.insert(name.to_string(), Arc::clone(&container));
        Ok(container)
    }

    /// Open an existing container
    ///
    /// `container_type` is checked only when given and non-empty.
    pub fn open(&self, container_type: Option<&str>, name: &str) -> Result<Arc<dyn Container>> {
        let container = self
            .containers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TesseraError::NoSuchObject(format!("no such container: {}", name)))?;

        if let Some(wanted) = container_type.filter(|t| !t.is_empty()) {
            let resolved = self.resolve_type(wanted);
            if resolved != container.container_type() {
                return Err(TesseraError::Container(format!(
                    "container {} has type {}, not {}",
                    name,
                    container.container_type(),
                    resolved
                )));
            }
        }

        Ok(container)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.containers.read().contains_key(name)
    }

    /// Remove a container from the registry
    ///
    /// Sessions that still hold it keep a working reference until they close it.
    pub fn delete(&self, name: &str) -> Result<()> {
        match self.containers.write().remove(name) {
            Some(_) => {
                tracing::debug!("Deleted container {}", name);
                Ok(())
            }
            None => Err(TesseraError::NoSuchObject(format!("no such container: {}", name))),
        }
    }

    /// Names of all containers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.read().keys().cloned().collect();
        names.sort();
        names
    }
}
