//! Container groups
//!
//! A group is a named, growing set of containers. Every member is mirrored
//! into the meta container `__meta__/groups/<name>` (member name -> type).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::container::{Container, ContainerManager, VOLATILE_MAP};
use crate::error::{Result, TesseraError};
use crate::protocol::Data;
use super::engine::Subscriber;

/// Prefix of the meta container backing each group
pub const GROUP_META_PREFIX: &str = "__meta__/groups/";

/// A session subscribed to a whole group
#[derive(Clone)]
pub struct GroupSubscriber {
    pub session: Weak<dyn Subscriber>,
    pub session_id: u64,
}

struct Group {
    meta: Arc<dyn Container>,
    members: BTreeMap<String, Arc<dyn Container>>,
    subscribers: Vec<GroupSubscriber>,
}

/// Registry of every group
pub struct GroupManager {
    containers: Arc<ContainerManager>,
    groups: Mutex<HashMap<String, Group>>,
}

impl GroupManager {
    pub fn new(containers: Arc<ContainerManager>) -> Self {
        Self {
            containers,
            groups: Mutex::new(HashMap::new()),
        }
    }

    fn group_entry<'a>(
        &self,
        groups: &'a mut HashMap<String, Group>,
        name: &str,
    ) -> Result<&'a mut Group> {
        if name.is_empty() {
            return Err(TesseraError::MissingParameter("group name expected".to_string()));
        }

        if !groups.contains_key(name) {
            let meta = self
                .containers
                .create(VOLATILE_MAP, &format!("{}{}", GROUP_META_PREFIX, name))?;
            tracing::debug!("Created group {}", name);
            groups.insert(
                name.to_string(),
                Group {
                    meta,
                    members: BTreeMap::new(),
                    subscribers: Vec::new(),
                },
            );
        }

        groups
            .get_mut(name)
            .ok_or_else(|| TesseraError::NoSuchObject(format!("no such group: {}", name)))
    }

    /// Add a member
    ///
    /// Returns `None` if it was already a member, otherwise the subscribers
    /// that must now be given the new container. Both happen under one lock,
    /// so a concurrent `add_subscriber` sees the container either as a member
    /// or through this list, never both.
    pub fn add_container(
        &self,
        group: &str,
        container: Arc<dyn Container>,
    ) -> Result<Option<Vec<GroupSubscriber>>> {
        let mut groups = self.groups.lock();
        let entry = self.group_entry(&mut groups, group)?;

        let name = container.name().to_string();
        if entry.members.contains_key(&name) {
            return Ok(None);
        }

        entry.meta.set(
            Data::from(name.as_str()),
            Data::from(container.container_type()),
            Data::None,
        )?;
        entry.members.insert(name.clone(), container);
        entry.subscribers.retain(|s| s.session.strong_count() > 0);

        tracing::debug!("Group {}: added {}", group, name);
        Ok(Some(entry.subscribers.clone()))
    }

    /// Add a group subscriber, returning the current members
    pub fn add_subscriber(
        &self,
        group: &str,
        session: Weak<dyn Subscriber>,
        session_id: u64,
    ) -> Result<Vec<Arc<dyn Container>>> {
        let mut groups = self.groups.lock();
        let entry = self.group_entry(&mut groups, group)?;
        entry.subscribers.push(GroupSubscriber { session, session_id });
        Ok(entry.members.values().cloned().collect())
    }

    /// Forget every group subscription of a session
    pub fn remove_session(&self, session_id: u64) {
        for group in self.groups.lock().values_mut() {
            group.subscribers.retain(|s| s.session_id != session_id);
        }
    }

    /// Member names of a group, sorted (empty for unknown groups)
    pub fn members(&self, group: &str) -> Vec<String> {
        self.groups
            .lock()
            .get(group)
            .map(|g| g.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, group: &str) -> usize {
        self.groups
            .lock()
            .get(group)
            .map(|g| g.subscribers.len())
            .unwrap_or(0)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
