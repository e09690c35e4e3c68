//! Operations shared by the binary and text handlers
//!
//! Every mutation calls exactly one container operation and then publishes
//! the matching event. Operations that can satisfy a pending
//! `wait_and_pop_next` serve the waiters afterwards.

use std::sync::Arc;

use regex::Regex;

use crate::container::{records, Container, Record, VOLATILE_LIST};
use crate::engine::Engine;
use crate::error::{Result, TesseraError};
use crate::network::{HandleInfo, Session};
use crate::protocol::{Command, Data};

/// Resolve a handle and check the session may run `command` on it
pub fn resolve(engine: &Engine, session: &Session, handle: i32, command: &str) -> Result<HandleInfo> {
    let info = session.container(handle)?;
    engine.check_access(session, &info.container_type, &info.name, command)?;
    Ok(info)
}

pub fn create(
    engine: &Engine,
    session: &Session,
    name: &str,
    container_type: Option<&str>,
) -> Result<(i32, HandleInfo)> {
    let container_type = container_type.unwrap_or(VOLATILE_LIST);
    engine.check_access(session, container_type, name, Command::Create.name())?;
    let container = engine.containers().create(container_type, name)?;
    let handle = session.register_container(Arc::clone(&container));
    tracing::debug!("Session {}: create {} -> handle {}", session.id(), name, handle);
    Ok((handle, HandleInfo::new(container, None)))
}

pub fn open(
    engine: &Engine,
    session: &Session,
    name: &str,
    container_type: Option<&str>,
) -> Result<(i32, HandleInfo)> {
    engine.check_access(session, container_type.unwrap_or("*"), name, Command::Open.name())?;
    let container = engine.containers().open(container_type, name)?;
    let handle = session.register_container(Arc::clone(&container));
    tracing::debug!("Session {}: open {} -> handle {}", session.id(), name, handle);
    Ok((handle, HandleInfo::new(container, None)))
}

pub fn push_back(engine: &Engine, container: &Arc<dyn Container>, value: Data, metadata: Data) -> Result<()> {
    let key = container.push_back(value.clone(), metadata.clone())?;
    engine.publish(container, Command::PushBack, key, value, metadata);
    engine.subscriptions().serve_waiters(container);
    Ok(())
}

pub fn push_front(engine: &Engine, container: &Arc<dyn Container>, value: Data, metadata: Data) -> Result<()> {
    let key = container.push_front(value.clone(), metadata.clone())?;
    engine.publish(container, Command::PushFront, key, value, metadata);
    engine.subscriptions().serve_waiters(container);
    Ok(())
}

pub fn pop_back(engine: &Engine, container: &Arc<dyn Container>) -> Result<Record> {
    let record = container.pop_back()?;
    engine.publish(container, Command::Delete, record.key.clone(), Data::None, Data::None);
    Ok(record)
}

pub fn pop_front(engine: &Engine, container: &Arc<dyn Container>) -> Result<Record> {
    let record = container.pop_front()?;
    engine.publish(container, Command::Delete, record.key.clone(), Data::None, Data::None);
    Ok(record)
}

pub fn set(engine: &Engine, container: &Arc<dyn Container>, key: Data, value: Data, metadata: Data) -> Result<()> {
    require_key(&key)?;
    container.set(key.clone(), value.clone(), metadata.clone())?;
    engine.publish(container, Command::Set, key, value, metadata);
    engine.subscriptions().serve_waiters(container);
    Ok(())
}

pub fn insert(engine: &Engine, container: &Arc<dyn Container>, key: Data, value: Data, metadata: Data) -> Result<()> {
    require_key(&key)?;
    container.insert(key.clone(), value.clone(), metadata.clone())?;
    engine.publish(container, Command::Insert, key, value, metadata);
    engine.subscriptions().serve_waiters(container);
    Ok(())
}

/// `set` that refuses to create a record
pub fn modify(engine: &Engine, container: &Arc<dyn Container>, key: Data, value: Data, metadata: Data) -> Result<()> {
    container.get_record(&key)?;
    set(engine, container, key, value, metadata)
}

pub fn delete(engine: &Engine, container: &Arc<dyn Container>, key: Data) -> Result<()> {
    require_key(&key)?;
    container.delete(&key)?;
    engine.publish(container, Command::Delete, key, Data::None, Data::None);
    Ok(())
}

pub fn clear(engine: &Engine, container: &Arc<dyn Container>) -> Result<()> {
    container.clear()?;
    engine.publish(container, Command::Clear, Data::None, Data::None, Data::None);
    Ok(())
}

fn require_key(key: &Data) -> Result<()> {
    if key.is_none() {
        return Err(TesseraError::MissingParameter("key expected".to_string()));
    }
    Ok(())
}

/// Run a query, optionally filtering string keys with a regular expression
///
/// With an expression, `end` is a result limit rather than a position: the
/// filter runs over everything from `start` on.
pub fn query(container: &Arc<dyn Container>, start: i32, end: i32, expression: Option<&str>) -> Result<Vec<Record>> {
    let expression = expression.filter(|e| !e.is_empty());
    let Some(expression) = expression else {
        return Ok(records(container.query(start, end, &Data::None)?).collect());
    };

    let regex = Regex::new(&format!("^(?:{})$", expression))
        .map_err(|e| TesseraError::Protocol(format!("invalid query expression: {}", e)))?;
    let limit = usize::try_from(end).ok().filter(|l| *l > 0).unwrap_or(usize::MAX);

    Ok(records(container.query(start, 0, &Data::None)?)
        .filter(|r| match &r.key {
            Data::String(key) => regex.is_match(&String::from_utf8_lossy(key)),
            _ => false,
        })
        .take(limit)
        .collect())
}

/// Subscription start from a client supplied value; `__none__` means none
pub fn subscription_start(start: &Data) -> String {
    match start {
        Data::None => String::new(),
        Data::String(s) if s.as_slice() == b"__none__" => String::new(),
        other => other.to_text(),
    }
}

pub fn group_add(engine: &Engine, session: &Session, group: &str, container_name: &str) -> Result<bool> {
    let container = engine.containers().open(None, container_name)?;
    engine.check_access(session, container.container_type(), container_name, Command::GroupAdd.name())?;
    let added = engine.subscriptions().group_add(group, container)?;
    tracing::debug!(
        "Session {}: group_add {} <- {} ({})",
        session.id(),
        group,
        container_name,
        if added { "new member" } else { "already a member" }
    );
    Ok(added)
}
