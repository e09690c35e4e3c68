//! Text protocol handlers
//!
//! Commands that carry record data announce a data block with field
//! triplets. The first call returns [`TextReply::NeedMoreData`]; the session
//! reads the block and calls the same handler again with it.

use std::sync::Arc;

use crate::auth::Rule;
use crate::container::{Container, Record};
use crate::engine::Engine;
use crate::error::{Result, TesseraError};
use crate::network::Session;
use crate::protocol::text::{self, RecordFields};
use crate::protocol::{Command, Data, TextCommand};
use super::{ops, TextReply};

type Reply = Result<TextReply>;

/// Object type and name server wide commands are checked against
const SERVER_OBJECT: &str = "__server__";

fn ok(words: &[&str]) -> Reply {
    Ok(TextReply::Answer(text::answer_ok(words)))
}

fn target(engine: &Engine, session: &Session, command: &TextCommand, op: Command) -> Result<Arc<dyn Container>> {
    Ok(ops::resolve(engine, session, command.handle()?, op.name())?.container)
}

enum Block {
    Ready(RecordFields),
    Need(usize),
}

/// Record fields announced from parameter `from` on
///
/// A single bare parameter is taken as the key itself.
fn read_block(command: &TextCommand, from: usize, data: &[u8]) -> Result<Block> {
    let params = command.params.get(from..).unwrap_or(&[]);
    if let [key] = params {
        return Ok(Block::Ready(RecordFields {
            key: text::param_to_data(key),
            ..RecordFields::default()
        }));
    }

    let specs = text::parse_field_specs(params)?;
    let size = text::data_block_size(&specs)?;
    if data.len() < size {
        return Ok(Block::Need(size));
    }
    Ok(Block::Ready(text::decode_data_block(&specs, data)?))
}

fn require_value(fields: &RecordFields) -> Result<()> {
    if fields.value.is_none() {
        return Err(TesseraError::MissingParameter("value expected".to_string()));
    }
    Ok(())
}

fn record_answer(record: &Record) -> Reply {
    Ok(TextReply::Answer(text::answer_data(&record.key, &record.value, &record.metadata)))
}

macro_rules! block_or_wait {
    ($command:expr, $from:expr, $data:expr) => {
        match read_block($command, $from, $data)? {
            Block::Ready(fields) => fields,
            Block::Need(size) => return Ok(TextReply::NeedMoreData(size)),
        }
    };
}

// =============================================================================
// Session and server
// =============================================================================

pub fn ping(_engine: &Engine, _session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let mut words = vec!["pong"];
    words.extend(command.params.iter().map(String::as_str));
    ok(&words)
}

pub fn ver(_engine: &Engine, _session: &Arc<Session>, _command: &TextCommand, _data: &[u8]) -> Reply {
    ok(&[crate::VERSION])
}

pub fn protocol(_engine: &Engine, _session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    match command.require_param(0, "protocol name")? {
        "text" => ok(&[]),
        "binary" => Err(TesseraError::Protocol(
            "binary protocol must be requested on the first line".to_string(),
        )),
        other => Err(TesseraError::Protocol(format!("unknown protocol {}", other))),
    }
}

pub fn auth(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let user = command.require_param(0, "user")?;
    let password = command.require_param(1, "password")?;
    engine.authenticate(session, user, password)?;
    ok(&[])
}

pub fn pause(engine: &Engine, session: &Arc<Session>, _command: &TextCommand, _data: &[u8]) -> Reply {
    engine.check_access(session, SERVER_OBJECT, SERVER_OBJECT, "pause")?;
    engine.pause(session.id());
    ok(&[])
}

pub fn resume(engine: &Engine, session: &Arc<Session>, _command: &TextCommand, _data: &[u8]) -> Reply {
    engine.check_access(session, SERVER_OBJECT, SERVER_OBJECT, "resume")?;
    engine.resume();
    ok(&[])
}

pub fn set_permission(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    engine.check_access(session, SERVER_OBJECT, SERVER_OBJECT, "set_permission")?;
    let object_type = engine.containers().resolve_type(command.require_param(0, "object type")?);
    let object_name = command.require_param(1, "object name")?;
    let op = command.require_param(2, "command")?;
    let rule_word = command.require_param(3, "allow or deny")?;
    let rule = Rule::parse(rule_word)
        .ok_or_else(|| TesseraError::Protocol(format!("invalid rule {}", rule_word)))?;

    if !rule_target_exists(engine, &object_type, object_name) {
        return Err(TesseraError::NoSuchObject(format!("no such object {}", object_name)));
    }
    engine.add_rule(&object_type, object_name, op, rule, command.param(4));
    ok(&[])
}

/// A rule names a live container of that type, the server, or every object
fn rule_target_exists(engine: &Engine, object_type: &str, object_name: &str) -> bool {
    if object_name == "*" || object_name == SERVER_OBJECT {
        return true;
    }
    match engine.containers().open(None, object_name) {
        Ok(container) => object_type == "*" || container.container_type() == object_type,
        Err(_) => false,
    }
}

// =============================================================================
// Containers and handles
// =============================================================================

pub fn create(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let name = command.require_param(0, "container name")?;
    if name.starts_with("__") {
        return Err(TesseraError::AccessDenied(format!(
            "container names starting with __ are reserved: {}",
            name
        )));
    }
    let (handle, info) = ops::create(engine, session, name, command.param(1))?;
    ok(&["handle", &handle.to_string(), &info.container_type])
}

pub fn open(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let name = command.require_param(0, "container name")?;
    let (handle, info) = ops::open(engine, session, name, command.param(1))?;
    ok(&["handle", &handle.to_string(), &info.container_type])
}

pub fn close(_engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    session.close_handle(command.handle()?)?;
    ok(&[])
}

pub fn delete_container(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let name = command.require_param(0, "container name")?;
    let container = engine.containers().open(None, name)?;
    engine.check_access(session, container.container_type(), name, "delete_container")?;
    engine.containers().delete(name)?;
    ok(&[])
}

pub fn list_handles(_engine: &Engine, session: &Arc<Session>, _command: &TextCommand, _data: &[u8]) -> Reply {
    let handles = session.handles();
    let mut words = vec![handles.len().to_string()];
    for (handle, name, container_type) in handles {
        words.push(format!("{}:{}:{}", handle, name, container_type));
    }
    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    ok(&words)
}

pub fn container_command(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let container = ops::resolve(engine, session, command.handle()?, "command")?.container;
    let verb = command.params.get(1..).unwrap_or(&[]).join(" ");
    if verb.is_empty() {
        return Err(TesseraError::MissingParameter("command expected".to_string()));
    }
    let result = container.command(&verb)?;
    ok(&[result.as_str()])
}

// =============================================================================
// Records
// =============================================================================

pub fn push_back(engine: &Engine, session: &Arc<Session>, command: &TextCommand, data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::PushBack)?;
    let fields = block_or_wait!(command, 1, data);
    require_value(&fields)?;
    ops::push_back(engine, &container, fields.value, fields.metadata)?;
    ok(&[])
}

pub fn push_front(engine: &Engine, session: &Arc<Session>, command: &TextCommand, data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::PushFront)?;
    let fields = block_or_wait!(command, 1, data);
    require_value(&fields)?;
    ops::push_front(engine, &container, fields.value, fields.metadata)?;
    ok(&[])
}

pub fn pop_back(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::PopBack)?;
    record_answer(&ops::pop_back(engine, &container)?)
}

pub fn pop_front(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::PopFront)?;
    record_answer(&ops::pop_front(engine, &container)?)
}

pub fn set(engine: &Engine, session: &Arc<Session>, command: &TextCommand, data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::Set)?;
    let fields = block_or_wait!(command, 1, data);
    ops::set(engine, &container, fields.key, fields.value, fields.metadata)?;
    ok(&[])
}

pub fn insert(engine: &Engine, session: &Arc<Session>, command: &TextCommand, data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::Insert)?;
    let fields = block_or_wait!(command, 1, data);
    ops::insert(engine, &container, fields.key, fields.value, fields.metadata)?;
    ok(&[])
}

pub fn modify(engine: &Engine, session: &Arc<Session>, command: &TextCommand, data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::Set)?;
    let fields = block_or_wait!(command, 1, data);
    ops::modify(engine, &container, fields.key, fields.value, fields.metadata)?;
    ok(&[])
}

pub fn delete(engine: &Engine, session: &Arc<Session>, command: &TextCommand, data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::Delete)?;
    let fields = block_or_wait!(command, 1, data);
    ops::delete(engine, &container, fields.key)?;
    ok(&[])
}

pub fn clear(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::Clear)?;
    ops::clear(engine, &container)?;
    ok(&[])
}

pub fn get(engine: &Engine, session: &Arc<Session>, command: &TextCommand, data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::Get)?;
    let fields = block_or_wait!(command, 1, data);
    if fields.key.is_none() {
        return Err(TesseraError::MissingParameter("key expected".to_string()));
    }
    record_answer(&container.get_record(&fields.key)?)
}

pub fn get_count(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::Count)?;
    ok(&["count", &container.record_count().to_string()])
}

pub fn get_property(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::PropGet)?;
    let name = command.require_param(1, "property name")?;
    let value = container.get_property(name)?;
    Ok(TextReply::Answer(text::answer_data(
        &Data::from(name),
        &Data::from(value),
        &Data::None,
    )))
}

pub fn set_property(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::PropSet)?;
    let name = command.require_param(1, "property name")?;
    command.require_param(2, "property value")?;
    let value = command.params.get(2..).unwrap_or(&[]).join(" ");
    container.set_property(name, &value)?;
    ok(&[])
}

// =============================================================================
// Queries
// =============================================================================

fn int_param(command: &TextCommand, index: usize) -> Result<i32> {
    match command.param(index) {
        None => Ok(0),
        Some(p) => p
            .parse()
            .map_err(|_| TesseraError::Protocol(format!("invalid number {}", p))),
    }
}

fn send_query(engine: &Engine, session: &Session, results: Vec<Record>) -> Reply {
    let query_id = engine.next_query_id();
    session.send_bytes(text::query_start(query_id))?;
    for record in results {
        session.send_bytes(text::query_item(query_id, &record.key, &record.value, &record.metadata))?;
    }
    session.send_bytes(text::query_end(query_id))?;
    Ok(TextReply::Sent)
}

/// `query <handle> [start] [end]`
pub fn query(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::Query)?;
    let results = ops::query(&container, int_param(command, 1)?, int_param(command, 2)?, None)?;
    send_query(engine, session, results)
}

/// `queryex <handle> <expression> [start] [limit]`
pub fn queryex(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let container = target(engine, session, command, Command::Query)?;
    let expression = command.require_param(1, "query expression")?;
    let results = ops::query(
        &container,
        int_param(command, 2)?,
        int_param(command, 3)?,
        Some(expression),
    )?;
    send_query(engine, session, results)
}

// =============================================================================
// Subscriptions
// =============================================================================

pub fn subscribe(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let handle = command.handle()?;
    let container = ops::resolve(engine, session, handle, Command::Subscribe.name())?.container;
    if engine.subscriptions().is_subscribed(session.id(), handle) {
        return Err(TesseraError::Protocol(format!("handle {} already subscribed", handle)));
    }
    let start = ops::subscription_start(&command.param(1).map(text::param_to_data).unwrap_or_default());

    session.send_bytes(text::answer_ok(&[]))?;
    engine.subscriptions().subscribe(session, handle, container, &start);
    Ok(TextReply::Sent)
}

pub fn unsubscribe(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let handle = command.handle()?;
    session.container(handle)?;
    if !engine.subscriptions().unsubscribe(session.id(), handle) {
        return Err(TesseraError::Protocol(format!("handle {} is not subscribed", handle)));
    }
    ok(&[])
}

pub fn wait_and_pop_next(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let handle = command.handle()?;
    let container = ops::resolve(engine, session, handle, Command::WaitAndPopNext.name())?.container;

    session.send_bytes(text::answer_ok(&[]))?;
    if let Err(e) = engine.subscriptions().wait_and_pop_next(session, handle, container) {
        tracing::warn!("Session {}: wait_and_pop_next on {} failed: {}", session.id(), handle, e);
    }
    Ok(TextReply::Sent)
}

pub fn group_add(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let group = command.require_param(0, "group name")?;
    let container_name = command.require_param(1, "container name")?;
    ops::group_add(engine, session, group, container_name)?;
    ok(&[])
}

pub fn group_subscribe(engine: &Engine, session: &Arc<Session>, command: &TextCommand, _data: &[u8]) -> Reply {
    let group = command.require_param(0, "group name")?.to_string();
    let start = ops::subscription_start(&command.param(1).map(Data::from).unwrap_or_default());

    session.send_bytes(text::answer_ok(&[]))?;
    if let Err(e) = engine.subscriptions().group_subscribe(session, &group, &start) {
        tracing::warn!("Session {}: group_subscribe {} failed: {}", session.id(), group, e);
    }
    Ok(TextReply::Sent)
}
