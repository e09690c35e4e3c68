//! Binary protocol handlers

use std::sync::Arc;

use crate::container::Container;
use crate::engine::Engine;
use crate::error::{Result, TesseraError};
use crate::network::Session;
use crate::protocol::{Command, Data, FieldId, Frame};
use super::{ops, BinaryReply};

type Reply = Result<BinaryReply>;

fn answer(frame: Frame) -> Reply {
    Ok(BinaryReply::Answer(frame))
}

fn target(engine: &Engine, session: &Session, frame: &Frame) -> Result<Arc<dyn Container>> {
    let handle = frame.require_int(FieldId::Handle)?;
    let command = frame.command().map(|c| c.name()).unwrap_or_default();
    Ok(ops::resolve(engine, session, handle, command)?.container)
}

fn record_answer(key: &Data, value: &Data, metadata: &Data) -> Frame {
    Frame::answer()
        .with_present(FieldId::Key, key)
        .with_present(FieldId::Value, value)
        .with_present(FieldId::Metadata, metadata)
}

pub fn ping(_engine: &Engine, _session: &Arc<Session>, frame: &Frame) -> Reply {
    let value = frame
        .get(FieldId::Value)
        .ok_or_else(|| TesseraError::MissingParameter("value expected".to_string()))?;
    answer(Frame::answer().with(FieldId::Value, value.clone()))
}

pub fn create(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let name = frame.require_string(FieldId::Name)?;
    let container_type = frame.string(FieldId::Type);
    let (handle, info) = ops::create(engine, session, &name, container_type.as_deref())?;
    answer(
        Frame::answer()
            .with(FieldId::Handle, handle)
            .with(FieldId::Type, info.container_type),
    )
}

pub fn open(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let name = frame.require_string(FieldId::Name)?;
    let container_type = frame.string(FieldId::Type);
    let (handle, info) = ops::open(engine, session, &name, container_type.as_deref())?;
    answer(
        Frame::answer()
            .with(FieldId::Handle, handle)
            .with(FieldId::Type, info.container_type),
    )
}

pub fn close(_engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    session.close_handle(frame.require_int(FieldId::Handle)?)?;
    answer(Frame::answer())
}

pub fn push_back(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    ops::push_back(engine, &container, frame.data(FieldId::Value), frame.data(FieldId::Metadata))?;
    answer(Frame::answer())
}

pub fn push_front(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    ops::push_front(engine, &container, frame.data(FieldId::Value), frame.data(FieldId::Metadata))?;
    answer(Frame::answer())
}

pub fn pop_back(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    let record = ops::pop_back(engine, &container)?;
    answer(record_answer(&record.key, &record.value, &record.metadata))
}

pub fn pop_front(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    let record = ops::pop_front(engine, &container)?;
    answer(record_answer(&record.key, &record.value, &record.metadata))
}

pub fn set(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    ops::set(
        engine,
        &container,
        frame.data(FieldId::Key),
        frame.data(FieldId::Value),
        frame.data(FieldId::Metadata),
    )?;
    answer(Frame::answer())
}

pub fn insert(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    ops::insert(
        engine,
        &container,
        frame.data(FieldId::Key),
        frame.data(FieldId::Value),
        frame.data(FieldId::Metadata),
    )?;
    answer(Frame::answer())
}

pub fn delete(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    ops::delete(engine, &container, frame.data(FieldId::Key))?;
    answer(Frame::answer())
}

pub fn clear(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    ops::clear(engine, &container)?;
    answer(Frame::answer())
}

pub fn get(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    let key = frame
        .get(FieldId::Key)
        .ok_or_else(|| TesseraError::MissingParameter("key expected".to_string()))?;
    let record = container.get_record(key)?;
    answer(record_answer(&record.key, &record.value, &record.metadata))
}

pub fn count(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    let count = i32::try_from(container.record_count()).unwrap_or(i32::MAX);
    answer(Frame::answer().with(FieldId::Value, count))
}

pub fn propget(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    let key = frame.require_string(FieldId::Key)?;
    let value = container.get_property(&key)?;
    answer(
        Frame::answer()
            .with(FieldId::Key, key)
            .with(FieldId::Value, value),
    )
}

pub fn propset(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    let key = frame.require_string(FieldId::Key)?;
    let value = frame.require_string(FieldId::Value)?;
    container.set_property(&key, &value)?;
    answer(Frame::answer())
}

pub fn query(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let container = target(engine, session, frame)?;
    let start = frame.int(FieldId::StartRecord).unwrap_or(0);
    let end = frame.int(FieldId::End).unwrap_or(0);
    let expression = frame.string(FieldId::QueryExpression);

    let results = ops::query(&container, start, end, expression.as_deref())?;
    let query_id = engine.next_query_id() as i32;

    session.send_frame(Frame::answer().with(FieldId::QueryId, query_id))?;
    for record in results {
        session.send_frame(
            Frame::new(Command::QueryItem)
                .with(FieldId::QueryId, query_id)
                .with_present(FieldId::Key, &record.key)
                .with_present(FieldId::Value, &record.value)
                .with_present(FieldId::Metadata, &record.metadata),
        )?;
    }
    session.send_frame(Frame::new(Command::QueryItem).with(FieldId::QueryId, query_id))?;

    Ok(BinaryReply::Sent)
}

pub fn subscribe(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let handle = frame.require_int(FieldId::Handle)?;
    let container = ops::resolve(engine, session, handle, Command::Subscribe.name())?.container;
    if engine.subscriptions().is_subscribed(session.id(), handle) {
        return Err(TesseraError::Protocol(format!("handle {} already subscribed", handle)));
    }
    let start = ops::subscription_start(&frame.data(FieldId::Key));

    // the answer must be queued before the worker can send any snapshot event
    session.send_frame(Frame::answer())?;
    engine.subscriptions().subscribe(session, handle, container, &start);
    Ok(BinaryReply::Sent)
}

pub fn unsubscribe(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let handle = frame.require_int(FieldId::Handle)?;
    session.container(handle)?;
    if !engine.subscriptions().unsubscribe(session.id(), handle) {
        return Err(TesseraError::Protocol(format!("handle {} is not subscribed", handle)));
    }
    answer(Frame::answer())
}

pub fn wait_and_pop_next(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let handle = frame.require_int(FieldId::Handle)?;
    let container = ops::resolve(engine, session, handle, Command::WaitAndPopNext.name())?.container;

    session.send_frame(Frame::answer())?;
    if let Err(e) = engine.subscriptions().wait_and_pop_next(session, handle, container) {
        tracing::warn!("Session {}: wait_and_pop_next on {} failed: {}", session.id(), handle, e);
    }
    Ok(BinaryReply::Sent)
}

pub fn group_add(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let group = frame.require_string(FieldId::GroupName)?;
    let container_name = frame.require_string(FieldId::ContainerName)?;
    ops::group_add(engine, session, &group, &container_name)?;
    answer(Frame::answer())
}

pub fn group_subscribe(engine: &Engine, session: &Arc<Session>, frame: &Frame) -> Reply {
    let group = frame.require_string(FieldId::GroupName)?;
    let start = ops::subscription_start(&frame.data(FieldId::StartRecord));

    session.send_frame(Frame::answer())?;
    if let Err(e) = engine.subscriptions().group_subscribe(session, &group, &start) {
        tracing::warn!("Session {}: group_subscribe {} failed: {}", session.id(), group, e);
    }
    Ok(BinaryReply::Sent)
}
