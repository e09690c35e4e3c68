//! Command table
//!
//! Built once per engine. Binary commands are keyed by id, text commands by
//! their command word.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::Result;
use crate::network::Session;
use crate::protocol::{Command, Frame, TextCommand};
use super::{binary, text, BinaryReply, TextReply};

pub type BinaryHandler = fn(&Engine, &Arc<Session>, &Frame) -> Result<BinaryReply>;

pub type TextHandler = fn(&Engine, &Arc<Session>, &TextCommand, &[u8]) -> Result<TextReply>;

pub struct CommandTable {
    binary: HashMap<i32, BinaryHandler>,
    text: HashMap<&'static str, TextHandler>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        let mut table = Self {
            binary: HashMap::new(),
            text: HashMap::new(),
        };

        table.add_binary(Command::Ping, binary::ping);
        table.add_binary(Command::Create, binary::create);
        table.add_binary(Command::Open, binary::open);
        table.add_binary(Command::Close, binary::close);
        table.add_binary(Command::PushBack, binary::push_back);
        table.add_binary(Command::PushFront, binary::push_front);
        table.add_binary(Command::PopBack, binary::pop_back);
        table.add_binary(Command::PopFront, binary::pop_front);
        table.add_binary(Command::Set, binary::set);
        table.add_binary(Command::Insert, binary::insert);
        table.add_binary(Command::Delete, binary::delete);
        table.add_binary(Command::Clear, binary::clear);
        table.add_binary(Command::Get, binary::get);
        table.add_binary(Command::Count, binary::count);
        table.add_binary(Command::PropGet, binary::propget);
        table.add_binary(Command::PropSet, binary::propset);
        table.add_binary(Command::Query, binary::query);
        table.add_binary(Command::Subscribe, binary::subscribe);
        table.add_binary(Command::Unsubscribe, binary::unsubscribe);
        table.add_binary(Command::WaitAndPopNext, binary::wait_and_pop_next);
        table.add_binary(Command::GroupAdd, binary::group_add);
        table.add_binary(Command::GroupSubscribe, binary::group_subscribe);

        table.add_text("ping", text::ping);
        table.add_text("ver", text::ver);
        table.add_text("protocol", text::protocol);
        table.add_text("create", text::create);
        table.add_text("open", text::open);
        table.add_text("close", text::close);
        table.add_text("delete_container", text::delete_container);
        table.add_text("list_handles", text::list_handles);
        table.add_text("push_back", text::push_back);
        table.add_text("push_front", text::push_front);
        table.add_text("pop_back", text::pop_back);
        table.add_text("pop_front", text::pop_front);
        table.add_text("modify", text::modify);
        table.add_text("set", text::set);
        table.add_text("insert", text::insert);
        table.add_text("delete", text::delete);
        table.add_text("clear", text::clear);
        table.add_text("get", text::get);
        table.add_text("get_property", text::get_property);
        table.add_text("set_property", text::set_property);
        table.add_text("get_count", text::get_count);
        table.add_text("subscribe", text::subscribe);
        table.add_text("unsubscribe", text::unsubscribe);
        table.add_text("command", text::container_command);
        table.add_text("auth", text::auth);
        table.add_text("pause", text::pause);
        table.add_text("resume", text::resume);
        table.add_text("set_permission", text::set_permission);
        table.add_text("query", text::query);
        table.add_text("queryex", text::queryex);
        table.add_text("group_add", text::group_add);
        table.add_text("group_subscribe", text::group_subscribe);
        table.add_text("wait_and_pop_next", text::wait_and_pop_next);

        table
    }

    fn add_binary(&mut self, command: Command, handler: BinaryHandler) {
        self.binary.insert(command as i32, handler);
    }

    fn add_text(&mut self, name: &'static str, handler: TextHandler) {
        self.text.insert(name, handler);
    }

    pub fn binary(&self, command_id: i32) -> Option<BinaryHandler> {
        self.binary.get(&command_id).copied()
    }

    pub fn text(&self, name: &str) -> Option<TextHandler> {
        self.text.get(name).copied()
    }

    /// Text command words, sorted
    pub fn text_commands(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.text.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
