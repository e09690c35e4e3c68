//! Text Session Tests
//!
//! Tests for the line protocol over a real server.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tessera::auth::Rule;
use tessera::container::Container;
use tessera::{Config, Engine, Server, ServerHandle};

// =============================================================================
// Helpers
// =============================================================================

fn start_server(config: Config) -> ServerHandle {
    let engine = Arc::new(Engine::open(config).unwrap());
    Server::bind(engine).unwrap().spawn().unwrap()
}

fn test_config() -> tessera::config::ConfigBuilder {
    Config::builder()
        .listen_addr("127.0.0.1:0")
        .local_socket_prefix(None)
}

struct TextClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl TextClient {
    fn connect(server: &ServerHandle) -> Self {
        let stream = TcpStream::connect(server.local_addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }

    fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).unwrap();
    }

    fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        assert!(line.ends_with("\r\n"), "unterminated line {:?}", line);
        line.trim_end().to_string()
    }

    fn call(&mut self, line: &str) -> String {
        self.send(format!("{}\r\n", line).as_bytes());
        self.line()
    }

    /// Read the data block announced by the triplets at the end of `line`
    fn fields(&mut self, line: &str, skip: usize) -> Vec<(String, String)> {
        let words: Vec<&str> = line.split(' ').skip(skip).collect();
        words
            .chunks(3)
            .map(|triplet| {
                let size: usize = triplet[2].parse().unwrap();
                let mut block = vec![0u8; size + 2];
                self.reader.read_exact(&mut block).unwrap();
                assert_eq!(&block[size..], b"\r\n");
                block.truncate(size);
                (triplet[0].to_string(), String::from_utf8(block).unwrap())
            })
            .collect()
    }
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
}

// =============================================================================
// Session Commands
// =============================================================================

#[test]
fn test_ping_and_version() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);

    assert_eq!(client.call("ping"), "answer ok pong");
    assert_eq!(client.call("ping hello there"), "answer ok pong hello there");
    assert_eq!(client.call("ver"), format!("answer ok {}", tessera::VERSION));
    assert_eq!(client.call("protocol text"), "answer ok");
}

#[test]
fn test_blank_lines_are_ignored() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);

    client.send(b"\r\n\r\nping\r\n");
    assert_eq!(client.line(), "answer ok pong");
}

#[test]
fn test_invalid_command() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);

    assert!(client.call("frobnicate 1 2").starts_with("answer error"));
    assert!(client.call("get_count").starts_with("answer error"));
    assert!(client.call("get_count 9").starts_with("answer error"));
    assert_eq!(client.call("ping"), "answer ok pong");
}

// =============================================================================
// Container Commands
// =============================================================================

#[test]
fn test_create_and_list_handles() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);

    assert_eq!(client.call("create orders volatile_list"), "answer ok handle 1 volatile_list");
    assert_eq!(client.call("create prices volatile_map"), "answer ok handle 2 volatile_map");
    assert_eq!(client.call("open orders"), "answer ok handle 3 volatile_list");
    assert_eq!(client.call("close 3"), "answer ok");

    assert_eq!(
        client.call("list_handles"),
        "answer ok 2 1:orders:volatile_list 2:prices:volatile_map"
    );
}

#[test]
fn test_reserved_names_cannot_be_created() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);

    assert!(client.call("create __private volatile_list").starts_with("answer error"));
    assert!(client.call("open missing").starts_with("answer error"));
}

#[test]
fn test_push_back_with_data_block() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);
    client.call("create orders volatile_list");

    client.send(b"push_back 1 value string 5\r\nhello\r\n");
    assert_eq!(client.line(), "answer ok");
    client.send(b"push_back 1 value string 7 metadata int 2\r\nwo\r\nrld\r\n42\r\n");
    assert_eq!(client.line(), "answer ok");

    assert_eq!(client.call("get_count 1"), "answer ok count 2");

    let line = client.call("get 1 1");
    assert!(line.starts_with("answer ok data"), "{}", line);
    let fields = client.fields(&line, 3);
    assert_eq!(field(&fields, "value"), Some("wo\r\nrld"));
    assert_eq!(field(&fields, "metadata"), Some("42"));
}

#[test]
fn test_data_block_split_across_writes() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);
    client.call("create prices volatile_map");

    client.send(b"set 1 key string 3 value double 4\r\neur");
    std::thread::sleep(Duration::from_millis(50));
    client.send(b"\r\n1.08\r\n");
    assert_eq!(client.line(), "answer ok");

    let line = client.call("get 1 eur");
    let fields = client.fields(&line, 3);
    assert_eq!(field(&fields, "key"), Some("eur"));
    assert_eq!(field(&fields, "value"), Some("1.08"));
}

#[test]
fn test_oversized_data_block_is_refused() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);
    client.call("create orders volatile_list");

    assert_eq!(
        client.call("push_back 1 value string 4000000000000"),
        "answer error data block too large"
    );
    assert_eq!(
        client.call("push_back 1 value string 18446744073709551613"),
        "answer error data block too large"
    );
    assert_eq!(
        client.call("push_back 1 key string 40000000 value string 40000000"),
        "answer error data block too large"
    );

    // the session survives and nothing was stored
    assert_eq!(client.call("get_count 1"), "answer ok count 0");
}

#[test]
fn test_truncated_data_block_ends_session() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);
    client.call("create orders volatile_list");
    assert_eq!(server.engine().session_count(), 1);

    client.send(b"push_back 1 value string 10\r\nabc");
    client.writer.shutdown(std::net::Shutdown::Write).unwrap();

    let mut rest = Vec::new();
    client.reader.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty(), "unexpected answer {:?}", String::from_utf8_lossy(&rest));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while server.engine().session_count() > 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(server.engine().session_count(), 0);
    assert_eq!(
        server.engine().containers().open(None, "orders").unwrap().record_count(),
        0
    );
}

#[test]
fn test_data_block_with_bad_terminator() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);
    client.call("create orders volatile_list");

    client.send(b"push_back 1 value string 3\r\nabcXY");
    assert!(client.line().starts_with("answer error"));
    assert_eq!(client.call("get_count 1"), "answer ok count 0");
}

#[test]
fn test_pop_and_delete() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);
    client.call("create jobs volatile_list");
    client.send(b"push_back 1 value string 1\r\na\r\npush_back 1 value string 1\r\nb\r\n");
    assert_eq!(client.line(), "answer ok");
    assert_eq!(client.line(), "answer ok");

    let line = client.call("pop_front 1");
    let fields = client.fields(&line, 3);
    assert_eq!(field(&fields, "value"), Some("a"));

    assert_eq!(client.call("delete 1 0"), "answer ok");
    assert_eq!(client.call("get_count 1"), "answer ok count 0");
    assert!(client.call("pop_back 1").starts_with("answer error"));
}

#[test]
fn test_properties_and_container_command() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);
    client.call("create jobs volatile_list");

    assert_eq!(client.call("set_property 1 owner ops team"), "answer ok");
    let line = client.call("get_property 1 owner");
    let fields = client.fields(&line, 3);
    assert_eq!(field(&fields, "value"), Some("ops team"));

    assert!(client.call("command 1").starts_with("answer error"));
}

// =============================================================================
// Query Commands
// =============================================================================

fn read_query(client: &mut TextClient, line: &str) -> Vec<Vec<(String, String)>> {
    let mut words = line.split(' ');
    assert_eq!(words.next(), Some("answer"));
    assert_eq!(words.next(), Some("ok"));
    assert_eq!(words.next(), Some("query"));
    let id = words.next().unwrap().to_string();

    let mut items = Vec::new();
    loop {
        let line = client.line();
        if line == format!("query {} end", id) {
            return items;
        }
        assert!(line.starts_with(&format!("query {} item", id)), "{}", line);
        items.push(client.fields(&line, 3));
    }
}

#[test]
fn test_query_lines() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);
    client.call("create l volatile_list");
    for v in ["a", "b", "c"] {
        client.send(format!("push_back 1 value string 1\r\n{}\r\n", v).as_bytes());
        assert_eq!(client.line(), "answer ok");
    }

    let line = client.call("query 1");
    let items = read_query(&mut client, &line);
    let values: Vec<_> = items.iter().map(|i| field(i, "value").unwrap().to_string()).collect();
    assert_eq!(values, vec!["a", "b", "c"]);

    let line = client.call("query 1 1 2");
    let items = read_query(&mut client, &line);
    assert_eq!(items.len(), 1);
    assert_eq!(field(&items[0], "key"), Some("1"));
}

#[test]
fn test_queryex_filters_keys() {
    let server = start_server(test_config().build());
    let mut client = TextClient::connect(&server);
    client.call("create m volatile_map");
    for key in ["apple", "apricot", "banana"] {
        client.send(
            format!("set 1 key string {} value int 1\r\n{}\r\n1\r\n", key.len(), key).as_bytes(),
        );
        assert_eq!(client.line(), "answer ok");
    }

    let line = client.call("queryex 1 ap.*");
    let items = read_query(&mut client, &line);
    let keys: Vec<_> = items.iter().map(|i| field(i, "key").unwrap().to_string()).collect();
    assert_eq!(keys, vec!["apple", "apricot"]);

    let line = client.call("queryex 1 ap.* 0 1");
    assert_eq!(read_query(&mut client, &line).len(), 1);
}

// =============================================================================
// Subscription Commands
// =============================================================================

#[test]
fn test_text_events() {
    let server = start_server(test_config().build());
    let mut producer = TextClient::connect(&server);
    let mut consumer = TextClient::connect(&server);
    producer.call("create orders volatile_list");
    producer.send(b"push_back 1 value string 3\r\nold\r\n");
    assert_eq!(producer.line(), "answer ok");

    consumer.call("open orders");
    assert_eq!(consumer.call("subscribe 1 0"), "answer ok");

    let line = consumer.line();
    assert!(line.starts_with("event 1 push_back"), "{}", line);
    let fields = consumer.fields(&line, 3);
    assert_eq!(field(&fields, "value"), Some("old"));
    assert_eq!(consumer.line(), "event 1 snapshot_end");

    producer.send(b"push_back 1 value string 3\r\nnew\r\n");
    assert_eq!(producer.line(), "answer ok");

    let line = consumer.line();
    assert!(line.starts_with("event 1 push_back"), "{}", line);
    let fields = consumer.fields(&line, 3);
    assert_eq!(field(&fields, "key"), Some("1"));
    assert_eq!(field(&fields, "value"), Some("new"));

    assert_eq!(consumer.call("unsubscribe 1"), "answer ok");
    assert!(consumer.call("unsubscribe 1").starts_with("answer error"));
}

#[test]
fn test_text_group_notification() {
    let server = start_server(test_config().build());
    let mut watcher = TextClient::connect(&server);
    let mut admin = TextClient::connect(&server);

    assert_eq!(watcher.call("group_subscribe feeds"), "answer ok");
    admin.call("create feed-1 volatile_map");
    assert_eq!(admin.call("group_add feeds feed-1"), "answer ok");

    assert_eq!(watcher.line(), "event 1 new_group_container feeds feed-1 volatile_map");
    assert_eq!(watcher.line(), "event 1 snapshot_end");
}

#[test]
fn test_text_wait_and_pop_next() {
    let server = start_server(test_config().build());
    let mut worker = TextClient::connect(&server);
    let mut producer = TextClient::connect(&server);
    worker.call("create jobs volatile_list");
    producer.call("open jobs");

    assert_eq!(worker.call("wait_and_pop_next 1"), "answer ok");
    producer.send(b"push_back 1 value string 5\r\njob-1\r\n");
    assert_eq!(producer.line(), "answer ok");

    let line = worker.line();
    assert!(line.starts_with("event 1 wait_and_pop_next"), "{}", line);
    let fields = worker.fields(&line, 3);
    assert_eq!(field(&fields, "value"), Some("job-1"));
}

// =============================================================================
// Access Control
// =============================================================================

#[test]
fn test_auth_grants_access() {
    let server = start_server(test_config().user("alice", "secret").build());
    server.engine().add_rule("*", "private", "*", Rule::Deny, None);
    server.engine().add_rule("*", "private", "*", Rule::Allow, Some("alice"));
    let mut client = TextClient::connect(&server);

    assert!(client.call("create private volatile_list").starts_with("answer error"));
    assert!(client.call("auth alice wrong").starts_with("answer error"));
    assert!(client.call("auth bob secret").starts_with("answer error"));

    assert_eq!(client.call("auth alice secret"), "answer ok");
    assert_eq!(client.call("create private volatile_list"), "answer ok handle 1 volatile_list");
}

#[test]
fn test_users_meta_is_admin_only() {
    let server = start_server(test_config().user("alice", "secret").build());
    let mut client = TextClient::connect(&server);

    assert!(client.call("open __meta__/users").starts_with("answer error"));
}

#[test]
fn test_server_commands_need_permission() {
    let server = start_server(test_config().build());
    server.engine().add_rule("__server__", "__server__", "pause", Rule::Deny, None);
    let mut client = TextClient::connect(&server);

    assert!(client.call("pause").starts_with("answer error"));
    assert_eq!(client.call("resume"), "answer ok");
}

#[test]
fn test_set_permission_needs_existing_object() {
    let server = start_server(test_config().alias("list", "volatile_list").build());
    let mut admin = TextClient::connect(&server);
    let mut other = TextClient::connect(&server);

    assert!(admin
        .call("set_permission volatile_list orders * deny")
        .starts_with("answer error no such object"));
    admin.call("create orders volatile_list");
    assert!(admin
        .call("set_permission volatile_map orders * deny")
        .starts_with("answer error no such object"));

    // the alias resolves to the container's real type
    assert_eq!(admin.call("set_permission list orders count deny"), "answer ok");
    other.call("open orders");
    assert!(other.call("get_count 1").starts_with("answer error"));

    assert_eq!(admin.call("set_permission * * ping allow"), "answer ok");
    assert_eq!(admin.call("set_permission __server__ __server__ pause deny"), "answer ok");
    assert!(admin.call("pause").starts_with("answer error"));
}
