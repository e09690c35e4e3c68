//! Binary Session Tests
//!
//! Tests for the binary protocol over a real server.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tessera::auth::Rule;
use tessera::protocol::{read_frame, write_frame, Command, Data, FieldId, Frame};
use tessera::{Config, Engine, ErrorCode, Server, ServerHandle};

// =============================================================================
// Helpers
// =============================================================================

fn start_server() -> ServerHandle {
    let config = Config::builder()
        .listen_addr("127.0.0.1:0")
        .local_socket_prefix(None)
        .build();
    let engine = Arc::new(Engine::open(config).unwrap());
    Server::bind(engine).unwrap().spawn().unwrap()
}

fn connect_binary(server: &ServerHandle) -> TcpStream {
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(b"protocol binary\r\n").unwrap();

    let mut reply = [0u8; 12];
    stream.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"going binary");
    stream
}

fn call(stream: &mut TcpStream, frame: Frame) -> Frame {
    write_frame(stream, &frame).unwrap();
    read_frame(stream).unwrap()
}

fn error_code(answer: &Frame) -> Option<ErrorCode> {
    answer.answer_error().map(|e| e.code())
}

fn create(stream: &mut TcpStream, name: &str, container_type: &str) -> i32 {
    let answer = call(
        stream,
        Frame::new(Command::Create)
            .with(FieldId::Name, name)
            .with(FieldId::Type, container_type),
    );
    assert!(answer.is_command(Command::Answer));
    assert_eq!(error_code(&answer), None, "create {} failed: {}", name, answer);
    answer.int(FieldId::Handle).unwrap()
}

fn push_back(stream: &mut TcpStream, handle: i32, value: &str) {
    let answer = call(
        stream,
        Frame::new(Command::PushBack)
            .with(FieldId::Handle, handle)
            .with(FieldId::Value, value),
    );
    assert_eq!(error_code(&answer), None);
}

fn event_code(frame: &Frame) -> Option<Command> {
    assert!(frame.is_command(Command::Event), "expected an event, got {}", frame);
    frame.int(FieldId::EventCode).and_then(Command::from_i32)
}

// =============================================================================
// Basic Tests
// =============================================================================

#[test]
fn test_ping() {
    let server = start_server();
    let mut client = connect_binary(&server);

    let answer = call(&mut client, Frame::new(Command::Ping).with(FieldId::Value, "hello"));
    assert!(answer.is_command(Command::Answer));
    assert_eq!(answer.get(FieldId::Value), Some(&Data::from("hello")));
}

#[test]
fn test_create_answers_handle_and_type() {
    let server = start_server();
    let mut client = connect_binary(&server);

    let answer = call(
        &mut client,
        Frame::new(Command::Create)
            .with(FieldId::Name, "orders")
            .with(FieldId::Type, "volatile_list"),
    );
    assert_eq!(answer.int(FieldId::Handle), Some(1));
    assert_eq!(answer.string(FieldId::Type).as_deref(), Some("volatile_list"));

    // no type means volatile_list
    let answer = call(&mut client, Frame::new(Command::Create).with(FieldId::Name, "untyped"));
    assert_eq!(answer.string(FieldId::Type).as_deref(), Some("volatile_list"));
}

#[test]
fn test_handles_are_per_session_and_never_reused() {
    let server = start_server();
    let mut first = connect_binary(&server);
    let mut second = connect_binary(&server);

    assert_eq!(create(&mut first, "a", "volatile_list"), 1);
    assert_eq!(create(&mut first, "b", "volatile_list"), 2);
    let answer = call(&mut first, Frame::new(Command::Close).with(FieldId::Handle, 1));
    assert_eq!(error_code(&answer), None);
    assert_eq!(create(&mut first, "c", "volatile_list"), 3);

    assert_eq!(create(&mut second, "a", "volatile_list"), 1);

    let answer = call(&mut first, Frame::new(Command::Count).with(FieldId::Handle, 1));
    assert_eq!(error_code(&answer), Some(ErrorCode::Protocol));
}

#[test]
fn test_record_operations() {
    let server = start_server();
    let mut client = connect_binary(&server);
    let map = create(&mut client, "prices", "volatile_map");

    let answer = call(
        &mut client,
        Frame::new(Command::Set)
            .with(FieldId::Handle, map)
            .with(FieldId::Key, "eur")
            .with(FieldId::Value, 1.08)
            .with(FieldId::Metadata, "fx"),
    );
    assert_eq!(error_code(&answer), None);

    let answer = call(
        &mut client,
        Frame::new(Command::Get).with(FieldId::Handle, map).with(FieldId::Key, "eur"),
    );
    assert_eq!(answer.get(FieldId::Value), Some(&Data::Double(1.08)));
    assert_eq!(answer.string(FieldId::Metadata).as_deref(), Some("fx"));

    let answer = call(&mut client, Frame::new(Command::Count).with(FieldId::Handle, map));
    assert_eq!(answer.int(FieldId::Value), Some(1));

    let answer = call(
        &mut client,
        Frame::new(Command::Delete).with(FieldId::Handle, map).with(FieldId::Key, "eur"),
    );
    assert_eq!(error_code(&answer), None);
    let answer = call(&mut client, Frame::new(Command::Count).with(FieldId::Handle, map));
    assert_eq!(answer.int(FieldId::Value), Some(0));
}

#[test]
fn test_pop_answers_record() {
    let server = start_server();
    let mut client = connect_binary(&server);
    let list = create(&mut client, "jobs", "volatile_list");
    push_back(&mut client, list, "a");
    push_back(&mut client, list, "b");

    let answer = call(&mut client, Frame::new(Command::PopFront).with(FieldId::Handle, list));
    assert_eq!(answer.get(FieldId::Value), Some(&Data::from("a")));
    let answer = call(&mut client, Frame::new(Command::PopBack).with(FieldId::Handle, list));
    assert_eq!(answer.get(FieldId::Value), Some(&Data::from("b")));

    let answer = call(&mut client, Frame::new(Command::PopBack).with(FieldId::Handle, list));
    assert_eq!(error_code(&answer), Some(ErrorCode::NoSuchObject));
}

#[test]
fn test_properties() {
    let server = start_server();
    let mut client = connect_binary(&server);
    let list = create(&mut client, "jobs", "volatile_list");

    let answer = call(
        &mut client,
        Frame::new(Command::PropSet)
            .with(FieldId::Handle, list)
            .with(FieldId::Key, "owner")
            .with(FieldId::Value, "ops"),
    );
    assert_eq!(error_code(&answer), None);

    let answer = call(
        &mut client,
        Frame::new(Command::PropGet).with(FieldId::Handle, list).with(FieldId::Key, "owner"),
    );
    assert_eq!(answer.string(FieldId::Value).as_deref(), Some("ops"));
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_error_answers() {
    let server = start_server();
    let mut client = connect_binary(&server);

    let answer = call(&mut client, Frame::new(Command::Open).with(FieldId::Name, "missing"));
    assert_eq!(error_code(&answer), Some(ErrorCode::NoSuchObject));

    let answer = call(&mut client, Frame::new(Command::Count).with(FieldId::Handle, 42));
    assert_eq!(error_code(&answer), Some(ErrorCode::Protocol));

    let answer = call(&mut client, Frame::empty().with(FieldId::Handle, 1));
    assert_eq!(error_code(&answer), Some(ErrorCode::MissingParameter));

    let answer = call(&mut client, Frame::empty().with(FieldId::Command, 0x77));
    assert_eq!(error_code(&answer), Some(ErrorCode::Protocol));

    let answer = call(&mut client, Frame::new(Command::Count));
    assert_eq!(error_code(&answer), Some(ErrorCode::MissingParameter));

    let map = create(&mut client, "m", "volatile_map");
    let answer = call(
        &mut client,
        Frame::new(Command::Set).with(FieldId::Handle, map).with(FieldId::Value, 1),
    );
    assert_eq!(error_code(&answer), Some(ErrorCode::MissingParameter));

    // errors leave the session usable
    let answer = call(&mut client, Frame::new(Command::Ping).with(FieldId::Value, 1));
    assert_eq!(answer.int(FieldId::Value), Some(1));
}

#[test]
fn test_access_denied() {
    let server = start_server();
    server
        .engine()
        .add_rule("*", "secret", "*", Rule::Deny, None);
    let mut client = connect_binary(&server);

    let answer = call(
        &mut client,
        Frame::new(Command::Create)
            .with(FieldId::Name, "secret")
            .with(FieldId::Type, "volatile_list"),
    );
    assert_eq!(error_code(&answer), Some(ErrorCode::AccessDenied));
}

#[test]
fn test_malformed_frame_closes_session() {
    let server = start_server();
    let mut client = connect_binary(&server);

    // one field with field id 99
    let mut bad = Vec::new();
    bad.extend_from_slice(&12u32.to_le_bytes());
    bad.extend_from_slice(&1u16.to_le_bytes());
    bad.extend_from_slice(&0u16.to_le_bytes());
    bad.extend_from_slice(&3u16.to_le_bytes());
    bad.extend_from_slice(&99u16.to_le_bytes());
    bad.extend_from_slice(&4u32.to_le_bytes());
    bad.extend_from_slice(&1i32.to_le_bytes());
    client.write_all(&bad).unwrap();

    let mut rest = Vec::new();
    let read = client.read_to_end(&mut rest);
    assert!(read.is_err() || rest.is_empty());
}

// =============================================================================
// Query Tests
// =============================================================================

fn run_query(client: &mut TcpStream, frame: Frame) -> Vec<Frame> {
    let answer = call(client, frame);
    assert_eq!(error_code(&answer), None);
    let query_id = answer.int(FieldId::QueryId).unwrap();

    let mut items = Vec::new();
    loop {
        let item = read_frame(client).unwrap();
        assert!(item.is_command(Command::QueryItem));
        assert_eq!(item.int(FieldId::QueryId), Some(query_id));
        if item.get(FieldId::Key).is_none() {
            return items;
        }
        items.push(item);
    }
}

#[test]
fn test_query_range() {
    let server = start_server();
    let mut client = connect_binary(&server);
    let list = create(&mut client, "l", "volatile_list");
    for v in ["a", "b", "c", "d"] {
        push_back(&mut client, list, v);
    }

    let items = run_query(
        &mut client,
        Frame::new(Command::Query)
            .with(FieldId::Handle, list)
            .with(FieldId::StartRecord, 1)
            .with(FieldId::End, 3),
    );
    let values: Vec<Data> = items.iter().map(|i| i.data(FieldId::Value)).collect();
    assert_eq!(values, vec![Data::from("b"), Data::from("c")]);
    assert_eq!(items[0].int(FieldId::Key), Some(1));
}

#[test]
fn test_query_expression() {
    let server = start_server();
    let mut client = connect_binary(&server);
    let map = create(&mut client, "m", "volatile_map");
    for key in ["eur-usd", "eur-gbp", "usd-jpy"] {
        call(
            &mut client,
            Frame::new(Command::Set)
                .with(FieldId::Handle, map)
                .with(FieldId::Key, key)
                .with(FieldId::Value, 1),
        );
    }

    let items = run_query(
        &mut client,
        Frame::new(Command::Query)
            .with(FieldId::Handle, map)
            .with(FieldId::QueryExpression, "eur-.*"),
    );
    let keys: Vec<String> = items.iter().map(|i| i.string(FieldId::Key).unwrap()).collect();
    assert_eq!(keys, vec!["eur-gbp", "eur-usd"]);

    let answer = call(
        &mut client,
        Frame::new(Command::Query)
            .with(FieldId::Handle, map)
            .with(FieldId::QueryExpression, "(unclosed"),
    );
    assert_eq!(error_code(&answer), Some(ErrorCode::Protocol));
}

#[test]
fn test_empty_query() {
    let server = start_server();
    let mut client = connect_binary(&server);
    let list = create(&mut client, "l", "volatile_list");

    let items = run_query(&mut client, Frame::new(Command::Query).with(FieldId::Handle, list));
    assert!(items.is_empty());
}

// =============================================================================
// Subscription Tests
// =============================================================================

#[test]
fn test_snapshot_then_live_end_to_end() {
    let server = start_server();
    let mut producer = connect_binary(&server);
    let mut consumer = connect_binary(&server);

    let answer = call(
        &mut producer,
        Frame::new(Command::Create)
            .with(FieldId::Name, "orders")
            .with(FieldId::Type, "volatile_list"),
    );
    assert_eq!(answer.int(FieldId::Handle), Some(1));
    push_back(&mut producer, 1, "x");

    let answer = call(&mut consumer, Frame::new(Command::Open).with(FieldId::Name, "orders"));
    let handle = answer.int(FieldId::Handle).unwrap();
    let answer = call(
        &mut consumer,
        Frame::new(Command::Subscribe)
            .with(FieldId::Handle, handle)
            .with(FieldId::Key, "0"),
    );
    assert!(answer.is_command(Command::Answer));
    assert_eq!(error_code(&answer), None);

    let snapshot = read_frame(&mut consumer).unwrap();
    assert_eq!(event_code(&snapshot), Some(Command::PushBack));
    assert_eq!(snapshot.int(FieldId::Handle), Some(handle));
    assert_eq!(snapshot.get(FieldId::Value), Some(&Data::from("x")));
    assert_eq!(event_code(&read_frame(&mut consumer).unwrap()), Some(Command::SnapshotEnd));

    push_back(&mut producer, 1, "y");
    let live = read_frame(&mut consumer).unwrap();
    assert_eq!(event_code(&live), Some(Command::PushBack));
    assert_eq!(live.get(FieldId::Value), Some(&Data::from("y")));
    assert_eq!(live.int(FieldId::Key), Some(1));

    // nothing else is queued ahead of the next answer
    let answer = call(&mut consumer, Frame::new(Command::Ping).with(FieldId::Value, 7));
    assert!(answer.is_command(Command::Answer));
}

#[test]
fn test_subscribe_without_start_gets_live_only() {
    let server = start_server();
    let mut producer = connect_binary(&server);
    let mut consumer = connect_binary(&server);
    let list = create(&mut producer, "orders", "volatile_list");
    push_back(&mut producer, list, "old");

    let handle = create(&mut consumer, "orders", "volatile_list");
    let answer = call(&mut consumer, Frame::new(Command::Subscribe).with(FieldId::Handle, handle));
    assert_eq!(error_code(&answer), None);

    push_back(&mut producer, list, "new");
    let live = read_frame(&mut consumer).unwrap();
    assert_eq!(event_code(&live), Some(Command::PushBack));
    assert_eq!(live.get(FieldId::Value), Some(&Data::from("new")));
}

#[test]
fn test_subscribe_twice_and_unsubscribe() {
    let server = start_server();
    let mut client = connect_binary(&server);
    let list = create(&mut client, "orders", "volatile_list");

    let answer = call(&mut client, Frame::new(Command::Subscribe).with(FieldId::Handle, list));
    assert_eq!(error_code(&answer), None);
    let answer = call(&mut client, Frame::new(Command::Subscribe).with(FieldId::Handle, list));
    assert_eq!(error_code(&answer), Some(ErrorCode::Protocol));

    let answer = call(&mut client, Frame::new(Command::Unsubscribe).with(FieldId::Handle, list));
    assert_eq!(error_code(&answer), None);
    let answer = call(&mut client, Frame::new(Command::Unsubscribe).with(FieldId::Handle, list));
    assert_eq!(error_code(&answer), Some(ErrorCode::Protocol));

    // no events after unsubscribe: the push answer is the next frame
    push_back(&mut client, list, "quiet");
}

#[test]
fn test_own_mutations_are_delivered() {
    let server = start_server();
    let mut client = connect_binary(&server);
    let list = create(&mut client, "orders", "volatile_list");
    call(&mut client, Frame::new(Command::Subscribe).with(FieldId::Handle, list));

    write_frame(
        &mut client,
        &Frame::new(Command::PushBack)
            .with(FieldId::Handle, list)
            .with(FieldId::Value, "mine"),
    )
    .unwrap();

    // answer and event travel on different paths, either may come first
    let frames = [read_frame(&mut client).unwrap(), read_frame(&mut client).unwrap()];
    assert_eq!(frames.iter().filter(|f| f.is_command(Command::Answer)).count(), 1);
    let event = frames.iter().find(|f| f.is_command(Command::Event)).unwrap();
    assert_eq!(event_code(event), Some(Command::PushBack));
}

#[test]
fn test_debug_sequence_follows_wire_order() {
    let server = start_server();
    let mut client = connect_binary(&server);
    let list = create(&mut client, "orders", "volatile_list");
    let subscribed = call(&mut client, Frame::new(Command::Subscribe).with(FieldId::Handle, list));

    // answers come from the reader thread, events from the delivery worker
    for i in 0..50 {
        write_frame(
            &mut client,
            &Frame::new(Command::PushBack)
                .with(FieldId::Handle, list)
                .with(FieldId::Value, i),
        )
        .unwrap();
    }

    let mut expected = subscribed.debug_seq.wrapping_add(1);
    for _ in 0..100 {
        let frame = read_frame(&mut client).unwrap();
        assert_eq!(frame.debug_seq, expected, "out of order: {}", frame);
        expected = expected.wrapping_add(1);
    }
}

#[test]
fn test_wait_and_pop_next_between_sessions() {
    let server = start_server();
    let mut worker = connect_binary(&server);
    let mut producer = connect_binary(&server);
    let queue = create(&mut worker, "jobs", "volatile_list");
    let producer_queue = create(&mut producer, "jobs", "volatile_list");

    let answer = call(&mut worker, Frame::new(Command::WaitAndPopNext).with(FieldId::Handle, queue));
    assert_eq!(error_code(&answer), None);

    push_back(&mut producer, producer_queue, "job-1");
    let event = read_frame(&mut worker).unwrap();
    assert_eq!(event_code(&event), Some(Command::WaitAndPopNext));
    assert_eq!(event.int(FieldId::Handle), Some(queue));
    assert_eq!(event.get(FieldId::Value), Some(&Data::from("job-1")));

    let answer = call(&mut producer, Frame::new(Command::Count).with(FieldId::Handle, producer_queue));
    assert_eq!(answer.int(FieldId::Value), Some(0));
}

#[test]
fn test_group_late_join_over_the_wire() {
    let server = start_server();
    let mut watcher = connect_binary(&server);
    let mut admin = connect_binary(&server);

    let answer = call(
        &mut watcher,
        Frame::new(Command::GroupSubscribe).with(FieldId::GroupName, "feeds"),
    );
    assert_eq!(error_code(&answer), None);

    let feed = create(&mut admin, "feed-1", "volatile_list");
    push_back(&mut admin, feed, "first");
    let answer = call(
        &mut admin,
        Frame::new(Command::GroupAdd)
            .with(FieldId::GroupName, "feeds")
            .with(FieldId::ContainerName, "feed-1"),
    );
    assert_eq!(error_code(&answer), None);

    let notice = read_frame(&mut watcher).unwrap();
    assert!(notice.is_command(Command::NewGroupContainer));
    assert_eq!(notice.string(FieldId::GroupName).as_deref(), Some("feeds"));
    assert_eq!(notice.string(FieldId::ContainerName).as_deref(), Some("feed-1"));
    assert_eq!(notice.string(FieldId::ContainerType).as_deref(), Some("volatile_list"));
    let handle = notice.int(FieldId::Handle).unwrap();

    let snapshot = read_frame(&mut watcher).unwrap();
    assert_eq!(event_code(&snapshot), Some(Command::PushBack));
    assert_eq!(snapshot.int(FieldId::Handle), Some(handle));
    assert_eq!(event_code(&read_frame(&mut watcher).unwrap()), Some(Command::SnapshotEnd));

    push_back(&mut admin, feed, "second");
    let live = read_frame(&mut watcher).unwrap();
    assert_eq!(live.get(FieldId::Value), Some(&Data::from("second")));

    // the group handle works like any other
    let answer = call(&mut watcher, Frame::new(Command::Count).with(FieldId::Handle, handle));
    assert_eq!(answer.int(FieldId::Value), Some(2));
}

// =============================================================================
// Meta And HTTP Tests
// =============================================================================

#[test]
fn test_sessions_are_listed_in_meta() {
    let server = start_server();
    let mut client = connect_binary(&server);

    let answer = call(&mut client, Frame::new(Command::Open).with(FieldId::Name, "__meta__/sessions"));
    let handle = answer.int(FieldId::Handle).unwrap();
    let answer = call(&mut client, Frame::new(Command::Count).with(FieldId::Handle, handle));
    assert!(answer.int(FieldId::Value).unwrap() >= 1);
}

fn http_get(server: &ServerHandle, path: &str, accept: &str) -> String {
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\nAccept: {}\r\n\r\n", path, accept).unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

#[test]
fn test_http_json_view() {
    let server = start_server();
    let mut client = connect_binary(&server);
    let list = create(&mut client, "orders", "volatile_list");
    push_back(&mut client, list, "x");
    push_back(&mut client, list, "y");

    let response = http_get(&server, "/orders", "application/json");
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["name"], "orders");
    assert_eq!(json["type"], "volatile_list");
    assert_eq!(json["count"], 2);
    assert_eq!(json["records"][1]["value"], "y");
}

#[test]
fn test_http_html_and_errors() {
    let server = start_server();
    let mut client = connect_binary(&server);
    create(&mut client, "orders", "volatile_list");

    let html = http_get(&server, "/orders", "text/html");
    assert!(html.contains("text/html"));
    assert!(html.contains("<h1>orders</h1>"));

    let index = http_get(&server, "/", "*/*");
    assert!(index.starts_with("HTTP/1.1 200 OK"));
    assert!(index.contains("orders"));

    let missing = http_get(&server, "/nothing", "*/*");
    assert!(missing.starts_with("HTTP/1.1 404"));

    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.write_all(b"POST /orders HTTP/1.1\r\n\r\n").unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 405"));
}
