//! Cluster Tests
//!
//! Tests for routing opens through `__meta__/clusters` and receiving from
//! several servers at once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tessera::client::LinkId;
use tessera::container::{Container, VOLATILE_LIST, VOLATILE_MAP};
use tessera::engine::CLUSTERS_META;
use tessera::protocol::{Command, Data};
use tessera::{ClientOptions, Config, Connection, Engine, ErrorCode, Server, ServerHandle};

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

fn options() -> ClientOptions {
    ClientOptions {
        answer_timeout: Some(Duration::from_secs(5)),
        ..ClientOptions::default()
    }
}

fn connect(server: &ServerHandle, options: ClientOptions) -> Connection {
    Connection::connect("127.0.0.1", server.port(), options).unwrap()
}

/// Route `name` from `front` to `target`
fn route(front: &ServerHandle, name: &str, target: impl Into<Data>) {
    let containers = front.engine().containers();
    let map = match containers.open(None, CLUSTERS_META) {
        Ok(map) => map,
        Err(_) => containers.create(VOLATILE_MAP, CLUSTERS_META).unwrap(),
    };
    map.set(Data::from(name), target.into(), Data::None).unwrap();
}

fn host_port(server: &ServerHandle) -> String {
    format!("127.0.0.1:{}", server.port())
}

/// Front server routing "remote" and "remote-2" to a back server that has them
fn cluster() -> (ServerHandle, ServerHandle) {
    let front = start_server();
    let back = start_server();
    back.engine().containers().create(VOLATILE_LIST, "remote").unwrap();
    back.engine().containers().create(VOLATILE_LIST, "remote-2").unwrap();
    route(&front, "remote", host_port(&back));
    route(&front, "remote-2", host_port(&back));
    (front, back)
}

// =============================================================================
// Routing Tests
// =============================================================================

#[test]
fn test_open_routes_to_cluster_server() {
    let (front, back) = cluster();
    let mut client = connect(&front, options());

    let handle = client.open("remote", None).unwrap();
    assert_eq!(handle.link(), LinkId::Cluster(0));
    assert_eq!(client.cluster_count(), 1);

    client.push_back(handle, "routed", Data::None).unwrap();
    assert_eq!(client.count(handle).unwrap(), 1);

    // the record landed on the back server
    let stored = back.engine().containers().open(None, "remote").unwrap();
    assert_eq!(stored.record_count(), 1);
    assert!(front.engine().containers().open(None, "remote").is_err());
}

#[test]
fn test_cluster_links_are_reused() {
    let (front, back) = cluster();
    let mut client = connect(&front, options());

    let first = client.open("remote", None).unwrap();
    let second = client.open("remote-2", None).unwrap();
    assert_eq!(first.link(), second.link());
    assert_eq!(client.cluster_count(), 1);
    assert_eq!(client.cluster_link("127.0.0.1", back.port()), Some(first.link()));
}

#[test]
fn test_local_containers_stay_on_primary() {
    let (front, _back) = cluster();
    let mut client = connect(&front, options());

    let local = client.create("local", None).unwrap();
    assert_eq!(local.link(), LinkId::Primary);
    assert_eq!(client.cluster_count(), 0);
}

#[test]
fn test_unrouted_name_keeps_original_error() {
    let (front, _back) = cluster();
    let mut client = connect(&front, options());

    let err = client.open("nowhere", None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoSuchObject);
    assert_eq!(client.cluster_count(), 0);
}

#[test]
fn test_unreachable_cluster_keeps_original_error() {
    let front = start_server();
    route(&front, "lost", "127.0.0.1:1");
    let mut client = connect(&front, options());

    let err = client.open("lost", None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoSuchObject);
    assert_eq!(client.cluster_count(), 0);
}

#[test]
fn test_routing_disabled() {
    let (front, _back) = cluster();
    let mut client = connect(
        &front,
        ClientOptions {
            open_cluster_map: false,
            ..options()
        },
    );

    let err = client.open("remote", None).unwrap_err();
    assert!(err.is_no_such_object());
    assert_eq!(client.cluster_count(), 0);
}

#[test]
fn test_cluster_map_created_after_connect() {
    let front = start_server();
    let back = start_server();
    back.engine().containers().create(VOLATILE_LIST, "late").unwrap();
    let mut client = connect(&front, options());

    route(&front, "late", host_port(&back));
    let handle = client.open("late", None).unwrap();
    assert_eq!(handle.link(), LinkId::Cluster(0));
}

#[test]
fn test_bare_port_routes_to_primary_host() {
    let front = start_server();
    let back = start_server();
    back.engine().containers().create(VOLATILE_LIST, "by-port").unwrap();
    route(&front, "by-port", i32::from(back.port()));
    let mut client = connect(&front, options());

    let handle = client.open("by-port", None).unwrap();
    assert_eq!(handle.link(), LinkId::Cluster(0));
    assert_eq!(client.cluster_link("127.0.0.1", back.port()), Some(handle.link()));
}

// =============================================================================
// Multi-socket Receive Tests
// =============================================================================

#[test]
fn test_events_from_every_link() {
    let (front, back) = cluster();
    let mut client = connect(&front, options());

    let local = client.create("local", None).unwrap();
    let remote = client.open("remote", None).unwrap();
    client.subscribe(local, None, |_| {}).unwrap();
    client.subscribe(remote, None, |_| {}).unwrap();

    let mut front_writer = connect(&front, options());
    let mut back_writer = connect(&back, options());
    let front_list = front_writer.open("local", None).unwrap();
    let back_list = back_writer.open("remote", None).unwrap();
    front_writer.push_back(front_list, "from-front", Data::None).unwrap();
    back_writer.push_back(back_list, "from-back", Data::None).unwrap();

    let mut seen = HashSet::new();
    for _ in 0..2 {
        let event = client.next_event(Some(Duration::from_secs(5))).unwrap().unwrap();
        assert_eq!(event.event_code, Command::PushBack);
        seen.insert((event.handle.link(), event.container_name.clone(), event.value.to_text()));
    }

    assert!(seen.contains(&(LinkId::Primary, "local".to_string(), "from-front".to_string())));
    assert!(seen.contains(&(LinkId::Cluster(0), "remote".to_string(), "from-back".to_string())));
}

#[test]
fn test_network_batch_spans_links() {
    let (front, back) = cluster();
    let mut client = connect(&front, options());
    let local = client.create("local", None).unwrap();
    let remote = client.open("remote", None).unwrap();

    client.begin_network_batch().unwrap();
    for i in 0..10 {
        client.push_back(local, i, Data::None).unwrap();
        client.push_back(remote, i, Data::None).unwrap();
    }
    client.finish_network_batch().unwrap();

    assert_eq!(client.count(local).unwrap(), 10);
    assert_eq!(client.count(remote).unwrap(), 10);
    assert_eq!(
        back.engine().containers().open(None, "remote").unwrap().record_count(),
        10
    );
}
