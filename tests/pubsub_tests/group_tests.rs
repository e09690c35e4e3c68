//! Group Tests
//!
//! Tests for group membership and late-join fan-out.

mod mock;

use std::sync::Arc;

use mock::{wait_until, MockSession};
use tessera::container::{Container, ContainerManager, VOLATILE_LIST};
use tessera::protocol::{Command, Data};
use tessera::pubsub::{EventInfo, SubscriptionEngine, GROUP_META_PREFIX};

fn setup() -> (Arc<ContainerManager>, SubscriptionEngine) {
    let containers = Arc::new(ContainerManager::new());
    let engine = SubscriptionEngine::start(Arc::clone(&containers)).unwrap();
    (containers, engine)
}

fn push(engine: &SubscriptionEngine, container: &Arc<dyn Container>, value: &str) {
    let key = container.push_back(Data::from(value), Data::None).unwrap();
    engine.publish(EventInfo::new(container.id(), Command::PushBack, key, Data::from(value), Data::None));
}

#[test]
fn test_group_add_is_idempotent() {
    let (containers, engine) = setup();
    let list = containers.create(VOLATILE_LIST, "feed-a").unwrap();

    assert!(engine.group_add("feeds", Arc::clone(&list)).unwrap());
    assert!(!engine.group_add("feeds", Arc::clone(&list)).unwrap());
    assert_eq!(engine.groups().members("feeds"), vec!["feed-a".to_string()]);
}

#[test]
fn test_group_members_mirrored_in_meta() {
    let (containers, engine) = setup();
    let list = containers.create(VOLATILE_LIST, "feed-a").unwrap();
    engine.group_add("feeds", list).unwrap();

    let meta = containers.open(None, &format!("{}feeds", GROUP_META_PREFIX)).unwrap();
    let record = meta.get_record(&Data::from("feed-a")).unwrap();
    assert_eq!(record.value, Data::from(VOLATILE_LIST));
}

#[test]
fn test_group_requires_name() {
    let (containers, engine) = setup();
    let list = containers.create(VOLATILE_LIST, "feed-a").unwrap();
    assert!(engine.group_add("", list).is_err());
}

#[test]
fn test_group_subscribe_streams_existing_members() {
    let (containers, engine) = setup();
    let a = containers.create(VOLATILE_LIST, "feed-a").unwrap();
    let b = containers.create(VOLATILE_LIST, "feed-b").unwrap();
    a.push_back(Data::from("a0"), Data::None).unwrap();
    engine.group_add("feeds", Arc::clone(&a)).unwrap();
    engine.group_add("feeds", Arc::clone(&b)).unwrap();

    let session = MockSession::new(1);
    engine.group_subscribe(&session, "feeds", "0").unwrap();

    assert!(wait_until(|| session.group_notifications().len() == 2));
    let notifications = session.group_notifications();
    let names: Vec<&str> = notifications.iter().map(|(_, _, n)| n.as_str()).collect();
    assert_eq!(names, vec!["feed-a", "feed-b"]);

    let handle_a = notifications[0].1;
    let handle_b = notifications[1].1;
    assert_ne!(handle_a, handle_b);
    assert!(wait_until(|| session.codes(handle_b) == vec![Command::SnapshotEnd]));
    assert_eq!(session.codes(handle_a), vec![Command::PushBack, Command::SnapshotEnd]);
}

#[test]
fn test_group_notification_without_snapshot() {
    let (containers, engine) = setup();
    let a = containers.create(VOLATILE_LIST, "feed-a").unwrap();
    a.push_back(Data::from("old"), Data::None).unwrap();
    engine.group_add("feeds", Arc::clone(&a)).unwrap();

    let session = MockSession::new(1);
    engine.group_subscribe(&session, "feeds", "").unwrap();
    assert!(wait_until(|| session.group_notifications().len() == 1));

    push(&engine, &a, "new");
    let handle = session.group_notifications()[0].1;
    assert!(wait_until(|| session.codes(handle) == vec![Command::PushBack]));
    assert_eq!(session.events()[0].1.value, Data::from("new"));
}

#[test]
fn test_group_late_join() {
    let (containers, engine) = setup();
    let session = MockSession::new(1);
    engine.group_subscribe(&session, "feeds", "").unwrap();
    assert_eq!(engine.groups().subscriber_count("feeds"), 1);

    let late = containers.create(VOLATILE_LIST, "feed-late").unwrap();
    late.push_back(Data::from("before"), Data::None).unwrap();
    engine.group_add("feeds", Arc::clone(&late)).unwrap();

    // late joiners replay from the start
    assert!(wait_until(|| session.group_notifications().len() == 1));
    let handle = session.group_notifications()[0].1;
    assert!(wait_until(|| session.codes(handle) == vec![Command::PushBack, Command::SnapshotEnd]));

    push(&engine, &late, "after");
    assert!(wait_until(|| session.codes(handle).len() == 3));
    let events = session.events();
    assert_eq!(events[0].1.value, Data::from("before"));
    assert_eq!(events[2].1.value, Data::from("after"));
}

#[test]
fn test_group_add_again_does_not_duplicate_stream() {
    let (containers, engine) = setup();
    let session = MockSession::new(1);
    engine.group_subscribe(&session, "feeds", "").unwrap();

    let late = containers.create(VOLATILE_LIST, "feed-late").unwrap();
    engine.group_add("feeds", Arc::clone(&late)).unwrap();
    engine.group_add("feeds", Arc::clone(&late)).unwrap();

    assert!(wait_until(|| session.group_notifications().len() == 1));
    assert_eq!(engine.subscriber_count(late.id()), 1);
}

#[test]
fn test_group_subscribers_removed_with_session() {
    let (containers, engine) = setup();
    let session = MockSession::new(1);
    engine.group_subscribe(&session, "feeds", "").unwrap();
    engine.remove_session(1);
    assert_eq!(engine.groups().subscriber_count("feeds"), 0);

    let late = containers.create(VOLATILE_LIST, "feed-late").unwrap();
    engine.group_add("feeds", late).unwrap();
    assert!(session.group_notifications().is_empty());
}

#[test]
fn test_several_group_subscribers() {
    let (containers, engine) = setup();
    let first = MockSession::new(1);
    let second = MockSession::new(2);
    engine.group_subscribe(&first, "feeds", "").unwrap();
    engine.group_subscribe(&second, "feeds", "").unwrap();

    let late = containers.create(VOLATILE_LIST, "feed-late").unwrap();
    engine.group_add("feeds", Arc::clone(&late)).unwrap();
    assert!(wait_until(|| {
        first.group_notifications().len() == 1 && second.group_notifications().len() == 1
    }));

    push(&engine, &late, "x");
    assert!(wait_until(|| first.events().len() == 1 && second.events().len() == 1));
}
