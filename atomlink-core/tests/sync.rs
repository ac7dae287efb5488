//! Integration Tests for the Client Sync Adapter
//!
//! These tests bind `SyncedAtom`s on separate connections to one relay and
//! check that local signals mirror each other.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use atomlink_core::client::{RemoteConnection, SyncedAtom};
use atomlink_core::protocol::{AtomId, WireFormat};
use atomlink_core::reactive::Signal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use common::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct UserState {
    last_active: u64,
    typing: bool,
}

/// A write on one binding shows up in the other binding's signal.
#[tokio::test]
async fn bindings_mirror_each_other() {
    let relay = TestRelay::start().await;
    let key = AtomId::composite(["usersInChannel", "Channel A"]);

    let alice = SyncedAtom::new(
        RemoteConnection::connect(&relay.url()).await.unwrap(),
        key.clone(),
        Vec::<String>::new(),
    );
    let bob = SyncedAtom::new(
        RemoteConnection::connect(&relay.url()).await.unwrap(),
        key.clone(),
        Vec::<String>::new(),
    );
    alice.activate().unwrap();
    bob.activate().unwrap();
    eventually(|| relay.registry.subscriber_count(&key) == 2).await;

    assert!(alice.set(vec!["alice".to_string()]).unwrap());

    eventually(|| bob.get() == vec!["alice".to_string()]).await;
    assert_eq!(alice.get(), vec!["alice".to_string()]);
}

/// A binding activated after a write starts from the stored value.
#[tokio::test]
async fn late_binding_catches_up() {
    let relay = TestRelay::start().await;
    let mut raw = relay.raw_client().await;
    write(&mut raw, "user/ada", json!({"last_active": 7, "typing": true})).await;
    eventually(|| relay.registry.value(&"user/ada".into()).is_some()).await;

    let conn = RemoteConnection::connect(&relay.url()).await.unwrap();
    let user = SyncedAtom::new(conn, "user/ada".into(), None::<UserState>);
    user.activate().unwrap();

    eventually(|| user.get().is_some()).await;
    assert_eq!(
        user.get(),
        Some(UserState {
            last_active: 7,
            typing: true
        })
    );
}

/// Setting a deep-equal value sends nothing to the relay.
#[tokio::test]
async fn equal_values_are_not_published() {
    let relay = TestRelay::start().await;
    let mut observer = relay.raw_client().await;
    listen(&mut observer, "state").await;

    let conn = RemoteConnection::connect(&relay.url()).await.unwrap();
    let state = SyncedAtom::new(
        conn,
        "state".into(),
        UserState {
            last_active: 1,
            typing: false,
        },
    );
    state.activate().unwrap();
    eventually(|| relay.registry.subscriber_count(&"state".into()) == 2).await;

    let copy = state.get();
    assert!(!state.set(copy).unwrap());
    expect_silence(&mut observer).await;
    assert!(relay.registry.value(&"state".into()).is_none());
}

/// The author's own echo does not notify its signal a second time.
#[tokio::test]
async fn echo_does_not_renotify() {
    let relay = TestRelay::start().await;
    let conn = RemoteConnection::connect(&relay.url()).await.unwrap();
    let signal = Signal::new(0u32);
    let notified = Arc::new(AtomicUsize::new(0));
    let notified_clone = notified.clone();
    signal.subscribe(move |_| {
        notified_clone.fetch_add(1, Ordering::SeqCst);
    });

    let counter = SyncedAtom::with_signal(conn, "counter".into(), signal);
    counter.activate().unwrap();
    eventually(|| relay.registry.subscriber_count(&"counter".into()) == 1).await;

    counter.set(3).unwrap();
    eventually(|| relay.registry.value(&"counter".into()).is_some()).await;
    tokio::time::sleep(QUIET).await;

    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(counter.get(), 3);
}

/// A listener that writes back what it received does not start a loop.
#[tokio::test]
async fn write_back_listener_settles() {
    let relay = TestRelay::start().await;
    let key = AtomId::from("ping-pong");
    let a = Arc::new(SyncedAtom::new(
        RemoteConnection::connect(&relay.url()).await.unwrap(),
        key.clone(),
        0i64,
    ));
    let b = SyncedAtom::new(
        RemoteConnection::connect(&relay.url()).await.unwrap(),
        key.clone(),
        0i64,
    );

    // `a` re-publishes every value it sees.
    let a_ref = Arc::clone(&a);
    a.signal().subscribe(move |value| {
        let _ = a_ref.set(*value);
    });

    a.activate().unwrap();
    b.activate().unwrap();
    eventually(|| relay.registry.subscriber_count(&key) == 2).await;

    b.set(42).unwrap();
    eventually(|| a.get() == 42).await;
    tokio::time::sleep(QUIET).await;

    let mut observer = relay.raw_client().await;
    listen(&mut observer, "ping-pong").await;
    assert_eq!(next_data(&mut observer).await.1, json!(42));
    expect_silence(&mut observer).await;
}

/// Deactivating stops remote updates and removes the relay subscription.
#[tokio::test]
async fn deactivate_unsubscribes() {
    let relay = TestRelay::start().await;
    let conn = RemoteConnection::connect(&relay.url()).await.unwrap();
    let flag = SyncedAtom::new(conn, "flag".into(), false);
    flag.activate().unwrap();
    eventually(|| relay.registry.subscriber_count(&"flag".into()) == 1).await;

    flag.deactivate().unwrap();
    eventually(|| relay.registry.subscriber_count(&"flag".into()) == 0).await;

    let mut raw = relay.raw_client().await;
    write(&mut raw, "flag", json!(true)).await;
    eventually(|| relay.registry.value(&"flag".into()).is_some()).await;
    tokio::time::sleep(QUIET).await;
    assert!(!flag.get());
}

/// Presence-style bindings publish their leave value on drop.
#[tokio::test]
async fn on_leave_value_reaches_other_clients() {
    let relay = TestRelay::start().await;
    let mut observer = relay.raw_client().await;
    listen(&mut observer, "typing/ada").await;

    let conn = RemoteConnection::connect(&relay.url()).await.unwrap();
    let typing = SyncedAtom::new(conn, "typing/ada".into(), false).set_on_leave(false);
    typing.activate().unwrap();
    eventually(|| relay.registry.subscriber_count(&"typing/ada".into()) == 2).await;

    typing.set(true).unwrap();
    assert_eq!(next_data(&mut observer).await.1, json!(true));

    drop(typing);
    assert_eq!(next_data(&mut observer).await.1, json!(false));
}

/// Clients speaking MessagePack interoperate with JSON clients.
#[tokio::test]
async fn message_pack_clients_interoperate() {
    let relay = TestRelay::start().await;
    let mut json_client = relay.raw_client().await;
    listen(&mut json_client, "mixed").await;

    let conn = RemoteConnection::connect_with_format(&relay.url(), WireFormat::MessagePack)
        .await
        .unwrap();
    let mixed = SyncedAtom::new(conn, "mixed".into(), Vec::<u32>::new());
    mixed.activate().unwrap();
    eventually(|| relay.registry.subscriber_count(&"mixed".into()) == 2).await;

    mixed.set(vec![1, 2, 3]).unwrap();
    assert_eq!(next_data(&mut json_client).await.1, json!([1, 2, 3]));

    write(&mut json_client, "mixed", json!([4])).await;
    eventually(|| mixed.get() == vec![4]).await;
}

/// One connection can carry several bindings.
#[tokio::test]
async fn bindings_share_a_connection() {
    let relay = TestRelay::start().await;
    let conn = RemoteConnection::connect(&relay.url()).await.unwrap();
    let first = SyncedAtom::new(conn.clone(), "one".into(), 0u8);
    let second = SyncedAtom::new(conn.clone(), "two".into(), 0u8);
    first.activate().unwrap();
    second.activate().unwrap();
    eventually(|| relay.registry.session_count() == 1).await;
    eventually(|| relay.registry.stats().subscriptions == 2).await;

    let mut raw = relay.raw_client().await;
    write(&mut raw, "two", json!(9)).await;
    eventually(|| second.get() == 9).await;
    assert_eq!(first.get(), 0);

    // The raw client never subscribed, so nothing is left once `conn` closes.
    conn.close();
    eventually(|| conn.is_closed()).await;
    eventually(|| relay.registry.session_count() == 0).await;
}

/// Deactivating one of two bindings on a shared connection keeps the other live.
#[tokio::test]
async fn shared_key_survives_one_deactivate() {
    let relay = TestRelay::start().await;
    let conn = RemoteConnection::connect(&relay.url()).await.unwrap();
    let first = SyncedAtom::new(conn.clone(), "k".into(), 0i32);
    let second = SyncedAtom::new(conn.clone(), "k".into(), 0i32);
    first.activate().unwrap();
    second.activate().unwrap();
    eventually(|| relay.registry.subscriber_count(&"k".into()) == 1).await;

    first.deactivate().unwrap();
    tokio::time::sleep(QUIET).await;
    assert_eq!(relay.registry.subscriber_count(&"k".into()), 1);
    assert!(second.is_active());

    let mut raw = relay.raw_client().await;
    write(&mut raw, "k", json!(7)).await;
    eventually(|| second.get() == 7).await;
    assert_eq!(first.get(), 0);

    second.deactivate().unwrap();
    eventually(|| relay.registry.subscriber_count(&"k".into()) == 0).await;
}
