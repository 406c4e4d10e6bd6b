//! Integration tests for the Registry Actor.
//!
//! These tests drive a spawned registry through `RegistryHandle`, with
//! connection handles built directly from mailboxes so delivery can be
//! observed without any transport.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.
//! We test the panic-free behavior of production code through assertions.

use std::time::Duration;

use relay_core::{ChannelName, ConnectionId, DispatchRequest, SubscriptionSet, UserId};
use relay_protocol::EventEnvelope;
use relayd::connection::{ConnectionHandle, Mailbox, MailboxReceiver, DEFAULT_MAILBOX_CAPACITY};
use relayd::registry::{
    spawn_registry, DisconnectReason, Registration, RegistryEvent, RegistryHandle,
    RegistrySettings,
};
use relayd::transport::Frame;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::timeout;

// ============================================================================
// Test Helpers
// ============================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

struct TestConnection {
    handle: ConnectionHandle,
    receiver: MailboxReceiver,
    subscriptions: watch::Sender<SubscriptionSet>,
}

impl TestConnection {
    fn new(id: u64, user: u64) -> Self {
        Self::with_capacity(id, user, DEFAULT_MAILBOX_CAPACITY)
    }

    fn with_capacity(id: u64, user: u64, capacity: usize) -> Self {
        let (mailbox, receiver) = Mailbox::channel(capacity);
        let (subscriptions, rx) = watch::channel(SubscriptionSet::new());
        Self {
            handle: ConnectionHandle::new(ConnectionId::new(id), user_id(user), mailbox, rx),
            receiver,
            subscriptions,
        }
    }

    fn subscribe(&self, channel: &str) {
        let channel = channel_name(channel);
        self.subscriptions.send_modify(|set| {
            set.subscribe([&channel]).unwrap();
        });
    }

    async fn next_event(&mut self) -> EventEnvelope {
        match timeout(RECV_TIMEOUT, self.receiver.recv()).await {
            Ok(Some(Frame::Text(text))) => EventEnvelope::from_json(&text).unwrap(),
            other => panic!("expected an event frame, got {other:?}"),
        }
    }
}

fn user_id(id: u64) -> UserId {
    UserId::new(id).unwrap()
}

fn channel_name(name: &str) -> ChannelName {
    ChannelName::new(name).unwrap()
}

fn registry() -> RegistryHandle {
    spawn_registry(RegistrySettings::default())
}

// ============================================================================
// Membership
// ============================================================================

#[tokio::test]
async fn test_one_live_connection_per_identity() {
    let handle = registry();
    let first = TestConnection::new(1, 42);
    let second = TestConnection::new(2, 42);

    assert_eq!(
        handle.register(first.handle.clone()).await.unwrap(),
        Registration::New
    );
    assert_eq!(
        handle.register(second.handle.clone()).await.unwrap(),
        Registration::Superseded(ConnectionId::new(1))
    );

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.active_connections, 1);
    assert!(first.handle.is_closed(), "superseded mailbox should close");
    assert!(!second.handle.is_closed());
    assert!(handle.is_online(user_id(42)).await);
}

#[tokio::test]
async fn test_membership_events() {
    let handle = registry();
    let mut events = handle.subscribe();
    let first = TestConnection::new(1, 42);
    let second = TestConnection::new(2, 42);

    handle.register(first.handle.clone()).await.unwrap();
    handle.register(second.handle.clone()).await.unwrap();
    handle.unregister(second.handle.clone()).await;
    // Round-trip so the unregister has been processed
    handle.stats().await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    assert!(matches!(
        received.as_slice(),
        [
            RegistryEvent::Connected { .. },
            RegistryEvent::Connected { .. },
            RegistryEvent::Disconnected {
                reason: DisconnectReason::Superseded,
                ..
            },
            RegistryEvent::Disconnected {
                reason: DisconnectReason::Closed,
                ..
            },
        ]
    ));
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let handle = registry();
    let conn = TestConnection::new(1, 7);

    handle.register(conn.handle.clone()).await.unwrap();

    conn.handle.close();
    handle.unregister(conn.handle.clone()).await;
    handle.unregister(conn.handle.clone()).await;
    conn.handle.close();

    assert!(!handle.is_online(user_id(7)).await);
    assert_eq!(handle.stats().await.unwrap().active_connections, 0);
    assert!(handle.is_connected());
}

#[tokio::test]
async fn test_sweep_removes_connections_closed_without_unregister() {
    let handle = registry();
    let conn = TestConnection::new(1, 7);
    handle.register(conn.handle.clone()).await.unwrap();

    conn.handle.close();
    handle.sweep_closed().await;

    assert!(!handle.is_online(user_id(7)).await);
}

#[tokio::test(start_paused = true)]
async fn test_zero_sweep_interval_still_sweeps() {
    let handle = spawn_registry(RegistrySettings {
        sweep_interval: Duration::ZERO,
        ..RegistrySettings::default()
    });
    let conn = TestConnection::new(1, 7);
    handle.register(conn.handle.clone()).await.unwrap();

    conn.handle.close();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!handle.is_online(user_id(7)).await);
    assert!(handle.is_connected());
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_unicast_preserves_order() {
    let handle = registry();
    let mut conn = TestConnection::new(1, 42);
    handle.register(conn.handle.clone()).await.unwrap();

    for i in 0..100 {
        handle
            .try_dispatch(DispatchRequest::to_user(
                user_id(42),
                "seq",
                json!({ "n": i }),
            ))
            .unwrap();
    }

    for i in 0..100 {
        let event = conn.next_event().await;
        assert_eq!(event.event_type, "seq");
        assert_eq!(event.data["n"], i);
    }
}

#[tokio::test]
async fn test_unicast_reaches_only_target() {
    let handle = registry();
    let mut target = TestConnection::new(1, 1);
    let other = TestConnection::new(2, 2);
    handle.register(target.handle.clone()).await.unwrap();
    handle.register(other.handle.clone()).await.unwrap();

    handle
        .try_dispatch(DispatchRequest::to_user(user_id(1), "only_you", json!({})))
        .unwrap();

    assert_eq!(target.next_event().await.event_type, "only_you");
    handle.stats().await.unwrap();
    assert!(other.handle.mailbox().is_empty());
}

#[tokio::test]
async fn test_channel_filter() {
    let handle = registry();
    let mut conn = TestConnection::new(1, 42);
    conn.subscribe("task_updates");
    handle.register(conn.handle.clone()).await.unwrap();

    handle
        .try_dispatch(
            DispatchRequest::broadcast("account_status", json!({}))
                .with_channels([channel_name("account_status")]),
        )
        .unwrap();
    handle
        .try_dispatch(DispatchRequest::broadcast("unfiltered", json!({})))
        .unwrap();
    handle
        .try_dispatch(
            DispatchRequest::broadcast("task_update", json!({}))
                .with_channels([channel_name("task_updates")]),
        )
        .unwrap();

    assert_eq!(conn.next_event().await.event_type, "unfiltered");
    assert_eq!(conn.next_event().await.event_type, "task_update");

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.delivered, 2);
}

#[tokio::test]
async fn test_saturated_recipient_does_not_block_others() {
    let handle = registry();
    let stalled = TestConnection::new(1, 1);
    let mut healthy = TestConnection::new(2, 2);
    handle.register(stalled.handle.clone()).await.unwrap();
    handle.register(healthy.handle.clone()).await.unwrap();

    // Nobody drains the stalled mailbox
    for i in 0..DEFAULT_MAILBOX_CAPACITY + 10 {
        handle
            .try_dispatch(DispatchRequest::to_user(user_id(1), "flood", json!(i)))
            .unwrap();
    }

    let sent = timeout(Duration::from_millis(100), async {
        handle.try_dispatch(DispatchRequest::to_user(user_id(2), "hello", json!({})))
    })
    .await
    .expect("dispatch must not wait");
    sent.unwrap();

    assert_eq!(healthy.next_event().await.event_type, "hello");

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.dropped, 10);
    assert_eq!(stalled.handle.mailbox().len(), DEFAULT_MAILBOX_CAPACITY);
}

#[tokio::test]
async fn test_dropped_event_is_published() {
    let handle = registry();
    let mut events = handle.subscribe();
    let conn = TestConnection::with_capacity(1, 1, 1);
    handle.register(conn.handle.clone()).await.unwrap();

    handle
        .try_dispatch(DispatchRequest::to_user(user_id(1), "first", json!({})))
        .unwrap();
    handle
        .try_dispatch(DispatchRequest::to_user(user_id(1), "second", json!({})))
        .unwrap();
    handle.stats().await.unwrap();

    let dropped: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            RegistryEvent::Dropped { message_type, .. } => Some(message_type),
            _ => None,
        })
        .collect();
    assert_eq!(dropped, vec!["second".to_string()]);
}

// ============================================================================
// Limits and shutdown
// ============================================================================

#[tokio::test]
async fn test_max_connections() {
    let handle = spawn_registry(RegistrySettings {
        max_connections: 2,
        ..RegistrySettings::default()
    });

    let a = TestConnection::new(1, 1);
    let b = TestConnection::new(2, 2);
    let c = TestConnection::new(3, 3);
    let b2 = TestConnection::new(4, 2);

    handle.register(a.handle.clone()).await.unwrap();
    handle.register(b.handle.clone()).await.unwrap();
    assert!(handle.register(c.handle.clone()).await.is_err());
    assert!(handle.register(b2.handle.clone()).await.is_ok());
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let handle = registry();
    let a = TestConnection::new(1, 1);
    let b = TestConnection::new(2, 2);
    handle.register(a.handle.clone()).await.unwrap();
    handle.register(b.handle.clone()).await.unwrap();

    assert_eq!(handle.shutdown().await, 2);
    assert!(a.handle.is_closed());
    assert!(b.handle.is_closed());

    let late = TestConnection::new(3, 3);
    assert!(handle.register(late.handle.clone()).await.is_err());
}
