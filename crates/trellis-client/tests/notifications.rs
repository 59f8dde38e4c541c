//! Event subscriptions over the in-memory event server

mod common;

use std::time::Duration;

use common::{
    collector, eventually, middleware, payloads, wait_subscribed, EventServer, ScriptedRequests,
};
use serde_json::json;
use trellis_client::protocol::OutboundFrame;
use trellis_client::{ChannelEvent, ConnectionState, ProjectChannel};

#[tokio::test]
async fn test_event_reaches_only_its_channel() {
    let server = EventServer::new();
    let middleware = middleware(ScriptedRequests::new(), server.clone());

    let (on_123, seen_123) = collector();
    let (on_456, seen_456) = collector();
    middleware.subscribe("project:123", on_123).await.unwrap();
    middleware.subscribe("project:456", on_456).await.unwrap();
    wait_subscribed(&server, &["project:123", "project:456"]).await;

    let payload = json!({"type": "ASSET_CREATED", "id": "A1"});
    server.emit("project:123", payload.clone()).await;

    eventually("delivery", || seen_123.lock().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(payloads(&seen_123), vec![payload]);
    assert_eq!(seen_123.lock()[0].event_type(), Some("ASSET_CREATED"));
    assert!(seen_456.lock().is_empty());
}

#[tokio::test]
async fn test_fan_out_to_every_listener_once() {
    let server = EventServer::new();
    let middleware = middleware(ScriptedRequests::new(), server.clone());

    let (first, seen_first) = collector();
    let (second, seen_second) = collector();
    middleware
        .subscribe(&ProjectChannel::new("123"), first)
        .await
        .unwrap();
    middleware.subscribe("project:123", second).await.unwrap();

    // One server subscription serves both listeners.
    wait_subscribed(&server, &["project:123"]).await;

    server.emit("project:123", json!({"n": 1})).await;
    eventually("both listeners", || {
        seen_first.lock().len() == 1 && seen_second.lock().len() == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen_first.lock().len(), 1);
    assert_eq!(seen_second.lock().len(), 1);
}

#[tokio::test]
async fn test_unsubscribed_listener_stops_receiving() {
    let server = EventServer::new();
    let middleware = middleware(ScriptedRequests::new(), server.clone());

    let (kept, seen_kept) = collector();
    let (removed, seen_removed) = collector();
    middleware.subscribe("asset:A1", kept).await.unwrap();
    let subscription = middleware.subscribe("asset:A1", removed).await.unwrap();
    wait_subscribed(&server, &["asset:A1"]).await;

    server.emit("asset:A1", json!(1)).await;
    eventually("first event", || seen_removed.lock().len() == 1).await;

    middleware.unsubscribe(&subscription).await.unwrap();

    server.emit("asset:A1", json!(2)).await;
    eventually("second event", || seen_kept.lock().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(payloads(&seen_removed), vec![json!(1)]);
    // Still subscribed server-side for the remaining listener.
    assert_eq!(server.subscribed(), vec!["asset:A1".to_string()]);

    // Unsubscribing twice is harmless.
    middleware.unsubscribe(&subscription).await.unwrap();
}

#[tokio::test]
async fn test_last_unsubscribe_releases_server_channel() {
    let server = EventServer::new();
    let middleware = middleware(ScriptedRequests::new(), server.clone());

    let (listener, _) = collector();
    let subscription = middleware.subscribe("wallet:0xabc", listener).await.unwrap();
    wait_subscribed(&server, &["wallet:0xabc"]).await;

    middleware.unsubscribe(&subscription).await.unwrap();
    wait_subscribed(&server, &[]).await;
    assert!(server.frames(0).contains(&OutboundFrame::Unsubscribe {
        channel: "wallet:0xabc".try_into().unwrap()
    }));
}

#[tokio::test]
async fn test_resubscribes_after_connection_drop() {
    let server = EventServer::new();
    let middleware = middleware(ScriptedRequests::new(), server.clone());
    let mut states = middleware.state_changes();

    let (a, seen_a) = collector();
    let (b, seen_b) = collector();
    middleware.subscribe("project:1", a).await.unwrap();
    middleware.subscribe("asset:7", b).await.unwrap();
    wait_subscribed(&server, &["project:1", "asset:7"]).await;
    eventually("connected", || middleware.state() == ConnectionState::Connected).await;

    server.drop_connection();
    eventually("reconnect", || server.connects() == 2).await;
    wait_subscribed(&server, &["project:1", "asset:7"]).await;
    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    server.emit("project:1", json!("after")).await;
    server.emit("asset:7", json!("after")).await;
    eventually("post-reconnect delivery", || {
        seen_a.lock().len() == 1 && seen_b.lock().len() == 1
    })
    .await;
}

#[tokio::test]
async fn test_heartbeat_timeout_forces_reconnect() {
    let server = EventServer::new();
    let middleware = middleware(ScriptedRequests::new(), server.clone());

    let (listener, seen) = collector();
    middleware.subscribe("project:9", listener).await.unwrap();
    wait_subscribed(&server, &["project:9"]).await;
    assert_eq!(server.connects(), 1);

    server.mute_pongs(true);
    eventually("heartbeat reconnect", || server.connects() >= 2).await;
    assert!(server.frames(0).contains(&OutboundFrame::Ping));
    server.mute_pongs(false);

    // Let any connection that pinged while muted time out and be replaced.
    tokio::time::sleep(Duration::from_millis(300)).await;
    wait_subscribed(&server, &["project:9"]).await;
    let connects = server.connects();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(server.connects(), connects, "answered pings keep the link up");

    server.emit("project:9", json!({"alive": true})).await;
    eventually("delivery", || seen.lock().len() == 1).await;
}

#[tokio::test]
async fn test_retries_until_server_accepts() {
    let server = EventServer::new();
    server.refuse_connections(true);
    let middleware = middleware(ScriptedRequests::new(), server.clone());

    let (listener, seen) = collector();
    // Subscribing does not wait for the connection to come up.
    middleware.subscribe("project:5", listener).await.unwrap();
    eventually("retries", || server.connects() >= 3).await;
    assert_ne!(middleware.state(), ConnectionState::Connected);

    server.refuse_connections(false);
    wait_subscribed(&server, &["project:5"]).await;

    server.emit("project:5", json!(5)).await;
    eventually("delivery", || seen.lock().len() == 1).await;
}

#[tokio::test]
async fn test_failing_listeners_are_isolated() {
    let server = EventServer::new();
    let middleware = middleware(ScriptedRequests::new(), server.clone());

    middleware
        .subscribe("project:1", |_: &ChannelEvent| -> anyhow::Result<()> {
            anyhow::bail!("listener rejected the event")
        })
        .await
        .unwrap();
    middleware
        .subscribe("project:1", |_: &ChannelEvent| -> anyhow::Result<()> {
            panic!("listener crashed")
        })
        .await
        .unwrap();
    let (healthy, seen) = collector();
    middleware.subscribe("project:1", healthy).await.unwrap();
    wait_subscribed(&server, &["project:1"]).await;

    server.emit("project:1", json!(1)).await;
    server.emit("project:1", json!(2)).await;
    eventually("healthy delivery", || seen.lock().len() == 2).await;
    assert_eq!(payloads(&seen), vec![json!(1), json!(2)]);

    // The connection survived both failures.
    assert_eq!(server.connects(), 1);
    assert_eq!(middleware.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_listener_sees_events_in_arrival_order() {
    let server = EventServer::new();
    let middleware = middleware(ScriptedRequests::new(), server.clone());

    let (listener, seen) = collector();
    middleware.subscribe("project:1", listener).await.unwrap();
    wait_subscribed(&server, &["project:1"]).await;
    for n in 0..25 {
        server.emit("project:1", json!(n)).await;
    }
    eventually("all events", || seen.lock().len() == 25).await;
    let expected: Vec<_> = (0..25).map(|n| json!(n)).collect();
    assert_eq!(payloads(&seen), expected);
}
