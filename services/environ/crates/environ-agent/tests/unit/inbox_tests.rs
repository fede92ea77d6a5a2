//! Request intake: mutation ordering and reply delivery.

use std::sync::Arc;

use environ_agent::{Delivery, Inbox, Request};
use environ_common::{EnvValue, Metadata, Reply};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::mocks::{RecordingRunner, dispatcher, env_file, read};

fn request(id: usize, event: &str, payload: serde_json::Value) -> Request {
    Request {
        meta: Metadata {
            event: event.to_string(),
            channel: format!("none:orion_minion:{event}"),
            id: Some(id.to_string()),
            reply_to: Some(format!("replies:{id}")),
        },
        payload,
    }
}

async fn collect(deliveries: &mut UnboundedReceiver<Delivery>, count: usize) -> Vec<Delivery> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(deliveries.recv().await.expect("delivery channel open"));
    }
    out
}

fn ids(deliveries: &[Delivery]) -> Vec<usize> {
    deliveries
        .iter()
        .map(|d| d.meta.id.as_deref().unwrap().parse().unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sets_to_one_key_apply_in_arrival_order() {
    let (_dir, path) = env_file("A=start\n");
    let d = Arc::new(dispatcher(&path, RecordingRunner::silent()).await);
    let (inbox, mut deliveries) = Inbox::start(Arc::clone(&d));

    for i in 0..50 {
        inbox.submit(request(i, "env.set", json!({"key": "A", "value": i})));
    }
    let replies = collect(&mut deliveries, 50).await;

    assert_eq!(ids(&replies), (0..50).collect::<Vec<_>>());
    assert_eq!(read(&path), "A=49\n");
    assert_eq!(d.store().value("A").await, Some(EnvValue::Int(49)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_mutations_apply_in_arrival_order() {
    let (_dir, path) = env_file("A=1\n");
    let d = Arc::new(dispatcher(&path, RecordingRunner::silent()).await);
    let (inbox, mut deliveries) = Inbox::start(d);

    inbox.submit(request(0, "env.add", json!({"key": "B", "value": "x"})));
    inbox.submit(request(1, "env.delete", json!({"key": "B"})));
    inbox.submit(request(2, "env.write", json!({"data": "C=3\n"})));
    inbox.submit(request(3, "env.set", json!({"key": "D", "value": 4})));
    let replies = collect(&mut deliveries, 4).await;

    assert_eq!(ids(&replies), vec![0, 1, 2, 3]);
    assert!(replies.iter().all(|d| !d.reply.is_error()), "{replies:?}");
    assert_eq!(read(&path), "C=3\nD=4\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reads_and_unknown_events_are_answered_alongside_mutations() {
    let (_dir, path) = env_file("A=1\n");
    let d = Arc::new(dispatcher(&path, RecordingRunner::silent()).await);
    let (inbox, mut deliveries) = Inbox::start(d);

    inbox.submit(request(0, "env.set", json!({"key": "A", "value": 2})));
    inbox.submit(request(1, "env.getKey", json!({"key": "A"})));
    inbox.submit(request(2, "env.rm", json!({})));
    inbox.submit(request(3, "env.get", json!({})));
    let mut replies = collect(&mut deliveries, 4).await;
    replies.sort_by_key(|d| d.meta.id.clone());

    assert!(!replies[0].reply.is_error());
    assert!(matches!(replies[1].reply, Reply::Value(_)));
    assert_eq!(replies[2].reply, Reply::bare_error("rm is not executable"));
    assert!(matches!(replies[3].reply, Reply::Snapshot(_)));
    assert_eq!(read(&path), "A=2\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submit_never_waits_for_work() {
    let (_dir, path) = env_file("");
    let d = Arc::new(dispatcher(&path, RecordingRunner::silent()).await);
    let (inbox, mut deliveries) = Inbox::start(d);

    // All requests are queued before any reply is read.
    for i in 0..1000 {
        let event = if i % 2 == 0 { "env.set" } else { "env.getKey" };
        inbox.submit(request(i, event, json!({"key": format!("K{}", i % 10), "value": i})));
    }
    let replies = collect(&mut deliveries, 1000).await;

    let mut seen = ids(&replies);
    seen.sort_unstable();
    assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    // Only even requests set, so only the even keys exist.
    assert_eq!(read(&path).lines().count(), 5);
}

#[tokio::test]
async fn worker_stops_once_every_inbox_is_dropped() {
    let (_dir, path) = env_file("A=1\n");
    let d = Arc::new(dispatcher(&path, RecordingRunner::silent()).await);
    let (inbox, mut deliveries) = Inbox::start(d);

    inbox.submit(request(0, "env.set", json!({"key": "A", "value": 2})));
    drop(inbox);

    let last = deliveries.recv().await.expect("queued mutation still answered");
    assert_eq!(last.meta.id.as_deref(), Some("0"));
    assert!(deliveries.recv().await.is_none());
    assert_eq!(read(&path), "A=2\n");
}
