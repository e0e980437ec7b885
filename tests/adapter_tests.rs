//! Tests for the protocol adapter: marker routing, message conversion,
//! thread info synthesis and legacy pass-through.

mod common;

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use common::*;
use llc_bridge::adapter::{message_handler, BridgeApi, NormalizedMessage, SendReceipt};
use llc_bridge::composer::{methods, CapabilityProvider};

fn adapter(h: &Harness, legacy: Option<Arc<RecordingProvider>>) -> BridgeApi {
    BridgeApi::new(
        h.client.clone(),
        legacy.map(|l| l as Arc<dyn CapabilityProvider>),
    )
}

// ---------------------------------------------------------------------------
// sendMessage / editMessage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bridge_send_replies_to_thread_user() {
    let mut h = harness(config());
    let mut peer = h.open().await;
    let api = Arc::new(adapter(&h, None));

    let sender = api.clone();
    let send = tokio::spawn(async move { sender.send_message("hey", "LLC:alice", None).await });

    let frame = within(peer.next_json()).await.unwrap();
    assert_eq!(frame["type"], "message_reply");
    assert_eq!(frame["text"], "hey");
    assert_eq!(frame["replyTo"]["username"], "alice");
    assert_eq!(frame["isBot"], false);
    peer.push_json(echo_of(&frame, "77"));

    match within(send).await.unwrap().unwrap() {
        SendReceipt::Bridge(msg) => {
            assert_eq!(msg.body, "hey");
            assert_eq!(msg.sender_id, "LLC:bot");
            assert_eq!(msg.thread_id, "LLC:bot");
            assert_eq!(msg.message_id, "LLC:77");
        }
        other => panic!("expected bridge receipt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bridge_send_empty_body_becomes_empty_text() {
    let mut h = harness(config());
    let mut peer = h.open().await;
    let api = Arc::new(adapter(&h, None));

    let sender = api.clone();
    let send = tokio::spawn(async move {
        sender
            .invoke(methods::SEND_MESSAGE, vec![json!({"body": ""}), json!("LLC:alice")])
            .await
    });

    let frame = within(peer.next_json()).await.unwrap();
    assert_eq!(frame["text"], "Empty");
    peer.push_json(echo_of(&frame, "1"));

    let value = within(send).await.unwrap().unwrap();
    assert_eq!(value["body"], "Empty");
    assert_eq!(value["isGroup"], true);
}

#[tokio::test]
async fn test_bridge_send_when_closed_is_not_ready() {
    let h = harness(config());
    let api = adapter(&h, None);
    let err = api.send_message("x", "LLC:alice", None).await.unwrap_err();
    assert_eq!(err.to_string(), "Connection not ready!");
}

#[tokio::test]
async fn test_legacy_send_passes_through_unchanged() {
    let h = harness(config());
    let legacy = Arc::new(RecordingProvider::new(&[methods::SEND_MESSAGE], json!({"messageID": "mid.1"})));
    let api = adapter(&h, Some(legacy.clone()));

    let receipt = api.send_message("hello", "100042", Some("mid.0")).await.unwrap();
    assert_eq!(receipt, SendReceipt::Legacy(json!({"messageID": "mid.1"})));

    let calls = legacy.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "sendMessage");
    assert_eq!(calls[0].1, vec![json!({"body": "hello"}), json!("100042"), json!("mid.0")]);
    assert_eq!(h.connector.connects(), 0);
}

#[tokio::test]
async fn test_legacy_send_without_backend_is_unrouted() {
    let h = harness(config());
    let api = adapter(&h, None);
    assert_eq!(api.send_message("x", "100042", None).await.unwrap(), SendReceipt::Unrouted);
}

#[tokio::test]
async fn test_edit_routes_by_marker() {
    let mut h = harness(config());
    let mut peer = h.open().await;
    let legacy = Arc::new(RecordingProvider::new(&[methods::EDIT_MESSAGE], Value::Null));
    let api = adapter(&h, Some(legacy.clone()));

    api.edit_message("new text", "LLC:42").await.unwrap();
    let frame = within(peer.next_json()).await.unwrap();
    assert_eq!(frame["type"], "message_edit");
    assert_eq!(frame["messageID"], "42");

    api.edit_message("legacy text", "mid.5").await.unwrap();
    assert_eq!(legacy.calls()[0].1, vec![json!("legacy text"), json!("mid.5")]);
    assert!(peer.try_next_frame().is_none());
}

// ---------------------------------------------------------------------------
// listen
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_listen_delivers_normalized_reply_chains() {
    let mut h = harness(config());
    let legacy = Arc::new(RecordingProvider::new(&[methods::LISTEN_MQTT], Value::Null));
    let api = adapter(&h, Some(legacy.clone()));

    let received: Arc<Mutex<Vec<NormalizedMessage>>> = Arc::default();
    let sink = received.clone();
    api.listen(message_handler(move |msg| {
        let sink = sink.clone();
        async move { sink.lock().unwrap().push(msg) }
    }))
    .await
    .unwrap();
    let peer = h.next_peer().await;
    assert_eq!(*legacy.listeners.lock().unwrap(), 1);

    peer.push_json(json!({
        "type": "message_reply",
        "text": "same",
        "username": "carol",
        "messageID": 3,
        "replyTo": {
            "type": "message_reply",
            "text": "same",
            "username": "bob",
            "messageID": 2,
            "replyTo": {"type": "message", "text": "same", "username": "alice", "messageID": 1}
        }
    }));
    peer.push_json(json!({"type": "message_edit", "text": "ignored", "username": "carol"}));
    peer.push_json(json!({"type": "message", "text": "plain", "username": "dave", "messageID": 4}));

    eventually(|| received.lock().unwrap().len() == 2).await;
    let received = received.lock().unwrap().clone();
    let reply = received.iter().find(|m| m.kind == "message_reply").unwrap();
    assert_eq!(reply.depth(), 3);
    assert_eq!(reply.sender_id, "LLC:carol");
    assert_eq!(reply.message_id, "LLC:3");
    let root = reply
        .message_reply
        .as_deref()
        .and_then(|r| r.message_reply.as_deref())
        .unwrap();
    assert_eq!(root.sender_id, "LLC:alice");
    assert_eq!(root.body, "same");

    let plain = received.iter().find(|m| m.kind == "message").unwrap();
    assert_eq!(plain.body, "plain");
    assert_eq!(plain.thread_id, "LLC:dave");
}

// ---------------------------------------------------------------------------
// getThreadInfo / getAppState
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bridge_thread_info_lists_online_users() {
    let mut h = harness(config());
    let peer = h.open().await;
    let api = adapter(&h, None);

    peer.push_json(json!({"type": "online_users", "users": ["alice", "bob"]}));
    eventually(|| h.client.online_users().len() == 2).await;

    let info = api.get_thread_info("LLC:alice").await.unwrap();
    assert_eq!(
        serde_json::to_value(&info).unwrap(),
        json!({"adminIDs": [], "name": "alice", "participantIDs": ["alice", "bob"]})
    );
}

#[tokio::test]
async fn test_legacy_thread_info_falls_back_when_null() {
    let h = harness(config());
    let legacy = Arc::new(RecordingProvider::new(&[methods::GET_THREAD_INFO], Value::Null));
    let api = adapter(&h, Some(legacy.clone()));

    let info = api.get_thread_info("1234567").await.unwrap();
    assert_eq!(info.name, "567");
    assert!(info.participant_ids.is_empty());
    assert_eq!(legacy.calls()[0].1, vec![json!("1234567")]);
}

#[tokio::test]
async fn test_legacy_thread_info_is_used_when_present() {
    let h = harness(config());
    let legacy = Arc::new(RecordingProvider::new(
        &[methods::GET_THREAD_INFO],
        json!({"adminIDs": [{"id": "1"}], "name": "Group", "participantIDs": ["1", "2"], "emoji": null}),
    ));
    let api = adapter(&h, Some(legacy));

    let info = api.get_thread_info("1234567").await.unwrap();
    assert_eq!(info.name, "Group");
    assert_eq!(info.participant_ids, vec!["1", "2"]);
    assert!(info.extra.contains_key("emoji"));
}

#[tokio::test]
async fn test_app_state_defaults_to_empty() {
    let h = harness(config());
    assert!(adapter(&h, None).get_app_state().await.unwrap().is_empty());

    let legacy = Arc::new(RecordingProvider::new(&[methods::GET_APP_STATE], json!([{"key": "c_user"}])));
    let state = adapter(&h, Some(legacy)).get_app_state().await.unwrap();
    assert_eq!(state, vec![json!({"key": "c_user"})]);
}
