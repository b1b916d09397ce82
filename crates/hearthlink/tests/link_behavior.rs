//! Behavioral tests for [`BackendLink`] against a mock WebSocket backend.
//!
//! The mock speaks the backend's connect handshake (auth_required →
//! auth → auth_ok) and then runs a per-test script, so each test controls
//! exactly which frames arrive and when the connection drops.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use hearthlink::{BackendLink, LinkConfig, LinkState};
use hearthproto::GatewayError;

const TEST_TOKEN: &str = "test-token";

type MockWs = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

fn fast_config(url: &str) -> LinkConfig {
    LinkConfig::new(url, TEST_TOKEN)
        .with_command_timeout(Duration::from_secs(5))
        .with_reconnect_base_delay(Duration::from_millis(20))
}

/// Accept one connection and run the credential handshake.
async fn accept_and_handshake(listener: &TcpListener) -> MockWs {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    send_json(&mut ws, json!({"type": "auth_required", "ha_version": "2024.1.0"})).await;
    let auth = recv_json(&mut ws).await;
    assert_eq!(auth["type"], "auth");
    assert_eq!(auth["access_token"], TEST_TOKEN);
    send_json(&mut ws, json!({"type": "auth_ok", "ha_version": "2024.1.0"})).await;
    ws
}

async fn send_json(ws: &mut MockWs, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Read the next text frame as JSON, skipping control frames.
async fn recv_json(ws: &mut MockWs) -> Value {
    loop {
        match ws.next().await.expect("peer closed").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn wait_for_state(link: &BackendLink, want: LinkState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while link.state() != want {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {want}, stuck at {}",
            link.state()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_commands_get_increasing_ids_and_out_of_order_responses_correlate() {
    let (listener, url) = bind().await;

    let backend = tokio::spawn(async move {
        let mut ws = accept_and_handshake(&listener).await;

        let first = recv_json(&mut ws).await;
        let second = recv_json(&mut ws).await;
        assert_eq!(first["id"], 1);
        assert_eq!(first["type"], "get_states");
        assert_eq!(second["id"], 2);
        assert_eq!(second["type"], "get_config");

        // Answer in reverse order; correlation is by id, not arrival.
        send_json(
            &mut ws,
            json!({"id": 2, "type": "result", "success": true, "result": {"version": "1"}}),
        )
        .await;
        send_json(
            &mut ws,
            json!({"id": 1, "type": "result", "success": true, "result": []}),
        )
        .await;
        ws
    });

    let link = BackendLink::spawn(fast_config(&url));
    wait_for_state(&link, LinkState::Connected).await;

    let (states, config) = tokio::join!(
        link.send_command(json!({"type": "get_states"})),
        link.send_command(json!({"type": "get_config"})),
    );

    assert_eq!(states.unwrap()["result"], json!([]));
    assert_eq!(config.unwrap()["result"]["version"], "1");

    link.shutdown();
    backend.await.unwrap();
}

#[tokio::test]
async fn test_orphan_response_is_discarded() {
    let (listener, url) = bind().await;

    let backend = tokio::spawn(async move {
        let mut ws = accept_and_handshake(&listener).await;
        let cmd = recv_json(&mut ws).await;
        assert_eq!(cmd["id"], 1);

        // A response nothing is waiting for, then the real one.
        send_json(&mut ws, json!({"id": 999, "type": "result", "success": true})).await;
        send_json(
            &mut ws,
            json!({"id": 1, "type": "result", "success": true, "result": "ok"}),
        )
        .await;
        ws
    });

    let link = BackendLink::spawn(fast_config(&url));
    wait_for_state(&link, LinkState::Connected).await;

    let response = link.send_command(json!({"type": "get_states"})).await.unwrap();
    assert_eq!(response["result"], "ok");

    link.shutdown();
    backend.await.unwrap();
}

#[tokio::test]
async fn test_timeout_removes_pending_and_link_survives() {
    let (listener, url) = bind().await;

    let backend = tokio::spawn(async move {
        let mut ws = accept_and_handshake(&listener).await;

        // Never answer the first command.
        let first = recv_json(&mut ws).await;
        assert_eq!(first["id"], 1);

        // The second proves the link is still usable.
        let second = recv_json(&mut ws).await;
        assert_eq!(second["id"], 2);
        send_json(
            &mut ws,
            json!({"id": 2, "type": "result", "success": true, "result": "alive"}),
        )
        .await;
        ws
    });

    let config = LinkConfig::new(&url, TEST_TOKEN)
        .with_command_timeout(Duration::from_millis(200))
        .with_reconnect_base_delay(Duration::from_millis(20));
    let link = BackendLink::spawn(config);
    wait_for_state(&link, LinkState::Connected).await;

    let err = link
        .send_command(json!({"type": "never_answered"}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout(_)), "got {err:?}");

    let response = link.send_command(json!({"type": "get_states"})).await.unwrap();
    assert_eq!(response["result"], "alive");
    assert_eq!(link.state(), LinkState::Connected);

    link.shutdown();
    backend.await.unwrap();
}

#[tokio::test]
async fn test_reconnect_replays_each_event_type_once() {
    let (listener, url) = bind().await;
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Value>();

    let backend = tokio::spawn(async move {
        // First epoch: take the subscription, then drop the connection.
        let mut ws = accept_and_handshake(&listener).await;
        let sub = recv_json(&mut ws).await;
        assert_eq!(sub["type"], "subscribe_events");
        assert_eq!(sub["event_type"], "state_changed");
        assert_eq!(sub["id"], 1);
        send_json(&mut ws, json!({"id": 1, "type": "result", "success": true})).await;
        drop(ws);

        // Second epoch: exactly one replayed subscription, ids reset.
        let mut ws = accept_and_handshake(&listener).await;
        let sub = recv_json(&mut ws).await;
        assert_eq!(sub["type"], "subscribe_events");
        assert_eq!(sub["event_type"], "state_changed");
        assert_eq!(sub["id"], 1);
        send_json(&mut ws, json!({"id": 1, "type": "result", "success": true})).await;

        send_json(
            &mut ws,
            json!({
                "id": 1,
                "type": "event",
                "event": {"event_type": "state_changed", "data": {"entity_id": "light.porch"}}
            }),
        )
        .await;

        // A command after the event confirms no duplicate subscription
        // frame arrived in between.
        let cmd = recv_json(&mut ws).await;
        assert_eq!(cmd["type"], "get_states");
        assert_eq!(cmd["id"], 2);
        send_json(
            &mut ws,
            json!({"id": 2, "type": "result", "success": true, "result": []}),
        )
        .await;
        ws
    });

    let link = BackendLink::spawn(fast_config(&url));
    wait_for_state(&link, LinkState::Connected).await;

    link.subscribe(
        "state_changed",
        Box::new(move |event: &Value| {
            event_tx.send(event.clone()).ok();
            Ok(())
        }),
    )
    .await
    .unwrap();

    // Wait out the disconnect and reconnection.
    let event = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("no event after reconnect")
        .unwrap();
    assert_eq!(event["data"]["entity_id"], "light.porch");
    assert_eq!(link.state(), LinkState::Connected);

    let response = link.send_command(json!({"type": "get_states"})).await.unwrap();
    assert_eq!(response["result"], json!([]));

    link.shutdown();
    backend.await.unwrap();
}

#[tokio::test]
async fn test_gives_up_after_bounded_attempts() {
    // Bind then drop so the port refuses connections.
    let (listener, url) = bind().await;
    drop(listener);

    let link = BackendLink::spawn(fast_config(&url));
    wait_for_state(&link, LinkState::Down).await;

    let err = link
        .send_command(json!({"type": "get_states"}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Connection(_)), "got {err:?}");

    let err = link.send_message(json!({"type": "ping"})).await.unwrap_err();
    assert!(matches!(err, GatewayError::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn test_rejected_credentials_fail_closed() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let mut ws = accept_async(stream).await.unwrap();
            send_json(&mut ws, json!({"type": "auth_required"})).await;
            let _auth = recv_json(&mut ws).await;
            send_json(
                &mut ws,
                json!({"type": "auth_invalid", "message": "Invalid access token"}),
            )
            .await;
            drop(ws);
        }
    });

    let mut config = fast_config(&url);
    config.max_reconnect_attempts = 1;
    let link = BackendLink::spawn(config);

    wait_for_state(&link, LinkState::Down).await;
    assert!(!link.is_connected());
}

#[tokio::test]
async fn test_event_handler_error_does_not_stop_fanout() {
    let (listener, url) = bind().await;

    let backend = tokio::spawn(async move {
        let mut ws = accept_and_handshake(&listener).await;
        let sub = recv_json(&mut ws).await;
        assert_eq!(sub["type"], "subscribe_events");
        send_json(&mut ws, json!({"id": 1, "type": "result", "success": true})).await;

        // Hold events until both handlers are registered.
        let marker = recv_json(&mut ws).await;
        assert_eq!(marker["type"], "handlers_ready");

        for entity in ["light.porch", "light.hall"] {
            send_json(
                &mut ws,
                json!({
                    "id": 1,
                    "type": "event",
                    "event": {"event_type": "state_changed", "data": {"entity_id": entity}}
                }),
            )
            .await;
        }
        ws
    });

    let seen = Arc::new(AtomicUsize::new(0));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

    let link = BackendLink::spawn(fast_config(&url));
    wait_for_state(&link, LinkState::Connected).await;

    link.subscribe(
        "state_changed",
        Box::new(|_event: &Value| anyhow::bail!("handler exploded")),
    )
    .await
    .unwrap();
    let counter = Arc::clone(&seen);
    link.subscribe(
        "state_changed",
        Box::new(move |_event: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
            done_tx.send(()).ok();
            Ok(())
        }),
    )
    .await
    .unwrap();
    link.send_message(json!({"type": "handlers_ready"})).await.unwrap();

    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .expect("event never reached second handler")
            .unwrap();
    }
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    link.shutdown();
    backend.await.unwrap();
}

#[tokio::test]
async fn test_send_message_requires_connection() {
    let (listener, url) = bind().await;

    // Hold the listener open but never accept, so the link stays in the
    // connecting/reconnecting states.
    let link = BackendLink::spawn(fast_config(&url));
    let err = link.send_message(json!({"type": "ping"})).await.unwrap_err();
    assert!(matches!(err, GatewayError::Connection(_)), "got {err:?}");

    drop(listener);
    link.shutdown();
}

#[tokio::test]
async fn test_send_command_is_bounded_when_reactor_queue_is_full() {
    // Accept TCP but never speak WebSocket, so the link sits in its
    // handshake and the reactor drains nothing.
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        std::future::pending::<()>().await;
    });

    let config = LinkConfig::new(&url, TEST_TOKEN)
        .with_command_timeout(Duration::from_millis(100));
    let link = BackendLink::spawn(config);

    // Saturate the 256-slot command channel and its waiter queue.
    for _ in 0..300 {
        let link = Arc::clone(&link);
        tokio::spawn(async move {
            let _ = link.send_command(json!({"type": "ping"})).await;
        });
    }
    tokio::task::yield_now().await;

    // A caller behind the full queue gets a timeout within its grace
    // window instead of blocking until the handshake gives up.
    let err = tokio::time::timeout(
        Duration::from_secs(4),
        link.send_command(json!({"type": "ping"})),
    )
    .await
    .expect("send_command blocked past its deadline")
    .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout(_)), "got {err:?}");

    link.shutdown();
}
