use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use lp_sentinel::config::FeedSettings;
use lp_sentinel::feed::{ClientMessage, ConnectionState, FeedClient, ServerEvent, Subscription};

type ServerWs = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(3);

fn settings(reconnect_delay_ms: u64) -> FeedSettings {
    FeedSettings {
        connect_timeout_ms: 1_000,
        reconnect_delay_ms,
        max_reconnect_delay_ms: reconnect_delay_ms * 4,
        backoff_multiplier: 2.0,
        max_reconnect_attempts: 0,
        heartbeat_interval_ms: 60_000,
        idle_timeout_ms: 120_000,
        event_buffer: 64,
    }
}

/// Accepts websocket clients and hands each upgraded connection to the test.
async fn server() -> (String, mpsc::UnboundedReceiver<ServerWs>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws/stream", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                if tx.send(ws).is_err() {
                    break;
                }
            }
        }
    });

    (url, rx)
}

async fn accept(conns: &mut mpsc::UnboundedReceiver<ServerWs>) -> ServerWs {
    timeout(WAIT, conns.recv())
        .await
        .expect("client never connected")
        .expect("listener stopped")
}

async fn next_message(ws: &mut ServerWs) -> Option<ClientMessage> {
    loop {
        match timeout(WAIT, ws.next()).await.ok()?? {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str(&text).expect("client sent invalid json"));
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn stays_quiet(ws: &mut ServerWs, wait: Duration) -> bool {
    timeout(wait, ws.next()).await.is_err()
}

fn risk(id: &str) -> Subscription {
    Subscription::PositionRisk(id.to_string())
}

#[tokio::test]
async fn duplicate_subscribe_is_sent_once() {
    let (url, mut conns) = server().await;
    let handle = FeedClient::spawn(settings(100), url);
    let mut ws = accept(&mut conns).await;

    handle.subscribe(risk("P1")).await.unwrap();
    handle.subscribe(risk("P1")).await.unwrap();
    handle.subscribe(Subscription::SystemStatus).await.unwrap();

    assert_eq!(next_message(&mut ws).await, Some(ClientMessage::subscribe(risk("P1"))));
    assert_eq!(
        next_message(&mut ws).await,
        Some(ClientMessage::subscribe(Subscription::SystemStatus))
    );
    assert!(stays_quiet(&mut ws, Duration::from_millis(200)).await);

    handle.shutdown().await;
}

#[tokio::test]
async fn reconnect_replays_registered_subscriptions() {
    let (url, mut conns) = server().await;
    let handle = FeedClient::spawn(settings(200), url);
    let mut state = handle.state();
    let mut ws = accept(&mut conns).await;

    let alerts = Subscription::UserAlerts("0xd8da6bf26964af9d7eed9e03e53415d37aa96045".to_string());
    handle.subscribe(risk("P1")).await.unwrap();
    handle.subscribe(alerts.clone()).await.unwrap();
    handle.subscribe(risk("P2")).await.unwrap();
    handle.unsubscribe(risk("P2")).await.unwrap();

    assert_eq!(next_message(&mut ws).await, Some(ClientMessage::subscribe(risk("P1"))));
    assert_eq!(next_message(&mut ws).await, Some(ClientMessage::subscribe(alerts.clone())));
    assert_eq!(next_message(&mut ws).await, Some(ClientMessage::subscribe(risk("P2"))));
    assert_eq!(next_message(&mut ws).await, Some(ClientMessage::unsubscribe(risk("P2"))));

    ws.close(None).await.unwrap();

    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Reconnecting))
        .await
        .expect("never entered Reconnecting")
        .unwrap();

    let mut ws = accept(&mut conns).await;
    assert_eq!(next_message(&mut ws).await, Some(ClientMessage::subscribe(risk("P1"))));
    assert_eq!(next_message(&mut ws).await, Some(ClientMessage::subscribe(alerts)));
    assert!(stays_quiet(&mut ws, Duration::from_millis(300)).await);

    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .expect("never reconnected")
        .unwrap();

    handle.shutdown().await;
}

#[tokio::test]
async fn only_heartbeats_are_answered() {
    let (url, mut conns) = server().await;
    let handle = FeedClient::spawn(settings(100), url);
    let mut events = handle.events();
    let mut ws = accept(&mut conns).await;

    let frames = [
        r#"{"type":"Connected","data":{"session_id":"s-1"}}"#,
        r#"{"type":"RiskUpdate","data":{"position_id":"P1","risk_metrics":{"overall_risk_score":0.4}}}"#,
        r#"{"type":"Mystery","data":{}}"#,
        "not json at all",
    ];
    for frame in frames {
        ws.send(Message::Text(frame.to_string())).await.unwrap();
    }
    assert!(stays_quiet(&mut ws, Duration::from_millis(300)).await);

    ws.send(Message::Text(r#"{"type":"Heartbeat","data":{}}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(next_message(&mut ws).await, Some(ClientMessage::heartbeat()));

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        kinds.push(event.kind());
    }
    assert_eq!(kinds, vec!["Connected", "RiskUpdate", "Heartbeat"]);
    assert_eq!(handle.current_state(), ConnectionState::Connected);

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_pending_reconnect() {
    let (url, mut conns) = server().await;
    let handle = FeedClient::spawn(settings(30_000), url);
    let mut state = handle.state();
    let mut ws = accept(&mut conns).await;

    ws.close(None).await.unwrap();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Reconnecting))
        .await
        .expect("never entered Reconnecting")
        .unwrap();

    timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("shutdown waited for the backoff");
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);

    // no second dial after shutdown
    assert!(timeout(Duration::from_millis(300), conns.recv()).await.is_err());
}

#[tokio::test]
async fn events_carry_decoded_payloads() {
    let (url, mut conns) = server().await;
    let handle = FeedClient::spawn(settings(100), url);
    let mut events = handle.events();
    let mut ws = accept(&mut conns).await;

    ws.send(Message::Text(
        r#"{"type":"PositionUpdate","data":{"position_id":"P1","current_value_usd":95000,"pnl_usd":"-5000"}}"#
            .to_string(),
    ))
    .await
    .unwrap();

    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        ServerEvent::PositionUpdate(patch) => {
            assert_eq!(patch.position_id, "P1");
            assert_eq!(patch.current_value_usd.map(|v| v.to_string()), Some("95000".to_string()));
            assert_eq!(patch.pnl_usd.map(|v| v.to_string()), Some("-5000".to_string()));
        }
        other => panic!("unexpected event {:?}", other),
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn silent_server_gets_heartbeats_then_is_dropped() {
    let (url, mut conns) = server().await;
    let handle = FeedClient::spawn(
        FeedSettings {
            heartbeat_interval_ms: 100,
            idle_timeout_ms: 400,
            ..settings(5_000)
        },
        url,
    );
    let mut state = handle.state();
    let mut ws = accept(&mut conns).await;

    // the server never writes, so only the idle timer can end the session
    let mut received = Vec::new();
    while let Some(message) = next_message(&mut ws).await {
        received.push(message);
    }
    assert!(received.len() >= 2, "expected periodic heartbeats, got {:?}", received);
    assert!(received.iter().all(|m| *m == ClientMessage::heartbeat()));

    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Reconnecting))
        .await
        .expect("idle connection was never dropped")
        .unwrap();

    handle.shutdown().await;
}
