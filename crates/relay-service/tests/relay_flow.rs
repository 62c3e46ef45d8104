//! End-to-end relay tests over real WebSocket connections.
//!
//! Each test spawns the full router on an ephemeral port and drives it
//! with `tokio-tungstenite` clients.

use futures::{SinkExt, StreamExt};
use relay_service::ice::StaticIceServers;
use relay_service::observability::HealthState;
use relay_service::relay::SignalingRelay;
use relay_service::routes::{build_router, AppState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct TestRelay {
    addr: SocketAddr,
    relay: Arc<SignalingRelay>,
    shutdown: CancellationToken,
}

impl TestRelay {
    async fn spawn(room_capacity: usize) -> Result<Self, anyhow::Error> {
        let relay = Arc::new(SignalingRelay::new(room_capacity, 64 * 1024));
        let health = Arc::new(HealthState::new());
        health.set_ready();
        let shutdown = CancellationToken::new();

        let app = build_router(AppState {
            relay: Arc::clone(&relay),
            ice: Arc::new(StaticIceServers::from_urls(vec![
                "stun:stun.example:3478".to_string(),
            ])),
            health,
            shutdown: shutdown.clone(),
            max_message_bytes: 64 * 1024,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let token = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
        });

        Ok(Self {
            addr,
            relay,
            shutdown,
        })
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    async fn connect(&self) -> Result<TestClient, anyhow::Error> {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr)).await?;
        let mut client = TestClient { ws, id: String::new() };
        let welcome = client.recv().await?;
        assert_eq!(welcome["event"], "welcome");
        client.id = welcome["data"]["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("welcome without id"))?
            .to_string();
        Ok(client)
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    id: String,
}

impl TestClient {
    async fn send(&mut self, frame: Value) -> Result<(), anyhow::Error> {
        self.ws.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    async fn send_raw(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.ws.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    async fn join(&mut self, room: &str, identity: &str) -> Result<Value, anyhow::Error> {
        self.send(json!({"event": "join-room", "data": {"roomId": room, "identity": identity}}))
            .await?;
        self.recv().await
    }

    async fn recv(&mut self) -> Result<Value, anyhow::Error> {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
            if let Message::Text(text) = msg {
                return Ok(serde_json::from_str(&text)?);
            }
        }
    }

    /// Asserts nothing arrives within a short window.
    async fn expect_silence(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(150), self.ws.next()).await;
        assert!(next.is_err(), "unexpected frame: {next:?}");
    }

    async fn close(mut self) -> Result<(), anyhow::Error> {
        self.ws.close(None).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_three_participants_join_and_negotiate() -> Result<(), anyhow::Error> {
    let server = TestRelay::spawn(10).await?;
    let mut p1 = server.connect().await?;
    let mut p2 = server.connect().await?;
    let mut p3 = server.connect().await?;

    let existing = p1.join("a1b2c3", "p1@example.com").await?;
    assert_eq!(existing, json!({"event": "existing-participants", "data": []}));

    let existing = p2.join("A1B2C3", "p2@example.com").await?;
    assert_eq!(existing["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(existing["data"][0]["id"], p1.id.as_str());
    assert_eq!(existing["data"][0]["identity"], "p1@example.com");

    let joined = p1.recv().await?;
    assert_eq!(joined["event"], "participant-joined");
    assert_eq!(joined["data"]["id"], p2.id.as_str());

    let existing = p3.join("A1B2C3", "p3@example.com").await?;
    assert_eq!(existing["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(p1.recv().await?["data"]["id"], p3.id.as_str());
    assert_eq!(p2.recv().await?["data"]["id"], p3.id.as_str());

    // p3 is the newcomer and offers to both.
    for target in [&p1.id, &p2.id] {
        p3.send(json!({
            "event": "offer",
            "data": {"sdp": {"type": "offer", "sdp": "v=0"}, "target": target}
        }))
        .await?;
    }
    for peer in [&mut p1, &mut p2] {
        let offer = peer.recv().await?;
        assert_eq!(offer["event"], "offer");
        assert_eq!(offer["data"]["callerId"], p3.id.as_str());
        assert_eq!(offer["data"]["callerIdentity"], "p3@example.com");
        assert_eq!(offer["data"]["sdp"]["type"], "offer");
    }

    p1.send(json!({
        "event": "answer",
        "data": {"sdp": {"type": "answer", "sdp": "v=0"}, "target": p3.id}
    }))
    .await?;
    let answer = p3.recv().await?;
    assert_eq!(answer["event"], "answer");
    assert_eq!(answer["data"]["callerId"], p1.id.as_str());

    p2.expect_silence().await;
    Ok(())
}

#[tokio::test]
async fn test_room_full() -> Result<(), anyhow::Error> {
    let server = TestRelay::spawn(2).await?;
    let mut p1 = server.connect().await?;
    let mut p2 = server.connect().await?;
    let mut p3 = server.connect().await?;

    p1.join("ROOM01", "p1@example.com").await?;
    p2.join("ROOM01", "p2@example.com").await?;
    p1.recv().await?;

    let reply = p3.join("ROOM01", "p3@example.com").await?;
    assert_eq!(reply, json!({"event": "room-full"}));

    p1.expect_silence().await;
    p2.expect_silence().await;
    assert_eq!(server.relay.registry().stats().sessions, 2);
    Ok(())
}

#[tokio::test]
async fn test_spoofed_sender_is_overwritten() -> Result<(), anyhow::Error> {
    let server = TestRelay::spawn(10).await?;
    let mut p1 = server.connect().await?;
    let mut p2 = server.connect().await?;
    p1.join("ROOM01", "p1@example.com").await?;
    p2.join("ROOM01", "p2@example.com").await?;
    p1.recv().await?;

    p2.send(json!({
        "event": "ice-candidate",
        "data": {
            "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": "0"},
            "target": p1.id,
            "sender": "00000000-0000-0000-0000-000000000000"
        }
    }))
    .await?;

    let candidate = p1.recv().await?;
    assert_eq!(candidate["event"], "ice-candidate");
    assert_eq!(candidate["data"]["callerId"], p2.id.as_str());
    assert_eq!(candidate["data"]["candidate"]["sdpMid"], "0");
    Ok(())
}

#[tokio::test]
async fn test_chat_is_sanitized() -> Result<(), anyhow::Error> {
    let server = TestRelay::spawn(10).await?;
    let mut p1 = server.connect().await?;
    let mut p2 = server.connect().await?;
    p1.join("ROOM01", "p1@example.com").await?;
    p2.join("ROOM01", "p2@example.com").await?;
    p1.recv().await?;

    p1.send(json!({
        "event": "chat-message",
        "data": {"message": "<img src=x onerror=alert(1)>hello", "target": "group"}
    }))
    .await?;

    let chat = p2.recv().await?;
    assert_eq!(chat["event"], "chat-message");
    assert_eq!(chat["data"]["message"], "hello");
    assert_eq!(chat["data"]["identity"], "p1@example.com");
    assert_eq!(chat["data"]["private"], false);

    let echo = p1.recv().await?;
    assert_eq!(echo["data"]["message"], "hello");
    Ok(())
}

#[tokio::test]
async fn test_disconnect_notifies_remaining() -> Result<(), anyhow::Error> {
    let server = TestRelay::spawn(10).await?;
    let mut p1 = server.connect().await?;
    let mut p2 = server.connect().await?;
    p1.join("ROOM01", "p1@example.com").await?;
    p2.join("ROOM01", "p2@example.com").await?;
    p1.recv().await?;

    let p2_id = p2.id.clone();
    p2.close().await?;

    let left = p1.recv().await?;
    assert_eq!(left, json!({"event": "participant-left", "data": {"id": p2_id}}));
    assert_eq!(server.relay.registry().stats().sessions, 1);
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_session_survives() -> Result<(), anyhow::Error> {
    let server = TestRelay::spawn(10).await?;
    let mut p1 = server.connect().await?;

    p1.send_raw("{not json").await?;
    let error = p1.recv().await?;
    assert_eq!(error["event"], "error");
    assert_eq!(error["data"]["code"], "MALFORMED_MESSAGE");

    // Binary frames are held to the same rules, UTF-8 included.
    p1.ws.send(Message::Binary(vec![0x7b, 0xff, 0xfe, 0x7d])).await?;
    let error = p1.recv().await?;
    assert_eq!(error["event"], "error");
    assert_eq!(error["data"]["code"], "MALFORMED_MESSAGE");

    let existing = p1.join("ROOM01", "p1@example.com").await?;
    assert_eq!(existing["event"], "existing-participants");
    Ok(())
}

#[tokio::test]
async fn test_ice_servers_and_probes() -> Result<(), anyhow::Error> {
    let server = TestRelay::spawn(10).await?;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/api/ice-servers", server.url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(
        body,
        json!({"iceServers": [{"urls": ["stun:stun.example:3478"]}]})
    );

    let health = client.get(format!("{}/health", server.url())).send().await?;
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await?, "OK");

    let ready: Value = client
        .get(format!("{}/ready", server.url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(ready["ready"], true);
    Ok(())
}
