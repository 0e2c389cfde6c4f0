//! End-to-end tests against a real server over WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use vigil_server::config::ServerConfig;
use vigil_server::metrics::detached_handle;
use vigil_server::server::RelayServer;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    addr: SocketAddr,
    server: Arc<RelayServer>,
}

impl TestServer {
    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

async fn boot_server() -> TestServer {
    boot_server_with(ServerConfig::default()).await
}

async fn boot_server_with(config: ServerConfig) -> TestServer {
    let server = Arc::new(RelayServer::new(config, detached_handle()));
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer { addr, server }
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut WsStream, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Assert no text frame arrives within [`QUIET`].
async fn assert_quiet(ws: &mut WsStream) {
    let deadline = tokio::time::Instant::now() + QUIET;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) | Ok(None) => return,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {text}"),
            Ok(Some(_)) => {}
        }
    }
}

async fn start_inspector(url: &str) -> (WsStream, String) {
    let mut ws = connect(url).await;
    send(&mut ws, json!({"type": "auth", "role": "inspector", "userId": "proctor"})).await;
    let started = read_json(&mut ws).await;
    assert_eq!(started["type"], "inspector.sessionStarted");
    let sid = started["sessionId"].as_str().unwrap().to_owned();
    (ws, sid)
}

async fn join_member(url: &str, session_id: &str, user_id: &str, name: &str) -> WsStream {
    let mut ws = connect(url).await;
    send(
        &mut ws,
        json!({"type": "auth", "role": "client", "sessionId": session_id, "userId": user_id, "displayName": name}),
    )
    .await;
    assert_eq!(
        read_json(&mut ws).await,
        json!({"type": "joined", "sessionId": session_id})
    );
    assert_eq!(read_json(&mut ws).await["type"], "inspector.joined");
    ws
}

#[tokio::test]
async fn inspector_and_member_handshake() {
    let srv = boot_server().await;
    let url = srv.ws_url();
    let (mut inspector, sid) = start_inspector(&url).await;
    assert!(sid.starts_with("sess_"));

    let _member = join_member(&url, &sid, "U", "Ann").await;
    assert_eq!(
        read_json(&mut inspector).await,
        json!({"type": "member.joined", "userId": "U", "displayName": "Ann"})
    );
    assert_quiet(&mut inspector).await;
    assert_eq!(srv.server.registry().len(), 1);
}

#[tokio::test]
async fn telemetry_is_routed_to_its_own_inspector() {
    let srv = boot_server().await;
    let url = srv.ws_url();
    let (mut inspector_a, sid_a) = start_inspector(&url).await;
    let (mut inspector_b, sid_b) = start_inspector(&url).await;
    let mut member_a = join_member(&url, &sid_a, "UA", "Ann").await;
    let _member_b = join_member(&url, &sid_b, "UB", "Bo").await;
    let _ = read_json(&mut inspector_a).await;
    let _ = read_json(&mut inspector_b).await;

    send(
        &mut member_a,
        json!({"type": "telemetry.keystroke", "payload": {"key": "x"}, "ts": 5}),
    )
    .await;

    let relayed = read_json(&mut inspector_a).await;
    assert_eq!(relayed["type"], "telemetry.keystroke");
    assert_eq!(relayed["sessionId"], sid_a);
    assert_eq!(relayed["userId"], "UA");
    assert_eq!(relayed["payload"]["key"], "x");
    assert_ne!(relayed["ts"], 5);
    assert_quiet(&mut inspector_b).await;
}

#[tokio::test]
async fn joining_unknown_session_reports_error() {
    let srv = boot_server().await;
    let mut client = connect(&srv.ws_url()).await;
    send(
        &mut client,
        json!({"type": "auth", "role": "client", "sessionId": "sess_missing"}),
    )
    .await;
    assert_eq!(
        read_json(&mut client).await,
        json!({"type": "error", "message": "session not found"})
    );

    // still usable as an anonymous client
    send(&mut client, json!({"type": "request.globalProblems"})).await;
    assert_eq!(read_json(&mut client).await["type"], "globalProblems.response");
}

#[tokio::test]
async fn duplicate_problem_is_broadcast_once() {
    let srv = boot_server().await;
    let url = srv.ws_url();
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    send(&mut a, json!({"type": "auth", "userId": "A"})).await;
    send(&mut b, json!({"type": "auth", "userId": "B"})).await;

    let problem = json!({"type": "problem.create", "problem": {"problemId": "p1", "title": "Loops"}});
    send(&mut a, problem.clone()).await;
    for ws in [&mut a, &mut b] {
        let created = read_json(ws).await;
        assert_eq!(created["type"], "problem.created");
        assert_eq!(created["problem"]["problemId"], "p1");
        assert_eq!(created["problem"]["ownerId"], "A");
    }

    send(&mut b, problem).await;
    assert_quiet(&mut a).await;
    assert_quiet(&mut b).await;

    send(&mut b, json!({"type": "request.globalProblems", "days": 1})).await;
    let listing = read_json(&mut b).await;
    assert_eq!(listing["requestedDays"], 1);
    assert_eq!(listing["problems"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn inspector_leave_ends_session() {
    let srv = boot_server().await;
    let url = srv.ws_url();
    let (mut inspector, sid) = start_inspector(&url).await;
    let mut member = join_member(&url, &sid, "U", "Ann").await;
    let _ = read_json(&mut inspector).await;

    send(&mut inspector, json!({"type": "inspector.leave"})).await;
    assert_eq!(read_json(&mut member).await["type"], "inspector.ended");
    assert_quiet(&mut member).await;
    assert!(srv.server.registry().is_empty());
}

#[tokio::test]
async fn inspector_close_ends_session() {
    let srv = boot_server().await;
    let url = srv.ws_url();
    let (mut inspector, sid) = start_inspector(&url).await;
    let mut member = join_member(&url, &sid, "U", "Ann").await;
    let _ = read_json(&mut inspector).await;

    inspector.close(None).await.unwrap();
    assert_eq!(read_json(&mut member).await["type"], "inspector.ended");
    assert_quiet(&mut member).await;
}

#[tokio::test]
async fn member_close_notifies_inspector() {
    let srv = boot_server().await;
    let url = srv.ws_url();
    let (mut inspector, sid) = start_inspector(&url).await;
    let mut member = join_member(&url, &sid, "U", "Ann").await;
    let _ = read_json(&mut inspector).await;

    member.close(None).await.unwrap();
    assert_eq!(
        read_json(&mut inspector).await,
        json!({"type": "member.left", "userId": "U", "displayName": "Ann"})
    );
}

#[tokio::test]
async fn snapshot_request_fans_out_to_members() {
    let srv = boot_server().await;
    let url = srv.ws_url();
    let (mut inspector, sid) = start_inspector(&url).await;
    let mut m1 = join_member(&url, &sid, "U1", "Ann").await;
    let mut m2 = join_member(&url, &sid, "U2", "Bo").await;

    send(&mut m1, json!({"type": "inspector.snapshot", "sessionId": sid})).await;
    assert_eq!(read_json(&mut m1).await["type"], "error");

    send(&mut inspector, json!({"type": "inspector.snapshot"})).await;
    for ws in [&mut m1, &mut m2] {
        assert_eq!(
            read_json(ws).await,
            json!({"type": "inspector.requestSnapshot", "sessionId": sid})
        );
    }
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let srv = boot_server().await;
    let mut ws = connect(&srv.ws_url()).await;
    ws.send(Message::text("not json")).await.unwrap();
    send(&mut ws, json!({"no": "type"})).await;
    send(&mut ws, json!(["array"])).await;
    assert_quiet(&mut ws).await;

    send(&mut ws, json!({"type": "auth", "role": "inspector"})).await;
    assert_eq!(read_json(&mut ws).await["type"], "inspector.sessionStarted");
}

#[tokio::test]
async fn binary_utf8_frames_are_accepted() {
    let srv = boot_server().await;
    let mut ws = connect(&srv.ws_url()).await;
    let frame = json!({"type": "auth", "role": "inspector"}).to_string();
    ws.send(Message::binary(frame.into_bytes())).await.unwrap();
    assert_eq!(read_json(&mut ws).await["type"], "inspector.sessionStarted");
}

#[tokio::test]
async fn shutdown_notifies_every_connection() {
    let srv = boot_server().await;
    let url = srv.ws_url();
    let (mut inspector, sid) = start_inspector(&url).await;
    let mut member = join_member(&url, &sid, "U", "Ann").await;
    let mut idle = connect(&url).await;
    send(&mut idle, json!({"type": "request.globalProblems"})).await;
    let _ = read_json(&mut idle).await;
    let _ = read_json(&mut inspector).await;

    let server = srv.server.clone();
    let shutdown = tokio::spawn(async move {
        server.shutdown_gracefully(Some(Duration::from_secs(2))).await
    });

    for ws in [&mut inspector, &mut member, &mut idle] {
        assert_eq!(read_json(ws).await["type"], "server.shutdown");
    }
    let delivery = shutdown.await.unwrap();
    assert_eq!(delivery.delivered, 3);
    assert_eq!(delivery.failed, 0);
}

#[tokio::test]
async fn connection_limit_rejects_upgrade() {
    let srv = boot_server_with(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;
    let url = srv.ws_url();
    let mut first = connect(&url).await;
    send(&mut first, json!({"type": "auth"})).await;
    assert_quiet(&mut first).await;

    assert!(connect_async(&url).await.is_err());
}

#[tokio::test]
async fn concurrent_upgrades_respect_limit() {
    let srv = boot_server_with(ServerConfig {
        max_connections: 2,
        ..ServerConfig::default()
    })
    .await;
    let url = srv.ws_url();

    let attempts = (0..8).map(|_| connect_async(url.as_str()));
    let results = futures::future::join_all(attempts).await;
    let mut open: Vec<WsStream> = results.into_iter().filter_map(Result::ok).map(|(ws, _)| ws).collect();
    assert_eq!(open.len(), 2);

    // a closed connection frees its slot
    let mut closed = open.pop().unwrap();
    closed.close(None).await.unwrap();
    let reopened = timeout(TIMEOUT, async {
        loop {
            if let Ok((ws, _)) = connect_async(url.as_str()).await {
                return ws;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reopened.is_ok());
}

#[tokio::test]
async fn silent_inspector_times_out_and_session_ends() {
    let srv = boot_server_with(ServerConfig {
        heartbeat_interval_ms: 100,
        heartbeat_timeout_ms: 300,
        sweep_interval_ms: 100,
        ..ServerConfig::default()
    })
    .await;
    let url = srv.ws_url();
    let (inspector, sid) = start_inspector(&url).await;
    let mut member = join_member(&url, &sid, "U", "Ann").await;

    // The inspector never reads again, so it never answers a ping.
    let ended = read_json(&mut member).await;
    assert_eq!(ended["type"], "inspector.ended");
    assert!(srv.server.registry().is_empty());
    drop(inspector);
}

#[tokio::test]
async fn health_reports_live_counts() {
    let srv = boot_server().await;
    let url = srv.ws_url();
    let (_inspector, _sid) = start_inspector(&url).await;

    let body: Value = reqwest::get(format!("http://{}/health", srv.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["active_sessions"], 1);
}
