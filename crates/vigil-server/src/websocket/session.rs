//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use vigil_core::ConnectionId;

use super::broadcast::BroadcastManager;
use super::connection::ClientConnection;
use super::handler::handle_message;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::relay::router::MessageRouter;
use crate::relay::state::ConnectionState;

/// How long the writer gets to flush and send Close after the read side ends.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Everything a connection task needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    /// Applies decoded frames to relay state.
    pub router: Arc<MessageRouter>,
    /// Relay-wide fan-out set.
    pub broadcast: Arc<BroadcastManager>,
    /// Ping cadence.
    pub heartbeat_interval: Duration,
    /// Silence tolerated before the connection is closed.
    pub heartbeat_timeout: Duration,
    /// Outbound queue depth.
    pub send_queue_capacity: usize,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// Why the receive loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Exit {
    ClientClose,
    StreamEnded,
    TransportError,
    HeartbeatTimeout,
    Shutdown,
}

impl Exit {
    fn as_str(self) -> &'static str {
        match self {
            Self::ClientClose => "client_close",
            Self::StreamEnded => "stream_ended",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection with the broadcast engine
/// 2. Spawns the outbound writer (queued frames plus periodic Ping)
/// 3. Decodes and routes inbound frames in arrival order
/// 4. Closes silent connections after the heartbeat timeout
/// 5. Reconciles the session registry and flushes the writer on exit
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(ws: WebSocket, conn_id: ConnectionId, ctx: SessionContext) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(ctx.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(conn_id, send_tx));

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    ctx.broadcast.add(connection.clone()).await;

    let mut outbound = tokio::spawn(run_writer(
        ws_tx,
        send_rx,
        connection.closing_token(),
        ctx.heartbeat_interval,
    ));

    let heartbeat = run_heartbeat(
        connection.clone(),
        ctx.heartbeat_interval,
        ctx.heartbeat_timeout,
        ctx.shutdown.child_token(),
    );
    tokio::pin!(heartbeat);

    let mut state = ConnectionState::Unauthenticated;
    let exit = loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed");
                        break Exit::TransportError;
                    }
                    None => break Exit::StreamEnded,
                };
                connection.mark_alive();
                match msg {
                    Message::Text(text) => {
                        let _ = handle_message(text.as_str(), &connection, &mut state, &ctx.router).await;
                    }
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => {
                            let _ = handle_message(text, &connection, &mut state, &ctx.router).await;
                        }
                        Err(_) => debug!(len = data.len(), "dropping non-UTF-8 binary frame"),
                    },
                    Message::Close(_) => break Exit::ClientClose,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            result = &mut heartbeat => {
                break match result {
                    HeartbeatResult::TimedOut => {
                        warn!(silent_for = ?connection.last_pong_elapsed(), "client unresponsive, disconnecting");
                        Exit::HeartbeatTimeout
                    }
                    HeartbeatResult::Cancelled => Exit::Shutdown,
                };
            }
        }
    };

    ctx.router.disconnect(&connection, &state);
    ctx.broadcast.remove(&connection.id).await;
    connection.close();
    if time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        outbound.abort();
    }

    info!(
        reason = exit.as_str(),
        role = state.role(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => exit.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Drain the send queue to the socket, pinging every `ping_every`.
///
/// A due Ping goes out before the next queued frame, so a backlogged queue
/// never delays the heartbeat. When `closing` fires, whatever is already
/// queued is flushed and a Close frame is sent.
async fn run_writer<S>(
    mut ws_tx: S,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    closing: CancellationToken,
    ping_every: Duration,
) where
    S: futures::Sink<Message> + Unpin,
{
    let mut ping = time::interval_at(Instant::now() + ping_every, ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = closing.cancelled() => {
                while let Ok(text) = send_rx.try_recv() {
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        return;
                    }
                }
                break;
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
            }
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                    return;
                }
            }
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = ws_tx.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;

    fn text_of(msg: &Message) -> Option<&str> {
        match msg {
            Message::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn writer_flushes_queue_then_closes() {
        let (sink, mut out) = fmpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel(8);
        let closing = CancellationToken::new();

        tx.try_send(Arc::new("one".into())).unwrap();
        tx.try_send(Arc::new("two".into())).unwrap();
        closing.cancel();

        run_writer(sink, rx, closing, Duration::from_secs(60)).await;

        let frames: Vec<Message> = out.by_ref().collect().await;
        let texts: Vec<&str> = frames.iter().filter_map(text_of).collect();
        assert_eq!(texts, ["one", "two"]);
        assert!(matches!(frames.last(), Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn writer_stops_when_queue_closes() {
        let (sink, out) = fmpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel(8);
        drop(tx);

        run_writer(sink, rx, CancellationToken::new(), Duration::from_secs(60)).await;

        let frames: Vec<Message> = out.collect().await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Message::Close(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn writer_pings_on_interval() {
        let (sink, mut out) = fmpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel::<Arc<String>>(8);
        let closing = CancellationToken::new();
        let handle = tokio::spawn(run_writer(sink, rx, closing.clone(), Duration::from_secs(5)));

        time::sleep(Duration::from_secs(11)).await;
        closing.cancel();
        handle.await.unwrap();
        drop(tx);

        let frames: Vec<Message> = out.by_ref().collect().await;
        let pings = frames.iter().filter(|m| matches!(m, Message::Ping(_))).count();
        assert_eq!(pings, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn writer_keeps_pinging_while_backlogged() {
        let (out_tx, mut out) = fmpsc::unbounded::<Message>();
        let slow_sink = Box::pin(futures::sink::unfold(out_tx, |out_tx, msg: Message| async move {
            time::sleep(Duration::from_millis(20)).await;
            out_tx.unbounded_send(msg).map_err(|_| ())?;
            Ok::<_, ()>(out_tx)
        }));

        let (tx, rx) = mpsc::channel::<Arc<String>>(500);
        for i in 0..500 {
            tx.try_send(Arc::new(format!("frame {i}"))).unwrap();
        }
        let handle = tokio::spawn(run_writer(
            slow_sink,
            rx,
            CancellationToken::new(),
            Duration::from_millis(100),
        ));

        time::sleep(Duration::from_secs(2)).await;
        handle.abort();

        let (mut texts, mut pings) = (0, 0);
        while let Ok(Some(msg)) = out.try_next() {
            match msg {
                Message::Text(_) => texts += 1,
                Message::Ping(_) => pings += 1,
                _ => {}
            }
        }
        assert!(texts > 50, "queue should keep draining, got {texts}");
        assert!(pings >= 12, "expected a ping roughly every 100ms, got {pings}");
    }

    #[test]
    fn exit_reasons_are_snake_case() {
        for exit in [
            Exit::ClientClose,
            Exit::StreamEnded,
            Exit::TransportError,
            Exit::HeartbeatTimeout,
            Exit::Shutdown,
        ] {
            assert!(exit.as_str().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
