//! Realtime WebSocket channel
//!
//! ## Protocol
//!
//! Connect: `ws://localhost:8083/ws?user_id=<id>` (or send `X-User-Id`).
//! The identity is trusted as given; an upstream gateway authenticates it.
//!
//! Messages (server → client): every hub notification, for example
//! `new_ride`, `ride_update`, `new_request`, `request_response`, `new_match`.
//!
//! Messages (client → server):
//! - `subscribe` - join a room (`{"type":"subscribe","room_id":"ride:<id>"}`)
//! - `unsubscribe` - leave a room
//! - `ping` - keep-alive, answered with `{"type":"pong"}`
//!
//! Each connection has one writer task. It drains the hub queue and sends a
//! Close frame once the hub drops the connection. Every socket write is
//! bounded by `SEND_TIMEOUT`; a peer that stops reading is disconnected, and
//! whichever of the reader or writer stops first ends the connection.

use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::hub::{ClientMessage, ConnectionHandle, NotificationHub};
use crate::server::http::{error_response, AppState};

/// WebSocket type after upgrade
type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Header carrying the caller identity
pub const USER_ID_HEADER: &str = "x-user-id";

/// Direct replies (pong, errors) buffered per connection
const REPLY_QUEUE_SIZE: usize = 16;

/// Upper bound on a single socket write
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a connection's writer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// Hub dropped the connection or the reader went away
    Drained,
    /// Socket write failed
    PeerGone,
    /// Socket write did not finish within the send timeout
    Stalled,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    user_id: Option<String>,
}

/// Caller identity from the `X-User-Id` header or `user_id` query parameter
pub fn extract_user_id<B>(req: &Request<B>) -> Option<String> {
    let from_header = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(user_id) = from_header {
        return Some(user_id.to_string());
    }

    let query = req.uri().query()?;
    serde_urlencoded::from_str::<WsQuery>(query)
        .ok()?
        .user_id
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
}

/// Handle WebSocket upgrade for the realtime channel
pub async fn handle_upgrade(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let Some(user_id) = extract_user_id(&req) else {
        return error_response(StatusCode::UNAUTHORIZED, "User identity required");
    };

    if !hyper_tungstenite::is_upgrade_request(&req) {
        return error_response(StatusCode::BAD_REQUEST, "WebSocket upgrade required");
    }

    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok((resp, ws)) => (resp, ws),
        Err(e) => {
            error!("WebSocket upgrade failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "WebSocket upgrade failed");
        }
    };

    let hub = state.hub.clone();
    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => run_connection(ws, hub, user_id).await,
            Err(e) => error!("WebSocket connection failed: {}", e),
        }
    });

    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

async fn run_connection(ws: HyperWebSocket, hub: NotificationHub, user_id: String) {
    let conn = match hub.register(&user_id).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Could not register realtime client");
            return;
        }
    };
    let (handle, outbound) = conn.into_parts();
    let (sink, mut stream) = ws.split();
    let (reply_tx, reply_rx) = mpsc::channel::<WsMessage>(REPLY_QUEUE_SIZE);

    info!(user_id = %handle.user_id, connection_id = %handle.id, "Realtime client connected");

    let mut writer = tokio::spawn(write_loop(sink, outbound, reply_rx, SEND_TIMEOUT));
    let mut writer_exit = None;

    let reader = async {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    handle_client_text(&hub, &handle, &text, &reply_tx).await
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(connection_id = %handle.id, error = %e, "WebSocket read error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        exit = &mut writer => writer_exit = Some(exit.ok()),
    }

    if let Err(e) = hub.unregister(&handle).await {
        debug!(connection_id = %handle.id, error = %e, "Unregister after hub shutdown");
    }
    drop(reply_tx);

    // Writer gets one in-flight send plus the Close frame, then is aborted
    let exit = match writer_exit {
        Some(exit) => exit,
        None => match tokio::time::timeout(SEND_TIMEOUT * 2, &mut writer).await {
            Ok(exit) => exit.ok(),
            Err(_) => {
                writer.abort();
                None
            }
        },
    };

    if exit == Some(WriterExit::Stalled) {
        warn!(
            user_id = %handle.user_id,
            connection_id = %handle.id,
            "Realtime client stopped reading, disconnected"
        );
    }
    info!(user_id = %handle.user_id, connection_id = %handle.id, "Realtime client disconnected");
}

/// Drain the hub queue and direct replies into the socket, then send Close
async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Bytes>,
    mut replies: mpsc::Receiver<WsMessage>,
    send_timeout: Duration,
) -> WriterExit
where
    S: Sink<WsMessage> + Unpin,
{
    let exit = loop {
        let msg = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => frame_to_message(frame),
                None => break WriterExit::Drained,
            },
            reply = replies.recv() => match reply {
                Some(msg) => msg,
                None => break WriterExit::Drained,
            },
        };
        match tokio::time::timeout(send_timeout, sink.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return WriterExit::PeerGone,
            Err(_) => return WriterExit::Stalled,
        }
    };

    let _ = tokio::time::timeout(send_timeout, async {
        let _ = sink.send(WsMessage::Close(None)).await;
        let _ = sink.close().await;
    })
    .await;
    exit
}

async fn handle_client_text(
    hub: &NotificationHub,
    handle: &ConnectionHandle,
    text: &str,
    reply: &mpsc::Sender<WsMessage>,
) {
    let response = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => json!({ "type": "pong" }),
        Ok(ClientMessage::Subscribe { room_id }) => {
            let joined = hub.subscribe(&handle.user_id, &room_id).await.unwrap_or(false);
            debug!(user_id = %handle.user_id, room_id = %room_id, joined, "Room subscribe");
            json!({ "type": "subscribed", "room_id": room_id, "ok": joined })
        }
        Ok(ClientMessage::Unsubscribe { room_id }) => {
            let left = hub.unsubscribe(&handle.user_id, &room_id).await.unwrap_or(false);
            json!({ "type": "unsubscribed", "room_id": room_id, "ok": left })
        }
        Err(e) => {
            debug!(connection_id = %handle.id, error = %e, "Unrecognized client frame");
            json!({ "type": "error", "message": "unrecognized message" })
        }
    };

    if reply.try_send(WsMessage::Text(response.to_string())).is_err() {
        debug!(connection_id = %handle.id, "Reply dropped, writer busy or gone");
    }
}

fn frame_to_message(frame: Bytes) -> WsMessage {
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => WsMessage::Text(text),
        Err(e) => WsMessage::Binary(e.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Socket whose send buffer never drains
    struct StalledSink;

    impl Sink<WsMessage> for StalledSink {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: WsMessage) -> Result<(), Infallible> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_writer_gives_up_on_stalled_peer() {
        let (tx, rx) = mpsc::channel(4);
        let (_reply_tx, reply_rx) = mpsc::channel(1);
        tx.send(Bytes::from_static(b"{\"type\":\"new_ride\"}"))
            .await
            .unwrap();

        let exit = tokio::time::timeout(
            Duration::from_secs(2),
            write_loop(StalledSink, rx, reply_rx, Duration::from_millis(50)),
        )
        .await
        .expect("writer returned");
        assert_eq!(exit, WriterExit::Stalled);
    }

    #[tokio::test]
    async fn test_writer_drains_queue_then_closes() {
        let (tx, rx) = mpsc::channel(4);
        let (_reply_tx, reply_rx) = mpsc::channel(1);
        tx.send(Bytes::from_static(b"a")).await.unwrap();
        tx.send(Bytes::from_static(b"b")).await.unwrap();
        drop(tx);

        let mut sent: Vec<WsMessage> = Vec::new();
        let exit = write_loop(&mut sent, rx, reply_rx, Duration::from_secs(1)).await;
        assert_eq!(exit, WriterExit::Drained);
        assert_eq!(
            sent,
            vec![
                WsMessage::Text("a".to_string()),
                WsMessage::Text("b".to_string()),
                WsMessage::Close(None),
            ]
        );
    }

    fn request(uri: &str, header: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri(uri);
        if let Some(user) = header {
            builder = builder.header(USER_ID_HEADER, user);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_user_id_from_header_or_query() {
        assert_eq!(
            extract_user_id(&request("/ws", Some("alice"))).as_deref(),
            Some("alice")
        );
        assert_eq!(
            extract_user_id(&request("/ws?user_id=bob&x=1", None)).as_deref(),
            Some("bob")
        );
        assert_eq!(
            extract_user_id(&request("/ws?user_id=b%20ob", None)).as_deref(),
            Some("b ob")
        );
        // Header wins
        assert_eq!(
            extract_user_id(&request("/ws?user_id=bob", Some("alice"))).as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_missing_user_id() {
        assert!(extract_user_id(&request("/ws", None)).is_none());
        assert!(extract_user_id(&request("/ws?user_id=", None)).is_none());
        assert!(extract_user_id(&request("/ws", Some("  "))).is_none());
    }

    #[test]
    fn test_frames_sent_as_text() {
        let msg = frame_to_message(Bytes::from_static(br#"{"type":"new_ride"}"#));
        assert!(matches!(msg, WsMessage::Text(t) if t.contains("new_ride")));
    }
}
