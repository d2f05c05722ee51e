//! Client connection handling.
//!
//! Each text frame is handled in its own task so a long query does not hold
//! up the next message. A single writer task owns the socket sink; message
//! tasks queue their frames to it, which keeps the frames of one request in
//! order. Pings are answered by the WebSocket layer itself.

use crate::handler::handle_message;
use crate::ServerError;
use futures_util::{SinkExt, StreamExt};
use sg_core::{ErrorInfo, WireResponse};
use sg_gateway::DatabaseGateway;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, Instrument, Span};

/// Frames a connection may have queued before message tasks wait.
const OUTBOUND_CAPACITY: usize = 256;

/// Serves an accepted WebSocket until the peer goes away.
///
/// Message-level failures are reported to the client and never end the
/// connection; only a close frame, end of stream or a transport error does.
/// With `cancel_on_disconnect`, queries still running at that point are
/// aborted and their sessions released; otherwise they run to completion
/// and their frames are discarded.
pub async fn serve_connection<S>(
    ws: WebSocketStream<S>,
    peer: SocketAddr,
    gateway: Arc<DatabaseGateway>,
    cancel_on_disconnect: bool,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::channel::<WireResponse>(OUTBOUND_CAPACITY);

    let mut writer = tokio::spawn(
        async move {
            while let Some(frame) = rx.recv().await {
                sink.send(Message::Text(serde_json::to_string(&frame)?)).await?;
            }
            Ok::<(), ServerError>(())
        }
        .in_current_span(),
    );

    let mut in_flight = JoinSet::new();

    let result = loop {
        tokio::select! {
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    spawn_message(&mut in_flight, text, &gateway, &tx);
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => spawn_message(&mut in_flight, text, &gateway, &tx),
                    Err(_) => {
                        let frame = WireResponse::error(ErrorInfo::new(
                            "ParseError",
                            "binary frame is not valid UTF-8",
                        ));
                        let _ = tx.send(frame).await;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(ServerError::Transport(e)),
            },

            written = &mut writer => {
                break match written {
                    Ok(result) => result,
                    Err(e) => {
                        error!("Writer task failed: {}", e);
                        Ok(())
                    }
                };
            }

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Message task panicked: {}", e);
                    }
                }
            }
        }
    };

    let pending = in_flight.len();
    if cancel_on_disconnect {
        in_flight.shutdown().await;
        if pending > 0 {
            info!("Cancelled {} in-flight queries", pending);
        }
    } else {
        in_flight.detach_all();
        if pending > 0 {
            debug!("Leaving {} queries running after disconnect", pending);
        }
    }

    info!("Peer {} disconnected", peer);
    result
}

fn spawn_message(
    in_flight: &mut JoinSet<()>,
    text: String,
    gateway: &Arc<DatabaseGateway>,
    tx: &mpsc::Sender<WireResponse>,
) {
    let gateway = Arc::clone(gateway);
    let out = tx.clone();
    in_flight.spawn(
        async move { handle_message(&text, &gateway, &out).await }.instrument(Span::current()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use sg_core::Record;
    use sg_gateway::scripted::{Script, ScriptedBackend};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::{accept_async, client_async};

    type Client = WebSocketStream<DuplexStream>;

    async fn connect(
        gateway: Arc<DatabaseGateway>,
        cancel_on_disconnect: bool,
    ) -> (Client, tokio::task::JoinHandle<Result<(), ServerError>>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();

        let server = tokio::spawn(async move {
            let ws = accept_async(server_io).await?;
            serve_connection(ws, peer, gateway, cancel_on_disconnect).await
        });
        let (client, _) = client_async("ws://localhost/", client_io).await.unwrap();
        (client, server)
    }

    async fn next_json(client: &mut Client) -> Value {
        loop {
            match client.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_binary_frames_are_handled_as_text() {
        let gateway = Arc::new(DatabaseGateway::new(ScriptedBackend::new().with_query(
            "RETURN 1 AS one",
            Script::Rows(vec![Record::new().with("one", json!(1))]),
        )));
        let (mut client, _server) = connect(gateway, true).await;

        let body = br#"{"message":"RETURN 1 AS one","type":"nodes"}"#.to_vec();
        client.send(Message::Binary(body)).await.unwrap();

        assert_eq!(next_json(&mut client).await["data"]["_fields"], json!([1]));
        assert_eq!(next_json(&mut client).await, json!({ "type": "done" }));

        client.send(Message::Binary(vec![0xff, 0xfe])).await.unwrap();
        assert_eq!(next_json(&mut client).await["error"]["code"], json!("ParseError"));
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let gateway = Arc::new(DatabaseGateway::new(ScriptedBackend::new()));
        let (mut client, _server) = connect(gateway, true).await;

        client.send(Message::Ping(b"hi".to_vec())).await.unwrap();
        loop {
            if let Message::Pong(data) = client.next().await.unwrap().unwrap() {
                assert_eq!(data, b"hi".to_vec());
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_close_cancels_running_queries() {
        let gateway = Arc::new(DatabaseGateway::new(ScriptedBackend::new().with_query(
            "CALL apoc.util.sleep(600000)",
            Script::Hang(vec![Record::new().with("tick", json!(0))]),
        )));
        let (mut client, server) = connect(gateway.clone(), true).await;

        client
            .send(Message::Text(
                r#"{"message":"CALL apoc.util.sleep(600000)","type":"wait"}"#.to_string(),
            ))
            .await
            .unwrap();
        next_json(&mut client).await;
        assert_eq!(gateway.active_sessions(), 1);

        client.close(None).await.unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(gateway.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_close_can_leave_queries_running() {
        let gateway = Arc::new(DatabaseGateway::new(ScriptedBackend::new().with_query(
            "CALL apoc.util.sleep(600000)",
            Script::Hang(vec![Record::new().with("tick", json!(0))]),
        )));
        let (mut client, server) = connect(gateway.clone(), false).await;

        client
            .send(Message::Text(
                r#"{"message":"CALL apoc.util.sleep(600000)","type":"wait"}"#.to_string(),
            ))
            .await
            .unwrap();
        next_json(&mut client).await;

        client.close(None).await.unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(gateway.active_sessions(), 1);
    }

    #[tokio::test]
    async fn test_messages_on_one_connection_overlap() {
        let gateway = Arc::new(DatabaseGateway::new(
            ScriptedBackend::new()
                .with_query(
                    "CALL apoc.util.sleep(600000)",
                    Script::Hang(vec![Record::new().with("tick", json!(0))]),
                )
                .with_query(
                    "CALL apoc.util.sleep(300000)",
                    Script::Hang(vec![Record::new().with("tick", json!(1))]),
                )
                .with_query(
                    "RETURN 1 AS one",
                    Script::Rows(vec![Record::new().with("one", json!(1))]),
                ),
        ));
        let (mut client, server) = connect(gateway.clone(), true).await;

        client
            .send(Message::Text(
                r#"{"message":"CALL apoc.util.sleep(600000)","type":"wait"}"#.to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(next_json(&mut client).await["data"]["_fields"], json!([0]));
        assert_eq!(gateway.active_sessions(), 1);

        // A second message completes while the first is still running.
        client
            .send(Message::Text(
                r#"{"message":"RETURN 1 AS one","type":"nodes"}"#.to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(next_json(&mut client).await["data"]["_fields"], json!([1]));
        assert_eq!(next_json(&mut client).await, json!({ "type": "done" }));
        assert_eq!(gateway.active_sessions(), 1);

        client
            .send(Message::Text(
                r#"{"message":"CALL apoc.util.sleep(300000)","type":"wait"}"#.to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(next_json(&mut client).await["data"]["_fields"], json!([1]));
        assert_eq!(gateway.active_sessions(), 2);

        client.close(None).await.unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(gateway.active_sessions(), 0);
    }
}
