//! End-to-end tests: a real listener, a scripted database, a WebSocket client.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sg_core::Record;
use sg_gateway::scripted::{Script, ScriptedBackend};
use sg_gateway::{DatabaseGateway, GatewayError};
use sg_server::{BridgeServer, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    addr: SocketAddr,
    backend: Arc<ScriptedBackend>,
    gateway: Arc<DatabaseGateway>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<Result<(), sg_server::ServerError>>,
}

impl Harness {
    async fn start(backend: ScriptedBackend, base_path: &str) -> Self {
        let backend = Arc::new(backend);
        let gateway = Arc::new(DatabaseGateway::from_shared(backend.clone()));
        let config = ServerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            base_path: base_path.to_string(),
            cancel_on_disconnect: true,
        };

        let server = BridgeServer::bind(gateway.clone(), config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        let server = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        Self {
            addr,
            backend,
            gateway,
            shutdown: Some(tx),
            server,
        }
    }

    async fn connect(&self, path: &str) -> Client {
        let (client, _) = connect_async(format!("ws://{}{}", self.addr, path))
            .await
            .unwrap();
        client
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.server.await.unwrap().unwrap();
    }
}

async fn send(client: &mut Client, body: Value) {
    client.send(Message::Text(body.to_string())).await.unwrap();
}

async fn recv(client: &mut Client) -> Value {
    loop {
        match client.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

/// Reads frames until the terminal one (done, counts or error).
async fn recv_request(client: &mut Client) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = recv(client).await;
        let terminal = frame.get("data").is_none();
        frames.push(frame);
        if terminal {
            return frames;
        }
    }
}

fn syntax_error() -> GatewayError {
    GatewayError::Query {
        code: "Neo.ClientError.Statement.SyntaxError".to_string(),
        message: "Invalid input 'RETRN'".to_string(),
    }
}

#[tokio::test]
async fn test_round_trip_qparam() {
    let backend = ScriptedBackend::new().with_query(
        "RETURN $qParam as n",
        Script::Echo {
            param: "qParam".to_string(),
            column: "n".to_string(),
        },
    );
    let harness = Harness::start(backend, "/").await;
    let mut client = harness.connect("/").await;

    send(
        &mut client,
        json!({ "message": "RETURN $qParam as n", "params": { "qParam": 42 }, "type": "echo" }),
    )
    .await;

    let frames = recv_request(&mut client).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], json!("echo"));
    let data = &frames[0]["data"];
    let index = data["_fieldLookup"]["n"].as_u64().unwrap() as usize;
    assert_eq!(data["_fields"][index], json!(42));
    assert_eq!(frames[1], json!({ "type": "done" }));

    let executed = harness.backend.executed();
    assert_eq!(executed[0].params["qParam"].as_i64(), Some(42));

    harness.stop().await;
}

#[tokio::test]
async fn test_malformed_json_keeps_connection_open() {
    let backend = ScriptedBackend::new().with_query(
        "MATCH (n) RETURN count(n) AS c",
        Script::Rows(vec![Record::new().with("c", json!(3))]),
    );
    let harness = Harness::start(backend, "/").await;
    let mut client = harness.connect("/").await;

    client
        .send(Message::Text("{ this is not json".to_string()))
        .await
        .unwrap();
    let frames = recv_request(&mut client).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], json!("error"));
    assert_eq!(frames[0]["error"]["code"], json!("ParseError"));

    send(
        &mut client,
        json!({ "message": "MATCH (n) RETURN count(n) AS c", "type": "counts" }),
    )
    .await;
    let frames = recv_request(&mut client).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["data"]["_fields"], json!([3]));
    assert_eq!(frames[1], json!({ "type": "counts" }));

    harness.stop().await;
}

#[tokio::test]
async fn test_query_error_then_next_query_succeeds() {
    let backend = ScriptedBackend::new()
        .with_query("RETRN 1", Script::RowsThenError(vec![], syntax_error()))
        .with_query(
            "MATCH (t:Target) RETURN t.name, t.uuid",
            Script::Rows(vec![Record::new()
                .with("t.name", json!("EGFR"))
                .with("t.uuid", json!("a1b2"))]),
        );
    let harness = Harness::start(backend, "/").await;
    let mut client = harness.connect("/").await;

    send(&mut client, json!({ "message": "RETRN 1", "params": {}, "type": "x" })).await;
    let frames = recv_request(&mut client).await;
    assert_eq!(
        frames,
        vec![json!({
            "type": "error",
            "error": {
                "code": "Neo.ClientError.Statement.SyntaxError",
                "message": "Invalid input 'RETRN'"
            }
        })]
    );
    assert_eq!(harness.gateway.active_sessions(), 0);

    send(
        &mut client,
        json!({ "message": "MATCH (t:Target) RETURN t.name, t.uuid", "type": "targetSearch" }),
    )
    .await;
    let frames = recv_request(&mut client).await;
    assert_eq!(
        frames,
        vec![
            json!({ "type": "targetSearch", "data": { "display": "EGFR", "value": "a1b2" } }),
            json!({ "type": "done" }),
        ]
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_connections_are_isolated() {
    let backend = ScriptedBackend::new().with_query(
        "RETURN 1 AS one",
        Script::Rows(vec![Record::new().with("one", json!(1))]),
    );
    let harness = Harness::start(backend, "/").await;
    let mut good = harness.connect("/").await;
    let mut bad = harness.connect("/").await;

    send(&mut bad, json!({ "params": {}, "type": "x" })).await;
    let frames = recv_request(&mut bad).await;
    assert_eq!(frames[0]["error"]["code"], json!("MalformedRequest"));

    send(&mut good, json!({ "message": "RETURN 1 AS one", "type": "x" })).await;
    let frames = recv_request(&mut good).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1], json!({ "type": "done" }));

    harness.stop().await;
}

#[tokio::test]
async fn test_wrong_path_is_rejected() {
    let harness = Harness::start(ScriptedBackend::new(), "/graph").await;

    let rejected = connect_async(format!("ws://{}/elsewhere", harness.addr)).await;
    assert!(rejected.is_err());

    let mut client = harness.connect("/graph").await;
    send(&mut client, json!({ "message": "RETRN", "type": "x" })).await;
    let frames = recv_request(&mut client).await;
    assert_eq!(frames[0]["type"], json!("error"));

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_gateway() {
    let harness = Harness::start(ScriptedBackend::new(), "/").await;
    let backend = harness.backend.clone();
    assert!(!backend.is_closed());

    harness.stop().await;
    assert!(backend.is_closed());
}
