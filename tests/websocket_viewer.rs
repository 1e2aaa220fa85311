use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hydro_hub::config::HubConfig;
use hydro_hub::{build_router, build_state, LogActuator};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const DASHBOARD: &str = "http://localhost:5173";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_hub(dir: &tempfile::TempDir) -> SocketAddr {
    let mut config = HubConfig::default();
    config.server.allowed_origins = vec![DASHBOARD.to_string()];
    let url = format!("sqlite://{}", dir.path().join("hub.sqlite").display());
    let store = hydro_hub::open_store(&url).unwrap();
    let state = build_state(&config, store, Arc::new(LogActuator));
    let app = build_router(state, &config.server);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, origin: &str) -> Result<Socket, WsError> {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request.headers_mut().insert("origin", origin.parse().unwrap());
    connect_async(request).await.map(|(socket, _)| socket)
}

/// next json text frame, skipping control frames
async fn next_frame(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame within 5s")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn viewers(client: &reqwest::Client, addr: SocketAddr) -> u64 {
    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    health["viewers"].as_u64().unwrap()
}

#[tokio::test]
async fn viewer_is_greeted_then_streamed_over_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_hub(&dir).await;
    let client = reqwest::Client::new();

    let mut socket = connect(addr, DASHBOARD).await.unwrap();

    // empty store: the greeting carries the fallback reading
    let greeting = next_frame(&mut socket).await;
    assert_eq!(greeting["event"], "sensorUpdate");
    assert_eq!(greeting["data"]["temperature"], 24.5);
    assert_eq!(greeting["data"]["waterLevel"], 85.0);
    assert_eq!(viewers(&client, addr).await, 1);

    let resp = client
        .post(format!("http://{addr}/api/sensors"))
        .json(&json!({ "temperature": 22.8, "ph": 6.1, "ec": 1.7, "waterLevel": 66 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    let stored: Value = resp.json().await.unwrap();

    let update = next_frame(&mut socket).await;
    assert_eq!(update, json!({ "event": "sensorUpdate", "data": stored }));

    client
        .post(format!("http://{addr}/api/controls/pump"))
        .json(&json!({ "value": true }))
        .send()
        .await
        .unwrap();
    // the control echo is the very next frame, so the reading was sent once
    let control = next_frame(&mut socket).await;
    assert_eq!(control["event"], "controlUpdate");
    assert_eq!(control["data"]["action"], "pump");
    assert_eq!(control["data"]["value"], true);

    socket.send(Message::Close(None)).await.unwrap();
    drop(socket);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while viewers(&client, addr).await != 0 {
        assert!(tokio::time::Instant::now() < deadline, "viewer still registered after close");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn reconnecting_viewer_is_greeted_with_the_stored_reading() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_hub(&dir).await;
    let client = reqwest::Client::new();

    let stored: Value = client
        .post(format!("http://{addr}/api/sensors"))
        .json(&json!({ "temperature": 21.0, "ph": 5.8, "ec": 2.2, "waterLevel": 58.5 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let mut socket = connect(addr, DASHBOARD).await.unwrap();
    assert_eq!(next_frame(&mut socket).await, json!({ "event": "sensorUpdate", "data": stored }));
}

#[tokio::test]
async fn foreign_origin_is_refused_before_the_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_hub(&dir).await;

    match connect(addr, "http://evil.example").await {
        Err(WsError::Http(resp)) => assert_eq!(resp.status().as_u16(), 403),
        Err(other) => panic!("expected an http 403, got {other}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }

    let client = reqwest::Client::new();
    assert_eq!(viewers(&client, addr).await, 0);
}
