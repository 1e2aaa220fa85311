use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use hydro_hub::{ActuatorLink, ControlRelay, ControlValue, HttpActuator, ViewerRegistry};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

async fn receive(State(tx): State<mpsc::Sender<Value>>, Json(body): Json<Value>) {
    let _ = tx.send(body).await;
}

#[tokio::test]
async fn commands_are_posted_to_the_actuator_node() {
    let (tx, mut rx) = mpsc::channel(4);
    let node = Router::new().route("/control", post(receive)).with_state(tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, node).await.unwrap();
    });

    let actuator: Arc<dyn ActuatorLink> = Arc::new(
        HttpActuator::new(format!("http://{addr}/control"), Duration::from_secs(2)).unwrap(),
    );
    let relay = ControlRelay::new(actuator, Arc::new(ViewerRegistry::default()));
    relay.relay("pump", ControlValue::Bool(true));

    let body = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("actuator node was not called")
        .unwrap();
    assert_eq!(body["action"], "pump");
    assert_eq!(body["value"], true);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn unreachable_actuator_does_not_fail_the_relay() {
    // nothing listens on this port
    let actuator: Arc<dyn ActuatorLink> =
        Arc::new(HttpActuator::new("http://127.0.0.1:9/control", Duration::from_millis(200)).unwrap());
    let viewers = Arc::new(ViewerRegistry::default());
    let mut viewer = viewers.subscribe();
    let relay = ControlRelay::new(actuator, viewers.clone());

    let command = relay.relay("lights", ControlValue::Bool(false));
    assert_eq!(command.action, "lights");
    assert!(viewer.try_recv().is_some());
}
