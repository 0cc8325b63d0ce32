use crate::detection::{Attack, VideoFrameMessage};
use crate::error::Result;
use crate::hub::Hub;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::server::AppState;

/// Capacity of the per-connection control channel carrying pong replies to
/// the writer task.
const CONTROL_QUEUE_CAPACITY: usize = 16;

/// Subscribe handshake sent by keyed detection viewers.
#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    camera_id: String,
}

/// Outcome of reading the subscription handshake.
enum SubscribeOutcome {
    Key(Uuid),
    Invalid,
    Closed,
}

/// Keyed detection viewer endpoint.
pub async fn detection_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_detection_socket(socket, state))
}

async fn handle_detection_socket(mut socket: WebSocket, state: AppState) {
    // The first inbound message must carry the subscription key, before any
    // hub registration happens.
    let camera_id = match read_subscribe_key(&mut socket).await {
        SubscribeOutcome::Key(camera_id) => camera_id,
        SubscribeOutcome::Invalid => {
            let reply = json!({"error": "Invalid camera_id format"});
            let _ = socket.send(Message::Text(reply.to_string())).await;
            return;
        }
        SubscribeOutcome::Closed => return,
    };

    let confirmation = json!({
        "status": "subscribed",
        "camera_id": camera_id,
    });

    run_viewer(
        socket,
        state.detection_hub.clone(),
        Some(camera_id),
        confirmation,
        "detection",
    )
    .await;
}

/// Broadcast-all video viewer endpoint.
pub async fn video_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let hub = state.video_hub.clone();
    let confirmation = json!({
        "status": "connected",
        "message": "Subscribed to video stream",
    });
    ws.on_upgrade(move |socket| run_viewer(socket, hub, None, confirmation, "video"))
}

/// Broadcast-all attack viewer endpoint.
pub async fn attack_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let hub = state.attack_hub.clone();
    let confirmation = json!({
        "status": "connected",
        "message": "Subscribed to attack data stream",
    });
    ws.on_upgrade(move |socket| run_viewer(socket, hub, None, confirmation, "attack"))
}

/// Read messages until the subscription key arrives or the peer goes away.
async fn read_subscribe_key(socket: &mut WebSocket) -> SubscribeOutcome {
    while let Some(result) = socket.recv().await {
        match result {
            Ok(Message::Text(text)) => {
                return match parse_subscribe(&text) {
                    Some(camera_id) => SubscribeOutcome::Key(camera_id),
                    None => SubscribeOutcome::Invalid,
                };
            }
            Ok(Message::Close(_)) => return SubscribeOutcome::Closed,
            // Protocol ping/pong is not the handshake
            Ok(_) => continue,
            Err(e) => {
                debug!("Error reading subscribe message: {}", e);
                return SubscribeOutcome::Closed;
            }
        }
    }
    SubscribeOutcome::Closed
}

/// Parse the `{"camera_id": "<uuid>"}` handshake.
fn parse_subscribe(text: &str) -> Option<Uuid> {
    let request: SubscribeRequest = serde_json::from_str(text).ok()?;
    Uuid::parse_str(&request.camera_id).ok()
}

/// Drive one viewer connection: register with the hub, spawn the single
/// writer task, then block on inbound reads purely for liveness.
///
/// Teardown runs exactly once on every exit path: unregistering closes the
/// outbound queue, which in turn stops the writer and releases the socket.
async fn run_viewer(
    socket: WebSocket,
    hub: Hub,
    key: Option<Uuid>,
    confirmation: serde_json::Value,
    label: &'static str,
) {
    let registered = match hub.register(key).await {
        Ok(registered) => registered,
        Err(e) => {
            warn!("Failed to register {} viewer: {}", label, e);
            return;
        }
    };
    let client_id = registered.id;
    let mut outbound = registered.receiver;

    let (mut sink, mut stream) = socket.split();
    let (control_tx, mut control_rx) = mpsc::channel::<Message>(CONTROL_QUEUE_CAPACITY);

    // Sole writer for this connection: the transport forbids concurrent
    // writers, so hub traffic and pong replies both funnel through here.
    let writer = tokio::spawn(async move {
        if sink
            .send(Message::Text(confirmation.to_string()))
            .await
            .is_err()
        {
            debug!("{} viewer went away before confirmation", label);
            return;
        }

        loop {
            tokio::select! {
                payload = outbound.recv() => match payload {
                    Some(payload) => {
                        let text = String::from_utf8_lossy(&payload).into_owned();
                        if sink.send(Message::Text(text)).await.is_err() {
                            debug!("{} viewer write failed", label);
                            break;
                        }
                    }
                    // Hub closed the queue: unregistered or dropped for
                    // backpressure
                    None => break,
                },
                message = control_rx.recv() => match message {
                    Some(message) => {
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        let _ = sink.close().await;
    });

    // Primary task: read inbound frames solely for liveness and remote close.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(reply) = liveness_reply(&text) {
                    if control_tx.try_send(Message::Text(reply)).is_err() {
                        debug!("{} viewer control queue full, skipping pong", label);
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                if control_tx.try_send(Message::Pong(data)).is_err() {
                    debug!("{} viewer control queue full, skipping pong", label);
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("{} viewer read error: {}", label, e);
                break;
            }
        }
    }

    hub.unregister(client_id).await;
    drop(control_tx);
    let _ = writer.await;
}

/// Application-level ping handling: `{"type":"ping"}` gets a pong echoing
/// the timestamp.
fn liveness_reply(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "ping" {
        return None;
    }

    let reply = json!({
        "type": "pong",
        "timestamp": value.get("timestamp").cloned().unwrap_or(serde_json::Value::Null),
    });
    Some(reply.to_string())
}

/// Frame-source endpoint: receives video frames, fans them out to video
/// viewers and keeps the frame cache current.
pub async fn video_input_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_video_input(socket, state))
}

async fn handle_video_input(mut socket: WebSocket, state: AppState) {
    info!("Video stream source connected");

    let confirmation = json!({
        "status": "connected",
        "message": "Ready to receive video frames",
    });
    if socket
        .send(Message::Text(confirmation.to_string()))
        .await
        .is_err()
    {
        return;
    }

    while let Some(result) = socket.recv().await {
        match result {
            Ok(Message::Text(text)) => {
                let frame: VideoFrameMessage = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Invalid video frame message: {}", e);
                        continue;
                    }
                };
                ingest_video_frame(&state, frame).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Video source read error: {}", e);
                break;
            }
        }
    }

    info!("Video stream source disconnected");
}

/// Broadcast one inbound frame and refresh the capture cache.
pub async fn ingest_video_frame(state: &AppState, frame: VideoFrameMessage) {
    if let Err(e) = state.video_hub.broadcast_json(&frame, None).await {
        warn!("Failed to broadcast video frame: {}", e);
    }

    match STANDARD.decode(&frame.frame) {
        Ok(bytes) => state.frame_cache.update(bytes, frame.timestamp).await,
        Err(e) => warn!("Failed to decode video frame: {}", e),
    }

    if frame.frame_number % 30 == 0 {
        debug!(
            "Received frame #{}, detections: {}, viewers: {}",
            frame.frame_number,
            frame.detections,
            state.video_hub.client_count().await
        );
    }
}

/// Persist an attack record and fan it out to attack viewers.
pub async fn store_and_broadcast_attack(state: &AppState, attack: Attack) -> Result<Attack> {
    let stored = state.attack_store.create(attack).await?;

    if let Err(e) = state.attack_hub.broadcast_json(&stored, None).await {
        warn!("Failed to broadcast attack {}: {}", stored.id, e);
    }

    Ok(stored)
}

/// Attack ingest endpoint: stores the record, then broadcasts it.
pub async fn create_attack_handler(
    State(state): State<AppState>,
    Json(attack): Json<Attack>,
) -> impl IntoResponse {
    match store_and_broadcast_attack(&state, attack).await {
        Ok(stored) => (StatusCode::CREATED, Json(json!(stored))),
        Err(e) => {
            warn!("Failed to store attack: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        }
    }
}

/// JSON health snapshot over the hubs and the frame cache.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = json!({
        "status": "healthy",
        "frame_available": state.frame_cache.is_populated().await,
        "clients": {
            "detections": state.detection_hub.client_count().await,
            "video": state.video_hub.client_count().await,
            "attacks": state.attack_hub.client_count().await,
        },
    });

    (StatusCode::OK, Json(health))
}
