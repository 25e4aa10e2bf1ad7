use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::controllers::AppPath;
use crate::error::{AppError, AppResult, Resource};
use crate::middleware::StaffUser;
use crate::services::broadcast::{LiveUpdate, Observer, ObserverConnection};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/events/{id}/live", get(observe_event))
}

/// Сообщения клиент -> сервер.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Unsubscribe,
}

// GET /api/events/{id}/live (websocket)
async fn observe_event(
    State(state): State<Arc<AppState>>,
    StaffUser(staff): StaffUser,
    AppPath(event_id): AppPath<i64>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    if state.store.find_event(event_id).await?.is_none() {
        return Err(AppError::NotFound(Resource::Event));
    }
    let observer = Observer::from(&staff);
    Ok(ws.on_upgrade(move |socket| run_observer(socket, state, event_id, observer)))
}

async fn run_observer(socket: WebSocket, state: Arc<AppState>, event_id: i64, observer: Observer) {
    let (connection, mut updates) = ObserverConnection::channel(state.config.live.channel_capacity);
    let connection_id = connection.id;
    state.registry.register_connection(event_id, &connection, observer.clone());
    // отправитель остаётся только в реестре: если реестр выкинет канал, recv() вернёт None
    drop(connection);

    let (mut sink, mut stream) = socket.split();

    match state.store.reservations_by_event(event_id).await {
        Ok(reservations) => {
            let snapshot = LiveUpdate::snapshot(event_id, &reservations);
            if send_update(&mut sink, &snapshot).await.is_err() {
                state.registry.unregister_connection(event_id, connection_id, &observer);
                return;
            }
        }
        Err(e) => warn!("Failed to load snapshot for event {}: {:?}", event_id, e),
    }

    let mut ping = tokio::time::interval(Duration::from_secs(state.config.live.ping_interval_seconds.max(1)));
    ping.tick().await;

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(update) => {
                    if send_update(&mut sink, &update).await.is_err() {
                        break;
                    }
                }
                None => {
                    debug!("Observer {} on event {} was dropped by the registry", connection_id, event_id);
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(ClientMessage::Unsubscribe) = serde_json::from_str::<ClientMessage>(text.as_str()) {
                        info!("Observer {} unsubscribed from event {}", observer.user_id, event_id);
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.registry.unregister_connection(event_id, connection_id, &observer);
    let _ = sink.close().await;
}

async fn send_update<S>(sink: &mut S, update: &LiveUpdate) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(update) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!("Failed to serialize live update: {:?}", e);
            Ok(())
        }
    }
}
