use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::notification::{Notification, Target};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsParams {
    /// `driver:<id>`, `passenger:<id>` or `admins`.
    pub target: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let target: Target = params.target.parse().map_err(AppError::BadRequest)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, target)))
}

fn encode(notification: &Notification) -> Option<Message> {
    match serde_json::to_string(notification) {
        Ok(json) => Some(Message::Text(json)),
        Err(err) => {
            warn!(error = %err, "failed to serialize notification for ws");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, target: Target) {
    let (mut sender, mut receiver) = socket.split();

    let mut rx = state.notifications.subscribe();
    let backlog = state.notifications.connect(target);

    info!(client = %target, replayed = backlog.len(), "websocket client connected");

    let send_task = tokio::spawn(async move {
        for notification in &backlog {
            if let Some(message) = encode(notification) {
                if sender.send(message).await.is_err() {
                    return;
                }
            }
        }

        loop {
            let notification = match rx.recv().await {
                Ok(notification) => notification,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(client = %target, skipped, "websocket client lagging");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if notification.target != target {
                continue;
            }

            let Some(message) = encode(&notification) else {
                continue;
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.notifications.disconnect(target);
    info!(client = %target, "websocket client disconnected");
}
