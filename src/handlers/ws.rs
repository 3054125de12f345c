use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::token::Role;
use crate::realtime::events::{ClientMessage, ErrorCode, ErrorFrame, SubscribeAck};
use crate::realtime::Hub;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// Validates the bearer token carried in the handshake *before* accepting
/// the upgrade (section 4.9), resolving it to one of the three roles this
/// gateway recognizes.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let claims = match state.tokens.verify_access(&params.token) {
        Ok(c) => c,
        Err(_) => return (StatusCode::UNAUTHORIZED, "Invalid or expired token").into_response(),
    };

    let user_id = if claims.role == Role::Anon {
        None
    } else {
        match claims.user_id() {
            Ok(id) => Some(id),
            Err(_) => return (StatusCode::UNAUTHORIZED, "Invalid token subject").into_response(),
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, claims.role, user_id, state))
}

async fn handle_socket(socket: WebSocket, role: Role, user_id: Option<Uuid>, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn_id = state.hub.register(role, user_id, tx).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let hub = state.hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => handle_client_message(conn_id, &text, &hub).await,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    // Whichever task ends first (client disconnect, or the send side
    // closing) tears down the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.unregister(conn_id).await;
}

async fn handle_client_message(conn_id: Uuid, text: &str, hub: &Hub) {
    let Ok(message) = serde_json::from_str::<ClientMessage>(text) else {
        let frame = ErrorFrame::new(ErrorCode::InternalError, "Malformed message");
        if let Ok(payload) = serde_json::to_string(&frame) {
            hub.send_to(conn_id, payload).await;
        }
        return;
    };

    match message {
        ClientMessage::Subscribe { channel } => {
            let ack = match hub.subscribe(conn_id, &channel).await {
                Ok(Ok(())) => SubscribeAck { ok: true, error: None },
                Ok(Err(code)) => SubscribeAck { ok: false, error: Some(code) },
                Err(_) => SubscribeAck {
                    ok: false,
                    error: Some(ErrorCode::InternalError),
                },
            };
            if let Ok(payload) = serde_json::to_string(&ack) {
                hub.send_to(conn_id, payload).await;
            }
        }
        ClientMessage::Unsubscribe { channel } => {
            hub.unsubscribe(conn_id, &channel).await;
        }
        ClientMessage::Publish { channel, event, payload } => {
            let result = hub.publish(conn_id, &channel, &event, payload).await;
            let error = match result {
                Ok(Ok(_message_id)) => None,
                Ok(Err(code)) => Some(code),
                Err(_) => Some(ErrorCode::InternalError),
            };
            if let Some(code) = error {
                let frame = ErrorFrame::new(code, "Publish failed");
                if let Ok(text) = serde_json::to_string(&frame) {
                    hub.send_to(conn_id, text).await;
                }
            }
        }
    }
}
