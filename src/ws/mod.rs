pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::state::AppState;
use handlers::Connection;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub session: String,
    pub player: String,
}

/// WebSocket upgrade handler. The player must already have joined the
/// session over HTTP.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    tracing::info!(
        session_id = %params.session,
        player_id = %params.player,
        "WebSocket connection request"
    );

    let player = match state.get_player(&params.session, &params.player).await {
        Ok(p) => p,
        Err(e) => return crate::api::error_response(e),
    };

    let display_name = player.display_name;
    let conn = Connection {
        session_id: params.session,
        player_id: player.id,
        is_host: player.is_host,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, conn, display_name, state))
        .into_response()
}

async fn send_json(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to encode server message: {}", e);
            true
        }
    }
}

/// Drop a connection's receiver and the room with it if nobody else listens
async fn leave_room(
    state: &AppState,
    session_id: &str,
    room_rx: tokio::sync::broadcast::Receiver<ServerMessage>,
) {
    drop(room_rx);
    state.broadcaster.prune(session_id).await;
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    conn: Connection,
    display_name: String,
    state: Arc<AppState>,
) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the welcome so no phase change falls in between
    let mut room_rx = state.broadcaster.subscribe(&conn.session_id).await;

    let welcome = match state.get_state(&conn.session_id).await {
        Ok(snapshot) => ServerMessage::Welcome {
            protocol: PROTOCOL_VERSION.to_string(),
            player_id: conn.player_id.clone(),
            display_name,
            is_host: conn.is_host,
            snapshot,
        },
        Err(e) => {
            tracing::error!(session_id = %conn.session_id, "Failed to build welcome: {}", e);
            let _ = send_json(&mut sender, &e.to_message()).await;
            leave_room(&state, &conn.session_id, room_rx).await;
            return;
        }
    };
    if !send_json(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        leave_room(&state, &conn.session_id, room_rx).await;
        return;
    }

    tracing::info!(
        session_id = %conn.session_id,
        player_id = %conn.player_id,
        is_host = conn.is_host,
        "WebSocket connected"
    );

    loop {
        tokio::select! {
            room_msg = room_rx.recv() => {
                match room_msg {
                    Ok(msg) => {
                        if !send_json(&mut sender, &msg).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Missed broadcasts are replaced by a fresh snapshot
                        tracing::warn!(player_id = %conn.player_id, skipped, "Client lagged behind room");
                        if let Ok(snapshot) = state.get_state(&conn.session_id).await {
                            if !send_json(&mut sender, &ServerMessage::State { snapshot }).await {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text.as_str());

                        let response = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => handlers::handle_message(client_msg, &conn, &state).await,
                            Err(e) => {
                                tracing::warn!("Failed to parse client message: {}", e);
                                Some(ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                })
                            }
                        };
                        if let Some(response) = response {
                            if !send_json(&mut sender, &response).await {
                                tracing::error!("Failed to send response");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    leave_room(&state, &conn.session_id, room_rx).await;

    tracing::info!(
        session_id = %conn.session_id,
        player_id = %conn.player_id,
        "WebSocket connection closed"
    );
}
