//! WebSocket message dispatch
//!
//! Host authorization is checked here before a command reaches the game
//! service.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::{PlayerId, SessionId};
use std::sync::Arc;

/// Identity bound to a socket at upgrade time
#[derive(Debug, Clone)]
pub struct Connection {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub is_host: bool,
}

/// Macro to check host authorization and return early if unauthorized
macro_rules! check_host {
    ($conn:expr, $action:expr) => {
        if !$conn.is_host {
            return Some(ServerMessage::Error {
                code: "UNAUTHORIZED".to_string(),
                msg: format!("only the host can {}", $action),
            });
        }
    };
}

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    conn: &Connection,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::StartGame => {
            check_host!(conn, "start the game");
            tracing::info!(session_id = %conn.session_id, "Host starts the game");
            match state.start_game(&conn.session_id, &conn.player_id).await {
                // Everyone, including the host, learns of the change via phase_changed
                Ok(_) => None,
                Err(e) => Some(e.to_message()),
            }
        }

        ClientMessage::SubmitEntry { text } => {
            tracing::debug!(
                session_id = %conn.session_id,
                player_id = %conn.player_id,
                chars = text.chars().count(),
                "Entry submitted"
            );
            match state
                .submit_entry(&conn.session_id, &conn.player_id, &text)
                .await
            {
                Ok(result) => Some(ServerMessage::EntryAccepted {
                    entry_id: result.entry.id,
                    priority_matched: result.priority_matched,
                    next_priority: result.next_priority,
                }),
                Err(e) => Some(e.to_message()),
            }
        }

        ClientMessage::GetState => match state.get_state(&conn.session_id).await {
            Ok(snapshot) => Some(ServerMessage::State { snapshot }),
            Err(e) => Some(e.to_message()),
        },
    }
}
