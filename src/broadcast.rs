//! Per-session broadcast rooms.

use crate::protocol::ServerMessage;
use crate::types::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const ROOM_CAPACITY: usize = 100;

#[derive(Clone, Default)]
pub struct Broadcaster {
    rooms: Arc<RwLock<HashMap<SessionId, broadcast::Sender<ServerMessage>>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a session's room, creating it on first use
    pub async fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ServerMessage> {
        if let Some(tx) = self.rooms.read().await.get(session_id) {
            return tx.subscribe();
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Best effort fan-out to whoever is connected right now
    pub async fn publish(&self, session_id: &str, msg: ServerMessage) {
        let Some(tx) = self.rooms.read().await.get(session_id).cloned() else {
            return;
        };
        // Ignore send errors (no receivers connected is fine)
        let _ = tx.send(msg);
    }

    /// Drop a room once nobody listens anymore
    pub async fn prune(&self, session_id: &str) {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(session_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            rooms.remove(session_id);
        }
    }
}
