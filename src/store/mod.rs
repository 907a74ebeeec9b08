//! Storage seam.
//!
//! Transactions are scoped to a single session: `begin` locks only that
//! session's rows, so sessions never contend with each other. Reads and writes
//! inside a transaction see a private working copy; `commit` publishes it and
//! dropping the transaction without committing rolls everything back.

mod memory;

use crate::types::*;
use async_trait::async_trait;

pub use memory::{MemoryStore, SessionSnapshotFile, SNAPSHOT_SCHEMA_VERSION};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("session {0} already exists")]
    SessionExists(SessionId),

    #[error("join code {0} is already in use")]
    JoinCodeTaken(String),

    #[error("row conflict: {0}")]
    Conflict(String),

    #[error("transaction already finished")]
    TransactionFinished,

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// A player's standing, as shown on the leaderboard
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LeaderboardEntry {
    pub player_id: PlayerId,
    pub display_name: String,
    pub total_score: u32,
    pub is_host: bool,
}

/// Order players by score desc, then join time asc
pub fn rank_players(players: &[Player]) -> Vec<LeaderboardEntry> {
    let mut ranked: Vec<&Player> = players.iter().collect();
    ranked.sort_by(|a, b| {
        b.total_score
            .cmp(&a.total_score)
            .then(a.joined_at.cmp(&b.joined_at))
    });
    ranked
        .into_iter()
        .map(|p| LeaderboardEntry {
            player_id: p.id.clone(),
            display_name: p.display_name.clone(),
            total_score: p.total_score,
            is_host: p.is_host,
        })
        .collect()
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Create a new session row; the join code must be unused
    async fn create_session(&self, session: Session) -> StoreResult<()>;

    /// Open a transaction over one session's rows
    async fn begin(&self, session_id: &str) -> StoreResult<Box<dyn StoreTx>>;

    async fn session(&self, session_id: &str) -> StoreResult<Option<Session>>;

    async fn session_by_join_code(&self, join_code: &str) -> StoreResult<Option<Session>>;

    /// Sessions whose clock should be running (PLAYING or BREAK)
    async fn active_sessions(&self) -> StoreResult<Vec<Session>>;

    async fn leaderboard(&self, session_id: &str) -> StoreResult<Vec<LeaderboardEntry>>;

    async fn players(&self, session_id: &str) -> StoreResult<Vec<Player>>;

    async fn entry(&self, entry_id: &str) -> StoreResult<Option<Entry>>;

    /// Most recent scored entries of a session, newest first
    async fn recent_scored_entries(&self, session_id: &str, limit: usize) -> StoreResult<Vec<Entry>>;

    async fn round_entries(&self, session_id: &str, round_number: u32) -> StoreResult<Vec<Entry>>;

    async fn transitions(&self, session_id: &str) -> StoreResult<Vec<PhaseTransitionRecord>>;

    async fn round_summary(&self, session_id: &str, round_number: u32) -> StoreResult<Option<RoundSummary>>;
}

#[async_trait]
pub trait StoreTx: Send {
    fn session_id(&self) -> &str;

    async fn session(&mut self) -> StoreResult<Session>;

    async fn update_session(&mut self, session: &Session) -> StoreResult<()>;

    async fn append_transition(&mut self, record: PhaseTransitionRecord) -> StoreResult<()>;

    async fn players(&mut self) -> StoreResult<Vec<Player>>;

    async fn player(&mut self, player_id: &str) -> StoreResult<Option<Player>>;

    async fn insert_player(&mut self, player: Player) -> StoreResult<()>;

    async fn update_player(&mut self, player: &Player) -> StoreResult<()>;

    async fn entry(&mut self, entry_id: &str) -> StoreResult<Option<Entry>>;

    /// Session that owns an entry, wherever it lives
    async fn entry_owner(&mut self, entry_id: &str) -> StoreResult<Option<SessionId>>;

    async fn insert_entry(&mut self, entry: Entry) -> StoreResult<()>;

    async fn update_entry(&mut self, entry: &Entry) -> StoreResult<()>;

    async fn upsert_round_summary(&mut self, summary: RoundSummary) -> StoreResult<()>;

    async fn leaderboard(&mut self) -> StoreResult<Vec<LeaderboardEntry>>;

    /// Publish the working copy. The transaction is finished afterwards.
    async fn commit(&mut self) -> StoreResult<()>;
}
