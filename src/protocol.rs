use crate::store::LeaderboardEntry;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1.0";

/// Commands sent by a connected player. The session and player come from the
/// connection itself, not from the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Host only
    StartGame,
    SubmitEntry {
        text: String,
    },
    GetState,
}

/// Full view of a session, sent on every phase change and on request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub join_code: String,
    pub phase: Phase,
    pub current_round: u32,
    pub max_rounds: u32,
    pub phase_started_at: DateTime<Utc>,
    pub phase_ends_at: Option<DateTime<Utc>>,
    pub server_now: DateTime<Utc>,
    /// Derived from the in-game clock anchor; absent before the first round
    pub in_game_time: Option<DateTime<Utc>>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl SessionSnapshot {
    pub fn new(session: &Session, leaderboard: Vec<LeaderboardEntry>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.id.clone(),
            join_code: session.join_code.clone(),
            phase: session.phase,
            current_round: session.current_round,
            max_rounds: session.config.max_rounds,
            phase_started_at: session.phase_started_at,
            phase_ends_at: session.phase_ends_at,
            server_now: now,
            in_game_time: session.in_game_time(now),
            leaderboard,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        player_id: PlayerId,
        display_name: String,
        is_host: bool,
        snapshot: SessionSnapshot,
    },
    PhaseChanged {
        from: Phase,
        snapshot: SessionSnapshot,
    },
    /// Narrative summary progress for a round
    SummaryStatus {
        round_number: u32,
        status: SummaryStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Broadcast after an entry is scored
    EntryScored {
        entry_id: EntryId,
        player_id: PlayerId,
        round_number: u32,
        selected_band: u8,
        selected_variant_text: String,
        breakdown: ScoreBreakdown,
        new_total: u32,
        leaderboard: Vec<LeaderboardEntry>,
    },
    /// Sent to the submitter once their entry is stored and judged
    EntryAccepted {
        entry_id: EntryId,
        priority_matched: bool,
        next_priority: Option<CategoryId>,
    },
    State {
        snapshot: SessionSnapshot,
    },
    Error {
        code: String,
        msg: String,
    },
}
