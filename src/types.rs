use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type SessionId = String;
pub type PlayerId = String;
pub type EntryId = String;
pub type CategoryId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Waiting,
    Playing,
    Break,
    Finished,
}

impl Phase {
    /// Phases driven by the clock's timer
    pub fn is_timed(&self) -> bool {
        matches!(self, Phase::Playing | Phase::Break)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub play_duration_minutes: u32,
    pub break_duration_minutes: u32,
    pub max_rounds: u32,
    /// In-game seconds elapsed per real second
    pub timeline_speed_ratio: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            play_duration_minutes: 5,
            break_duration_minutes: 1,
            max_rounds: 3,
            timeline_speed_ratio: 60.0,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_rounds == 0 {
            return Err("max_rounds must be at least 1".to_string());
        }
        if self.play_duration_minutes == 0 || self.break_duration_minutes == 0 {
            return Err("phase durations must be at least one minute".to_string());
        }
        if !(self.timeline_speed_ratio.is_finite() && self.timeline_speed_ratio > 0.0) {
            return Err("timeline_speed_ratio must be a positive number".to_string());
        }
        Ok(())
    }

    /// Configured length of a timed phase; `None` for untimed phases
    pub fn phase_duration(&self, phase: Phase) -> Option<chrono::Duration> {
        match phase {
            Phase::Playing => Some(chrono::Duration::minutes(self.play_duration_minutes.into())),
            Phase::Break => Some(chrono::Duration::minutes(self.break_duration_minutes.into())),
            Phase::Waiting | Phase::Finished => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub join_code: String,
    pub config: SessionConfig,
    pub phase: Phase,
    pub current_round: u32,
    pub phase_started_at: DateTime<Utc>,
    pub phase_ends_at: Option<DateTime<Utc>>,
    /// Set on the first entry into PLAYING, never touched afterwards
    pub in_game_clock_anchor: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(join_code: String, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            join_code,
            config,
            phase: Phase::Waiting,
            current_round: 0,
            phase_started_at: now,
            phase_ends_at: None,
            in_game_clock_anchor: None,
            created_at: now,
        }
    }

    /// In-game time derived from the anchor, running at `timeline_speed_ratio`
    pub fn in_game_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let anchor = self.in_game_clock_anchor?;
        let real_ms = (now - anchor).num_milliseconds().max(0) as f64;
        let scaled_ms = (real_ms * self.config.timeline_speed_ratio) as i64;
        Some(anchor + chrono::Duration::milliseconds(scaled_ms))
    }
}

/// Append-only audit row, written in the same transaction as the phase change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseTransitionRecord {
    pub session_id: SessionId,
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub round_number: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub session_id: SessionId,
    pub display_name: String,
    pub is_host: bool,
    pub total_score: u32,
    /// Raw persisted planet state; decoded and migrated before use
    #[serde(default)]
    pub planet_state: serde_json::Value,
    pub joined_at: DateTime<Utc>,
}

impl Player {
    pub fn new(session_id: &str, display_name: String, is_host: bool) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            session_id: session_id.to_string(),
            display_name,
            is_host,
            total_score: 0,
            planet_state: serde_json::Value::Null,
            joined_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionKind {
    Others,
    #[serde(rename = "SELF")]
    OwnEntry,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScoreBreakdown {
    pub baseline: u32,
    pub plausibility: u32,
    pub connection_score: u32,
    pub priority_bonus: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Scored,
}

/// Evaluation fields, written exactly once by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryEvaluation {
    pub dice_roll: u8,
    pub selected_band: u8,
    pub selected_variant_text: String,
    pub band_variants: [String; 5],
    pub plausibility_level: u8,
    pub ranked_categories: Vec<CategoryId>,
    /// Priority category the player held when this entry was scored
    pub priority_category: Option<CategoryId>,
    pub connection: ConnectionKind,
    pub breakdown: ScoreBreakdown,
    pub scored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub id: EntryId,
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub round_number: u32,
    pub raw_text: String,
    pub status: EntryStatus,
    pub evaluation: Option<EntryEvaluation>,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(session_id: &str, player_id: &str, round_number: u32, raw_text: String) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            session_id: session_id.to_string(),
            player_id: player_id.to_string(),
            round_number,
            raw_text,
            status: EntryStatus::Pending,
            evaluation: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Generating,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundSummary {
    pub session_id: SessionId,
    pub round_number: u32,
    pub status: SummaryStatus,
    pub text: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A category players can be nudged toward ("planet")
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryDef {
    pub id: CategoryId,
    pub name: String,
    pub description: String,
}

pub fn default_categories() -> Vec<CategoryDef> {
    [
        ("mercury", "Mercury", "Technology, invention and communication"),
        ("venus", "Venus", "Culture, art and relationships"),
        ("earth", "Earth", "Nature, climate and everyday life"),
        ("mars", "Mars", "Conflict, politics and power"),
        ("jupiter", "Jupiter", "Economy, trade and growth"),
        ("saturn", "Saturn", "Institutions, law and tradition"),
    ]
    .into_iter()
    .map(|(id, name, description)| CategoryDef {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
    })
    .collect()
}
