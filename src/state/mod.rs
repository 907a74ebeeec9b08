mod game;
mod submission;

use crate::broadcast::Broadcaster;
use crate::clock::{ClockContext, ClockError, SessionClockRegistry};
use crate::config::AppConfig;
use crate::cooldown::SubmissionCooldown;
use crate::llm::{Judge, JudgeError, JudgeValidationError, LlmError};
use crate::protocol::ServerMessage;
use crate::scoring::dice::DiceError;
use crate::scoring::{EvaluationError, EvaluationOrchestrator};
use crate::store::{Store, StoreError};
use crate::types::*;
use std::sync::Arc;

/// How a caller should treat a failed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input; retrying the same request never helps
    Validation,
    /// Rejected in the current state; may succeed later
    Conflict,
    NotFound,
    /// A collaborator failed; the request may be resubmitted
    Transient,
}

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("invalid session settings: {0}")]
    InvalidConfig(String),

    #[error("invalid display name: {0}")]
    InvalidName(String),

    #[error("entry text is empty")]
    EmptyEntry,

    #[error("entry is {actual} characters, the limit is {max}")]
    EntryTooLong { max: usize, actual: usize },

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("no session with join code {0}")]
    JoinCodeNotFound(String),

    #[error("player {0} not found")]
    PlayerNotFound(PlayerId),

    #[error("session is {actual:?}, expected {expected:?}")]
    PhaseMismatch { expected: Phase, actual: Phase },

    #[error("only the host can {0}")]
    NotHost(&'static str),

    #[error("please wait {retry_after_secs}s before submitting again")]
    Cooldown { retry_after_secs: u64 },

    #[error("entry {0} has already been scored")]
    AlreadyScored(EntryId),

    #[error("no judge is configured")]
    JudgeUnavailable,

    #[error("judge failed: {0}")]
    JudgeFailed(LlmError),

    #[error("judge returned an invalid assessment: {0}")]
    JudgeInvalid(JudgeValidationError),

    #[error("could not allocate a join code")]
    JoinCodeExhausted,

    #[error(transparent)]
    Dice(#[from] DiceError),

    #[error(transparent)]
    Evaluation(EvaluationError),

    #[error(transparent)]
    Clock(ClockError),

    #[error(transparent)]
    Store(StoreError),
}

impl GameError {
    /// Stable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            GameError::InvalidConfig(_) => "INVALID_CONFIG",
            GameError::InvalidName(_) => "INVALID_NAME",
            GameError::EmptyEntry => "EMPTY_ENTRY",
            GameError::EntryTooLong { .. } => "ENTRY_TOO_LONG",
            GameError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            GameError::JoinCodeNotFound(_) => "JOIN_CODE_NOT_FOUND",
            GameError::PlayerNotFound(_) => "PLAYER_NOT_FOUND",
            GameError::PhaseMismatch { .. } => "PHASE_MISMATCH",
            GameError::NotHost(_) => "UNAUTHORIZED",
            GameError::Cooldown { .. } => "COOLDOWN",
            GameError::AlreadyScored(_) => "ALREADY_SCORED",
            GameError::JudgeUnavailable => "JUDGE_UNAVAILABLE",
            GameError::JudgeFailed(_) => "JUDGE_FAILED",
            GameError::JudgeInvalid(_) => "JUDGE_INVALID",
            GameError::JoinCodeExhausted => "JOIN_CODE_EXHAUSTED",
            GameError::Dice(_) => "DICE_FAILED",
            GameError::Evaluation(e) => match e {
                EvaluationError::EntryNotFound(_) => "ENTRY_NOT_FOUND",
                EvaluationError::SessionMismatch { .. } => "SESSION_MISMATCH",
                EvaluationError::PlayerMismatch { .. } => "PLAYER_MISMATCH",
                EvaluationError::InvalidPayload(_) => "INVALID_PAYLOAD",
                EvaluationError::PlanetState(_) => "PLANET_STATE_INVALID",
                _ => "EVALUATION_FAILED",
            },
            GameError::Clock(_) => "CLOCK_FAILED",
            GameError::Store(_) => "STORE_FAILED",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            GameError::InvalidConfig(_)
            | GameError::InvalidName(_)
            | GameError::EmptyEntry
            | GameError::EntryTooLong { .. }
            | GameError::JudgeInvalid(_) => ErrorClass::Validation,
            GameError::SessionNotFound(_)
            | GameError::JoinCodeNotFound(_)
            | GameError::PlayerNotFound(_) => ErrorClass::NotFound,
            GameError::PhaseMismatch { .. }
            | GameError::NotHost(_)
            | GameError::Cooldown { .. }
            | GameError::AlreadyScored(_) => ErrorClass::Conflict,
            GameError::Evaluation(e) => match e {
                EvaluationError::EntryNotFound(_)
                | EvaluationError::PlayerNotFound(_)
                | EvaluationError::SessionNotFound(_) => ErrorClass::NotFound,
                EvaluationError::AlreadyScored(_) => ErrorClass::Conflict,
                EvaluationError::Store(_) => ErrorClass::Transient,
                _ => ErrorClass::Validation,
            },
            GameError::JudgeUnavailable
            | GameError::JudgeFailed(_)
            | GameError::JoinCodeExhausted
            | GameError::Dice(_)
            | GameError::Clock(_)
            | GameError::Store(_) => ErrorClass::Transient,
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code().to_string(),
            msg: self.to_string(),
        }
    }
}

impl From<StoreError> for GameError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SessionNotFound(id) => GameError::SessionNotFound(id),
            other => GameError::Store(other),
        }
    }
}

impl From<EvaluationError> for GameError {
    fn from(e: EvaluationError) -> Self {
        match e {
            EvaluationError::SessionNotFound(id) => GameError::SessionNotFound(id),
            EvaluationError::PlayerNotFound(id) => GameError::PlayerNotFound(id),
            EvaluationError::AlreadyScored(id) => GameError::AlreadyScored(id),
            other => GameError::Evaluation(other),
        }
    }
}

impl From<ClockError> for GameError {
    fn from(e: ClockError) -> Self {
        match e {
            ClockError::SessionNotFound(id) => GameError::SessionNotFound(id),
            ClockError::InvalidPhase { expected, actual } => {
                GameError::PhaseMismatch { expected, actual }
            }
            ClockError::Store(e) => e.into(),
            other => GameError::Clock(other),
        }
    }
}

impl From<JudgeError> for GameError {
    fn from(e: JudgeError) -> Self {
        match e {
            JudgeError::Provider(e) => GameError::JudgeFailed(e),
            JudgeError::Validation(e) => GameError::JudgeInvalid(e),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub broadcaster: Broadcaster,
    pub clocks: Arc<SessionClockRegistry>,
    pub orchestrator: EvaluationOrchestrator,
    pub judge: Option<Arc<dyn Judge>>,
    pub cooldown: SubmissionCooldown,
    pub categories: Arc<Vec<CategoryDef>>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn Store>, judge: Option<Arc<dyn Judge>>) -> Self {
        Self::with_categories(config, store, judge, default_categories())
    }

    pub fn with_categories(
        config: AppConfig,
        store: Arc<dyn Store>,
        judge: Option<Arc<dyn Judge>>,
        categories: Vec<CategoryDef>,
    ) -> Self {
        let category_ids: Vec<CategoryId> = categories.iter().map(|c| c.id.clone()).collect();
        let broadcaster = Broadcaster::new();

        let clocks = SessionClockRegistry::new(ClockContext {
            store: store.clone(),
            broadcaster: broadcaster.clone(),
            judge: judge.clone(),
            categories: Arc::new(category_ids.clone()),
        });
        let orchestrator =
            EvaluationOrchestrator::new(store.clone(), config.scoring.clone(), category_ids);

        Self {
            cooldown: SubmissionCooldown::new(config.submission_cooldown),
            config: Arc::new(config),
            store,
            broadcaster,
            clocks: Arc::new(clocks),
            orchestrator,
            judge,
            categories: Arc::new(categories),
        }
    }
}
