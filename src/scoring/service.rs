//! Applies one judged entry to the store in a single transaction.

use super::dice::{select_variant, BandRoll};
use super::planets::{apply_priority_scoring_and_usage, load_planet_state, PlanetStateError};
use super::{compute_score, ScoreInput, ScoringConfig};
use crate::store::{LeaderboardEntry, Store, StoreError};
use crate::types::*;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("player {0} not found in session")]
    PlayerNotFound(PlayerId),

    #[error("entry {0} not found")]
    EntryNotFound(EntryId),

    #[error("entry {entry_id} belongs to session {actual}, not {expected}")]
    SessionMismatch {
        entry_id: EntryId,
        expected: SessionId,
        actual: SessionId,
    },

    #[error("entry {entry_id} was submitted by {actual}, not {expected}")]
    PlayerMismatch {
        entry_id: EntryId,
        expected: PlayerId,
        actual: PlayerId,
    },

    #[error("entry {0} has already been scored")]
    AlreadyScored(EntryId),

    #[error("invalid evaluation payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    PlanetState(#[from] PlanetStateError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything needed to score an entry once the judge has answered
#[derive(Debug, Clone)]
pub struct EvaluationPayload {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub entry_id: EntryId,
    pub plausibility_level: u8,
    pub ranked_categories: Vec<CategoryId>,
    pub connection: ConnectionKind,
    pub roll: BandRoll,
    pub band_variants: [String; 5],
}

#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub entry: Entry,
    pub breakdown: ScoreBreakdown,
    pub new_total: u32,
    pub priority_matched: bool,
    /// Priority the player holds for their next entry
    pub next_priority: Option<CategoryId>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Clone)]
pub struct EvaluationOrchestrator {
    store: Arc<dyn Store>,
    config: Arc<ScoringConfig>,
    categories: Arc<Vec<CategoryId>>,
}

impl EvaluationOrchestrator {
    pub fn new(store: Arc<dyn Store>, config: ScoringConfig, categories: Vec<CategoryId>) -> Self {
        Self {
            store,
            config: Arc::new(config),
            categories: Arc::new(categories),
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score an entry exactly once.
    ///
    /// The `AlreadyScored` check and both writes happen under the session's
    /// transaction; any error drops the transaction and nothing is persisted.
    pub async fn evaluate(&self, payload: EvaluationPayload) -> Result<EvaluationResult, EvaluationError> {
        if !(1..=5).contains(&payload.plausibility_level) {
            return Err(EvaluationError::InvalidPayload(format!(
                "plausibility level {} outside 1..=5",
                payload.plausibility_level
            )));
        }
        let selected_variant_text = select_variant(&payload.band_variants, payload.roll.band)
            .map_err(|e| EvaluationError::InvalidPayload(e.to_string()))?
            .to_string();

        let mut tx = self
            .store
            .begin(&payload.session_id)
            .await
            .map_err(|e| match e {
                StoreError::SessionNotFound(id) => EvaluationError::SessionNotFound(id),
                other => other.into(),
            })?;

        let mut player = tx
            .player(&payload.player_id)
            .await?
            .ok_or_else(|| EvaluationError::PlayerNotFound(payload.player_id.clone()))?;

        let mut entry = match tx.entry(&payload.entry_id).await? {
            Some(entry) => entry,
            None => {
                return Err(match tx.entry_owner(&payload.entry_id).await? {
                    Some(actual) => EvaluationError::SessionMismatch {
                        entry_id: payload.entry_id.clone(),
                        expected: payload.session_id.clone(),
                        actual,
                    },
                    None => EvaluationError::EntryNotFound(payload.entry_id.clone()),
                });
            }
        };

        if entry.player_id != payload.player_id {
            return Err(EvaluationError::PlayerMismatch {
                entry_id: entry.id.clone(),
                expected: payload.player_id.clone(),
                actual: entry.player_id.clone(),
            });
        }
        if entry.status == EntryStatus::Scored || entry.evaluation.is_some() {
            return Err(EvaluationError::AlreadyScored(entry.id.clone()));
        }

        let mut planet_state = load_planet_state(&player.planet_state, &self.categories)?;
        let outcome = {
            let mut rng = rand::rng();
            apply_priority_scoring_and_usage(
                &mut planet_state,
                &payload.ranked_categories,
                &self.categories,
                self.config.priority_bonus,
                &mut rng,
            )
        };

        let breakdown = compute_score(
            ScoreInput {
                plausibility_level: payload.plausibility_level,
                connection: payload.connection,
            },
            outcome.bonus,
            &self.config,
        );

        entry.status = EntryStatus::Scored;
        entry.evaluation = Some(EntryEvaluation {
            dice_roll: payload.roll.raw_roll,
            selected_band: payload.roll.band,
            selected_variant_text,
            band_variants: payload.band_variants,
            plausibility_level: payload.plausibility_level,
            ranked_categories: payload.ranked_categories,
            priority_category: outcome.priority_used.clone(),
            connection: payload.connection,
            breakdown,
            scored_at: chrono::Utc::now(),
        });

        player.total_score += breakdown.total;
        player.planet_state = planet_state.to_value();

        tx.update_entry(&entry).await?;
        tx.update_player(&player).await?;
        let leaderboard = tx.leaderboard().await?;
        tx.commit().await?;

        tracing::info!(
            session_id = %payload.session_id,
            player_id = %player.id,
            entry_id = %entry.id,
            total = breakdown.total,
            priority_matched = outcome.matched,
            "Entry scored"
        );

        Ok(EvaluationResult {
            entry,
            breakdown,
            new_total: player.total_score,
            priority_matched: outcome.matched,
            next_priority: planet_state.current_priority,
            leaderboard,
        })
    }
}
