use super::{AppState, GameError};
use crate::llm::{JudgeRequest, PriorEntry};
use crate::protocol::ServerMessage;
use crate::scoring::dice::roll_band;
use crate::scoring::{classify_connection, EvaluationPayload, EvaluationResult};
use crate::types::*;
use std::collections::HashMap;

/// Scored entries shown to the judge as link candidates
pub const PRIOR_ENTRY_LIMIT: usize = 10;

impl AppState {
    /// Accept, judge and score one entry.
    ///
    /// The cooldown slot is taken before the judge is called and handed back
    /// if anything fails before scoring, so a resubmission is not penalised.
    pub async fn submit_entry(
        &self,
        session_id: &str,
        player_id: &str,
        text: &str,
    ) -> Result<EvaluationResult, GameError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GameError::EmptyEntry);
        }
        let length = text.chars().count();
        if length > self.config.max_entry_chars {
            return Err(GameError::EntryTooLong {
                max: self.config.max_entry_chars,
                actual: length,
            });
        }

        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or_else(|| GameError::SessionNotFound(session_id.to_string()))?;
        self.ensure_clock(&session).await;
        if session.phase != Phase::Playing {
            return Err(GameError::PhaseMismatch {
                expected: Phase::Playing,
                actual: session.phase,
            });
        }
        self.get_player(session_id, player_id).await?;

        let reservation = self
            .cooldown
            .try_acquire(session_id, player_id)
            .await
            .map_err(|wait| GameError::Cooldown {
                retry_after_secs: wait.as_secs_f64().ceil() as u64,
            })?;

        match self.judge_and_score(session_id, player_id, text).await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(session_id, player_id, code = e.code(), "Submission failed: {}", e);
                self.cooldown.release(reservation).await;
                Err(e)
            }
        }
    }

    async fn judge_and_score(
        &self,
        session_id: &str,
        player_id: &str,
        text: &str,
    ) -> Result<EvaluationResult, GameError> {
        let judge = self.judge.clone().ok_or(GameError::JudgeUnavailable)?;

        // Phase is re-checked under the transaction that stores the entry
        let mut tx = self.store.begin(session_id).await?;
        let session = tx.session().await?;
        if session.phase != Phase::Playing {
            return Err(GameError::PhaseMismatch {
                expected: Phase::Playing,
                actual: session.phase,
            });
        }
        let entry = Entry::new(session_id, player_id, session.current_round, text.to_string());
        tx.insert_entry(entry.clone()).await?;
        tx.commit().await?;

        let prior_entries: Vec<PriorEntry> = self
            .store
            .recent_scored_entries(session_id, PRIOR_ENTRY_LIMIT)
            .await?
            .into_iter()
            .map(|e| PriorEntry {
                entry_id: e.id,
                player_id: e.player_id,
                text: e
                    .evaluation
                    .map(|ev| ev.selected_variant_text)
                    .unwrap_or(e.raw_text),
            })
            .collect();
        let authors: HashMap<EntryId, PlayerId> = prior_entries
            .iter()
            .map(|p| (p.entry_id.clone(), p.player_id.clone()))
            .collect();

        // A judge failure leaves the entry pending and unscored
        let judgement = judge
            .judge(JudgeRequest {
                submitted_text: text.to_string(),
                prior_entries,
                categories: self.categories.as_ref().clone(),
            })
            .await?;

        let connection = classify_connection(&judgement.links, &authors, player_id);
        let roll = roll_band()?;

        let result = self
            .orchestrator
            .evaluate(EvaluationPayload {
                session_id: session_id.to_string(),
                player_id: player_id.to_string(),
                entry_id: entry.id.clone(),
                plausibility_level: judgement.plausibility_level,
                ranked_categories: judgement.ranked_categories,
                connection,
                roll,
                band_variants: judgement.band_variants,
            })
            .await?;

        if let Some(evaluation) = &result.entry.evaluation {
            self.broadcaster
                .publish(
                    session_id,
                    ServerMessage::EntryScored {
                        entry_id: result.entry.id.clone(),
                        player_id: player_id.to_string(),
                        round_number: result.entry.round_number,
                        selected_band: evaluation.selected_band,
                        selected_variant_text: evaluation.selected_variant_text.clone(),
                        breakdown: result.breakdown,
                        new_total: result.new_total,
                        leaderboard: result.leaderboard.clone(),
                    },
                )
                .await;
        }

        Ok(result)
    }
}
