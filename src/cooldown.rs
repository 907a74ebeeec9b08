//! Per-(session, player) submission cooldown.
//!
//! Admission control only: a reservation is taken before the judge is called
//! and handed back if the submission fails before it is scored.

use crate::types::{PlayerId, SessionId};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio::time::Instant;

type CooldownKey = (SessionId, PlayerId);

/// Proof of an acquired slot, needed to release it again
#[derive(Debug)]
pub struct CooldownReservation {
    key: CooldownKey,
    previous: Option<Instant>,
    acquired_at: Instant,
}

#[derive(Debug, Clone)]
pub struct SubmissionCooldown {
    /// Last accepted submission per (session, player)
    last_submission: Arc<RwLock<HashMap<CooldownKey, Instant>>>,
    window: Duration,
}

impl SubmissionCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            last_submission: Arc::new(RwLock::new(HashMap::new())),
            window,
        }
    }

    /// Reserve the player's slot, or return how long they still have to wait
    pub async fn try_acquire(
        &self,
        session_id: &str,
        player_id: &str,
    ) -> Result<CooldownReservation, Duration> {
        let now = Instant::now();
        let key = (session_id.to_string(), player_id.to_string());
        let mut last_submission = self.last_submission.write().await;

        let previous = last_submission.get(&key).copied();
        if let Some(last) = previous {
            let elapsed = now.duration_since(last);
            if elapsed < self.window {
                return Err(self.window - elapsed);
            }
        }

        last_submission.insert(key.clone(), now);
        Ok(CooldownReservation {
            key,
            previous,
            acquired_at: now,
        })
    }

    /// Undo a reservation whose submission never got scored
    pub async fn release(&self, reservation: CooldownReservation) {
        let mut last_submission = self.last_submission.write().await;
        if last_submission.get(&reservation.key) != Some(&reservation.acquired_at) {
            return;
        }
        match reservation.previous {
            Some(previous) => {
                last_submission.insert(reservation.key, previous);
            }
            None => {
                last_submission.remove(&reservation.key);
            }
        }
    }

    /// Drop keys whose window has passed (call periodically)
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut last_submission = self.last_submission.write().await;
        last_submission.retain(|_, last| now.duration_since(*last) < self.window);
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.last_submission.read().await.len()
    }
}
