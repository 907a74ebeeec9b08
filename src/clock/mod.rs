//! Per-session phase clock.
//!
//! Each active session gets one actor task that owns the cached session row
//! and a single deadline. Timer firings and start commands are handled on that
//! task one at a time, so there is never a second timer for the same session.

mod registry;
mod summary;

pub use registry::SessionClockRegistry;
pub use summary::generate_round_summary;

use crate::broadcast::Broadcaster;
use crate::llm::Judge;
use crate::protocol::{ServerMessage, SessionSnapshot};
use crate::scoring::planets::PlanetTallyState;
use crate::store::{Store, StoreError};
use crate::types::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Delay before retrying a transition whose commit failed
pub const COMMIT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("session is {actual:?}, expected {expected:?}")]
    InvalidPhase { expected: Phase, actual: Phase },

    #[error("clock for session {0} has stopped")]
    Stopped(SessionId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: Phase,
    pub round: u32,
}

/// Automatic transition out of a timed phase; `None` for WAITING and FINISHED
pub fn next_transition(phase: Phase, round: u32, max_rounds: u32) -> Option<Transition> {
    match phase {
        Phase::Playing if round >= max_rounds => Some(Transition {
            to: Phase::Finished,
            round,
        }),
        Phase::Playing => Some(Transition {
            to: Phase::Break,
            round,
        }),
        Phase::Break if round >= max_rounds => Some(Transition {
            to: Phase::Finished,
            round,
        }),
        Phase::Break => Some(Transition {
            to: Phase::Playing,
            round: round + 1,
        }),
        Phase::Waiting | Phase::Finished => None,
    }
}

/// Collaborators shared by every clock
#[derive(Clone)]
pub struct ClockContext {
    pub store: Arc<dyn Store>,
    pub broadcaster: Broadcaster,
    pub judge: Option<Arc<dyn Judge>>,
    pub categories: Arc<Vec<CategoryId>>,
}

enum ClockCommand {
    Start {
        reply: oneshot::Sender<Result<Session, ClockError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Session>,
    },
    Stop,
}

/// Cheap handle for talking to a running clock
#[derive(Clone)]
pub struct ClockHandle {
    session_id: SessionId,
    tx: mpsc::Sender<ClockCommand>,
}

impl ClockHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// WAITING -> PLAYING, round 1
    pub async fn start(&self) -> Result<Session, ClockError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClockCommand::Start { reply }).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// The clock's cached session row
    pub async fn snapshot(&self) -> Result<Session, ClockError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClockCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| self.stopped())
    }

    pub(crate) fn same_clock(&self, other: &ClockHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    async fn stop(&self) {
        let _ = self.tx.send(ClockCommand::Stop).await;
    }

    async fn send(&self, cmd: ClockCommand) -> Result<(), ClockError> {
        self.tx.send(cmd).await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> ClockError {
        ClockError::Stopped(self.session_id.clone())
    }
}

struct SessionPhaseClock {
    ctx: ClockContext,
    session: Session,
    deadline: Option<Instant>,
}

/// Load the session row and spawn its clock task
pub(crate) async fn spawn_clock(
    ctx: ClockContext,
    session_id: &str,
) -> Result<(ClockHandle, tokio::task::JoinHandle<()>), ClockError> {
    let session = ctx
        .store
        .session(session_id)
        .await?
        .ok_or_else(|| ClockError::SessionNotFound(session_id.to_string()))?;

    let deadline = hydrate_deadline(&session);
    tracing::info!(
        session_id,
        phase = ?session.phase,
        round = session.current_round,
        scheduled = deadline.is_some(),
        "Phase clock hydrated"
    );

    let (tx, rx) = mpsc::channel(16);
    let clock = SessionPhaseClock {
        ctx,
        session,
        deadline,
    };
    let task = tokio::spawn(clock.run(rx));

    Ok((
        ClockHandle {
            session_id: session_id.to_string(),
            tx,
        },
        task,
    ))
}

/// Deadline for a freshly loaded row. An end time already in the past fires
/// right away.
fn hydrate_deadline(session: &Session) -> Option<Instant> {
    if !session.phase.is_timed() {
        return None;
    }
    let remaining = session
        .phase_ends_at
        .and_then(|ends_at| (ends_at - Utc::now()).to_std().ok())
        .unwrap_or(Duration::ZERO);
    Some(Instant::now() + remaining)
}

impl SessionPhaseClock {
    async fn run(mut self, mut rx: mpsc::Receiver<ClockCommand>) {
        loop {
            let deadline = self.deadline;
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(ClockCommand::Start { reply }) => {
                        let _ = reply.send(self.start().await);
                    }
                    Some(ClockCommand::Snapshot { reply }) => {
                        let _ = reply.send(self.session.clone());
                    }
                    Some(ClockCommand::Stop) | None => break,
                },
                _ = timer => self.on_deadline().await,
            }

            // Nothing left to schedule once the game is over
            if self.session.phase == Phase::Finished {
                break;
            }
        }

        tracing::debug!(session_id = %self.session.id, "Phase clock stopped");
    }

    async fn start(&mut self) -> Result<Session, ClockError> {
        if self.session.phase != Phase::Waiting {
            return Err(ClockError::InvalidPhase {
                expected: Phase::Waiting,
                actual: self.session.phase,
            });
        }

        self.transition(Transition {
            to: Phase::Playing,
            round: 1,
        })
        .await?;
        Ok(self.session.clone())
    }

    async fn on_deadline(&mut self) {
        let Some(next) = next_transition(
            self.session.phase,
            self.session.current_round,
            self.session.config.max_rounds,
        ) else {
            self.deadline = None;
            return;
        };

        if let Err(e) = self.transition(next).await {
            tracing::error!(
                session_id = %self.session.id,
                to = ?next.to,
                "Phase transition failed, retrying in {:?}: {}",
                COMMIT_RETRY_DELAY,
                e
            );
            self.deadline = Some(Instant::now() + COMMIT_RETRY_DELAY);
        }
    }

    /// Persist, then adopt, then announce. Nothing in memory changes unless
    /// the commit succeeds.
    async fn transition(&mut self, next: Transition) -> Result<(), ClockError> {
        let now = Utc::now();
        let from = self.session.phase;

        let mut updated = self.session.clone();
        updated.phase = next.to;
        updated.current_round = next.round;
        updated.phase_started_at = now;
        let duration = updated.config.phase_duration(next.to);
        updated.phase_ends_at = duration.map(|d| now + d);
        if next.to == Phase::Playing && updated.in_game_clock_anchor.is_none() {
            updated.in_game_clock_anchor = Some(now);
        }

        let mut tx = self.ctx.store.begin(&updated.id).await?;
        if from == Phase::Waiting {
            let fresh = PlanetTallyState::fresh(&self.ctx.categories).to_value();
            for mut player in tx.players().await? {
                player.planet_state = fresh.clone();
                tx.update_player(&player).await?;
            }
        }
        tx.update_session(&updated).await?;
        tx.append_transition(PhaseTransitionRecord {
            session_id: updated.id.clone(),
            from_phase: from,
            to_phase: next.to,
            round_number: next.round,
            timestamp: now,
        })
        .await?;
        let leaderboard = tx.leaderboard().await?;
        tx.commit().await?;

        self.session = updated;
        self.deadline = duration
            .and_then(|d| d.to_std().ok())
            .map(|d| Instant::now() + d);

        tracing::info!(
            session_id = %self.session.id,
            from = ?from,
            to = ?next.to,
            round = next.round,
            "Phase transition"
        );

        self.ctx
            .broadcaster
            .publish(
                &self.session.id,
                ServerMessage::PhaseChanged {
                    from,
                    snapshot: SessionSnapshot::new(&self.session, leaderboard, now),
                },
            )
            .await;

        if next.to == Phase::Finished {
            self.ctx.broadcaster.prune(&self.session.id).await;
        }

        if next.to == Phase::Break {
            let ctx = self.ctx.clone();
            let session_id = self.session.id.clone();
            let round = next.round;
            tokio::spawn(async move {
                generate_round_summary(&ctx, &session_id, round).await;
            });
        }

        Ok(())
    }
}
