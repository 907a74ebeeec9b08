use super::{AppState, GameError};
use crate::protocol::{ServerMessage, SessionSnapshot};
use crate::store::StoreError;
use crate::types::*;
use rand::Rng;

/// Characters for join codes (no ambiguous 0/O, 1/I/L)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 5;
const MAX_CODE_ATTEMPTS: usize = 10;
pub const MAX_NAME_CHARS: usize = 32;

/// Generate a short human-typeable join code
fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..CODE_CHARS.len());
            CODE_CHARS[idx] as char
        })
        .collect()
}

impl AppState {
    /// Create a session in WAITING with a fresh join code
    pub async fn create_session(&self, config: Option<SessionConfig>) -> Result<Session, GameError> {
        let config = config.unwrap_or_else(|| self.config.session_defaults.clone());
        config.validate().map_err(GameError::InvalidConfig)?;

        for _ in 0..MAX_CODE_ATTEMPTS {
            let session = Session::new(generate_join_code(), config.clone());
            match self.store.create_session(session.clone()).await {
                Ok(()) => {
                    tracing::info!(
                        session_id = %session.id,
                        join_code = %session.join_code,
                        max_rounds = session.config.max_rounds,
                        "Session created"
                    );
                    return Ok(session);
                }
                Err(StoreError::JoinCodeTaken(code)) => {
                    tracing::debug!(code, "Join code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(GameError::JoinCodeExhausted)
    }

    /// Add a player to a session that has not started yet. The first player
    /// to join becomes host.
    pub async fn join_session(
        &self,
        join_code: &str,
        display_name: &str,
    ) -> Result<(Session, Player), GameError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(GameError::InvalidName("name must not be empty".to_string()));
        }
        if display_name.chars().count() > MAX_NAME_CHARS {
            return Err(GameError::InvalidName(format!(
                "name must be at most {} characters",
                MAX_NAME_CHARS
            )));
        }

        let join_code = join_code.trim().to_uppercase();
        let session = self
            .store
            .session_by_join_code(&join_code)
            .await?
            .ok_or_else(|| GameError::JoinCodeNotFound(join_code.clone()))?;

        let mut tx = self.store.begin(&session.id).await?;
        let session = tx.session().await?;
        if session.phase != Phase::Waiting {
            return Err(GameError::PhaseMismatch {
                expected: Phase::Waiting,
                actual: session.phase,
            });
        }

        let is_host = tx.players().await?.is_empty();
        let player = Player::new(&session.id, display_name.to_string(), is_host);
        tx.insert_player(player.clone()).await?;
        let leaderboard = tx.leaderboard().await?;
        tx.commit().await?;

        tracing::info!(
            session_id = %session.id,
            player_id = %player.id,
            is_host,
            "Player joined"
        );

        self.broadcaster
            .publish(
                &session.id,
                ServerMessage::State {
                    snapshot: SessionSnapshot::new(&session, leaderboard, chrono::Utc::now()),
                },
            )
            .await;

        Ok((session, player))
    }

    pub async fn get_player(&self, session_id: &str, player_id: &str) -> Result<Player, GameError> {
        self.store
            .players(session_id)
            .await?
            .into_iter()
            .find(|p| p.id == player_id)
            .ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))
    }

    /// Host starts round 1
    pub async fn start_game(&self, session_id: &str, player_id: &str) -> Result<Session, GameError> {
        let player = self.get_player(session_id, player_id).await?;
        if !player.is_host {
            return Err(GameError::NotHost("start the game"));
        }

        let clock = self.clocks.ensure_loop(session_id).await?;
        let session = clock.start().await?;
        Ok(session)
    }

    /// A timed session must always have a running clock. One can be missing
    /// after `stop`, a crashed clock task or a failed rehydration at boot.
    pub(crate) async fn ensure_clock(&self, session: &Session) {
        if !session.phase.is_timed() {
            return;
        }
        if let Err(e) = self.clocks.ensure_loop(&session.id).await {
            tracing::error!(session_id = %session.id, "Failed to resume phase clock: {}", e);
        }
    }

    /// Current view of a session
    pub async fn get_state(&self, session_id: &str) -> Result<SessionSnapshot, GameError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or_else(|| GameError::SessionNotFound(session_id.to_string()))?;
        self.ensure_clock(&session).await;
        let leaderboard = self.store.leaderboard(session_id).await?;
        Ok(SessionSnapshot::new(&session, leaderboard, chrono::Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::store::{MemoryStore, Store};
    use crate::testing::StubJudge;
    use std::sync::Arc;

    fn app() -> (AppState, MemoryStore) {
        let store = MemoryStore::new();
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(store.clone()),
            Some(Arc::new(StubJudge::default())),
        );
        (state, store)
    }

    #[test]
    fn test_join_code_alphabet() {
        for _ in 0..100 {
            let code = generate_join_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_CHARS.contains(&b)), "{code}");
        }
    }

    #[tokio::test]
    async fn test_create_session_defaults_and_validation() {
        let (state, _store) = app();
        let session = state.create_session(None).await.unwrap();
        assert_eq!(session.phase, Phase::Waiting);
        assert_eq!(session.current_round, 0);
        assert_eq!(session.config, SessionConfig::default());

        let bad = SessionConfig {
            max_rounds: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            state.create_session(Some(bad)).await,
            Err(GameError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_first_player_is_host() {
        let (state, _store) = app();
        let session = state.create_session(None).await.unwrap();

        let (_, host) = state
            .join_session(&session.join_code.to_lowercase(), " Ada ")
            .await
            .unwrap();
        let (_, guest) = state.join_session(&session.join_code, "Grace").await.unwrap();

        assert!(host.is_host);
        assert_eq!(host.display_name, "Ada");
        assert!(!guest.is_host);
    }

    #[tokio::test]
    async fn test_join_rejections() {
        let (state, _store) = app();
        let session = state.create_session(None).await.unwrap();

        assert!(matches!(
            state.join_session(&session.join_code, "   ").await,
            Err(GameError::InvalidName(_))
        ));
        assert!(matches!(
            state.join_session("ZZZZZ", "Ada").await,
            Err(GameError::JoinCodeNotFound(_))
        ));

        let (_, host) = state.join_session(&session.join_code, "Ada").await.unwrap();
        state.start_game(&session.id, &host.id).await.unwrap();
        assert!(matches!(
            state.join_session(&session.join_code, "Late").await,
            Err(GameError::PhaseMismatch { actual: Phase::Playing, .. })
        ));
        state.clocks.stop_all().await;
    }

    #[tokio::test]
    async fn test_only_host_starts() {
        let (state, store) = app();
        let session = state.create_session(None).await.unwrap();
        let (_, host) = state.join_session(&session.join_code, "Ada").await.unwrap();
        let (_, guest) = state.join_session(&session.join_code, "Grace").await.unwrap();

        assert!(matches!(
            state.start_game(&session.id, &guest.id).await,
            Err(GameError::NotHost(_))
        ));

        let started = state.start_game(&session.id, &host.id).await.unwrap();
        assert_eq!(started.phase, Phase::Playing);
        assert_eq!(
            store.session(&session.id).await.unwrap().unwrap().phase,
            Phase::Playing
        );

        assert!(matches!(
            state.start_game(&session.id, &host.id).await,
            Err(GameError::PhaseMismatch { .. })
        ));

        let snapshot = state.get_state(&session.id).await.unwrap();
        assert_eq!(snapshot.current_round, 1);
        assert_eq!(snapshot.leaderboard.len(), 2);
        assert!(snapshot.in_game_time.is_some());
        state.clocks.stop_all().await;
    }

    #[tokio::test]
    async fn test_get_state_unknown_session() {
        let (state, _store) = app();
        assert!(matches!(
            state.get_state("missing").await,
            Err(GameError::SessionNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_state_resumes_evicted_clock() {
        let (state, _store) = app();
        let session = state.create_session(None).await.unwrap();
        let (_, host) = state.join_session(&session.join_code, "Ada").await.unwrap();
        state.start_game(&session.id, &host.id).await.unwrap();

        state.clocks.stop(&session.id).await;
        assert_eq!(state.clocks.live_count().await, 0);

        let snapshot = state.get_state(&session.id).await.unwrap();
        assert_eq!(snapshot.phase, Phase::Playing);
        assert_eq!(state.clocks.live_count().await, 1);

        tokio::time::sleep(std::time::Duration::from_secs(5 * 60 + 1)).await;
        assert_eq!(state.get_state(&session.id).await.unwrap().phase, Phase::Break);
        state.clocks.stop_all().await;
    }

    #[tokio::test]
    async fn test_waiting_session_gets_no_clock() {
        let (state, _store) = app();
        let session = state.create_session(None).await.unwrap();
        state.get_state(&session.id).await.unwrap();
        assert_eq!(state.clocks.live_count().await, 0);
    }
}
