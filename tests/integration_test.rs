use async_trait::async_trait;
use planetline::config::AppConfig;
use planetline::llm::{GenerateRequest, GenerateResponse, LlmJudge, LlmProvider, LlmResult, ResponseMetadata};
use planetline::protocol::{ClientMessage, ServerMessage};
use planetline::state::AppState;
use planetline::store::{MemoryStore, Store};
use planetline::types::{ConnectionKind, EntryStatus, Phase, SessionConfig, SummaryStatus};
use planetline::ws::handlers::{handle_message, Connection};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Provider that answers judge prompts with a fixed assessment and links to
/// the newest earlier entry listed in the prompt
struct ScriptedProvider {
    ranking: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            ranking: Mutex::new(vec!["mars".into(), "venus".into(), "earth".into()]),
        }
    }

    fn rank(&self, categories: [&str; 3]) {
        *self.ranking.lock().unwrap() = categories.iter().map(|c| c.to_string()).collect();
    }
}

fn newest_prior_entry(prompt: &str) -> Option<String> {
    let section = prompt.split("Earlier entries:").nth(1)?;
    let line = section.lines().find(|l| l.starts_with("- ["))?;
    let end = line.find(']')?;
    Some(line[3..end].to_string())
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let text = if request.json_mode {
            let ranking = self.ranking.lock().unwrap().clone();
            json!({
                "plausibility_level": 4,
                "plausibility_label": "LIKELY",
                "categories": ranking,
                "links": [
                    {"entry_id": newest_prior_entry(&request.prompt), "strength": "STRONG"},
                    {"entry_id": null, "strength": "WEAK"},
                    {"entry_id": null, "strength": "WEAK"}
                ],
                "variants": ["It fails", "It stalls", "It happens", "It thrives", "It changes everything"]
            })
            .to_string()
        } else {
            "The planets argued and history moved on.".to_string()
        };

        Ok(GenerateResponse {
            text,
            metadata: ResponseMetadata {
                provider: "scripted".to_string(),
                model: "scripted".to_string(),
                tokens_used: None,
                latency_ms: 0,
            },
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct Table {
    state: Arc<AppState>,
    store: MemoryStore,
    provider: Arc<ScriptedProvider>,
    host: Connection,
    guest: Connection,
    room: broadcast::Receiver<ServerMessage>,
}

async fn table(max_rounds: u32) -> Table {
    let store = MemoryStore::new();
    let provider = Arc::new(ScriptedProvider::new());
    let judge = LlmJudge::new(provider.clone(), Duration::from_secs(30), 800);
    let state = Arc::new(AppState::new(
        AppConfig::default(),
        Arc::new(store.clone()),
        Some(Arc::new(judge)),
    ));

    let session = state
        .create_session(Some(SessionConfig {
            max_rounds,
            ..SessionConfig::default()
        }))
        .await
        .unwrap();
    let (_, host) = state.join_session(&session.join_code, "Ada").await.unwrap();
    let (_, guest) = state.join_session(&session.join_code, "Grace").await.unwrap();
    let room = state.broadcaster.subscribe(&session.id).await;

    let conn = |p: planetline::types::Player| Connection {
        session_id: session.id.clone(),
        player_id: p.id,
        is_host: p.is_host,
    };
    Table {
        host: conn(host),
        guest: conn(guest),
        state,
        store,
        provider,
        room,
    }
}

async fn submit(table: &Table, conn: &Connection, text: &str) -> ServerMessage {
    handle_message(
        ClientMessage::SubmitEntry {
            text: text.to_string(),
        },
        conn,
        &table.state,
    )
    .await
    .expect("submissions always get a reply")
}

fn drain(room: &mut broadcast::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(msg) = room.try_recv() {
        messages.push(msg);
    }
    messages
}

/// End-to-end game: two players, two rounds, automatic phase changes
#[tokio::test(start_paused = true)]
async fn test_full_game_flow() {
    let mut table = table(2).await;
    let session_id = table.host.session_id.clone();

    // Guests cannot start the game
    match handle_message(ClientMessage::StartGame, &table.guest, &table.state).await {
        Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "UNAUTHORIZED"),
        other => panic!("expected UNAUTHORIZED, got {other:?}"),
    }
    assert!(handle_message(ClientMessage::StartGame, &table.host, &table.state)
        .await
        .is_none());

    // Round 1: host writes first, guest builds on it
    let host_first = submit(&table, &table.host, "Mars declares a four-day week").await;
    let host_entry = match host_first {
        ServerMessage::EntryAccepted { entry_id, .. } => entry_id,
        other => panic!("expected EntryAccepted, got {other:?}"),
    };
    match submit(&table, &table.host, "And a five-day weekend").await {
        ServerMessage::Error { code, .. } => assert_eq!(code, "COOLDOWN"),
        other => panic!("expected COOLDOWN, got {other:?}"),
    }
    assert!(matches!(
        submit(&table, &table.guest, "Venus copies the Martian week").await,
        ServerMessage::EntryAccepted { .. }
    ));

    let round_one = table.store.round_entries(&session_id, 1).await.unwrap();
    assert_eq!(round_one.len(), 2);
    for entry in &round_one {
        assert_eq!(entry.status, EntryStatus::Scored);
        let evaluation = entry.evaluation.as_ref().unwrap();
        assert_eq!(evaluation.plausibility_level, 4);
        assert_eq!(evaluation.breakdown.baseline, 10);
        assert_eq!(evaluation.breakdown.plausibility, 1);
        let expected = if entry.id == host_entry {
            ConnectionKind::None
        } else {
            ConnectionKind::Others
        };
        assert_eq!(evaluation.connection, expected);
        assert!(evaluation
            .band_variants
            .contains(&evaluation.selected_variant_text));
    }

    let messages = drain(&mut table.room);
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::PhaseChanged { from: Phase::Waiting, .. })));
    assert_eq!(
        messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::EntryScored { .. }))
            .count(),
        2
    );

    // Play window closes: BREAK plus a round summary
    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    let snapshot = table.state.get_state(&session_id).await.unwrap();
    assert_eq!(snapshot.phase, Phase::Break);
    assert_eq!(snapshot.current_round, 1);
    match submit(&table, &table.guest, "Too late").await {
        ServerMessage::Error { code, .. } => assert_eq!(code, "PHASE_MISMATCH"),
        other => panic!("expected PHASE_MISMATCH, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    let summary = table.store.round_summary(&session_id, 1).await.unwrap().unwrap();
    assert_eq!(summary.status, SummaryStatus::Completed);
    assert_eq!(
        summary.text.as_deref(),
        Some("The planets argued and history moved on.")
    );
    let messages = drain(&mut table.room);
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::SummaryStatus {
            status: SummaryStatus::Completed,
            ..
        }
    )));

    // Round 2: the host aims for their priority planet
    tokio::time::sleep(Duration::from_secs(60)).await;
    let snapshot = table.state.get_state(&session_id).await.unwrap();
    assert_eq!(snapshot.phase, Phase::Playing);
    assert_eq!(snapshot.current_round, 2);

    let host_before = table.state.get_player(&session_id, &table.host.player_id).await.unwrap();
    let planet_state = &host_before.planet_state;
    let priority = planet_state["current_priority"].as_str().unwrap().to_string();
    let others: Vec<&str> = ["mercury", "venus", "earth", "mars"]
        .into_iter()
        .filter(|c| *c != priority)
        .take(2)
        .collect();
    table.provider.rank([priority.as_str(), others[0], others[1]]);

    match submit(&table, &table.host, "Jupiter lends Mars its moons").await {
        ServerMessage::EntryAccepted {
            priority_matched,
            next_priority,
            ..
        } => {
            assert!(priority_matched);
            assert_ne!(next_priority.as_deref(), Some(priority.as_str()));
        }
        other => panic!("expected EntryAccepted, got {other:?}"),
    }
    let host_after = table.state.get_player(&session_id, &table.host.player_id).await.unwrap();
    // baseline + near-target plausibility + link to Grace's entry + bonus
    assert_eq!(host_after.total_score - host_before.total_score, 10 + 1 + 3 + 15);

    // Last play window ends the game without another break
    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    let snapshot = table.state.get_state(&session_id).await.unwrap();
    assert_eq!(snapshot.phase, Phase::Finished);
    // The finished game's clock has exited and been dropped
    assert_eq!(table.state.clocks.live_count().await, 0);

    let phases: Vec<Phase> = table
        .store
        .transitions(&session_id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.to_phase)
        .collect();
    assert_eq!(
        phases,
        [Phase::Playing, Phase::Break, Phase::Playing, Phase::Finished]
    );

    match handle_message(ClientMessage::GetState, &table.guest, &table.state).await {
        Some(ServerMessage::State { snapshot }) => {
            assert_eq!(snapshot.leaderboard.len(), 2);
            assert_eq!(snapshot.leaderboard[0].player_id, table.host.player_id);
            assert!(snapshot.leaderboard[0].total_score >= snapshot.leaderboard[1].total_score);
        }
        other => panic!("expected State, got {other:?}"),
    }

    table.state.clocks.stop_all().await;
}

/// A restarted server picks up a running game from its snapshot directory
#[tokio::test(start_paused = true)]
async fn test_game_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let session_id;
    {
        let store = MemoryStore::open(dir.path()).await.unwrap();
        let state = AppState::new(AppConfig::default(), Arc::new(store), None);
        let session = state.create_session(None).await.unwrap();
        let (_, host) = state.join_session(&session.join_code, "Ada").await.unwrap();
        state.start_game(&session.id, &host.id).await.unwrap();
        state.clocks.stop_all().await;
        session_id = session.id;
    }

    let store = MemoryStore::open(dir.path()).await.unwrap();
    let state = AppState::new(AppConfig::default(), Arc::new(store.clone()), None);
    assert_eq!(state.clocks.rehydrate_active().await.unwrap(), 1);
    assert_eq!(
        state.get_state(&session_id).await.unwrap().phase,
        Phase::Playing
    );

    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    let row = store.session(&session_id).await.unwrap().unwrap();
    assert_eq!(row.phase, Phase::Break);

    // No judge: the summary reports an error instead of blocking the game
    tokio::time::sleep(Duration::from_secs(1)).await;
    let summary = store.round_summary(&session_id, 1).await.unwrap().unwrap();
    assert_eq!(summary.status, SummaryStatus::Error);

    state.clocks.stop_all().await;
}
