//! In-process store with optional per-session JSON snapshots.
//!
//! With a data directory, every commit writes `<session_id>.json` (temp file,
//! then rename) before the new rows become visible in memory, so a failed
//! write leaves both disk and memory at the previous commit.

use super::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Schema version for snapshot files
/// Version 1: session, players, entries, transitions, round summaries
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// All rows belonging to one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRows {
    pub session: Session,
    /// Join order
    pub players: Vec<Player>,
    /// Keyed by ULID, so iteration is creation order
    pub entries: BTreeMap<EntryId, Entry>,
    pub transitions: Vec<PhaseTransitionRecord>,
    #[serde(default)]
    pub summaries: BTreeMap<u32, RoundSummary>,
}

impl SessionRows {
    fn new(session: Session) -> Self {
        Self {
            session,
            players: Vec::new(),
            entries: BTreeMap::new(),
            transitions: Vec::new(),
            summaries: BTreeMap::new(),
        }
    }
}

/// On-disk form of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshotFile {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub rows: SessionRows,
}

impl SessionSnapshotFile {
    pub fn new(rows: SessionRows) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            rows,
        }
    }

    /// Validate a snapshot before loading it
    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version > SNAPSHOT_SCHEMA_VERSION {
            return Err(format!(
                "Snapshot schema version {} is newer than supported version {}. \
                 Please update the server.",
                self.schema_version, SNAPSHOT_SCHEMA_VERSION
            ));
        }

        let session_id = &self.rows.session.id;
        for player in &self.rows.players {
            if &player.session_id != session_id {
                return Err(format!(
                    "Player '{}' references session '{}' but is stored under '{}'",
                    player.id, player.session_id, session_id
                ));
            }
        }

        for (entry_id, entry) in &self.rows.entries {
            if &entry.session_id != session_id {
                return Err(format!(
                    "Entry '{}' references session '{}' but is stored under '{}'",
                    entry_id, entry.session_id, session_id
                ));
            }
            if !self.rows.players.iter().any(|p| p.id == entry.player_id) {
                return Err(format!(
                    "Entry '{}' references player '{}' which doesn't exist",
                    entry_id, entry.player_id
                ));
            }
        }

        Ok(())
    }
}

type Shard = Arc<Mutex<SessionRows>>;

struct Inner {
    shards: RwLock<HashMap<SessionId, Shard>>,
    join_codes: RwLock<HashMap<String, SessionId>>,
    entry_owners: RwLock<HashMap<EntryId, SessionId>>,
    data_dir: Option<PathBuf>,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store (tests, throwaway servers)
    pub fn new() -> Self {
        Self::with_dir(None)
    }

    fn with_dir(data_dir: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                shards: RwLock::new(HashMap::new()),
                join_codes: RwLock::new(HashMap::new()),
                entry_owners: RwLock::new(HashMap::new()),
                data_dir,
            }),
        }
    }

    /// Durable store backed by `dir`; reloads every snapshot found there
    pub async fn open(dir: &Path) -> StoreResult<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let store = Self::with_dir(Some(dir.to_path_buf()));

        let mut read_dir = tokio::fs::read_dir(dir).await?;
        let mut loaded = 0usize;
        while let Some(dir_entry) = read_dir.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let raw = tokio::fs::read(&path).await?;
            let snapshot: SessionSnapshotFile = serde_json::from_slice(&raw)?;
            snapshot.validate().map_err(|e| {
                StoreError::InvalidSnapshot(format!("{}: {}", path.display(), e))
            })?;

            store.install(snapshot.rows).await;
            loaded += 1;
        }

        tracing::info!(sessions = loaded, dir = %dir.display(), "Loaded session snapshots");
        Ok(store)
    }

    async fn install(&self, rows: SessionRows) {
        let session_id = rows.session.id.clone();
        {
            let mut owners = self.inner.entry_owners.write().await;
            for entry_id in rows.entries.keys() {
                owners.insert(entry_id.clone(), session_id.clone());
            }
        }
        self.inner
            .join_codes
            .write()
            .await
            .insert(rows.session.join_code.clone(), session_id.clone());
        self.inner
            .shards
            .write()
            .await
            .insert(session_id, Arc::new(Mutex::new(rows)));
    }

    async fn shard(&self, session_id: &str) -> StoreResult<Shard> {
        self.inner
            .shards
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))
    }

    async fn read_rows<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&SessionRows) -> T + Send,
    ) -> StoreResult<T> {
        let shard = self.shard(session_id).await?;
        let rows = shard.lock().await;
        Ok(f(&rows))
    }
}

async fn write_snapshot(dir: &Path, rows: &SessionRows) -> StoreResult<()> {
    let snapshot = SessionSnapshotFile::new(rows.clone());
    let json = serde_json::to_vec_pretty(&snapshot)?;
    let path = dir.join(format!("{}.json", rows.session.id));
    let tmp = dir.join(format!("{}.json.tmp", rows.session.id));
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_session(&self, session: Session) -> StoreResult<()> {
        if self.inner.shards.read().await.contains_key(&session.id) {
            return Err(StoreError::SessionExists(session.id));
        }

        let mut join_codes = self.inner.join_codes.write().await;
        if join_codes.contains_key(&session.join_code) {
            return Err(StoreError::JoinCodeTaken(session.join_code));
        }

        let rows = SessionRows::new(session);
        if let Some(dir) = &self.inner.data_dir {
            write_snapshot(dir, &rows).await?;
        }

        join_codes.insert(rows.session.join_code.clone(), rows.session.id.clone());
        self.inner
            .shards
            .write()
            .await
            .insert(rows.session.id.clone(), Arc::new(Mutex::new(rows)));
        Ok(())
    }

    async fn begin(&self, session_id: &str) -> StoreResult<Box<dyn StoreTx>> {
        let shard = self.shard(session_id).await?;
        let guard = shard.lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            session_id: session_id.to_string(),
            guard: Some(guard),
            working,
            inserted_entries: Vec::new(),
            store: self.inner.clone(),
        }))
    }

    async fn session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        match self.read_rows(session_id, |rows| rows.session.clone()).await {
            Ok(session) => Ok(Some(session)),
            Err(StoreError::SessionNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn session_by_join_code(&self, join_code: &str) -> StoreResult<Option<Session>> {
        let session_id = self
            .inner
            .join_codes
            .read()
            .await
            .get(&join_code.to_uppercase())
            .cloned();
        match session_id {
            Some(id) => self.session(&id).await,
            None => Ok(None),
        }
    }

    async fn active_sessions(&self) -> StoreResult<Vec<Session>> {
        let shards: Vec<Shard> = self.inner.shards.read().await.values().cloned().collect();
        let mut active = Vec::new();
        for shard in shards {
            let rows = shard.lock().await;
            if rows.session.phase.is_timed() {
                active.push(rows.session.clone());
            }
        }
        Ok(active)
    }

    async fn leaderboard(&self, session_id: &str) -> StoreResult<Vec<LeaderboardEntry>> {
        self.read_rows(session_id, |rows| rank_players(&rows.players))
            .await
    }

    async fn players(&self, session_id: &str) -> StoreResult<Vec<Player>> {
        self.read_rows(session_id, |rows| rows.players.clone()).await
    }

    async fn entry(&self, entry_id: &str) -> StoreResult<Option<Entry>> {
        let owner = self.inner.entry_owners.read().await.get(entry_id).cloned();
        match owner {
            Some(session_id) => {
                self.read_rows(&session_id, |rows| rows.entries.get(entry_id).cloned())
                    .await
            }
            None => Ok(None),
        }
    }

    async fn recent_scored_entries(&self, session_id: &str, limit: usize) -> StoreResult<Vec<Entry>> {
        self.read_rows(session_id, |rows| {
            let mut scored: Vec<&Entry> = rows
                .entries
                .values()
                .filter(|e| e.status == EntryStatus::Scored)
                .collect();
            // Newest first; ids alone do not order entries created in the same millisecond
            scored.sort_by_key(|e| {
                std::cmp::Reverse((e.evaluation.as_ref().map(|ev| ev.scored_at), e.created_at))
            });
            scored.into_iter().take(limit).cloned().collect()
        })
        .await
    }

    async fn round_entries(&self, session_id: &str, round_number: u32) -> StoreResult<Vec<Entry>> {
        self.read_rows(session_id, |rows| {
            let mut entries: Vec<Entry> = rows
                .entries
                .values()
                .filter(|e| e.round_number == round_number)
                .cloned()
                .collect();
            entries.sort_by_key(|e| e.created_at);
            entries
        })
        .await
    }

    async fn transitions(&self, session_id: &str) -> StoreResult<Vec<PhaseTransitionRecord>> {
        self.read_rows(session_id, |rows| rows.transitions.clone())
            .await
    }

    async fn round_summary(&self, session_id: &str, round_number: u32) -> StoreResult<Option<RoundSummary>> {
        self.read_rows(session_id, |rows| rows.summaries.get(&round_number).cloned())
            .await
    }
}

pub struct MemoryTx {
    session_id: SessionId,
    guard: Option<OwnedMutexGuard<SessionRows>>,
    working: SessionRows,
    inserted_entries: Vec<EntryId>,
    store: Arc<Inner>,
}

impl MemoryTx {
    fn rows(&mut self) -> StoreResult<&mut SessionRows> {
        if self.guard.is_none() {
            return Err(StoreError::TransactionFinished);
        }
        Ok(&mut self.working)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn session(&mut self) -> StoreResult<Session> {
        Ok(self.rows()?.session.clone())
    }

    async fn update_session(&mut self, session: &Session) -> StoreResult<()> {
        let rows = self.rows()?;
        if session.id != rows.session.id {
            return Err(StoreError::Conflict(format!(
                "session {} cannot be written through a transaction on {}",
                session.id, rows.session.id
            )));
        }
        rows.session = session.clone();
        Ok(())
    }

    async fn append_transition(&mut self, record: PhaseTransitionRecord) -> StoreResult<()> {
        self.rows()?.transitions.push(record);
        Ok(())
    }

    async fn players(&mut self) -> StoreResult<Vec<Player>> {
        Ok(self.rows()?.players.clone())
    }

    async fn player(&mut self, player_id: &str) -> StoreResult<Option<Player>> {
        Ok(self
            .rows()?
            .players
            .iter()
            .find(|p| p.id == player_id)
            .cloned())
    }

    async fn insert_player(&mut self, player: Player) -> StoreResult<()> {
        let rows = self.rows()?;
        if player.session_id != rows.session.id {
            return Err(StoreError::Conflict(format!(
                "player {} belongs to session {}",
                player.id, player.session_id
            )));
        }
        if rows.players.iter().any(|p| p.id == player.id) {
            return Err(StoreError::Conflict(format!("player {} already exists", player.id)));
        }
        rows.players.push(player);
        Ok(())
    }

    async fn update_player(&mut self, player: &Player) -> StoreResult<()> {
        let rows = self.rows()?;
        let existing = rows
            .players
            .iter_mut()
            .find(|p| p.id == player.id)
            .ok_or_else(|| StoreError::Conflict(format!("player {} not found", player.id)))?;
        *existing = player.clone();
        Ok(())
    }

    async fn entry(&mut self, entry_id: &str) -> StoreResult<Option<Entry>> {
        Ok(self.rows()?.entries.get(entry_id).cloned())
    }

    async fn entry_owner(&mut self, entry_id: &str) -> StoreResult<Option<SessionId>> {
        if self.rows()?.entries.contains_key(entry_id) {
            return Ok(Some(self.session_id.clone()));
        }
        Ok(self.store.entry_owners.read().await.get(entry_id).cloned())
    }

    async fn insert_entry(&mut self, entry: Entry) -> StoreResult<()> {
        let rows = self.rows()?;
        if entry.session_id != rows.session.id {
            return Err(StoreError::Conflict(format!(
                "entry {} belongs to session {}",
                entry.id, entry.session_id
            )));
        }
        if rows.entries.contains_key(&entry.id) {
            return Err(StoreError::Conflict(format!("entry {} already exists", entry.id)));
        }
        let entry_id = entry.id.clone();
        rows.entries.insert(entry_id.clone(), entry);
        self.inserted_entries.push(entry_id);
        Ok(())
    }

    async fn update_entry(&mut self, entry: &Entry) -> StoreResult<()> {
        let rows = self.rows()?;
        let existing = rows
            .entries
            .get_mut(&entry.id)
            .ok_or_else(|| StoreError::Conflict(format!("entry {} not found", entry.id)))?;
        *existing = entry.clone();
        Ok(())
    }

    async fn upsert_round_summary(&mut self, summary: RoundSummary) -> StoreResult<()> {
        self.rows()?.summaries.insert(summary.round_number, summary);
        Ok(())
    }

    async fn leaderboard(&mut self) -> StoreResult<Vec<LeaderboardEntry>> {
        Ok(rank_players(&self.rows()?.players))
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let mut guard = self.guard.take().ok_or(StoreError::TransactionFinished)?;

        if let Some(dir) = &self.store.data_dir {
            // Dropping the guard on error leaves memory at the previous commit
            write_snapshot(dir, &self.working).await?;
        }

        *guard = self.working.clone();
        drop(guard);

        if !self.inserted_entries.is_empty() {
            let mut owners = self.store.entry_owners.write().await;
            for entry_id in self.inserted_entries.drain(..) {
                owners.insert(entry_id, self.session_id.clone());
            }
        }
        Ok(())
    }
}
