use super::{spawn_clock, ClockContext, ClockError, ClockHandle};
use crate::types::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct LiveClock {
    handle: ClockHandle,
    /// Completes after the clock task ended and its slot was cleared
    task: JoinHandle<()>,
}

/// Per-session slot. Hydration happens under the slot's own lock so a slow
/// store load for one session never blocks lookups for another.
type Slot = Arc<Mutex<Option<LiveClock>>>;
type Slots = Arc<Mutex<HashMap<SessionId, Slot>>>;

/// At most one live clock per session
pub struct SessionClockRegistry {
    ctx: ClockContext,
    clocks: Slots,
}

impl SessionClockRegistry {
    pub fn new(ctx: ClockContext) -> Self {
        Self {
            ctx,
            clocks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn context(&self) -> &ClockContext {
        &self.ctx
    }

    /// Running clock for a session, hydrating one from the store if needed
    pub async fn ensure_loop(&self, session_id: &str) -> Result<ClockHandle, ClockError> {
        loop {
            let slot = self
                .clocks
                .lock()
                .await
                .entry(session_id.to_string())
                .or_default()
                .clone();
            let mut live = slot.lock().await;

            // The slot may have been evicted while we waited for it
            if !is_current(&self.clocks, session_id, &slot).await {
                continue;
            }

            if let Some(current) = live.as_ref() {
                if current.handle.is_alive() {
                    return Ok(current.handle.clone());
                }
                tracing::warn!(session_id, "Phase clock died, rehydrating");
            }

            let (handle, task) = match spawn_clock(self.ctx.clone(), session_id).await {
                Ok(spawned) => spawned,
                Err(e) => {
                    if live.is_none() {
                        evict(&self.clocks, session_id, &slot).await;
                    }
                    return Err(e);
                }
            };

            let task = tokio::spawn(reap(
                self.clocks.clone(),
                session_id.to_string(),
                slot.clone(),
                handle.clone(),
                task,
            ));
            *live = Some(LiveClock {
                handle: handle.clone(),
                task,
            });
            return Ok(handle);
        }
    }

    /// Cancel the session's timer and forget the clock. The next
    /// `ensure_loop` reloads from the store.
    pub async fn stop(&self, session_id: &str) {
        let slot = self.clocks.lock().await.remove(session_id);
        let Some(slot) = slot else {
            return;
        };
        let live = slot.lock().await.take();
        if let Some(live) = live {
            shutdown(live).await;
        }
    }

    pub async fn stop_all(&self) {
        let slots: Vec<Slot> = self.clocks.lock().await.drain().map(|(_, s)| s).collect();
        let mut drained = Vec::new();
        for slot in slots {
            if let Some(live) = slot.lock().await.take() {
                drained.push(live);
            }
        }
        let count = drained.len();
        futures::future::join_all(drained.into_iter().map(shutdown)).await;
        tracing::info!(count, "All phase clocks stopped");
    }

    /// Start clocks for every session that was mid-game when the process
    /// went down
    pub async fn rehydrate_active(&self) -> Result<usize, ClockError> {
        let sessions = self.ctx.store.active_sessions().await?;
        let mut started = 0;
        for session in sessions {
            match self.ensure_loop(&session.id).await {
                Ok(_) => started += 1,
                Err(e) => tracing::error!(session_id = %session.id, "Failed to rehydrate clock: {}", e),
            }
        }
        tracing::info!(sessions = started, "Rehydrated phase clocks");
        Ok(started)
    }

    pub async fn live_count(&self) -> usize {
        let slots: Vec<Slot> = self.clocks.lock().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.as_ref().is_some_and(|c| c.handle.is_alive()) {
                count += 1;
            }
        }
        count
    }

    /// Sessions with a registry entry, live or not
    pub async fn tracked_count(&self) -> usize {
        self.clocks.lock().await.len()
    }
}

async fn is_current(clocks: &Slots, session_id: &str, slot: &Slot) -> bool {
    clocks
        .lock()
        .await
        .get(session_id)
        .is_some_and(|s| Arc::ptr_eq(s, slot))
}

async fn evict(clocks: &Slots, session_id: &str, slot: &Slot) {
    let mut clocks = clocks.lock().await;
    if clocks.get(session_id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
        clocks.remove(session_id);
    }
}

/// Wait for a clock task to end, then drop its registry entry unless a newer
/// clock already took the slot
async fn reap(clocks: Slots, session_id: SessionId, slot: Slot, handle: ClockHandle, task: JoinHandle<()>) {
    if let Err(e) = task.await {
        tracing::error!(session_id, "Phase clock task failed: {}", e);
    }

    let mut live = slot.lock().await;
    let ours = live.as_ref().is_some_and(|c| c.handle.same_clock(&handle));
    if ours {
        // Dropping our own JoinHandle only detaches it
        *live = None;
    }
    if live.is_none() {
        evict(&clocks, &session_id, &slot).await;
        tracing::debug!(session_id, "Phase clock evicted");
    }
}

async fn shutdown(live: LiveClock) {
    live.handle.stop().await;
    if let Err(e) = live.task.await {
        tracing::error!(session_id = live.handle.session_id(), "Phase clock reaper failed: {}", e);
    }
}
