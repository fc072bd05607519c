//! Custom-rewrite drafts: an immediate local cache plus a per-unit debounced save.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::join_all;
use shared::domain::{SessionId, UnitId};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

use crate::services::DraftPersistence;

#[derive(Debug, Default)]
pub struct DraftCache {
    drafts: HashMap<UnitId, String>,
}

impl DraftCache {
    /// The latest text for `unit_id`, or `""` when nothing was typed yet.
    pub fn get(&self, unit_id: UnitId) -> &str {
        self.drafts.get(&unit_id).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, unit_id: UnitId, text: impl Into<String>) {
        self.drafts.insert(unit_id, text.into());
    }
}

struct PendingSave {
    session_id: SessionId,
    text: String,
    generation: u64,
    timer: JoinHandle<()>,
}

type PendingSaves = Arc<Mutex<HashMap<UnitId, PendingSave>>>;

/// Pushes drafts to the persistence collaborator after `delay` of inactivity.
///
/// At most one timer exists per unit: every schedule aborts the previous timer for
/// that unit. Flushing aborts the timer and saves right away.
pub struct DraftDebouncer {
    delay: Duration,
    persistence: Arc<dyn DraftPersistence>,
    pending: PendingSaves,
    generation: AtomicU64,
}

impl DraftDebouncer {
    pub fn new(delay: Duration, persistence: Arc<dyn DraftPersistence>) -> Self {
        Self {
            delay,
            persistence,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn schedule(&self, session_id: SessionId, unit_id: UnitId, text: String) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.remove(&unit_id) {
            previous.timer.abort();
        }

        let timer = {
            let pending = Arc::clone(&self.pending);
            let persistence = Arc::clone(&self.persistence);
            let delay = self.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let due = {
                    let mut guard = pending.lock().await;
                    match guard.get(&unit_id) {
                        Some(entry) if entry.generation == generation => guard.remove(&unit_id),
                        _ => None,
                    }
                };
                if let Some(entry) = due {
                    persist(persistence.as_ref(), entry.session_id, unit_id, &entry.text).await;
                }
            })
        };

        pending.insert(
            unit_id,
            PendingSave {
                session_id,
                text,
                generation,
                timer,
            },
        );
    }

    /// Save the pending draft for `unit_id` now. Returns whether anything was pending.
    pub async fn flush(&self, unit_id: UnitId) -> bool {
        let entry = self.pending.lock().await.remove(&unit_id);
        let Some(entry) = entry else {
            return false;
        };
        entry.timer.abort();
        debug!(unit_id = unit_id.0, "drafts: flushing pending save");
        persist(
            self.persistence.as_ref(),
            entry.session_id,
            unit_id,
            &entry.text,
        )
        .await;
        true
    }

    /// Save every pending draft now; used on teardown and session restart.
    pub async fn flush_all(&self) -> usize {
        let entries = {
            let mut guard = self.pending.lock().await;
            guard.drain().collect::<Vec<_>>()
        };
        let count = entries.len();
        let persistence = self.persistence.as_ref();
        join_all(entries.into_iter().map(|(unit_id, entry)| async move {
            entry.timer.abort();
            persist(persistence, entry.session_id, unit_id, &entry.text).await;
        }))
        .await;
        count
    }

    pub async fn has_pending(&self, unit_id: UnitId) -> bool {
        self.pending.lock().await.contains_key(&unit_id)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Drop for DraftDebouncer {
    fn drop(&mut self) {
        let Ok(mut guard) = self.pending.try_lock() else {
            return;
        };
        let entries = guard.drain().collect::<Vec<_>>();
        if entries.is_empty() {
            return;
        }
        for (_, entry) in &entries {
            entry.timer.abort();
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let persistence = Arc::clone(&self.persistence);
                handle.spawn(async move {
                    for (unit_id, entry) in entries {
                        persist(persistence.as_ref(), entry.session_id, unit_id, &entry.text)
                            .await;
                    }
                });
            }
            Err(_) => {
                warn!(
                    pending = entries.len(),
                    "drafts: dropped pending saves; tokio runtime is not active"
                );
            }
        }
    }
}

async fn persist(
    persistence: &dyn DraftPersistence,
    session_id: SessionId,
    unit_id: UnitId,
    text: &str,
) {
    if let Err(err) = persistence.save_draft(session_id, unit_id, text).await {
        warn!(
            session_id = session_id.0,
            unit_id = unit_id.0,
            error = %err,
            "drafts: failed to persist draft"
        );
    }
}

#[cfg(test)]
#[path = "tests/drafts_tests.rs"]
mod tests;
