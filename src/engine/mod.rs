mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod transitions;

pub use conflict::{has_conflict, Clock, ManualClock, SystemClock};
pub use error::{EngineError, ErrorKind};
pub use store::{InMemoryStore, ReservationStore};
pub use transitions::{TransitionRule, TRANSITIONS};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use tracing::{error, warn};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::rating::{NoopRatings, RatingSink};
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that are already queued when the first one arrives
/// are written together and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Commit what we have before compacting or reporting.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    // Every caller in the batch rolls back on error, so none of its frames
    // may survive on disk.
    let mark = wal.mark();
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        error!(events = batch.len(), "WAL commit failed: {e}");
        if let Err(e) = wal.rollback_to(mark) {
            error!("WAL rollback after failed commit also failed: {e}");
        }
    }

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Pluggable collaborators. Defaults are the in-memory store, the system
/// clock and a rating sink that stores nothing.
pub struct Collaborators {
    pub store: Arc<dyn ReservationStore>,
    pub clock: Arc<dyn Clock>,
    pub ratings: Arc<dyn RatingSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            clock: Arc::new(SystemClock),
            ratings: Arc::new(NoopRatings),
        }
    }
}

/// Booking lifecycle engine for one tenant.
pub struct Engine {
    pub(super) store: Arc<dyn ReservationStore>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) ratings: Arc<dyn RatingSink>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Serializes mutations per tool.
    tool_locks: DashMap<ToolId, Arc<Mutex<()>>>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot and the WAL swap see the same state.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply a WAL event to the store. Returns false if the event did not fit
/// the current state (duplicate id, stale source status).
pub(super) fn apply_event(store: &dyn ReservationStore, event: &Event) -> bool {
    match event {
        Event::ToolRegistered { id, owner_id, title } => store.insert_tool(ToolInfo {
            id: *id,
            owner_id: *owner_id,
            title: title.clone(),
        }),
        Event::ToolRemoved { id } => store.remove_tool(id).is_some(),
        Event::ReservationCreated {
            id,
            tool_id,
            requester_id,
            owner_id,
            span,
            contact,
            comment,
            created_at,
        } => store
            .insert(Reservation {
                id: *id,
                tool_id: *tool_id,
                requester_id: *requester_id,
                owner_id: *owner_id,
                span: *span,
                status: ReservationStatus::Pending,
                contact: contact.clone(),
                comment: comment.clone(),
                created_at: *created_at,
                updated_at: *created_at,
            })
            .is_some(),
        Event::StatusChanged { id, from, to, at, .. } => {
            store.compare_and_set_status(id, *from, *to, *at)
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_collaborators(wal_path, notify, Collaborators::default())
    }

    pub fn with_collaborators(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        parts: Collaborators,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        for event in &events {
            if !apply_event(parts.store.as_ref(), event) {
                warn!(?event, "replay: event does not apply to current state, skipped");
            }
        }

        Ok(Self {
            store: parts.store,
            clock: parts.clock,
            ratings: parts.ratings,
            wal_tx,
            notify,
            tool_locks: DashMap::new(),
            compaction_gate: RwLock::new(()),
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Lock a tool's mutations. A guard only counts if its mutex is still
    /// the one in the map once acquired; `forget_tool_lock` may have swapped
    /// it out while this caller waited.
    pub(super) async fn lock_tool(&self, tool_id: ToolId) -> OwnedMutexGuard<()> {
        loop {
            let lock = self.tool_locks.entry(tool_id).or_default().value().clone();
            let guard = lock.clone().lock_owned().await;
            let current = self
                .tool_locks
                .get(&tool_id)
                .is_some_and(|entry| Arc::ptr_eq(entry.value(), &lock));
            if current {
                return guard;
            }
        }
    }

    /// Lock a tool that must already be registered. Unknown ids never get a
    /// map entry.
    pub(super) async fn lock_registered_tool(
        &self,
        tool_id: ToolId,
    ) -> Result<(OwnedMutexGuard<()>, ToolInfo), EngineError> {
        if self.store.find_tool(&tool_id).is_none() {
            return Err(EngineError::NotFound(tool_id));
        }
        let guard = self.lock_tool(tool_id).await;
        match self.store.find_tool(&tool_id) {
            Some(tool) => Ok((guard, tool)),
            None => {
                // Removed while we waited.
                self.forget_tool_lock(tool_id);
                Err(EngineError::NotFound(tool_id))
            }
        }
    }

    /// Drop the lock entry of a tool that no longer exists. Call with the
    /// tool's guard held.
    pub(super) fn forget_tool_lock(&self, tool_id: ToolId) {
        self.tool_locks.remove(&tool_id);
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }
}
