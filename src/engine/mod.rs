mod conflict;
mod error;
mod ledger;
mod mutations;
mod queries;
mod registry;
#[cfg(test)]
mod tests;

pub use conflict::{Verdict, detect_conflict};
pub use error::{EngineError, ErrorKind};
pub use mutations::NewReservation;

pub(crate) use ledger::Ledger;
pub(crate) use registry::{Registry, SharedResourceState};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{error, warn};

use crate::catalog::{CatalogError, VenueCatalog};
use crate::clock::Clock;
use crate::limits::{APPEND_RETRY_BACKOFF_MS, MAX_APPEND_ATTEMPTS};
use crate::model::*;
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
    Shutdown {
        response: oneshot::Sender<io::Result<()>>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let pending = match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }
                commit_batch(&mut wal, &mut batch);
                pending
            }
            other => Some(other),
        };
        if let Some(cmd) = pending
            && !handle_non_append(&mut wal, cmd)
        {
            break;
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        // Every sender is about to hear Err, so none of the batch may
        // survive in the file, synced or not.
        if let Err(e) = wal.rollback() {
            error!("WAL rollback after failed batch failed: {e}");
        }
    }
    result
}

/// Returns false when the writer should stop.
fn handle_non_append(wal: &mut Wal, cmd: WalCommand) -> bool {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
            true
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
            true
        }
        WalCommand::Shutdown { response } => {
            let _ = response.send(wal.flush_sync());
            false
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation engine: registry, ledger and the durable log they are
/// rebuilt from. Construct once at startup and share behind an `Arc`.
pub struct Engine {
    pub(super) registry: Registry,
    pub(super) ledger: Ledger,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) catalog: Arc<dyn VenueCatalog>,
    pub(super) clock: Arc<dyn Clock>,
    /// Serializes resource registration.
    pub(super) admission: Mutex<()>,
}

/// Apply a reservation event to its resource (caller holds the lock).
/// Idempotent, so a record duplicated by a retried append replays cleanly.
fn apply_to_resource(rs: &mut ResourceState, event: &Event, ledger: &Ledger) {
    match event {
        Event::ReservationCreated { reservation } => {
            if ledger.insert(reservation.clone()) && reservation.is_active() {
                rs.insert_slot(Slot {
                    id: reservation.id,
                    span: reservation.span,
                });
            }
        }
        Event::ReservationCancelled { id, .. } => {
            rs.remove_slot(*id);
            if let Err(e) = ledger.mark_status(id, ReservationStatus::Cancelled) {
                tracing::debug!("cancel of {id} not applied: {e}");
            }
        }
        Event::ReservationCompleted { id, .. } => {
            rs.remove_slot(*id);
            if let Err(e) = ledger.mark_status(id, ReservationStatus::Completed) {
                tracing::debug!("completion of {id} not applied: {e}");
            }
        }
        // Registration is handled at the registry level, not here
        Event::ResourceRegistered { .. } => {}
    }
}

pub(super) fn catalog_err(e: CatalogError) -> EngineError {
    EngineError::StorageFailure(e.to_string())
}

impl Engine {
    /// Replay the WAL at `wal_path`, start its writer, and derive every
    /// availability flag against `clock`. Must be called inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        catalog: Arc<dyn VenueCatalog>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            registry: Registry::new(),
            ledger: Ledger::new(),
            wal_tx,
            catalog,
            clock,
            admission: Mutex::new(()),
        };

        // We're the sole owner of these locks during replay, so try_write always
        // succeeds. Never block here: this may run inside an async context.
        for event in &events {
            match event {
                Event::ResourceRegistered { id, venue_id, unit, description } => {
                    let key = ResourceKey::new(venue_id.clone(), *unit);
                    if !engine.registry.contains(&key) {
                        engine
                            .registry
                            .insert(ResourceState::new(*id, key, description.clone()));
                    }
                }
                other => {
                    let Some(key) = engine.event_resource_key(other) else {
                        warn!("replay: skipping event for unknown reservation: {other:?}");
                        continue;
                    };
                    let Some(rs) = engine.registry.get(&key) else {
                        warn!("replay: skipping event for unregistered resource {key}");
                        continue;
                    };
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    apply_to_resource(&mut guard, other, &engine.ledger);
                }
            }
        }

        let now = engine.clock.now_ms();
        for key in engine.registry.keys() {
            if let Some(rs) = engine.registry.get(&key) {
                rs.try_write()
                    .expect("replay: uncontended write")
                    .refresh_availability(now);
            }
        }

        Ok(engine)
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    fn event_resource_key(&self, event: &Event) -> Option<ResourceKey> {
        match event {
            Event::ReservationCreated { reservation } => Some(reservation.key()),
            Event::ReservationCancelled { id, .. } | Event::ReservationCompleted { id, .. } => {
                self.ledger.get(id).map(|r| r.key())
            }
            Event::ResourceRegistered { venue_id, unit, .. } => {
                Some(ResourceKey::new(venue_id.clone(), *unit))
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageFailure(e.to_string()))
    }

    /// Durable append with bounded retries. Nothing is applied in memory
    /// until this returns Ok, so a failed attempt has committed nothing.
    pub(super) async fn wal_append_with_retry(&self, event: &Event) -> Result<(), EngineError> {
        let mut attempt = 1;
        loop {
            match self.wal_append(event).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_APPEND_ATTEMPTS => {
                    warn!(attempt, "WAL append failed, retrying: {e}");
                    metrics::counter!(crate::observability::WAL_APPEND_RETRIES_TOTAL).increment(1);
                    tokio::time::sleep(Duration::from_millis(
                        APPEND_RETRY_BACKOFF_MS * u64::from(attempt),
                    ))
                    .await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempt, "WAL append failed, giving up: {e}");
                    return Err(e);
                }
            }
        }
    }

    /// WAL-append + apply in one call. Caller holds the resource's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append_with_retry(event).await?;
        apply_to_resource(rs, event, &self.ledger);
        Ok(())
    }

    /// Flush and stop the WAL writer. Every later mutation fails with a storage failure.
    pub async fn close(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Shutdown { response: tx })
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageFailure(e.to_string()))
    }
}
