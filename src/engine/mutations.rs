use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, price, reservation_window};
use super::{Engine, EngineError, ErrorKind, SharedResourceState, WalCommand, catalog_err};

/// A reservation request as it reaches the engine: the holder is already verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub venue_id: String,
    pub unit: u32,
    pub holder_id: String,
    pub start: Ms,
    pub hours: i64,
}

fn record_outcome<T>(op: &'static str, result: &Result<T, EngineError>) {
    match result {
        Ok(_) => {
            metrics::counter!(crate::observability::RESERVATION_OPS_TOTAL, "op" => op, "status" => "ok")
                .increment(1);
        }
        Err(e) => {
            metrics::counter!(crate::observability::RESERVATION_OPS_TOTAL, "op" => op, "status" => e.label())
                .increment(1);
            match e.kind() {
                ErrorKind::Storage => tracing::error!("{op} failed: {e}"),
                _ => debug!("{op} rejected: {e}"),
            }
        }
    }
}

impl Engine {
    /// Book `hours` whole hours on a unit starting at `start`.
    ///
    /// The conflict scan and the durable append happen under the unit's write
    /// lock, so of any set of overlapping concurrent requests exactly one commits.
    pub async fn create_reservation(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        let started = std::time::Instant::now();
        let result = self.try_create(req).await;
        metrics::histogram!(crate::observability::CREATE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        record_outcome("create", &result);
        result
    }

    async fn try_create(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        let span = reservation_window(req.start, req.hours)?;
        if req.holder_id.is_empty() || req.holder_id.len() > MAX_HOLDER_ID_LEN {
            return Err(EngineError::LimitExceeded("holder id length"));
        }
        let key = ResourceKey::new(req.venue_id, req.unit);

        let rs = self.admit_resource(&key).await?;
        let rate = self
            .catalog
            .hourly_rate(&key.venue_id)
            .await
            .map_err(catalog_err)?
            .ok_or_else(|| EngineError::VenueNotFound(key.venue_id.clone()))?;
        let total_price = price(req.hours, rate)?;

        let mut guard = rs.write().await;
        check_no_conflict(&guard, &span)?;

        let now = self.clock.now_ms();
        let reservation = Reservation {
            id: Ulid::new(),
            venue_id: key.venue_id.clone(),
            unit: key.unit,
            holder_id: req.holder_id,
            span,
            total_price,
            status: ReservationStatus::Active,
            created_at: now,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        // Re-derive rather than set: an earlier booking may have started
        // since the last mutation on this unit.
        let available = guard.refresh_availability(now);
        info!(
            reservation = %reservation.id,
            resource = %key,
            holder = %reservation.holder_id,
            available,
            "reservation created [{}, {})",
            span.start,
            span.end
        );
        Ok(reservation)
    }

    /// Cancel an active reservation on behalf of its holder, no later than one
    /// hour before it starts. Returns the cancelled record.
    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        requester_id: &str,
    ) -> Result<Reservation, EngineError> {
        let result = self.try_cancel(id, requester_id).await;
        record_outcome("cancel", &result);
        result
    }

    async fn try_cancel(&self, id: Ulid, requester_id: &str) -> Result<Reservation, EngineError> {
        let key = self.ledger.get(&id).ok_or(EngineError::NotFound(id))?.key();
        let rs = self.registry.get(&key).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        // Re-read under the lock: a concurrent cancel or sweep may have won.
        let current = self.ledger.get(&id).ok_or(EngineError::NotFound(id))?;
        if current.holder_id != requester_id {
            return Err(EngineError::Forbidden(id));
        }
        self.ledger.check_transition(&id, ReservationStatus::Cancelled)?;
        let now = self.clock.now_ms();
        if current.span.start - now < CANCEL_LEAD_MS {
            return Err(EngineError::TooLateToCancel {
                id,
                start: current.span.start,
            });
        }

        let event = Event::ReservationCancelled { id, at: now };
        self.persist_and_apply(&mut guard, &event).await?;
        let available = guard.refresh_availability(now);
        info!(reservation = %id, resource = %key, available, "reservation cancelled");

        self.ledger.get(&id).ok_or(EngineError::NotFound(id))
    }

    /// Mark every active reservation whose end has passed as completed, and
    /// re-derive every resource's availability flag. Returns how many
    /// reservations were completed. Resources settle independently; the first
    /// storage failure is reported after all of them have been visited.
    pub async fn sweep_completions(&self) -> Result<usize, EngineError> {
        let keys = self.registry.keys();
        let results =
            futures::future::join_all(keys.iter().map(|key| self.settle_resource(key))).await;

        let mut completed = 0usize;
        let mut first_err = None;
        for result in results {
            match result {
                Ok(n) => completed += n,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        if completed > 0 {
            metrics::counter!(crate::observability::RESERVATIONS_COMPLETED_TOTAL)
                .increment(completed as u64);
        }
        let result = match first_err {
            Some(e) => Err(e),
            None => Ok(completed),
        };
        record_outcome("sweep", &result);
        result
    }

    async fn settle_resource(&self, key: &ResourceKey) -> Result<usize, EngineError> {
        let Some(rs) = self.registry.get(key) else {
            return Ok(0);
        };
        let mut guard = rs.write().await;
        let now = self.clock.now_ms();
        let finished: Vec<Ulid> = guard
            .active
            .iter()
            .filter(|slot| slot.span.end <= now)
            .map(|slot| slot.id)
            .collect();

        let mut completed = 0;
        let mut outcome = Ok(());
        for id in finished {
            let event = Event::ReservationCompleted { id, at: now };
            if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
                outcome = Err(e);
                break;
            }
            completed += 1;
        }
        guard.refresh_availability(now);
        if completed > 0 {
            debug!(resource = %key, completed, "reservations completed");
        }
        outcome.map(|()| completed)
    }

    /// Register a unit, or return the existing entry. Returns whether it was new.
    pub async fn register_resource(
        &self,
        key: ResourceKey,
        description: Option<String>,
    ) -> Result<(SharedResourceState, bool), EngineError> {
        let _admission = self.admission.lock().await;
        if let Some(rs) = self.registry.get(&key) {
            return Ok((rs, false));
        }
        if key.venue_id.is_empty() || key.venue_id.len() > MAX_VENUE_ID_LEN {
            return Err(EngineError::LimitExceeded("venue id length"));
        }
        if description.as_ref().is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        if self.registry.venue_unit_count(&key.venue_id) >= MAX_UNITS_PER_VENUE {
            return Err(EngineError::LimitExceeded("too many units in venue"));
        }

        let id = Ulid::new();
        let event = Event::ResourceRegistered {
            id,
            venue_id: key.venue_id.clone(),
            unit: key.unit,
            description: description.clone(),
        };
        self.wal_append_with_retry(&event).await?;
        let shared = self.registry.insert(ResourceState::new(id, key.clone(), description));
        metrics::gauge!(crate::observability::RESOURCES_REGISTERED).set(self.registry.len() as f64);
        info!(resource = %key, %id, "resource registered");
        Ok((shared, true))
    }

    /// Registry lookup, falling back to the catalog for units not seen yet.
    pub(super) async fn admit_resource(
        &self,
        key: &ResourceKey,
    ) -> Result<SharedResourceState, EngineError> {
        if let Some(rs) = self.registry.get(key) {
            return Ok(rs);
        }
        let unit = self
            .catalog
            .resource(&key.venue_id, key.unit)
            .await
            .map_err(catalog_err)?
            .ok_or_else(|| EngineError::ResourceNotFound(key.clone()))?;
        let (rs, _) = self.register_resource(key.clone(), unit.description).await?;
        Ok(rs)
    }

    /// Register every unit the catalog lists. Returns how many were new.
    pub async fn sync_catalog(&self) -> Result<usize, EngineError> {
        let venues = self.catalog.venues().await.map_err(catalog_err)?;
        let mut added = 0;
        for venue in venues {
            for unit in venue.units {
                let key = ResourceKey::new(venue.id.clone(), unit.unit);
                let (_, new) = self.register_resource(key, unit.description).await?;
                if new {
                    added += 1;
                }
            }
        }
        info!(added, total = self.registry.len(), "catalog synced");
        Ok(added)
    }

    /// Rewrite the WAL as a snapshot of the current registry and ledger.
    ///
    /// Every resource is read-locked (in key order) and admission is held until
    /// the snapshot has replaced the log, so no commit can land in the old file
    /// after the snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _admission = self.admission.lock().await;
        let mut guards = Vec::new();
        let mut events = Vec::new();
        for key in self.registry.keys() {
            let Some(rs) = self.registry.get(&key) else { continue };
            let guard = rs.read_owned().await;
            events.push(Event::ResourceRegistered {
                id: guard.resource.id,
                venue_id: key.venue_id.clone(),
                unit: key.unit,
                description: guard.resource.description.clone(),
            });
            for reservation in self.ledger.for_resource(&key) {
                events.push(Event::ReservationCreated { reservation });
            }
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageFailure(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
