use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Every reservation ever made, by id, plus holder and resource indexes.
/// Records are status-transitioned, never removed.
///
/// Writes happen only while the owning resource's lock is held, so the
/// per-resource view is always consistent with that resource's active set.
pub struct Ledger {
    records: DashMap<Ulid, Reservation>,
    by_holder: DashMap<String, Vec<Ulid>>,
    by_resource: DashMap<ResourceKey, Vec<Ulid>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            by_holder: DashMap::new(),
            by_resource: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, id: &Ulid) -> Option<Reservation> {
        self.records.get(id).map(|e| e.value().clone())
    }

    /// Record a reservation. Returns false (and changes nothing) if the id is
    /// already present, which makes replaying a duplicated WAL record harmless.
    pub fn insert(&self, reservation: Reservation) -> bool {
        if self.records.contains_key(&reservation.id) {
            return false;
        }
        self.by_holder
            .entry(reservation.holder_id.clone())
            .or_default()
            .push(reservation.id);
        self.by_resource
            .entry(reservation.key())
            .or_default()
            .push(reservation.id);
        self.records.insert(reservation.id, reservation);
        true
    }

    /// Validate a status change without applying it.
    pub fn check_transition(
        &self,
        id: &Ulid,
        next: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let current = self.get(id).ok_or(EngineError::NotFound(*id))?;
        if !current.status.can_transition_to(next) {
            return Err(EngineError::AlreadyFinal {
                id: *id,
                status: current.status,
            });
        }
        Ok(current)
    }

    pub fn mark_status(
        &self,
        id: &Ulid,
        next: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let mut entry = self.records.get_mut(id).ok_or(EngineError::NotFound(*id))?;
        if !entry.status.can_transition_to(next) {
            return Err(EngineError::AlreadyFinal {
                id: *id,
                status: entry.status,
            });
        }
        entry.status = next;
        Ok(entry.clone())
    }

    /// Every reservation ever made on one resource, in insertion order.
    pub fn for_resource(&self, key: &ResourceKey) -> Vec<Reservation> {
        let ids = self
            .by_resource
            .get(key)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// A holder's reservations by start ascending. With `only_active_future_ending`
    /// set, keeps only active reservations whose end is after `now`.
    pub fn list_for_holder(
        &self,
        holder_id: &str,
        only_active_future_ending: bool,
        now: Ms,
    ) -> Vec<Reservation> {
        let ids = self
            .by_holder
            .get(holder_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out: Vec<Reservation> = ids
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|r| !only_active_future_ending || (r.is_active() && r.span.end > now))
            .collect();
        out.sort_by_key(|r| (r.span.start, r.id));
        out
    }
}
