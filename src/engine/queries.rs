use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.ledger.get(id)
    }

    /// Active reservations on a unit, any time range, ordered by start.
    /// Read under the unit's lock so the view matches what a concurrent
    /// conflict check would see.
    pub async fn list_active(&self, venue_id: &str, unit: u32) -> Result<Vec<Reservation>, EngineError> {
        let key = ResourceKey::new(venue_id, unit);
        let Some(rs) = self.registry.get(&key) else {
            return Ok(vec![]);
        };
        let guard = rs.read().await;
        Ok(guard
            .active
            .iter()
            .filter_map(|slot| self.ledger.get(&slot.id))
            .collect())
    }

    /// A holder's reservations ordered by start. With `only_active_future_ending`
    /// set this is the "my upcoming bookings" view: active and not yet ended.
    pub async fn list_for_holder(
        &self,
        holder_id: &str,
        only_active_future_ending: bool,
    ) -> Result<Vec<Reservation>, EngineError> {
        let now = self.clock.now_ms();
        Ok(self
            .ledger
            .list_for_holder(holder_id, only_active_future_ending, now))
    }

    pub async fn get_resource(&self, venue_id: &str, unit: u32) -> Result<Resource, EngineError> {
        let key = ResourceKey::new(venue_id, unit);
        let rs = self
            .registry
            .get(&key)
            .ok_or(EngineError::ResourceNotFound(key))?;
        let guard = rs.read().await;
        Ok(guard.resource.clone())
    }

    /// Units of one venue with their cached availability, by unit number.
    pub async fn list_venue_resources(&self, venue_id: &str) -> Vec<Resource> {
        let mut out = Vec::new();
        for key in self.registry.venue_keys(venue_id) {
            if let Some(rs) = self.registry.get(&key) {
                out.push(rs.read().await.resource.clone());
            }
        }
        out
    }

    pub async fn list_resources(&self) -> Vec<Resource> {
        let mut out = Vec::new();
        for key in self.registry.keys() {
            if let Some(rs) = self.registry.get(&key) {
                out.push(rs.read().await.resource.clone());
            }
        }
        out
    }

    /// Units of a venue whose cached flag says they are free right now.
    pub async fn free_units(&self, venue_id: &str) -> usize {
        self.list_venue_resources(venue_id)
            .await
            .iter()
            .filter(|r| r.available)
            .count()
    }

    pub fn reservation_count(&self) -> usize {
        self.ledger.len()
    }

    pub fn resource_count(&self) -> usize {
        self.registry.len()
    }
}
