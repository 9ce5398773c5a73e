use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;

/// Hourly rate and prices, in minor currency units.
pub type Money = u64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// A workstation is addressed by its venue and its unit number within that venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub venue_id: String,
    pub unit: u32,
}

impl ResourceKey {
    pub fn new(venue_id: impl Into<String>, unit: u32) -> Self {
        Self {
            venue_id: venue_id.into(),
            unit,
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.venue_id, self.unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn is_final(self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    /// Only active → cancelled and active → completed are legal.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Active, ReservationStatus::Cancelled)
                | (ReservationStatus::Active, ReservationStatus::Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub venue_id: String,
    pub unit: u32,
    pub holder_id: String,
    pub span: Span,
    pub total_price: Money,
    pub status: ReservationStatus,
    pub created_at: Ms,
}

impl Reservation {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.venue_id.clone(), self.unit)
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}

/// A bookable unit as the registry knows it. `available` is a cache of
/// "no active reservation covers now", never a conflict source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: Ulid,
    pub venue_id: String,
    pub unit: u32,
    pub description: Option<String>,
    pub available: bool,
}

/// Entry in a resource's active set, ordered by start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    /// Active reservations only, sorted by `span.start`.
    pub active: Vec<Slot>,
}

impl ResourceState {
    pub fn new(id: Ulid, key: ResourceKey, description: Option<String>) -> Self {
        Self {
            resource: Resource {
                id,
                venue_id: key.venue_id,
                unit: key.unit,
                description,
                available: true,
            },
            active: Vec::new(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource.venue_id.clone(), self.resource.unit)
    }

    /// Insert slot maintaining sort order by span.start.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .active
            .binary_search_by_key(&slot.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.active.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<Slot> {
        if let Some(pos) = self.active.iter().position(|s| s.id == id) {
            Some(self.active.remove(pos))
        } else {
            None
        }
    }

    /// Return only slots whose span overlaps the query window.
    /// Uses binary search to skip slots starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Slot> {
        let right_bound = self.active.partition_point(|s| s.span.start < query.end);
        self.active[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }

    pub fn occupied_at(&self, now: Ms) -> bool {
        self.active.iter().any(|s| s.span.contains_instant(now))
    }

    pub fn set_availability(&mut self, available: bool) {
        self.resource.available = available;
    }

    /// Re-derive the availability flag from the active set. Returns the new value.
    pub fn refresh_availability(&mut self, now: Ms) -> bool {
        let available = !self.occupied_at(now);
        self.set_availability(available);
        available
    }
}

/// WAL record format. One variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        id: Ulid,
        venue_id: String,
        unit: u32,
        description: Option<String>,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationCancelled {
        id: Ulid,
        at: Ms,
    },
    ReservationCompleted {
        id: Ulid,
        at: Ms,
    },
}
