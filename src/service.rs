use std::sync::Arc;

use ulid::Ulid;

use crate::engine::{Engine, EngineError, NewReservation};
use crate::identity::{Identity, IdentityVerifier, Role};
use crate::model::{Ms, Reservation};

#[derive(Debug)]
pub enum ServiceError {
    Unauthenticated,
    MissingCapability(Role),
    Engine(EngineError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Unauthenticated => f.write_str("unauthenticated"),
            ServiceError::MissingCapability(role) => write!(f, "requires role {role:?}"),
            ServiceError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        ServiceError::Engine(e)
    }
}

/// Booking request as a transport would decode it; the holder comes from the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub venue_id: String,
    pub unit: u32,
    pub start: Ms,
    pub hours: i64,
}

/// Caller-facing operations: verify the token once, check capabilities,
/// then hand the verified user id to the engine.
pub struct ReservationService {
    engine: Arc<Engine>,
    verifier: Arc<dyn IdentityVerifier>,
}

impl ReservationService {
    pub fn new(engine: Arc<Engine>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { engine, verifier }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    async fn authenticate(&self, token: &str) -> Result<Identity, ServiceError> {
        self.verifier
            .verify(token)
            .await
            .map_err(|_| ServiceError::Unauthenticated)
    }

    async fn require(&self, token: &str, role: Role) -> Result<Identity, ServiceError> {
        let identity = self.authenticate(token).await?;
        if !identity.has_role(role) {
            return Err(ServiceError::MissingCapability(role));
        }
        Ok(identity)
    }

    pub async fn create_reservation(
        &self,
        token: &str,
        req: BookingRequest,
    ) -> Result<Reservation, ServiceError> {
        let identity = self.authenticate(token).await?;
        Ok(self
            .engine
            .create_reservation(NewReservation {
                venue_id: req.venue_id,
                unit: req.unit,
                holder_id: identity.user_id,
                start: req.start,
                hours: req.hours,
            })
            .await?)
    }

    pub async fn cancel_reservation(&self, token: &str, id: Ulid) -> Result<Reservation, ServiceError> {
        let identity = self.authenticate(token).await?;
        Ok(self.engine.cancel_reservation(id, &identity.user_id).await?)
    }

    /// The caller's active, not-yet-ended reservations by start.
    pub async fn list_my_reservations(&self, token: &str) -> Result<Vec<Reservation>, ServiceError> {
        let identity = self.authenticate(token).await?;
        Ok(self.engine.list_for_holder(&identity.user_id, true).await?)
    }

    pub async fn sweep_completions(&self, token: &str) -> Result<usize, ServiceError> {
        self.require(token, Role::Admin).await?;
        Ok(self.engine.sweep_completions().await?)
    }

    pub async fn sync_catalog(&self, token: &str) -> Result<usize, ServiceError> {
        self.require(token, Role::Admin).await?;
        Ok(self.engine.sync_catalog().await?)
    }
}
