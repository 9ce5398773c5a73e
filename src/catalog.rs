use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::Money;

/// A venue as published by the catalog. `advertised_free_units` is
/// informational and never used for booking decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub hourly_rate: Money,
    #[serde(default)]
    pub advertised_free_units: u32,
    #[serde(default)]
    pub units: Vec<CatalogUnit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogUnit {
    pub unit: u32,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogError(pub String);

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "catalog error: {}", self.0)
    }
}

impl std::error::Error for CatalogError {}

/// Read-only view of venues and their units. `Ok(None)` means "does not exist";
/// `Err` means the catalog could not be asked.
#[async_trait]
pub trait VenueCatalog: Send + Sync {
    async fn hourly_rate(&self, venue_id: &str) -> Result<Option<Money>, CatalogError>;

    async fn resource(&self, venue_id: &str, unit: u32) -> Result<Option<CatalogUnit>, CatalogError>;

    async fn venues(&self) -> Result<Vec<Venue>, CatalogError>;
}

#[derive(Debug, Default, Deserialize)]
struct CatalogDocument {
    venues: Vec<Venue>,
}

/// In-process catalog, loaded once from a JSON document.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    venues: BTreeMap<String, Venue>,
}

impl StaticCatalog {
    pub fn new(venues: impl IntoIterator<Item = Venue>) -> Self {
        Self {
            venues: venues.into_iter().map(|v| (v.id.clone(), v)).collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let doc: CatalogDocument =
            serde_json::from_str(json).map_err(|e| CatalogError(e.to_string()))?;
        Ok(Self::new(doc.venues))
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CatalogError(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }
}

#[async_trait]
impl VenueCatalog for StaticCatalog {
    async fn hourly_rate(&self, venue_id: &str) -> Result<Option<Money>, CatalogError> {
        Ok(self.venues.get(venue_id).map(|v| v.hourly_rate))
    }

    async fn resource(&self, venue_id: &str, unit: u32) -> Result<Option<CatalogUnit>, CatalogError> {
        Ok(self
            .venues
            .get(venue_id)
            .and_then(|v| v.units.iter().find(|u| u.unit == unit).cloned()))
    }

    async fn venues(&self) -> Result<Vec<Venue>, CatalogError> {
        Ok(self.venues.values().cloned().collect())
    }
}
