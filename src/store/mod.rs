//! Catalogue persistence.
//!
//! The importer only talks to `CatalogueStore`; `MemoryStore` backs tests
//! and dry runs, `PgStore` is the production PostgreSQL backend. Both
//! enforce the same range validation and the `(catalogue_id, source_id)`
//! dedup key.

pub mod memory;
pub mod pg;
pub mod validate;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Catalogue, CatalogueEvent, EventUpdate, ImportRun};

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Description given to catalogues the importer creates.
pub const DEFAULT_CATALOGUE_DESCRIPTION: &str = "Events imported from the GeoNet FDSN event service";

#[async_trait]
pub trait CatalogueStore: Send + Sync {
    async fn find_event_by_source_id(
        &self,
        catalogue_id: &str,
        source_id: &str,
    ) -> Result<Option<CatalogueEvent>, StoreError>;

    /// Existing events for `source_ids`, keyed by source id. Ids with no
    /// stored event are absent from the map.
    async fn find_events_by_source_ids(
        &self,
        catalogue_id: &str,
        source_ids: &[String],
    ) -> Result<HashMap<String, CatalogueEvent>, StoreError> {
        let mut found = HashMap::new();
        for source_id in source_ids {
            if let Some(event) = self.find_event_by_source_id(catalogue_id, source_id).await? {
                found.insert(source_id.clone(), event);
            }
        }
        Ok(found)
    }

    /// Insert every event or none of them. Each event is validated first
    /// and the first invalid one rejects the batch.
    async fn bulk_insert_events(&self, events: &[CatalogueEvent]) -> Result<(), StoreError>;

    async fn update_event(&self, id: &str, update: &EventUpdate) -> Result<(), StoreError>;

    /// Return the catalogue `id` names if it exists, otherwise create a new
    /// one called `name`.
    async fn get_or_create_catalogue(
        &self,
        id: Option<&str>,
        name: &str,
    ) -> Result<Catalogue, StoreError>;

    async fn record_import_run(&self, run: &ImportRun) -> Result<(), StoreError>;

    /// Drop anything cached for `catalogue_id`. Callers treat failure as
    /// non-fatal.
    async fn invalidate_cache(&self, catalogue_id: &str) -> Result<(), StoreError>;

    /// Recorded runs for a catalogue, oldest first.
    async fn list_import_runs(&self, catalogue_id: &str) -> Result<Vec<ImportRun>, StoreError>;
}
