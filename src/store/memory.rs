use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::validate::{validate_batch, validate_event, validate_update};
use super::{CatalogueStore, DEFAULT_CATALOGUE_DESCRIPTION};
use crate::error::StoreError;
use crate::model::{Catalogue, CatalogueEvent, EventUpdate, IMPORT_SOURCE, ImportRun};

#[derive(Default)]
struct State {
    catalogues: HashMap<String, Catalogue>,
    /// Keyed by event id.
    events: HashMap<String, CatalogueEvent>,
    runs: Vec<ImportRun>,
    invalidations: Vec<String>,
}

impl State {
    fn find(&self, catalogue_id: &str, source_id: &str) -> Option<&CatalogueEvent> {
        self.events
            .values()
            .find(|e| e.catalogue_id == catalogue_id && e.source_id == source_id)
    }
}

/// In-process store for tests and `--memory` runs.
///
/// Holds the same guarantees as the database: validation before write,
/// all-or-nothing bulk inserts, one event per `(catalogue_id, source_id)`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events in `catalogue_id`, ordered by event time.
    pub async fn events(&self, catalogue_id: &str) -> Vec<CatalogueEvent> {
        let state = self.state.lock().await;
        let mut events: Vec<_> = state
            .events
            .values()
            .filter(|e| e.catalogue_id == catalogue_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.source_id.cmp(&b.source_id)));
        events
    }

    pub async fn catalogues(&self) -> Vec<Catalogue> {
        self.state.lock().await.catalogues.values().cloned().collect()
    }

    /// Catalogue ids passed to `invalidate_cache`, in call order.
    pub async fn invalidations(&self) -> Vec<String> {
        self.state.lock().await.invalidations.clone()
    }
}

#[async_trait]
impl CatalogueStore for MemoryStore {
    async fn find_event_by_source_id(
        &self,
        catalogue_id: &str,
        source_id: &str,
    ) -> Result<Option<CatalogueEvent>, StoreError> {
        Ok(self.state.lock().await.find(catalogue_id, source_id).cloned())
    }

    async fn find_events_by_source_ids(
        &self,
        catalogue_id: &str,
        source_ids: &[String],
    ) -> Result<HashMap<String, CatalogueEvent>, StoreError> {
        let wanted: HashSet<&str> = source_ids.iter().map(String::as_str).collect();
        let state = self.state.lock().await;
        Ok(state
            .events
            .values()
            .filter(|e| e.catalogue_id == catalogue_id && wanted.contains(e.source_id.as_str()))
            .map(|e| (e.source_id.clone(), e.clone()))
            .collect())
    }

    async fn bulk_insert_events(&self, events: &[CatalogueEvent]) -> Result<(), StoreError> {
        validate_batch(events, Utc::now())?;

        let mut state = self.state.lock().await;
        let mut seen = HashSet::new();
        for event in events {
            let key = (event.catalogue_id.as_str(), event.source_id.as_str());
            if !seen.insert(key) || state.find(key.0, key.1).is_some() {
                return Err(StoreError::Duplicate {
                    catalogue_id: event.catalogue_id.clone(),
                    source_id: event.source_id.clone(),
                });
            }
            if !state.catalogues.contains_key(&event.catalogue_id) {
                return Err(StoreError::NotFound(format!(
                    "catalogue {}",
                    event.catalogue_id
                )));
            }
        }
        for event in events {
            state.events.insert(event.id.clone(), event.clone());
        }
        Ok(())
    }

    async fn update_event(&self, id: &str, update: &EventUpdate) -> Result<(), StoreError> {
        let now = Utc::now();
        validate_update(id, update, now)?;

        let mut state = self.state.lock().await;
        let event = state
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("event {id}")))?;
        let mut updated = event.clone();
        updated.apply(update);
        validate_event(&updated, now)?;
        *event = updated;
        Ok(())
    }

    async fn get_or_create_catalogue(
        &self,
        id: Option<&str>,
        name: &str,
    ) -> Result<Catalogue, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = id.and_then(|id| state.catalogues.get(id)) {
            return Ok(existing.clone());
        }

        let catalogue = Catalogue {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: DEFAULT_CATALOGUE_DESCRIPTION.to_string(),
            source: IMPORT_SOURCE.to_string(),
            created_at: Utc::now(),
        };
        state.catalogues.insert(catalogue.id.clone(), catalogue.clone());
        Ok(catalogue)
    }

    async fn record_import_run(&self, run: &ImportRun) -> Result<(), StoreError> {
        self.state.lock().await.runs.push(run.clone());
        Ok(())
    }

    async fn invalidate_cache(&self, catalogue_id: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .invalidations
            .push(catalogue_id.to_string());
        Ok(())
    }

    async fn list_import_runs(&self, catalogue_id: &str) -> Result<Vec<ImportRun>, StoreError> {
        let state = self.state.lock().await;
        let mut runs: Vec<_> = state
            .runs
            .iter()
            .filter(|r| r.catalogue_id == catalogue_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }
}
