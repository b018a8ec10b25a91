//! The import run.
//!
//! ```text
//! fetch → resolve catalogue → partition (new / update / skip)
//!       → enrich (bounded, best-effort) → persist → record run
//! ```
//!
//! Partitioning finishes before any enrichment fetch starts. A failed
//! primary fetch aborts the run; a failed write for one event is recorded
//! in `errors` and the rest carry on.

use std::collections::{HashMap, HashSet};
use std::slice;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::{ImportOptions, ImportResult};
use crate::config::ImportSettings;
use crate::ingest::FdsnClient;
use crate::limiter::ConcurrencyLimiter;
use crate::logging::{DataSource, log_fdsn_failure, log_import_summary};
use crate::model::{CatalogueEvent, EventUpdate, FocalMechanism, ImportRun, QuakeRow};
use crate::store::CatalogueStore;

#[derive(Debug, Clone, PartialEq)]
pub struct ImporterSettings {
    /// Events at or above this magnitude get a focal-mechanism lookup.
    pub enrichment_threshold: f64,
    pub enrichment_concurrency: usize,
    /// Name for a catalogue created when the caller gives none.
    pub default_catalogue_name: String,
}

impl Default for ImporterSettings {
    fn default() -> Self {
        ImporterSettings::from(&ImportSettings::default())
    }
}

impl From<&ImportSettings> for ImporterSettings {
    fn from(settings: &ImportSettings) -> Self {
        Self {
            enrichment_threshold: settings.enrichment_magnitude_threshold,
            enrichment_concurrency: settings.enrichment_concurrency,
            default_catalogue_name: settings.default_catalogue_name.clone(),
        }
    }
}

/// Fetched rows sorted against what the catalogue already holds.
#[derive(Debug, Default)]
struct Partition {
    new: Vec<QuakeRow>,
    /// Stored event id paired with the fresh upstream row.
    update: Vec<(String, QuakeRow)>,
    skipped: usize,
}

impl Partition {
    fn build(
        rows: Vec<QuakeRow>,
        existing: &HashMap<String, CatalogueEvent>,
        update_existing: bool,
    ) -> Self {
        let mut partition = Partition::default();
        let mut seen = HashSet::new();
        for row in rows {
            if !seen.insert(row.source_event_id.clone()) {
                tracing::debug!(
                    source = %DataSource::Pipeline,
                    event_id = %row.source_event_id,
                    "Repeated in batch, keeping first occurrence"
                );
                partition.skipped += 1;
                continue;
            }
            match existing.get(&row.source_event_id) {
                None => partition.new.push(row),
                Some(stored) if update_existing => partition.update.push((stored.id.clone(), row)),
                Some(_) => partition.skipped += 1,
            }
        }
        partition
    }

    fn enrichment_targets(&self, threshold: f64) -> Vec<&str> {
        self.new
            .iter()
            .chain(self.update.iter().map(|(_, row)| row))
            .filter(|row| row.qualifies_for_enrichment(threshold))
            .map(|row| row.source_event_id.as_str())
            .collect()
    }
}

pub struct Importer {
    client: FdsnClient,
    store: Arc<dyn CatalogueStore>,
    limiter: ConcurrencyLimiter,
    settings: ImporterSettings,
}

impl Importer {
    pub fn new(client: FdsnClient, store: Arc<dyn CatalogueStore>, settings: ImporterSettings) -> Self {
        Self {
            client,
            store,
            limiter: ConcurrencyLimiter::new(settings.enrichment_concurrency),
            settings,
        }
    }

    pub fn client(&self) -> &FdsnClient {
        &self.client
    }

    /// Run one import. Never fails: problems end up in `ImportResult::errors`.
    pub async fn import_events(&self, options: &ImportOptions) -> ImportResult {
        self.import_events_with_cancel(options, &CancellationToken::new())
            .await
    }

    /// As `import_events`; once `cancel` fires no further enrichment
    /// lookups start. Everything already fetched is still persisted.
    pub async fn import_events_with_cancel(
        &self,
        options: &ImportOptions,
        cancel: &CancellationToken,
    ) -> ImportResult {
        let timer = Instant::now();
        let started_at = Utc::now();
        let (start_time, end_time) = options.window.resolve(started_at);

        let mut result = ImportResult {
            start_time,
            end_time,
            ..ImportResult::default()
        };

        if let Err(message) = self.run(options, started_at, cancel, &mut result).await {
            result.aborted = true;
            result.errors.push(message);
        }
        result.success = result.errors.is_empty();
        result.duration_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX);

        log_import_summary(&result);
        result
    }

    /// `Err` aborts the run with that message; per-event problems are
    /// pushed onto `result.errors` instead.
    async fn run(
        &self,
        options: &ImportOptions,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
        result: &mut ImportResult,
    ) -> Result<(), String> {
        // 1. Fetch
        let query = options.to_query(result.start_time, result.end_time);
        let parsed = self.client.fetch_events(&query).await.map_err(|e| {
            log_fdsn_failure(None, "event query", &e);
            format!("fetch failed: {e}")
        })?;
        let dropped = parsed.skipped().count();
        let rows = parsed.into_events();
        result.total_fetched = rows.len();
        tracing::info!(
            source = %DataSource::Pipeline,
            fetched = rows.len(),
            dropped,
            start = %result.start_time,
            end = %result.end_time,
            "Fetched primary batch"
        );

        // 2. Resolve catalogue
        let name = options
            .catalogue_name
            .as_deref()
            .unwrap_or(&self.settings.default_catalogue_name);
        let catalogue = self
            .store
            .get_or_create_catalogue(options.catalogue_id.as_deref(), name)
            .await
            .map_err(|e| format!("catalogue lookup failed: {e}"))?;
        if let Some(requested) = &options.catalogue_id {
            if *requested != catalogue.id {
                tracing::warn!(
                    source = %DataSource::Pipeline,
                    requested = %requested,
                    created = %catalogue.id,
                    "Catalogue not found, created a new one"
                );
            }
        }
        result.catalogue_id = Some(catalogue.id.clone());
        result.catalogue_name = Some(catalogue.name.clone());

        // 3. Partition
        let mut source_ids: Vec<String> = rows.iter().map(|r| r.source_event_id.clone()).collect();
        source_ids.sort();
        source_ids.dedup();
        let existing = self
            .store
            .find_events_by_source_ids(&catalogue.id, &source_ids)
            .await
            .map_err(|e| format!("existence check failed: {e}"))?;
        let partition = Partition::build(rows, &existing, options.update_existing);
        result.skipped_events = partition.skipped;

        // 4. Enrich
        let mechanisms = self.enrich(&partition, cancel).await;

        // 5. Persist
        let now = Utc::now();
        let new_events: Vec<CatalogueEvent> = partition
            .new
            .iter()
            .map(|row| {
                CatalogueEvent::from_row(&catalogue.id, row, mechanisms.get(&row.source_event_id), now)
            })
            .collect();
        result.new_events = self.insert_new(&new_events, &mut result.errors).await;

        for (event_id, row) in &partition.update {
            let update = EventUpdate::from_row(row, mechanisms.get(&row.source_event_id), now);
            match self.store.update_event(event_id, &update).await {
                Ok(()) => result.updated_events += 1,
                Err(e) => {
                    tracing::warn!(source = %DataSource::Store, event_id = %row.source_event_id, error = %e, "Update failed");
                    result.errors.push(format!("update {}: {}", row.source_event_id, e));
                }
            }
        }

        if result.new_events + result.updated_events > 0 {
            if let Err(e) = self.store.invalidate_cache(&catalogue.id).await {
                tracing::warn!(source = %DataSource::Store, catalogue_id = %catalogue.id, error = %e, "Cache invalidation failed");
            }
        }

        // 6. Record
        let run = ImportRun {
            id: uuid::Uuid::new_v4().to_string(),
            catalogue_id: catalogue.id.clone(),
            start_time: result.start_time,
            end_time: result.end_time,
            started_at,
            finished_at: Utc::now(),
            total_fetched: result.total_fetched,
            new_count: result.new_events,
            updated_count: result.updated_events,
            skipped_count: result.skipped_events,
            errors: result.errors.clone(),
        };
        if let Err(e) = self.store.record_import_run(&run).await {
            tracing::error!(source = %DataSource::Store, error = %e, "Could not record import run");
            result.errors.push(format!("record import run: {e}"));
        }
        Ok(())
    }

    /// Focal mechanisms for qualifying events, keyed by source id. Lookup
    /// failures are logged and leave that event unenriched.
    async fn enrich(
        &self,
        partition: &Partition,
        cancel: &CancellationToken,
    ) -> HashMap<String, FocalMechanism> {
        let targets = partition.enrichment_targets(self.settings.enrichment_threshold);
        if targets.is_empty() {
            return HashMap::new();
        }
        tracing::info!(
            source = %DataSource::Pipeline,
            targets = targets.len(),
            concurrency = self.limiter.limit(),
            "Fetching focal mechanisms"
        );

        let client = &self.client;
        let lookups = self
            .limiter
            .run_all(targets.into_iter().map(|event_id| {
                move || async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    match client.fetch_focal_mechanism(event_id).await {
                        Ok(found) => found.map(|fm| (event_id.to_string(), fm)),
                        Err(e) => {
                            log_fdsn_failure(Some(event_id), "focal mechanism lookup", &e);
                            None
                        }
                    }
                }
            }))
            .await;

        if cancel.is_cancelled() {
            tracing::warn!(source = %DataSource::Pipeline, "Cancelled; remaining enrichment lookups skipped");
        }
        lookups.into_iter().flatten().collect()
    }

    /// Bulk insert; if the batch is rejected, retry one event at a time so
    /// only the offending records are lost. Returns how many were written.
    async fn insert_new(&self, events: &[CatalogueEvent], errors: &mut Vec<String>) -> usize {
        if events.is_empty() {
            return 0;
        }
        let bulk_error = match self.store.bulk_insert_events(events).await {
            Ok(()) => return events.len(),
            Err(e) => e,
        };
        tracing::warn!(
            source = %DataSource::Store,
            batch = events.len(),
            error = %bulk_error,
            "Bulk insert rejected, inserting individually"
        );

        let mut inserted = 0;
        for event in events {
            match self.store.bulk_insert_events(slice::from_ref(event)).await {
                Ok(()) => inserted += 1,
                Err(e) => {
                    tracing::warn!(source = %DataSource::Store, event_id = %event.source_id, error = %e, "Insert failed");
                    errors.push(format!("insert {}: {}", event.source_id, e));
                }
            }
        }
        inserted
    }
}
