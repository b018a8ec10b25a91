//! PostgreSQL catalogue store.
//!
//! `postgres::Client` is blocking and owns its own runtime, so it lives on
//! a dedicated connection thread. Async callers hand it closures over a
//! channel and await the reply; dropping the store ends the thread.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;

use async_trait::async_trait;
use chrono::Utc;
use postgres::error::SqlState;
use postgres::{Client, NoTls, Row};
use tokio::sync::oneshot;

use super::validate::{validate_batch, validate_update};
use super::{CatalogueStore, DEFAULT_CATALOGUE_DESCRIPTION};
use crate::error::StoreError;
use crate::model::{Catalogue, CatalogueEvent, EventUpdate, IMPORT_SOURCE, ImportRun};

type Job = Box<dyn FnOnce(&mut Client) + Send>;

const EVENT_COLUMNS: &str = "id, catalogue_id, source_id, time, latitude, longitude, depth_km, \
     magnitude, magnitude_type, event_type, location_name, focal_mechanism, created_at, updated_at";

pub struct PgStore {
    jobs: mpsc::Sender<Job>,
}

impl PgStore {
    /// DDL for the `quake` schema. Idempotent.
    pub const SCHEMA: &'static str = "
        CREATE SCHEMA IF NOT EXISTS quake;

        CREATE TABLE IF NOT EXISTS quake.catalogues (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            source      TEXT NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL
        );

        CREATE TABLE IF NOT EXISTS quake.events (
            id              TEXT PRIMARY KEY,
            catalogue_id    TEXT NOT NULL REFERENCES quake.catalogues(id),
            source_id       TEXT NOT NULL,
            time            TIMESTAMPTZ NOT NULL,
            latitude        DOUBLE PRECISION NOT NULL,
            longitude       DOUBLE PRECISION NOT NULL,
            depth_km        DOUBLE PRECISION,
            magnitude       DOUBLE PRECISION NOT NULL,
            magnitude_type  TEXT,
            event_type      TEXT,
            location_name   TEXT,
            focal_mechanism TEXT,
            created_at      TIMESTAMPTZ NOT NULL,
            updated_at      TIMESTAMPTZ NOT NULL,
            UNIQUE (catalogue_id, source_id)
        );

        CREATE INDEX IF NOT EXISTS events_catalogue_time_idx
            ON quake.events (catalogue_id, time DESC);

        CREATE TABLE IF NOT EXISTS quake.import_runs (
            id            TEXT PRIMARY KEY,
            catalogue_id  TEXT NOT NULL REFERENCES quake.catalogues(id),
            start_time    TIMESTAMPTZ NOT NULL,
            end_time      TIMESTAMPTZ NOT NULL,
            started_at    TIMESTAMPTZ NOT NULL,
            finished_at   TIMESTAMPTZ NOT NULL,
            total_fetched BIGINT NOT NULL,
            new_count     BIGINT NOT NULL,
            updated_count BIGINT NOT NULL,
            skipped_count BIGINT NOT NULL,
            errors        TEXT[] NOT NULL DEFAULT '{}'
        );
    ";

    /// Open a connection on a fresh connection thread.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let url = database_url.to_string();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), postgres::Error>>();
        let (jobs, queue) = mpsc::channel::<Job>();

        thread::Builder::new()
            .name("pg-store".to_string())
            .spawn(move || {
                let mut client = match Client::connect(&url, NoTls) {
                    Ok(client) => {
                        let _ = ready_tx.send(Ok(()));
                        client
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                for job in queue {
                    job(&mut client);
                }
            })
            .map_err(|e| StoreError::backend(format!("failed to start store thread: {e}")))?;

        ready_rx
            .await
            .map_err(|_| StoreError::backend("store thread exited during connect"))??;
        tracing::info!(source = "STORE", "Connected to PostgreSQL");
        Ok(Self { jobs })
    }

    /// Apply `SCHEMA`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        self.run(|client| Ok(client.batch_execute(Self::SCHEMA)?)).await
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Client) -> Result<T, StoreError> + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(Box::new(move |client| {
                let _ = reply.send(f(client));
            }))
            .map_err(|_| StoreError::backend("store thread has stopped"))?;
        response
            .await
            .map_err(|_| StoreError::backend("store thread dropped the request"))?
    }
}

/// A unique violation means `(catalogue_id, source_id)` is already stored,
/// typically by a concurrent run.
fn insert_error(err: postgres::Error, event: &CatalogueEvent) -> StoreError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        StoreError::Duplicate {
            catalogue_id: event.catalogue_id.clone(),
            source_id: event.source_id.clone(),
        }
    } else {
        StoreError::Postgres(err)
    }
}

fn event_from_row(row: &Row) -> CatalogueEvent {
    CatalogueEvent {
        id: row.get(0),
        catalogue_id: row.get(1),
        source_id: row.get(2),
        time: row.get(3),
        latitude: row.get(4),
        longitude: row.get(5),
        depth_km: row.get(6),
        magnitude: row.get(7),
        magnitude_type: row.get(8),
        event_type: row.get(9),
        location_name: row.get(10),
        focal_mechanism: row.get(11),
        created_at: row.get(12),
        updated_at: row.get(13),
    }
}

fn run_from_row(row: &Row) -> ImportRun {
    let count = |idx: usize| row.get::<_, i64>(idx).max(0) as usize;
    ImportRun {
        id: row.get(0),
        catalogue_id: row.get(1),
        start_time: row.get(2),
        end_time: row.get(3),
        started_at: row.get(4),
        finished_at: row.get(5),
        total_fetched: count(6),
        new_count: count(7),
        updated_count: count(8),
        skipped_count: count(9),
        errors: row.get(10),
    }
}

#[async_trait]
impl CatalogueStore for PgStore {
    async fn find_event_by_source_id(
        &self,
        catalogue_id: &str,
        source_id: &str,
    ) -> Result<Option<CatalogueEvent>, StoreError> {
        let (catalogue_id, source_id) = (catalogue_id.to_string(), source_id.to_string());
        self.run(move |client| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM quake.events WHERE catalogue_id = $1 AND source_id = $2"
            );
            let row = client.query_opt(sql.as_str(), &[&catalogue_id, &source_id])?;
            Ok(row.as_ref().map(event_from_row))
        })
        .await
    }

    async fn find_events_by_source_ids(
        &self,
        catalogue_id: &str,
        source_ids: &[String],
    ) -> Result<HashMap<String, CatalogueEvent>, StoreError> {
        if source_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let (catalogue_id, source_ids) = (catalogue_id.to_string(), source_ids.to_vec());
        self.run(move |client| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM quake.events WHERE catalogue_id = $1 AND source_id = ANY($2)"
            );
            let rows = client.query(sql.as_str(), &[&catalogue_id, &source_ids])?;
            Ok(rows
                .iter()
                .map(event_from_row)
                .map(|e| (e.source_id.clone(), e))
                .collect())
        })
        .await
    }

    async fn bulk_insert_events(&self, events: &[CatalogueEvent]) -> Result<(), StoreError> {
        validate_batch(events, Utc::now())?;
        if events.is_empty() {
            return Ok(());
        }
        let events = events.to_vec();
        self.run(move |client| {
            let mut tx = client.transaction()?;
            let stmt = tx.prepare(&format!(
                "INSERT INTO quake.events ({EVENT_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
            ))?;
            for e in &events {
                tx.execute(
                    &stmt,
                    &[
                        &e.id,
                        &e.catalogue_id,
                        &e.source_id,
                        &e.time,
                        &e.latitude,
                        &e.longitude,
                        &e.depth_km,
                        &e.magnitude,
                        &e.magnitude_type,
                        &e.event_type,
                        &e.location_name,
                        &e.focal_mechanism,
                        &e.created_at,
                        &e.updated_at,
                    ],
                )
                .map_err(|err| insert_error(err, e))?;
            }
            // Dropping an uncommitted transaction rolls it back.
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_event(&self, id: &str, update: &EventUpdate) -> Result<(), StoreError> {
        validate_update(id, update, Utc::now())?;
        let (id, u) = (id.to_string(), update.clone());
        self.run(move |client| {
            let changed = client.execute(
                "UPDATE quake.events SET
                    time            = COALESCE($2, time),
                    latitude        = COALESCE($3, latitude),
                    longitude       = COALESCE($4, longitude),
                    depth_km        = COALESCE($5, depth_km),
                    magnitude       = COALESCE($6, magnitude),
                    magnitude_type  = COALESCE($7, magnitude_type),
                    event_type      = COALESCE($8, event_type),
                    location_name   = COALESCE($9, location_name),
                    focal_mechanism = COALESCE($10, focal_mechanism),
                    updated_at      = $11
                 WHERE id = $1",
                &[
                    &id,
                    &u.time,
                    &u.latitude,
                    &u.longitude,
                    &u.depth_km,
                    &u.magnitude,
                    &u.magnitude_type,
                    &u.event_type,
                    &u.location_name,
                    &u.focal_mechanism,
                    &u.updated_at,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("event {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn get_or_create_catalogue(
        &self,
        id: Option<&str>,
        name: &str,
    ) -> Result<Catalogue, StoreError> {
        let (id, name) = (id.map(str::to_string), name.to_string());
        self.run(move |client| {
            if let Some(id) = &id {
                let row = client.query_opt(
                    "SELECT id, name, description, source, created_at
                     FROM quake.catalogues WHERE id = $1",
                    &[id],
                )?;
                if let Some(row) = row {
                    return Ok(Catalogue {
                        id: row.get(0),
                        name: row.get(1),
                        description: row.get(2),
                        source: row.get(3),
                        created_at: row.get(4),
                    });
                }
            }

            let catalogue = Catalogue {
                id: uuid::Uuid::new_v4().to_string(),
                name,
                description: DEFAULT_CATALOGUE_DESCRIPTION.to_string(),
                source: IMPORT_SOURCE.to_string(),
                created_at: Utc::now(),
            };
            client.execute(
                "INSERT INTO quake.catalogues (id, name, description, source, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &catalogue.id,
                    &catalogue.name,
                    &catalogue.description,
                    &catalogue.source,
                    &catalogue.created_at,
                ],
            )?;
            Ok(catalogue)
        })
        .await
    }

    async fn record_import_run(&self, run: &ImportRun) -> Result<(), StoreError> {
        let run = run.clone();
        self.run(move |client| {
            let count = |n: usize| n as i64;
            client.execute(
                "INSERT INTO quake.import_runs
                    (id, catalogue_id, start_time, end_time, started_at, finished_at,
                     total_fetched, new_count, updated_count, skipped_count, errors)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &run.id,
                    &run.catalogue_id,
                    &run.start_time,
                    &run.end_time,
                    &run.started_at,
                    &run.finished_at,
                    &count(run.total_fetched),
                    &count(run.new_count),
                    &count(run.updated_count),
                    &count(run.skipped_count),
                    &run.errors,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn invalidate_cache(&self, catalogue_id: &str) -> Result<(), StoreError> {
        // Reads go straight to the database; nothing is cached here.
        tracing::debug!(source = "STORE", catalogue_id, "Cache invalidation requested");
        Ok(())
    }

    async fn list_import_runs(&self, catalogue_id: &str) -> Result<Vec<ImportRun>, StoreError> {
        let catalogue_id = catalogue_id.to_string();
        self.run(move |client| {
            let rows = client.query(
                "SELECT id, catalogue_id, start_time, end_time, started_at, finished_at,
                        total_fetched, new_count, updated_count, skipped_count, errors
                 FROM quake.import_runs
                 WHERE catalogue_id = $1
                 ORDER BY started_at",
                &[&catalogue_id],
            )?;
            Ok(rows.iter().map(run_from_row).collect())
        })
        .await
    }
}
