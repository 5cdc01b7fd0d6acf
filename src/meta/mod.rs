//! Image metadata storage using SQLite
//!
//! This module is the relational side of the system:
//! - Images (location, capture metadata, generated description)
//! - Pipeline runs (history and per-stage accounting)
//!
//! The pipeline and search path only see the [`ImageStore`] trait.

mod schema;

pub use schema::*;

use crate::config::{BoundingBox, Config};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// A geo-tagged image
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(default = "new_image_id")]
    pub image_id: String,
    pub image_url: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub pitch: Option<f64>,
    #[serde(default)]
    pub fov: Option<f64>,
    #[serde(default)]
    pub captured_at: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn new_image_id() -> String {
    Uuid::new_v4().to_string()
}

impl ImageRecord {
    pub fn new(image_url: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            image_id: new_image_id(),
            image_url: image_url.into(),
            latitude,
            longitude,
            heading: None,
            pitch: None,
            fov: None,
            captured_at: None,
            description: None,
        }
    }
}

/// Description presence filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptionFilter {
    #[default]
    Any,
    Missing,
    Present,
}

/// Selection criteria for [`ImageStore::select`]
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    pub bbox: Option<BoundingBox>,
    pub description: DescriptionFilter,
    pub limit: Option<usize>,
}

impl ImageFilter {
    pub fn missing_description(bbox: Option<BoundingBox>) -> Self {
        Self {
            bbox,
            description: DescriptionFilter::Missing,
            limit: None,
        }
    }

    pub fn with_description(bbox: Option<BoundingBox>) -> Self {
        Self {
            bbox,
            description: DescriptionFilter::Present,
            limit: None,
        }
    }
}

/// Relational store contract used by the pipeline and the search path
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Rows matching the filter, ordered by image id
    async fn select(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>>;

    /// Rows for the given ids in one lookup; order is unspecified
    async fn select_by_ids(&self, ids: &[String]) -> Result<Vec<ImageRecord>>;

    /// Set the description of one image
    async fn update_description(&self, image_id: &str, description: &str) -> Result<()>;
}

/// Pipeline stage names recorded in `pipeline_runs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Upload,
    Caption,
    Embed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Upload => write!(f, "upload"),
            Stage::Caption => write!(f, "caption"),
            Stage::Embed => write!(f, "embed"),
        }
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "upload" => Ok(Stage::Upload),
            "caption" => Ok(Stage::Caption),
            "embed" => Ok(Stage::Embed),
            _ => Err(Error::Config(format!("Unknown pipeline stage: {}", s))),
        }
    }
}

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A pipeline run record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub stage: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub errors_json: Option<String>,
}

impl PipelineRun {
    pub fn new(stage: Stage) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            stage: stage.to_string(),
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            status: RunStatus::Running.to_string(),
            processed: 0,
            succeeded: 0,
            failed: 0,
            errors_json: None,
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}

/// Totals recorded when a run completes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Image table statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageStats {
    pub image_count: i64,
    pub described_count: i64,
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database configured in `config`
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    /// Open (creating if needed) the database at `db_path` and apply the schema
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        debug!("Initializing database schema");
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    // ===== Image Operations =====

    /// Insert images, updating location/capture metadata of existing ids.
    /// An existing description is kept unless the incoming record carries one.
    pub async fn upsert_images(&self, records: &[ImageRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO images (
                    image_id, image_url, latitude, longitude, heading, pitch, fov, captured_at, description
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(image_id) DO UPDATE SET
                    image_url = excluded.image_url,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    heading = excluded.heading,
                    pitch = excluded.pitch,
                    fov = excluded.fov,
                    captured_at = excluded.captured_at,
                    description = COALESCE(excluded.description, images.description)
                "#,
            )
            .bind(&record.image_id)
            .bind(&record.image_url)
            .bind(record.latitude)
            .bind(record.longitude)
            .bind(record.heading)
            .bind(record.pitch)
            .bind(record.fov)
            .bind(&record.captured_at)
            .bind(&record.description)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!("Upserted {} images", records.len());
        Ok(records.len())
    }

    /// Image totals
    pub async fn image_stats(&self) -> Result<ImageStats> {
        let (image_count, described_count): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(description) FROM images",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ImageStats {
            image_count,
            described_count,
        })
    }

    // ===== Run Operations =====

    /// Record the start of a stage run
    pub async fn start_run(&self, stage: Stage) -> Result<PipelineRun> {
        let run = PipelineRun::new(stage);
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, stage, started_at, status)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.stage)
        .bind(&run.started_at)
        .bind(&run.status)
        .execute(&self.pool)
        .await?;
        Ok(run)
    }

    /// Record the outcome of a stage run
    pub async fn complete_run(
        &self,
        run_id: &str,
        status: RunStatus,
        totals: &RunTotals,
    ) -> Result<()> {
        let errors_json = if totals.errors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&totals.errors)?)
        };

        sqlx::query(
            r#"
            UPDATE pipeline_runs SET
                completed_at = ?,
                status = ?,
                processed = ?,
                succeeded = ?,
                failed = ?,
                errors_json = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(totals.processed as i64)
        .bind(totals.succeeded as i64)
        .bind(totals.failed as i64)
        .bind(errors_json)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent runs, newest first
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        let runs = sqlx::query_as::<_, PipelineRun>(
            "SELECT * FROM pipeline_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }
}

#[async_trait]
impl ImageStore for MetaDb {
    async fn select(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut binds: Vec<f64> = Vec::new();

        if let Some(bbox) = filter.bbox {
            conditions.push("latitude BETWEEN ? AND ?");
            binds.extend([bbox.min_lat, bbox.max_lat]);
            conditions.push("longitude BETWEEN ? AND ?");
            binds.extend([bbox.min_lon, bbox.max_lon]);
        }

        match filter.description {
            DescriptionFilter::Any => {}
            DescriptionFilter::Missing => conditions.push("description IS NULL"),
            DescriptionFilter::Present => conditions.push("description IS NOT NULL"),
        }

        let mut query = "SELECT * FROM images".to_string();
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(" ORDER BY image_id");
        if filter.limit.is_some() {
            query.push_str(" LIMIT ?");
        }

        let mut query_builder = sqlx::query_as::<_, ImageRecord>(&query);
        for value in binds {
            query_builder = query_builder.bind(value);
        }
        if let Some(limit) = filter.limit {
            query_builder = query_builder.bind(limit as i64);
        }

        let rows = query_builder.fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), ?filter, "Selected images");
        Ok(rows)
    }

    async fn select_by_ids(&self, ids: &[String]) -> Result<Vec<ImageRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!("SELECT * FROM images WHERE image_id IN ({})", placeholders);

        let mut query_builder = sqlx::query_as::<_, ImageRecord>(&query);
        for id in ids {
            query_builder = query_builder.bind(id);
        }
        Ok(query_builder.fetch_all(&self.pool).await?)
    }

    async fn update_description(&self, image_id: &str, description: &str) -> Result<()> {
        let result = sqlx::query("UPDATE images SET description = ? WHERE image_id = ?")
            .bind(description)
            .bind(image_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Other(format!("Image not found: {}", image_id)));
        }
        Ok(())
    }
}
