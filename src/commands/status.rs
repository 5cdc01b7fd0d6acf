//! Status command implementation

use crate::checkpoint::Checkpoint;
use crate::config::Config;
use crate::error::Result;
use crate::meta::{ImageStats, MetaDb, PipelineRun};
use crate::store::QdrantStore;
use serde::Serialize;
use tracing::{debug, info};

const RECENT_RUNS: usize = 5;

/// Status information
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub checkpoint_path: String,
    pub qdrant_url: String,
    pub collection_name: String,
    pub caption_model: String,
    pub embedding_model: String,
    pub images: ImageStats,
    pub checkpoint_entries: usize,
    pub uploaded: usize,
    pub qdrant_connected: bool,
    pub collection_exists: bool,
    pub indexed_points: u64,
    pub index_status: Option<String>,
    pub recent_runs: Vec<PipelineRun>,
}

/// Gather status from the database, checkpoint and Qdrant.
/// An unreachable Qdrant is reported, not raised.
pub async fn cmd_status(config: &Config, db: &MetaDb) -> Result<StatusInfo> {
    info!("Getting status");

    let images = db.image_stats().await?;
    let recent_runs = db.recent_runs(RECENT_RUNS).await?;
    let checkpoint = Checkpoint::load(config.checkpoint_path())?;

    let collection = match QdrantStore::connect(config).await {
        Ok(store) => store.get_collection_info().await,
        Err(e) => Err(e),
    };
    let (qdrant_connected, collection_exists, indexed_points, index_status) = match collection {
        Ok(Some(info)) => (true, true, info.points_count, Some(info.status)),
        Ok(None) => (true, false, 0, None),
        Err(e) => {
            debug!("Qdrant connection error: {:?}", e);
            (false, false, 0, None)
        }
    };

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        checkpoint_path: checkpoint.path().display().to_string(),
        qdrant_url: config.qdrant_url.clone(),
        collection_name: config.collection_name.clone(),
        caption_model: config.caption.model.clone(),
        embedding_model: config.embedding.model.clone(),
        images,
        checkpoint_entries: checkpoint.len(),
        uploaded: checkpoint.uploaded_count(),
        qdrant_connected,
        collection_exists,
        indexed_points,
        index_status,
        recent_runs,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 streetlens Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("Checkpoint: {}", status.checkpoint_path);

    println!("\nImages:");
    println!("  Total: {}", status.images.image_count);
    println!("  Described: {}", status.images.described_count);
    println!(
        "  Uploaded: {} of {} tracked",
        status.uploaded, status.checkpoint_entries
    );

    println!("\nQdrant:");
    println!("  URL: {}", status.qdrant_url);
    println!("  Collection: {}", status.collection_name);
    let connection_status = match (status.qdrant_connected, status.collection_exists) {
        (true, true) => "✓ Connected",
        (true, false) => "⚠ Connected (collection not created - run 'streetlens embed')",
        (false, _) => "✗ Not connected",
    };
    println!("  Status: {}", connection_status);
    println!("  Points: {}", status.indexed_points);
    if let Some(index_status) = &status.index_status {
        println!("  Index: {}", index_status);
    }

    println!("\nModels:");
    println!("  Caption: {}", status.caption_model);
    println!("  Embedding: {}", status.embedding_model);

    if !status.recent_runs.is_empty() {
        println!("\nRecent runs:");
        for run in &status.recent_runs {
            println!(
                "  {} {:<8} {:<10} {} ok / {} failed",
                run.started_at, run.stage, run.status, run.succeeded, run.failed
            );
        }
    }
}
