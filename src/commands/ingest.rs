//! Pipeline stage commands: upload, caption, embed, and the full run

use crate::caption::create_caption_backend;
use crate::checkpoint::Checkpoint;
use crate::config::Config;
use crate::embed::create_embedder;
use crate::error::{Error, Result};
use crate::meta::{MetaDb, RunStatus, RunTotals, Stage};
use crate::pipeline::{
    run_caption_stage, run_embed_stage, run_upload_stage, BoundedUploader, CaptionGenerator,
    EmbeddingBatcher, StageReport,
};
use crate::progress::stage_progress_bar;
use crate::store::QdrantStore;
use std::future::Future;
use tracing::{info, warn};

/// Run one stage and record it in `pipeline_runs`.
///
/// A stage that returns a report is recorded as completed, even when some
/// items failed. A stage that errors out is recorded as failed.
pub async fn record_run<F>(db: &MetaDb, stage: Stage, stage_future: F) -> Result<StageReport>
where
    F: Future<Output = Result<StageReport>>,
{
    let run = db.start_run(stage).await?;
    match stage_future.await {
        Ok(report) => {
            db.complete_run(&run.id, RunStatus::Completed, &report.totals())
                .await?;
            Ok(report)
        }
        Err(e) => {
            let totals = RunTotals {
                errors: vec![e.to_string()],
                ..Default::default()
            };
            if let Err(record_err) = db.complete_run(&run.id, RunStatus::Failed, &totals).await {
                warn!("Could not record failed {} run: {}", stage, record_err);
            }
            Err(e)
        }
    }
}

fn require_caption_key(config: &Config) -> Result<()> {
    if config.caption.api_key().is_none() {
        return Err(Error::Config(format!(
            "{} is not set; the caption backend requires an API key",
            config.caption.api_key_env
        )));
    }
    Ok(())
}

/// Upload every pending image to the captioning backend
pub async fn cmd_upload(config: &Config, db: &MetaDb) -> Result<StageReport> {
    require_caption_key(config)?;
    let backend = create_caption_backend(&config.caption)?;
    let uploader = BoundedUploader::from_config(backend.as_ref(), config)?;
    let mut checkpoint = Checkpoint::load(config.checkpoint_path())?;

    let progress = stage_progress_bar("upload", 0);
    let result = record_run(
        db,
        Stage::Upload,
        run_upload_stage(db, &mut checkpoint, &uploader, config.bbox, &progress),
    )
    .await;
    progress.finish_and_clear();
    result
}

/// Caption every uploaded image that has no description
pub async fn cmd_caption(config: &Config, db: &MetaDb) -> Result<StageReport> {
    require_caption_key(config)?;
    let backend = create_caption_backend(&config.caption)?;
    let generator = CaptionGenerator::from_config(backend.as_ref(), &config.caption);
    let mut checkpoint = Checkpoint::load(config.checkpoint_path())?;

    let progress = stage_progress_bar("caption", 0);
    let result = record_run(
        db,
        Stage::Caption,
        run_caption_stage(db, &mut checkpoint, &generator, config.bbox, &progress),
    )
    .await;
    progress.finish_and_clear();
    result
}

/// Embed every described image and rebuild the vector index
pub async fn cmd_embed(config: &Config, db: &MetaDb) -> Result<StageReport> {
    if config.embedding.api_key().is_none() {
        return Err(Error::Config(format!(
            "{} is not set; the embedding backend requires an API key",
            config.embedding.api_key_env
        )));
    }

    let embedder = create_embedder(&config.embedding)?;
    let store = QdrantStore::connect(config).await?;
    store.ensure_collection().await?;
    let batcher = EmbeddingBatcher::new(embedder.as_ref(), &store, config.embedding.batch_size);

    let progress = stage_progress_bar("embed", 0);
    let result = record_run(
        db,
        Stage::Embed,
        run_embed_stage(db, &batcher, config.bbox, &progress),
    )
    .await;
    progress.finish_and_clear();
    result
}

/// Run upload, caption and embed in order.
///
/// Item failures never stop the run. A stage that fails structurally stops
/// the stages after it.
pub async fn cmd_run(config: &Config, db: &MetaDb) -> Result<Vec<StageReport>> {
    let mut reports = Vec::with_capacity(3);

    reports.push(cmd_upload(config, db).await?);
    reports.push(cmd_caption(config, db).await?);
    reports.push(cmd_embed(config, db).await?);

    let failed: usize = reports.iter().map(|r| r.failed).sum();
    info!(failed, "Pipeline run complete");
    Ok(reports)
}

pub fn print_stage_report(report: &StageReport) {
    println!("\n✓ {} stage complete", report.stage);
    println!("  Processed: {}", report.processed);
    println!("  Succeeded: {}", report.succeeded);
    println!("  Failed: {}", report.failed);

    const SHOWN: usize = 10;
    if !report.errors.is_empty() {
        println!("  Errors:");
        for error in report.errors.iter().take(SHOWN) {
            println!("    • {}", error);
        }
        if report.errors.len() > SHOWN {
            println!("    … and {} more", report.errors.len() - SHOWN);
        }
    }
}
