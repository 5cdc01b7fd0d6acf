//! Ingestion pipeline: upload → caption → embed → index
//!
//! Each stage is independently resumable and commits its own results:
//! - Upload writes remote handles to the checkpoint file
//! - Caption writes descriptions to the relational store
//! - Embed upserts vectors into the index, then rebuilds the ANN index
//!
//! Item and batch failures are recorded in the stage report and never abort
//! the stage. Only structural failures (checkpoint I/O, database, index build)
//! surface as errors.

mod caption;
mod embed;
mod upload;

pub use caption::*;
pub use embed::*;
pub use upload::*;

use crate::meta::{RunTotals, Stage};
use serde::Serialize;

/// Outcome counts for one stage run
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            processed: 0,
            succeeded: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, item: &str, reason: impl std::fmt::Display) {
        self.processed += 1;
        self.failed += 1;
        self.errors.push(format!("{}: {}", item, reason));
    }

    /// Record `count` items failing together (one error line)
    pub fn record_batch_failure(
        &mut self,
        label: &str,
        count: usize,
        reason: impl std::fmt::Display,
    ) {
        self.processed += count;
        self.failed += count;
        self.errors.push(format!("{} ({} items): {}", label, count, reason));
    }

    pub fn totals(&self) -> RunTotals {
        RunTotals {
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            errors: self.errors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::DecodingParams;
    use crate::checkpoint::Checkpoint;
    use crate::embed::{EmbedMode, Embedder};
    use crate::meta::{ImageRecord, ImageStore, MetaDb};
    use crate::retry::RetryPolicy;
    use crate::search::SearchService;
    use crate::store::{MemoryIndex, VectorIndex};
    use crate::testing::{jpeg_server, FakeCaptionBackend, KeywordEmbedder};
    use indicatif::ProgressBar;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_report_accounting() {
        let mut report = StageReport::new(Stage::Embed);
        report.record_success();
        report.record_failure("img-2", "boom");
        report.record_batch_failure("batch 3", 4, "HTTP 500");

        assert_eq!(report.processed, 6);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 5);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.totals().failed, 5);
    }

    /// u1 and u3 download fine, u2 returns 404. After the full pipeline u1
    /// and u3 carry handles, descriptions and vectors; u2 has none of them
    /// and appears in the upload report as a failure.
    #[tokio::test]
    async fn test_end_to_end_partial_failure() {
        let tmp = TempDir::new().unwrap();
        let server = jpeg_server(&["u1", "u3"], &["u2"]).await;
        let url = |name: &str| format!("{}/img/{}.jpg", server.uri(), name);

        let db = MetaDb::open(&tmp.path().join("metadata.db")).await.unwrap();
        let mut records = Vec::new();
        for (i, name) in ["u1", "u2", "u3"].iter().enumerate() {
            let mut r = ImageRecord::new(url(name), 43.6 + i as f64 * 0.01, -79.4);
            r.image_id = name.to_string();
            records.push(r);
        }
        db.upsert_images(&records).await.unwrap();

        let backend = FakeCaptionBackend::new();
        let mut checkpoint = Checkpoint::load(tmp.path().join("mappings.json")).unwrap();
        let bar = ProgressBar::hidden();

        let uploader = BoundedUploader::new(&backend, tmp.path().join("scratch"))
            .unwrap()
            .with_concurrency(2)
            .with_retry(RetryPolicy::fixed(2, Duration::ZERO));
        let upload = run_upload_stage(&db, &mut checkpoint, &uploader, None, &bar)
            .await
            .unwrap();
        assert_eq!(upload.processed, 3);
        assert_eq!(upload.succeeded, 2);
        assert_eq!(upload.failed, 1);
        assert!(upload.errors[0].contains("u2"));

        let reloaded = Checkpoint::load(tmp.path().join("mappings.json")).unwrap();
        assert!(reloaded.handle(&url("u1")).is_some());
        assert!(reloaded.handle(&url("u2")).is_none());
        assert!(reloaded.handle(&url("u3")).is_some());

        // The captioner only sees uploaded images.
        let generator =
            CaptionGenerator::new(&backend, "Describe.".to_string(), DecodingParams::default())
                .with_retry(RetryPolicy::none());
        let caption = run_caption_stage(&db, &mut checkpoint, &generator, None, &bar)
            .await
            .unwrap();
        assert_eq!(caption.succeeded, 2);
        assert_eq!(caption.failed, 0);

        let embedder = KeywordEmbedder::new();
        let index = MemoryIndex::new(embedder.dimension());
        let batcher = EmbeddingBatcher::new(&embedder, &index, 2);
        let embed = run_embed_stage(&db, &batcher, None, &bar).await.unwrap();
        assert_eq!(embed.succeeded, 2);
        assert_eq!(index.count().await.unwrap(), 2);
        assert!(index.contains("u1") && index.contains("u3") && !index.contains("u2"));
        assert_eq!(index.build_count(), 1);

        let rows = db
            .select_by_ids(&["u1".to_string(), "u2".to_string(), "u3".to_string()])
            .await
            .unwrap();
        for row in rows {
            assert_eq!(row.description.is_some(), row.image_id != "u2");
        }

        // Re-running upload only retries the failed URL.
        let again = run_upload_stage(&db, &mut checkpoint, &uploader, None, &bar)
            .await
            .unwrap();
        assert_eq!(again.processed, 1);
        assert_eq!(again.failed, 1);
        assert_eq!(backend.upload_count(), 2);
    }

    /// Descriptions are embedded in document mode, the query in query mode,
    /// and "a cat" ranks the cat description first.
    #[tokio::test]
    async fn test_query_mode_ranks_matching_description_first() {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::open(&tmp.path().join("metadata.db")).await.unwrap();

        let mut cat = ImageRecord::new("https://img.example.com/cat.jpg", 10.0, 20.0);
        cat.image_id = "cat".to_string();
        cat.description = Some("a cat sleeping on a windowsill".to_string());
        let mut dog = ImageRecord::new("https://img.example.com/dog.jpg", 11.0, 21.0);
        dog.image_id = "dog".to_string();
        dog.description = Some("a dog chasing a ball".to_string());
        db.upsert_images(&[cat, dog]).await.unwrap();

        let embedder = Arc::new(KeywordEmbedder::new());
        let index = Arc::new(MemoryIndex::new(embedder.dimension()));
        let batcher = EmbeddingBatcher::new(embedder.as_ref(), index.as_ref(), 96);
        run_embed_stage(&db, &batcher, None, &ProgressBar::hidden())
            .await
            .unwrap();
        assert_eq!(embedder.modes(), vec![EmbedMode::Document]);

        let service = SearchService::new(embedder.clone(), index.clone(), Arc::new(db), 100, 100);
        let response = service.search("a cat").await.unwrap();

        assert_eq!(embedder.modes(), vec![EmbedMode::Document, EmbedMode::Query]);
        assert_eq!(response.results[0].record.image_id, "cat");
        assert_eq!(response.results[1].record.image_id, "dog");
        assert!(response.results[0].similarity > response.results[1].similarity);
    }
}
