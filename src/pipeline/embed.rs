//! Batched embedding of descriptions into the vector index

use super::StageReport;
use crate::batch::{batch_count, partition};
use crate::config::BoundingBox;
use crate::embed::{EmbedMode, Embedder};
use crate::error::{Error, Result};
use crate::meta::{ImageFilter, ImageRecord, ImageStore, Stage};
use crate::store::{EmbeddingRecord, VectorIndex};
use indicatif::ProgressBar;
use tracing::{debug, info, warn};

pub struct EmbeddingBatcher<'a> {
    embedder: &'a dyn Embedder,
    index: &'a dyn VectorIndex,
    batch_size: usize,
}

impl<'a> EmbeddingBatcher<'a> {
    pub fn new(embedder: &'a dyn Embedder, index: &'a dyn VectorIndex, batch_size: usize) -> Self {
        Self {
            embedder,
            index,
            batch_size,
        }
    }

    /// Embed and upsert every described record, then rebuild the index.
    ///
    /// A failed batch is recorded and the remaining batches still run. Only
    /// the final index build can fail the whole call.
    pub async fn run(
        &self,
        records: &[ImageRecord],
        progress: &ProgressBar,
    ) -> Result<StageReport> {
        let described: Vec<&ImageRecord> = records
            .iter()
            .filter(|r| r.description.as_deref().is_some_and(|d| !d.trim().is_empty()))
            .collect();

        let total_batches = batch_count(described.len(), self.batch_size);
        let mut report = StageReport::new(Stage::Embed);

        for (i, batch) in partition(&described, self.batch_size).enumerate() {
            let label = format!("batch {}/{}", i + 1, total_batches);
            match self.embed_batch(batch).await {
                Ok(()) => {
                    debug!(batch = %label, size = batch.len(), "Upserted batch");
                    for _ in batch {
                        report.record_success();
                    }
                }
                Err(e) => {
                    warn!(batch = %label, "Embedding batch failed: {}", e);
                    report.record_batch_failure(&label, batch.len(), e);
                }
            }
            progress.inc(batch.len() as u64);
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Embedding complete, rebuilding index"
        );
        self.index.build_index().await?;

        Ok(report)
    }

    async fn embed_batch(&self, batch: &[&ImageRecord]) -> Result<()> {
        let texts: Vec<String> = batch
            .iter()
            .map(|r| r.description.clone().unwrap_or_default())
            .collect();

        let vectors = self.embedder.embed(texts, EmbedMode::Document).await?;
        if vectors.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            )));
        }

        let records: Vec<EmbeddingRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(row, vector)| {
                EmbeddingRecord::new(row.image_id.clone(), vector)
                    .with_metadata("image_url", row.image_url.clone())
                    .with_metadata("latitude", row.latitude)
                    .with_metadata("longitude", row.longitude)
            })
            .collect();

        self.index.upsert(records).await
    }
}

/// Embed stage: every described image in scope
pub async fn run_embed_stage(
    store: &dyn ImageStore,
    batcher: &EmbeddingBatcher<'_>,
    bbox: Option<BoundingBox>,
    progress: &ProgressBar,
) -> Result<StageReport> {
    let rows = store.select(&ImageFilter::with_description(bbox)).await?;
    info!(images = rows.len(), "Starting embed stage");
    progress.set_length(rows.len() as u64);
    batcher.run(&rows, progress).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryIndex;
    use crate::testing::KeywordEmbedder;

    fn described(n: usize) -> Vec<ImageRecord> {
        (0..n)
            .map(|i| {
                let url = format!("https://img.example.com/{}.jpg", i);
                let mut r = ImageRecord::new(url, 1.0, 2.0);
                r.image_id = format!("img-{}", i);
                r.description = Some(format!("a street corner number {}", i));
                r
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_later_batches() {
        // Batch size 2 over 5 records: batches [0,1] [2,3] [4]. The second fails.
        let embedder = KeywordEmbedder::new().failing_on("number 2");
        let index = MemoryIndex::new(embedder.dimension());
        let batcher = EmbeddingBatcher::new(&embedder, &index, 2);

        let report = batcher.run(&described(5), &ProgressBar::hidden()).await.unwrap();

        assert_eq!(report.processed, 5);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("batch 2/3"));
        assert!(index.contains("img-4"));
        assert!(!index.contains("img-2"));
        assert_eq!(index.build_count(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_batch() {
        let embedder = KeywordEmbedder::new();
        let index = MemoryIndex::new(embedder.dimension() + 1);
        let batcher = EmbeddingBatcher::new(&embedder, &index, 10);

        let report = batcher.run(&described(3), &ProgressBar::hidden()).await.unwrap();
        assert_eq!(report.failed, 3);
        assert!(report.errors[0].contains("dimension mismatch"));
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_records_without_description_are_skipped() {
        let mut records = described(2);
        records[1].description = None;

        let embedder = KeywordEmbedder::new();
        let index = MemoryIndex::new(embedder.dimension());
        let batcher = EmbeddingBatcher::new(&embedder, &index, 10);

        let report = batcher.run(&records, &ProgressBar::hidden()).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(index.count().await.unwrap(), 1);
    }
}
