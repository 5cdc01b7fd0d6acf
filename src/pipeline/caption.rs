//! Caption generation over uploaded images

use super::StageReport;
use crate::batch::{batch_count, partition};
use crate::caption::{normalize_caption, CaptionBackend, DecodingParams, GlobalRateLimiter};
use crate::checkpoint::Checkpoint;
use crate::config::{BoundingBox, CaptionConfig};
use crate::error::{Error, Result};
use crate::meta::{ImageFilter, ImageStore, Stage};
use crate::retry::RetryPolicy;
use futures::future::join_all;
use indicatif::ProgressBar;
use tracing::{debug, info, warn};

/// One image to caption
#[derive(Debug, Clone)]
pub struct CaptionTask {
    pub image_id: String,
    pub image_url: String,
    /// Remote handle, or a URL the backend can fetch directly
    pub handle: String,
}

/// Outcome of captioning one image
#[derive(Debug, Clone)]
pub struct CaptionResult {
    pub image_id: String,
    pub image_url: String,
    pub description: Option<String>,
    pub error: Option<String>,
    /// The backend no longer recognizes the handle; re-upload needed
    pub handle_expired: bool,
}

pub struct CaptionGenerator<'a> {
    backend: &'a dyn CaptionBackend,
    prompt: String,
    params: DecodingParams,
    batch_size: usize,
    retry: RetryPolicy,
    limiter: Option<GlobalRateLimiter>,
}

impl<'a> CaptionGenerator<'a> {
    pub fn new(backend: &'a dyn CaptionBackend, prompt: String, params: DecodingParams) -> Self {
        let defaults = CaptionConfig::default();
        Self {
            backend,
            prompt,
            params,
            batch_size: defaults.batch_size,
            retry: defaults.retry_policy(),
            limiter: None,
        }
    }

    pub fn from_config(backend: &'a dyn CaptionBackend, config: &CaptionConfig) -> Self {
        Self {
            backend,
            prompt: config.prompt.clone(),
            params: DecodingParams::from_config(config),
            batch_size: config.batch_size,
            retry: config.retry_policy(),
            limiter: config.requests_per_second.map(GlobalRateLimiter::new),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Caption every task. Sub-batches run one after another; items within
    /// a sub-batch run concurrently. Returns exactly one result per task, in
    /// input order.
    ///
    /// A configuration error from the backend (rejected key, unknown model)
    /// fails every item alike, so it stops the run after the current
    /// sub-batch and is returned as the error.
    pub async fn generate_all(
        &self,
        tasks: &[CaptionTask],
        progress: &ProgressBar,
    ) -> Result<Vec<CaptionResult>> {
        let total_batches = batch_count(tasks.len(), self.batch_size);
        let mut results = Vec::with_capacity(tasks.len());

        for (i, batch) in partition(tasks, self.batch_size).enumerate() {
            debug!(batch = i + 1, total_batches, size = batch.len(), "Captioning sub-batch");
            let outcomes = join_all(batch.iter().map(|task| self.caption_one(task))).await;
            progress.inc(batch.len() as u64);
            for outcome in outcomes {
                results.push(outcome?);
            }
        }

        Ok(results)
    }

    async fn caption_one(&self, task: &CaptionTask) -> Result<CaptionResult> {
        let generated = self
            .retry
            .run("caption", move || async move {
                if let Some(limiter) = &self.limiter {
                    limiter.wait().await;
                }
                self.backend
                    .generate(&task.handle, &self.prompt, &self.params)
                    .await
            })
            .await;

        let (description, error, handle_expired) = match generated {
            Ok(raw) => {
                let text = normalize_caption(&raw);
                if text.is_empty() {
                    (None, Some("empty caption".to_string()), false)
                } else {
                    (Some(text), None, false)
                }
            }
            Err(e @ Error::Config(_)) => return Err(e),
            Err(e) => {
                warn!(image_id = %task.image_id, "Caption failed: {}", e);
                let expired = matches!(e, Error::HandleExpired(_));
                (None, Some(e.to_string()), expired)
            }
        };

        Ok(CaptionResult {
            image_id: task.image_id.clone(),
            image_url: task.image_url.clone(),
            description,
            error,
            handle_expired,
        })
    }
}

/// Caption stage: every uploaded image in scope that has no description.
/// Descriptions are written back to the store; expired handles are cleared
/// from the checkpoint so the next upload run re-uploads them.
pub async fn run_caption_stage(
    store: &dyn ImageStore,
    checkpoint: &mut Checkpoint,
    generator: &CaptionGenerator<'_>,
    bbox: Option<BoundingBox>,
    progress: &ProgressBar,
) -> Result<StageReport> {
    let rows = store.select(&ImageFilter::missing_description(bbox)).await?;

    let mut not_uploaded = 0usize;
    let tasks: Vec<CaptionTask> = rows
        .into_iter()
        .filter_map(|row| match checkpoint.handle(&row.image_url) {
            Some(handle) => Some(CaptionTask {
                handle: handle.to_string(),
                image_id: row.image_id,
                image_url: row.image_url,
            }),
            None => {
                not_uploaded += 1;
                None
            }
        })
        .collect();

    info!(tasks = tasks.len(), not_uploaded, "Starting caption stage");
    progress.set_length(tasks.len() as u64);

    let results = generator.generate_all(&tasks, progress).await?;

    let mut report = StageReport::new(Stage::Caption);
    let mut cleared = 0usize;
    for result in results {
        match (result.description, result.error) {
            (Some(description), _) => {
                match store.update_description(&result.image_id, &description).await {
                    Ok(()) => report.record_success(),
                    Err(e) => report.record_failure(&result.image_id, e),
                }
            }
            (None, error) => {
                if result.handle_expired {
                    checkpoint.merge(result.image_url.clone(), String::new());
                    cleared += 1;
                }
                report.record_failure(
                    &result.image_id,
                    error.unwrap_or_else(|| "no description".to_string()),
                );
            }
        }
    }

    if cleared > 0 {
        info!(cleared, "Cleared expired handles; run upload again to refresh them");
        checkpoint.save().await?;
    }

    Ok(report)
}
