//! Bounded-concurrency uploader

use super::StageReport;
use crate::caption::CaptionBackend;
use crate::checkpoint::Checkpoint;
use crate::config::{BoundingBox, Config};
use crate::error::{Error, Result};
use crate::meta::{ImageFilter, ImageStore, Stage};
use crate::retry::RetryPolicy;
use futures::stream::{FuturesUnordered, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use indicatif::ProgressBar;
use reqwest::Client;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const JPEG_QUALITY: u8 = 90;

/// Result of uploading one URL
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub image_url: String,
    pub result: std::result::Result<String, String>,
}

/// Downloads images, re-encodes them to JPEG and uploads them to the
/// captioning backend with at most `concurrency` operations in flight.
pub struct BoundedUploader<'a> {
    backend: &'a dyn CaptionBackend,
    http: Client,
    scratch_dir: PathBuf,
    concurrency: usize,
    flush_interval: usize,
    retry: RetryPolicy,
}

impl<'a> BoundedUploader<'a> {
    pub fn new(backend: &'a dyn CaptionBackend, scratch_dir: impl Into<PathBuf>) -> Result<Self> {
        let defaults = crate::config::UploadConfig::default();
        let http = Client::builder()
            .timeout(Duration::from_secs(defaults.timeout_secs))
            .user_agent(&defaults.user_agent)
            .build()?;

        Ok(Self {
            backend,
            http,
            scratch_dir: scratch_dir.into(),
            concurrency: defaults.concurrency,
            flush_interval: defaults.flush_interval,
            retry: defaults.retry_policy(),
        })
    }

    pub fn from_config(backend: &'a dyn CaptionBackend, config: &Config) -> Result<Self> {
        let upload = &config.upload;
        let http = Client::builder()
            .timeout(Duration::from_secs(upload.timeout_secs))
            .user_agent(&upload.user_agent)
            .build()?;

        Ok(Self {
            backend,
            http,
            scratch_dir: config.paths.scratch_dir.clone(),
            concurrency: upload.concurrency,
            flush_interval: upload.flush_interval,
            retry: upload.retry_policy(),
        })
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: usize) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upload every URL, merging handles into `checkpoint`.
    ///
    /// Returns one outcome per input URL. The checkpoint is flushed every
    /// `flush_interval` completions and once more before returning.
    pub async fn upload_all(
        &self,
        checkpoint: &mut Checkpoint,
        urls: Vec<String>,
        progress: &ProgressBar,
    ) -> Result<Vec<UploadOutcome>> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;

        let semaphore = Semaphore::new(self.concurrency.max(1));
        let flush_interval = self.flush_interval.max(1);
        let mut in_flight = FuturesUnordered::new();

        for url in urls {
            let semaphore = &semaphore;
            in_flight.push(async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => self.upload_one(&url).await,
                    Err(e) => Err(Error::Other(format!("upload queue closed: {}", e))),
                };
                (url, result)
            });
        }

        let mut outcomes = Vec::with_capacity(in_flight.len());
        while let Some((url, result)) = in_flight.next().await {
            let result = match result {
                Ok(handle) => {
                    checkpoint.merge(url.clone(), handle.clone());
                    Ok(handle)
                }
                Err(e) => {
                    warn!(url = %url, "Upload failed: {}", e);
                    Err(e.to_string())
                }
            };
            outcomes.push(UploadOutcome {
                image_url: url,
                result,
            });
            progress.inc(1);

            if outcomes.len() % flush_interval == 0 {
                checkpoint.save().await?;
            }
        }

        checkpoint.save().await?;
        Ok(outcomes)
    }

    async fn upload_one(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Download {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;

        let jpeg = tokio::task::spawn_blocking(move || reencode_jpeg(&bytes)).await??;

        let path = scratch_file_for(&self.scratch_dir, url);
        tokio::fs::write(&path, &jpeg).await?;

        let result = self
            .retry
            .run("upload", || self.backend.upload(&path))
            .await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), "Could not remove scratch file: {}", e);
        }
        result
    }
}

/// Decode any supported image format and re-encode it as baseline JPEG
pub fn reencode_jpeg(bytes: &[u8]) -> Result<Vec<u8>> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        encoder.encode_image(&rgb)?;
    }
    Ok(out)
}

/// Upload stage: every image in scope without a remote handle
pub async fn run_upload_stage(
    store: &dyn ImageStore,
    checkpoint: &mut Checkpoint,
    uploader: &BoundedUploader<'_>,
    bbox: Option<BoundingBox>,
    progress: &ProgressBar,
) -> Result<StageReport> {
    let rows = store.select(&ImageFilter::missing_description(bbox)).await?;
    let new_urls = checkpoint.observe(rows.iter().map(|r| r.image_url.clone()));
    if new_urls > 0 {
        debug!(new_urls, "Observed new image URLs");
    }

    // Pending keys are unique, so rows sharing a URL upload once.
    let selected: HashSet<&str> = rows.iter().map(|r| r.image_url.as_str()).collect();
    let urls: Vec<String> = checkpoint
        .pending()
        .into_iter()
        .filter(|url| selected.contains(url.as_str()))
        .collect();

    info!(
        pending = urls.len(),
        uploaded = checkpoint.uploaded_count(),
        "Starting upload stage"
    );
    progress.set_length(urls.len() as u64);

    let outcomes = uploader.upload_all(checkpoint, urls, progress).await?;

    let mut report = StageReport::new(Stage::Upload);
    for outcome in &outcomes {
        match &outcome.result {
            Ok(_) => report.record_success(),
            Err(reason) => report.record_failure(&outcome.image_url, reason),
        }
    }
    Ok(report)
}

/// Location of the scratch file for `url` under `dir`
pub fn scratch_file_for(dir: &Path, url: &str) -> PathBuf {
    dir.join(format!("{}.jpg", blake3::hash(url.as_bytes()).to_hex()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ImageRecord;
    use crate::testing::{jpeg_server, png_bytes, FakeCaptionBackend, InMemoryImageStore};
    use tempfile::TempDir;

    #[test]
    fn test_reencode_png_to_jpeg() {
        let jpeg = reencode_jpeg(&png_bytes(8, 6)).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn test_reencode_rejects_garbage() {
        assert!(matches!(reencode_jpeg(b"not an image"), Err(Error::Image(_))));
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_flushed() {
        let tmp = TempDir::new().unwrap();
        let server = jpeg_server(&["a", "b", "c", "d"], &["gone"]).await;
        let urls: Vec<String> = ["a", "gone", "b", "c", "d"]
            .iter()
            .map(|n| format!("{}/img/{}.jpg", server.uri(), n))
            .collect();

        let backend = FakeCaptionBackend::new();
        let uploader = BoundedUploader::new(&backend, tmp.path().join("scratch"))
            .unwrap()
            .with_concurrency(2)
            .with_flush_interval(2)
            .with_retry(RetryPolicy::none());

        let mut checkpoint = Checkpoint::load(tmp.path().join("mappings.json")).unwrap();
        checkpoint.observe(urls.clone());
        let outcomes = uploader
            .upload_all(&mut checkpoint, urls.clone(), &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), urls.len());
        let failed: Vec<_> = outcomes.iter().filter(|o| o.result.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].image_url.ends_with("/gone.jpg"));
        assert!(failed[0].result.as_ref().unwrap_err().contains("404"));
        assert!(backend.max_in_flight() <= 2);

        let reloaded = Checkpoint::load(tmp.path().join("mappings.json")).unwrap();
        assert_eq!(reloaded.uploaded_count(), 4);
        assert_eq!(reloaded.pending(), vec![urls[1].clone()]);

        // Scratch files are cleaned up after upload.
        assert!(!scratch_file_for(&tmp.path().join("scratch"), &urls[0]).exists());
    }

    #[tokio::test]
    async fn test_periodic_flush_persists_completed_handles() {
        let tmp = TempDir::new().unwrap();
        let names = ["a", "b", "c", "d", "e"];
        let server = jpeg_server(&names, &[]).await;
        let urls: Vec<String> = names
            .iter()
            .map(|n| format!("{}/img/{}.jpg", server.uri(), n))
            .collect();

        // Two uploads complete, then the backend hangs and the run is cut off.
        let backend = FakeCaptionBackend::new().stalling_after(2);
        let uploader = BoundedUploader::new(&backend, tmp.path().join("scratch"))
            .unwrap()
            .with_concurrency(1)
            .with_flush_interval(2)
            .with_retry(RetryPolicy::none());

        let mut checkpoint = Checkpoint::load(tmp.path().join("mappings.json")).unwrap();
        checkpoint.observe(urls.clone());
        let interrupted = tokio::time::timeout(
            Duration::from_secs(2),
            uploader.upload_all(&mut checkpoint, urls.clone(), &ProgressBar::hidden()),
        )
        .await;
        assert!(interrupted.is_err());

        let on_disk = Checkpoint::load(tmp.path().join("mappings.json")).unwrap();
        assert_eq!(on_disk.uploaded_count(), 2);
        assert_eq!(on_disk.pending().len(), 3);
    }

    #[tokio::test]
    async fn test_rows_sharing_a_url_upload_once() {
        let tmp = TempDir::new().unwrap();
        let server = jpeg_server(&["shared"], &[]).await;
        let url = format!("{}/img/shared.jpg", server.uri());

        let mut first = ImageRecord::new(url.clone(), 1.0, 1.0);
        first.image_id = "first".to_string();
        let mut second = ImageRecord::new(url.clone(), 1.0, 1.0);
        second.image_id = "second".to_string();
        let store = InMemoryImageStore::new(vec![first, second]);

        let backend = FakeCaptionBackend::new();
        let uploader = BoundedUploader::new(&backend, tmp.path().join("scratch")).unwrap();
        let mut checkpoint = Checkpoint::load(tmp.path().join("mappings.json")).unwrap();

        let report =
            run_upload_stage(&store, &mut checkpoint, &uploader, None, &ProgressBar::hidden())
                .await
                .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(backend.upload_count(), 1);
        assert!(checkpoint.handle(&url).is_some());
    }

    #[tokio::test]
    async fn test_backend_upload_is_retried() {
        let tmp = TempDir::new().unwrap();
        let server = jpeg_server(&["a"], &[]).await;
        let url = format!("{}/img/a.jpg", server.uri());

        let backend = FakeCaptionBackend::new().failing_uploads(2);
        let uploader = BoundedUploader::new(&backend, tmp.path().join("scratch"))
            .unwrap()
            .with_retry(RetryPolicy::fixed(3, Duration::ZERO));

        let mut checkpoint = Checkpoint::load(tmp.path().join("mappings.json")).unwrap();
        let outcomes = uploader
            .upload_all(&mut checkpoint, vec![url.clone()], &ProgressBar::hidden())
            .await
            .unwrap();

        assert!(outcomes[0].result.is_ok());
        assert_eq!(backend.upload_attempts(), 3);
        assert!(checkpoint.handle(&url).is_some());
    }
}
