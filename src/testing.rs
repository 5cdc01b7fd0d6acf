//! In-memory fakes shared by unit tests

use crate::caption::{CaptionBackend, DecodingParams};
use crate::embed::{EmbedMode, Embedder};
use crate::error::{Error, Result};
use crate::meta::{DescriptionFilter, ImageFilter, ImageRecord, ImageStore};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A small PNG with a gradient
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 128]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Serves `/img/{name}.jpg` with PNG bytes for `ok` names and 404 for `missing`
pub async fn jpeg_server(ok: &[&str], missing: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    for name in ok {
        Mock::given(method("GET"))
            .and(path(format!("/img/{}.jpg", name)))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(png_bytes(16, 12)),
            )
            .mount(&server)
            .await;
    }
    for name in missing {
        Mock::given(method("GET"))
            .and(path(format!("/img/{}.jpg", name)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
    }
    server
}

struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Captioning backend that hands out `files/N` handles and canned captions
#[derive(Default)]
pub struct FakeCaptionBackend {
    uploads: AtomicUsize,
    upload_attempts: AtomicUsize,
    failing_uploads: AtomicUsize,
    stall_after: Option<usize>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    generate_attempts: Mutex<HashMap<String, usize>>,
    failing: HashSet<String>,
    expired: HashSet<String>,
}

impl FakeCaptionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` upload attempts fail with a transient error
    pub fn failing_uploads(self, n: usize) -> Self {
        self.failing_uploads.store(n, Ordering::SeqCst);
        self
    }

    /// Uploads after the first `n` successful ones never complete
    pub fn stalling_after(mut self, n: usize) -> Self {
        self.stall_after = Some(n);
        self
    }

    pub fn failing_generate(mut self, handle: &str) -> Self {
        self.failing.insert(handle.to_string());
        self
    }

    pub fn expired_handle(mut self, handle: &str) -> Self {
        self.expired.insert(handle.to_string());
        self
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn upload_attempts(&self) -> usize {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn generate_attempts(&self, handle: &str) -> usize {
        self.generate_attempts
            .lock()
            .unwrap()
            .get(handle)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CaptionBackend for FakeCaptionBackend {
    async fn upload(&self, path: &Path) -> Result<String> {
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        if self.stall_after.is_some_and(|n| self.uploads.load(Ordering::SeqCst) >= n) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        let bytes = tokio::fs::read(path).await?;
        if bytes.get(..2) != Some(&[0xFF, 0xD8][..]) {
            return Err(Error::Other("upload is not a JPEG".to_string()));
        }

        let fail = self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::Upload("HTTP 503".to_string()));
        }

        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("files/{}", n))
    }

    async fn generate(
        &self,
        handle: &str,
        _prompt: &str,
        _params: &DecodingParams,
    ) -> Result<String> {
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        *self
            .generate_attempts
            .lock()
            .unwrap()
            .entry(handle.to_string())
            .or_default() += 1;
        tokio::time::sleep(Duration::from_millis(2)).await;

        if self.expired.contains(handle) {
            return Err(Error::HandleExpired(handle.to_string()));
        }
        if self.failing.contains(handle) {
            return Err(Error::Caption("quota exceeded".to_string()));
        }
        Ok(format!("Description:\nA quiet street seen through {}.", handle))
    }
}

const VOCABULARY: &[&str] = &[
    "cat", "dog", "tree", "street", "ball", "car", "house", "river", "park", "wall", "bridge",
    "tram",
];

/// Bag-of-keywords embedder with a constant bias component, so no vector is zero
#[derive(Default)]
pub struct KeywordEmbedder {
    modes: Mutex<Vec<EmbedMode>>,
    fail_on: Option<String>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any call whose batch contains a text with `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    /// Mode of every call, in order
    pub fn modes(&self) -> Vec<EmbedMode> {
        self.modes.lock().unwrap().clone()
    }

    fn vectorize(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; VOCABULARY.len() + 1];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            if let Some(i) = VOCABULARY.iter().position(|w| *w == token) {
                vector[i] += 1.0;
            }
        }
        vector[VOCABULARY.len()] = 0.1;
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: Vec<String>, mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        self.modes.lock().unwrap().push(mode);
        if let Some(needle) = &self.fail_on {
            if texts.iter().any(|t| t.contains(needle.as_str())) {
                return Err(Error::Embedding("HTTP 500".to_string()));
            }
        }
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        VOCABULARY.len() + 1
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }
}

/// Relational store kept in memory. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryImageStore {
    rows: Arc<Mutex<BTreeMap<String, ImageRecord>>>,
    reverse_joins: bool,
}

impl InMemoryImageStore {
    pub fn new(rows: Vec<ImageRecord>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(
                rows.into_iter().map(|r| (r.image_id.clone(), r)).collect(),
            )),
            reverse_joins: false,
        }
    }

    /// Return `select_by_ids` rows in reverse id order
    pub fn reversing_joins(mut self) -> Self {
        self.reverse_joins = true;
        self
    }

    pub fn all(&self) -> Vec<ImageRecord> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn remove(&self, image_id: &str) {
        self.rows.lock().unwrap().remove(image_id);
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn select(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>> {
        let rows = self.rows.lock().unwrap();
        let selected = rows
            .values()
            .filter(|r| filter.bbox.map_or(true, |b| b.contains(r.latitude, r.longitude)))
            .filter(|r| match filter.description {
                DescriptionFilter::Any => true,
                DescriptionFilter::Missing => r.description.is_none(),
                DescriptionFilter::Present => r.description.is_some(),
            })
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(selected)
    }

    async fn select_by_ids(&self, ids: &[String]) -> Result<Vec<ImageRecord>> {
        let rows = self.rows.lock().unwrap();
        let mut selected: Vec<ImageRecord> = rows
            .values()
            .filter(|r| ids.contains(&r.image_id))
            .cloned()
            .collect();
        if self.reverse_joins {
            selected.reverse();
        }
        Ok(selected)
    }

    async fn update_description(&self, image_id: &str, description: &str) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(image_id) {
            Some(row) => {
                row.description = Some(description.to_string());
                Ok(())
            }
            None => Err(Error::Other(format!("Image not found: {}", image_id))),
        }
    }
}
