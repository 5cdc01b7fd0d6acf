//! Caption generation backends
//!
//! The pipeline only needs two calls from a captioning vendor: upload a
//! local image and get back an opaque handle, then turn a handle into text.

mod gemini;
mod rate_limit;

pub use gemini::*;
pub use rate_limit::*;

use crate::config::CaptionConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;

/// Decoding parameters sent with every generation call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub response_mime_type: String,
}

impl DecodingParams {
    pub fn from_config(config: &CaptionConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
            response_mime_type: "text/plain".to_string(),
        }
    }
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self::from_config(&CaptionConfig::default())
    }
}

/// Trait for captioning providers
#[async_trait]
pub trait CaptionBackend: Send + Sync {
    /// Upload a local image; returns the backend's handle for it
    async fn upload(&self, path: &Path) -> Result<String>;

    /// Generate a description for a previously uploaded handle
    async fn generate(
        &self,
        handle: &str,
        prompt: &str,
        params: &DecodingParams,
    ) -> Result<String>;
}

/// Create a captioning backend based on configuration
pub fn create_caption_backend(config: &CaptionConfig) -> Result<Box<dyn CaptionBackend>> {
    Ok(Box::new(GeminiClient::new(config)?))
}

/// Normalize generated text: keep what follows the last `:`, turn newlines
/// into spaces, trim.
///
/// Models often answer with a preamble such as `"Here is a description:"`;
/// everything up to the last colon is dropped. This also drops legitimate
/// text before a colon inside the description.
pub fn normalize_caption(raw: &str) -> String {
    let tail = raw.rsplit(':').next().unwrap_or(raw);
    tail.replace('\n', " ").trim().to_string()
}
