//! Embedding generation
//!
//! This module provides an abstraction over text embedding models with:
//! - A trait for different embedding backends
//! - An HTTP embedding backend
//! - Separate document and query modes, since asymmetric models embed
//!   stored passages and search queries differently

mod http_backend;

pub use http_backend::*;

use crate::config::EmbeddingConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which side of retrieval a text is embedded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedMode {
    /// Stored descriptions
    Document,
    /// User search queries
    Query,
}

impl EmbedMode {
    pub fn input_type(&self) -> &'static str {
        match self {
            EmbedMode::Document => "search_document",
            EmbedMode::Query => "search_query",
        }
    }
}

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; the result is aligned with the input
    async fn embed(&self, texts: Vec<String>, mode: EmbedMode) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    let embedder = HttpEmbedder::new(config)?;
    Ok(Box::new(embedder))
}
