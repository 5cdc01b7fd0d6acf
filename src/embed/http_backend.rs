use super::{EmbedMode, Embedder};
use crate::config::EmbeddingConfig;
use crate::embedding_backend::EmbeddingBackendClient;
use crate::error::{Error, Result};
use async_trait::async_trait;

pub struct HttpEmbedder {
    client: EmbeddingBackendClient,
    model_id: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = EmbeddingBackendClient::new(&config.backend_url, config.api_key())?;
        Ok(Self {
            client,
            model_id: config.model.clone(),
            dimension: config.dimension,
        })
    }

    fn validate_dimensions(&self, embeddings: &[Vec<f32>]) -> Result<()> {
        if let Some(mismatch) = embeddings.iter().find(|vec| vec.len() != self.dimension) {
            return Err(Error::Embedding(format!(
                "Embedding dimension mismatch for model '{}': expected {}, got {}",
                self.model_id,
                self.dimension,
                mismatch.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>, mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .client
            .embed_text(&self.model_id, &texts, mode.input_type())
            .await?;
        self.validate_dimensions(&embeddings)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}
