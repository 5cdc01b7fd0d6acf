use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    input_type: &'a str,
    embedding_types: [&'a str; 1],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Typed { embeddings: TypedEmbeddings },
    Embeddings { embeddings: Vec<Vec<f32>> },
    Vectors { vectors: Vec<Vec<f32>> },
    Data { data: Vec<EmbeddingData> },
}

#[derive(Debug, Clone, Deserialize)]
struct TypedEmbeddings {
    float: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Typed { embeddings } => embeddings.float,
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
            EmbeddingResponse::Vectors { vectors } => vectors,
            EmbeddingResponse::Data { data } => data.into_iter().map(|d| d.embedding).collect(),
        }
    }
}

/// Client for a remote text embedding service (`POST /v2/embed`)
pub struct EmbeddingBackendClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl EmbeddingBackendClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        let timeout = Duration::from_secs(30);
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
            retry: RetryPolicy::fixed(3, Duration::from_millis(200)),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid embedding backend URL: {}", e)))
    }

    async fn send_once<T: for<'de> Deserialize<'de>>(
        &self,
        request: &reqwest::RequestBuilder,
    ) -> Result<T> {
        let req = request
            .try_clone()
            .ok_or_else(|| Error::Embedding("Failed to clone backend request".to_string()))?;
        let response = req
            .send()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Config(format!(
                "Embedding backend rejected the request ({}): {}",
                status, body
            )));
        }
        let response = response
            .error_for_status()
            .map_err(|e| Error::Embedding(e.to_string()))?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Embedding(format!("Malformed embedding response: {}", e)))
    }

    async fn send_with_retry<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        self.retry
            .run("embedding backend", || self.send_once(&request))
            .await
    }

    /// Embed `texts` with the given `input_type` (`search_document` or `search_query`)
    pub async fn embed_text(
        &self,
        model: &str,
        texts: &[String],
        input_type: &str,
    ) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint("/v2/embed")?;
        let request = EmbedRequest {
            model,
            texts,
            input_type,
            embedding_types: ["float"],
        };

        let mut builder = self.client.post(url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let parsed: EmbeddingResponse = self.send_with_retry(builder).await?;
        let embeddings = parsed.into_embeddings();
        if embeddings.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "Embedding backend returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        Ok(embeddings)
    }
}
