//! Text-to-image search
//!
//! A query is embedded in query mode, matched against the vector index, and
//! the hits are joined with image metadata in a single lookup. Results keep
//! the index ranking; the join is aligned by image id, never by position.

use crate::embed::{EmbedMode, Embedder};
use crate::error::{Error, Result};
use crate::meta::{ImageRecord, ImageStore};
use crate::store::VectorIndex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Cosine similarity for a cosine distance
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 - distance
}

/// Trim and validate a query; returns the trimmed text
pub fn validate_query(query: &str, max_chars: usize) -> Result<&str> {
    let trimmed = query.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(Error::InvalidQuery("query must not be empty".to_string()));
    }
    if len > max_chars {
        return Err(Error::InvalidQuery(format!(
            "query is {} characters, maximum is {}",
            len, max_chars
        )));
    }
    Ok(trimmed)
}

/// One ranked result
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: ImageRecord,
    pub distance: f32,
    pub similarity: f32,
}

/// Search response body
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
    /// `(latitude, longitude, similarity)` in ranking order
    pub heatmap_data: Vec<(f64, f64, f32)>,
}

pub struct SearchService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn ImageStore>,
    limit: usize,
    max_query_chars: usize,
}

impl SearchService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn ImageStore>,
        limit: usize,
        max_query_chars: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            limit,
            max_query_chars,
        }
    }

    pub async fn search(&self, query: &str) -> Result<SearchResponse> {
        let query = validate_query(query, self.max_query_chars)?;

        let vector = self
            .embedder
            .embed(vec![query.to_string()], EmbedMode::Query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("no vector returned for query".to_string()))?;

        let neighbors = self.index.query(vector, self.limit).await?;
        let ids: Vec<String> = neighbors.iter().map(|n| n.image_id.clone()).collect();

        let mut rows: HashMap<String, ImageRecord> = self
            .store
            .select_by_ids(&ids)
            .await?
            .into_iter()
            .map(|r| (r.image_id.clone(), r))
            .collect();

        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            match rows.remove(&neighbor.image_id) {
                Some(record) => results.push(SearchHit {
                    record,
                    distance: neighbor.distance,
                    similarity: similarity_from_distance(neighbor.distance),
                }),
                None => debug!(
                    image_id = %neighbor.image_id,
                    "Index hit has no metadata row, dropping"
                ),
            }
        }

        let heatmap_data = results
            .iter()
            .map(|hit| (hit.record.latitude, hit.record.longitude, hit.similarity))
            .collect();

        info!(query, results = results.len(), "Search complete");
        Ok(SearchResponse {
            query: query.to_string(),
            results,
            heatmap_data,
        })
    }
}
