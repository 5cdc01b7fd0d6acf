//! Vector index integration
//!
//! This module provides:
//! - The [`VectorIndex`] trait used by the embedding stage and the search path
//! - A Qdrant-backed implementation (cosine collection, HNSW index)
//! - An exact-scan in-memory implementation

mod memory;
mod payload;

pub use memory::*;
pub use payload::*;

use crate::config::{Config, IndexConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CollectionStatus, CountPointsBuilder, CreateCollectionBuilder, Distance,
    GetCollectionInfoResponse, HnswConfigDiffBuilder, OptimizersConfigDiffBuilder, PointId,
    PointStruct, SearchPointsBuilder, UpdateCollectionBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One nearest-neighbor hit
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub image_id: String,
    /// Cosine distance (0 = identical direction)
    pub distance: f32,
}

/// Vector index contract
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimension every stored vector must have
    fn dimension(&self) -> usize;

    /// Insert or overwrite records keyed by image id
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<()>;

    /// Up to `limit` neighbors of `vector`, nearest first
    async fn query(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<Neighbor>>;

    /// (Re)build the ANN index over the whole collection
    async fn build_index(&self) -> Result<()>;

    /// Number of stored vectors
    async fn count(&self) -> Result<u64>;
}

/// Reject any record whose vector length differs from `dimension`
pub fn check_dimensions(records: &[EmbeddingRecord], dimension: usize) -> Result<()> {
    match records.iter().find(|r| r.vector.len() != dimension) {
        Some(mismatch) => Err(Error::DimensionMismatch {
            expected: dimension,
            got: mismatch.vector.len(),
        }),
        None => Ok(()),
    }
}

/// Information about a Qdrant collection
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub points_count: u64,
    pub indexed_vectors_count: u64,
    pub status: String,
}

/// Qdrant store handle
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
    index: IndexConfig,
}

impl QdrantStore {
    /// Connect to Qdrant using config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(
            &config.qdrant_url,
            &config.collection_name,
            config.embedding.dimension,
            config.index.clone(),
        )
        .await
    }

    /// Create a new store connection directly with URL and collection name
    pub async fn new(
        url: &str,
        collection: &str,
        dimension: usize,
        index: IndexConfig,
    ) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            dimension,
            index,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Ensure the collection exists with the expected vector size
    pub async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            debug!("Collection {} already exists", self.collection);

            let info = self.client.collection_info(&self.collection).await?;
            if let Some(size) = extract_vector_size(&info) {
                if size as usize != self.dimension {
                    return Err(Error::Qdrant(format!(
                        "Collection '{}' has vector size {}, but the embedding model produces {}. \
                         Use a new collection name or re-embed with the expected dimension.",
                        self.collection, size, self.dimension
                    )));
                }
            }
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.dimension
        );

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(
                        self.dimension as u64,
                        Distance::Cosine,
                    )),
            )
            .await?;

        info!("Collection {} created successfully", self.collection);
        Ok(())
    }

    /// Get collection info (point count, status)
    pub async fn get_collection_info(&self) -> Result<Option<CollectionInfo>> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(None);
        }

        let info = self.client.collection_info(&self.collection).await?;
        Ok(info.result.map(|result| CollectionInfo {
            points_count: result.points_count.unwrap_or(0),
            indexed_vectors_count: result.indexed_vectors_count.unwrap_or(0),
            status: format!("{:?}", result.status()),
        }))
    }

    async fn collection_status(&self) -> Result<CollectionStatus> {
        let info = self.client.collection_info(&self.collection).await?;
        Ok(info
            .result
            .map(|r| r.status())
            .unwrap_or(CollectionStatus::UnknownCollectionStatus))
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        check_dimensions(&records, self.dimension)?;

        debug!(
            "Upserting {} points to collection {}",
            records.len(),
            self.collection
        );

        let points: Vec<PointStruct> =
            records.iter().map(EmbeddingRecord::to_point_struct).collect();
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;
        Ok(())
    }

    async fn query(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<Neighbor>> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }

        debug!(
            "Searching collection {} with limit {}",
            self.collection, limit
        );

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector, limit as u64).with_payload(true),
            )
            .await?;

        let neighbors = response
            .result
            .into_iter()
            .map(|p| {
                let image_id = p
                    .payload
                    .get("image_id")
                    .cloned()
                    .map(json_from_qdrant_value)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| point_id_to_string(p.id));
                // Cosine collections report similarity as the score.
                Neighbor {
                    image_id,
                    distance: 1.0 - p.score,
                }
            })
            .collect();

        Ok(neighbors)
    }

    async fn build_index(&self) -> Result<()> {
        info!(
            collection = %self.collection,
            m = self.index.m,
            ef_construct = self.index.ef_construct,
            "Building HNSW index"
        );

        self.client
            .update_collection(
                UpdateCollectionBuilder::new(&self.collection)
                    .hnsw_config(
                        HnswConfigDiffBuilder::default()
                            .m(self.index.m)
                            .ef_construct(self.index.ef_construct),
                    )
                    .optimizers_config(
                        OptimizersConfigDiffBuilder::default()
                            .indexing_threshold(self.index.indexing_threshold_kb),
                    ),
            )
            .await?;

        let deadline = Instant::now() + Duration::from_secs(self.index.build_timeout_secs);
        loop {
            match self.collection_status().await? {
                CollectionStatus::Green => break,
                CollectionStatus::Red => {
                    return Err(Error::Qdrant(format!(
                        "Collection {} reported red status while indexing",
                        self.collection
                    )))
                }
                status if Instant::now() >= deadline => {
                    return Err(Error::Qdrant(format!(
                        "Index build on {} did not finish within {}s (status {:?})",
                        self.collection, self.index.build_timeout_secs, status
                    )))
                }
                status => {
                    debug!(?status, "Waiting for index build");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }

        info!("Index on {} is ready", self.collection);
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        if !self.client.collection_exists(&self.collection).await? {
            warn!("Collection {} does not exist", self.collection);
            return Ok(0);
        }
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}

fn extract_vector_size(info: &GetCollectionInfoResponse) -> Option<u64> {
    let result = info.result.as_ref()?;
    let config = result.config.as_ref()?;
    let params = config.params.as_ref()?;
    let vectors_config = params.vectors_config.as_ref()?;

    match vectors_config.config.as_ref()? {
        qdrant_client::qdrant::vectors_config::Config::Params(params) => Some(params.size),
        qdrant_client::qdrant::vectors_config::Config::ParamsMap(_) => None,
    }
}

/// Convert PointId to string
fn point_id_to_string(id: Option<PointId>) -> String {
    match id {
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid)),
        }) => uuid,
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(num)),
        }) => num.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_dimensions() {
        let ok = vec![EmbeddingRecord::new("a", vec![0.0; 3])];
        assert!(check_dimensions(&ok, 3).is_ok());

        let bad = vec![
            EmbeddingRecord::new("a", vec![0.0; 3]),
            EmbeddingRecord::new("b", vec![0.0; 2]),
        ];
        assert!(matches!(
            check_dimensions(&bad, 3),
            Err(Error::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[tokio::test]
    async fn test_upsert_rejects_dimension_mismatch() {
        // No server is contacted: the check runs before any request.
        let store = QdrantStore::new(
            "http://127.0.0.1:6334",
            "test_collection",
            3,
            IndexConfig::default(),
        )
        .await
        .unwrap();

        let err = store
            .upsert(vec![EmbeddingRecord::new("img-1", vec![0.1, 0.2])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, got: 2 }));
    }

    #[test]
    fn test_point_id_to_string() {
        let id = PointId::from("6f1c2a3e-9d4b-4c1a-8e2f-0a1b2c3d4e5f".to_string());
        assert_eq!(
            point_id_to_string(Some(id)),
            "6f1c2a3e-9d4b-4c1a-8e2f-0a1b2c3d4e5f"
        );
        assert_eq!(point_id_to_string(Some(PointId::from(7u64))), "7");
        assert_eq!(point_id_to_string(None), "");
    }
}
