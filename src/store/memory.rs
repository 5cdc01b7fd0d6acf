//! Exact-scan in-memory vector index

use super::{check_dimensions, EmbeddingRecord, Neighbor, VectorIndex};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Brute-force cosine index. Suitable for tests and small local runs.
pub struct MemoryIndex {
    dimension: usize,
    vectors: RwLock<BTreeMap<String, Vec<f32>>>,
    builds: AtomicUsize,
}

impl MemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: RwLock::new(BTreeMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    /// How many times `build_index` has run
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.vectors
            .read()
            .map(|v| v.contains_key(image_id))
            .unwrap_or(false)
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

fn poisoned() -> Error {
    Error::Other("memory index lock poisoned".to_string())
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        check_dimensions(&records, self.dimension)?;
        let mut vectors = self.vectors.write().map_err(|_| poisoned())?;
        for record in records {
            vectors.insert(record.image_id, record.vector);
        }
        Ok(())
    }

    async fn query(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<Neighbor>> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }

        let vectors = self.vectors.read().map_err(|_| poisoned())?;
        let mut neighbors: Vec<Neighbor> = vectors
            .iter()
            .map(|(id, stored)| Neighbor {
                image_id: id.clone(),
                distance: cosine_distance(&vector, stored),
            })
            .collect();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(limit);
        Ok(neighbors)
    }

    async fn build_index(&self) -> Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.vectors.read().map_err(|_| poisoned())?.len() as u64)
    }
}
