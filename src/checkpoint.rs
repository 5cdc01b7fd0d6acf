//! Checkpoint store for upload progress
//!
//! The checkpoint is a JSON object mapping image URL to the captioning
//! backend's remote handle. An empty handle means "not yet uploaded". Entries
//! are created lazily and never removed. Writes go through a temporary file in
//! the same directory followed by a rename, so readers only ever see a
//! complete mapping.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Image URL to remote handle
pub type Mapping = BTreeMap<String, String>;

/// One checkpoint entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub image_url: String,
    pub remote_handle: String,
}

impl MappingEntry {
    pub fn is_uploaded(&self) -> bool {
        !self.remote_handle.is_empty()
    }
}

/// File-backed checkpoint
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
    mapping: Mapping,
}

impl Checkpoint {
    /// Load the checkpoint at `path`. A missing file yields an empty mapping.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mapping = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<Mapping>(&content).map_err(|e| {
                Error::Checkpoint(format!("{} is not a valid checkpoint: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Mapping::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = mapping.len(), "Loaded checkpoint");
        Ok(Self { path, mapping })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<MappingEntry> {
        self.mapping.get(url).map(|handle| MappingEntry {
            image_url: url.to_string(),
            remote_handle: handle.clone(),
        })
    }

    /// Non-empty handle for `url`, if uploaded
    pub fn handle(&self, url: &str) -> Option<&str> {
        self.mapping
            .get(url)
            .map(String::as_str)
            .filter(|h| !h.is_empty())
    }

    /// Record URLs seen for the first time with an empty handle.
    /// Returns how many were new.
    pub fn observe<I, S>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.mapping.len();
        for url in urls {
            self.mapping.entry(url.into()).or_default();
        }
        self.mapping.len() - before
    }

    /// Insert or overwrite the handle for one URL
    pub fn merge(&mut self, url: impl Into<String>, handle: impl Into<String>) {
        self.mapping.insert(url.into(), handle.into());
    }

    /// URLs that still need uploading, in key order
    pub fn pending(&self) -> Vec<String> {
        self.mapping
            .iter()
            .filter(|(_, handle)| handle.is_empty())
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn uploaded_count(&self) -> usize {
        self.mapping.values().filter(|h| !h.is_empty()).count()
    }

    /// Atomically replace the checkpoint file with the current mapping.
    ///
    /// The write and fsync run on the blocking pool against a snapshot, so
    /// later merges do not affect this flush.
    pub async fn save(&self) -> Result<()> {
        let path = self.path.clone();
        let snapshot = self.mapping.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &snapshot)).await?
    }
}

fn write_atomic(path: &Path, mapping: &Mapping) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let json = serde_json::to_string_pretty(mapping)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| {
        Error::Checkpoint(format!("failed to replace {}: {}", path.display(), e.error))
    })?;

    debug!(path = %path.display(), entries = mapping.len(), "Flushed checkpoint");
    Ok(())
}
