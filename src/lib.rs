//! streetlens: captioning, embedding and text search over geo-tagged images
//!
//! The ingestion pipeline runs in four resumable stages (upload, caption,
//! embed, index). The search path turns a text query into ranked images and
//! heatmap points.

pub mod batch;
pub mod caption;
pub mod checkpoint;
pub mod commands;
pub mod config;
pub mod embed;
pub mod embedding_backend;
pub mod error;
pub mod meta;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod search;
pub mod server;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
