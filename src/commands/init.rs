//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::store::QdrantStore;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub force: bool,
    /// Also create the Qdrant collection
    pub create_collection: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub config_path: String,
    pub db_path: String,
    pub checkpoint_path: String,
    pub collection_created: bool,
}

/// Write a default config, create the database and scratch directory
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let mut config = Config::default();
    config.init_paths(Some(options.base_dir));

    if config.paths.config_file.exists() && !options.force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.save()?;
    std::fs::create_dir_all(&config.paths.scratch_dir)?;
    MetaDb::connect(&config).await?;
    info!("Initialized database at {:?}", config.paths.db_file);

    let mut collection_created = false;
    if options.create_collection {
        match ensure_collection(&config).await {
            Ok(()) => collection_created = true,
            Err(e) => warn!("Could not create Qdrant collection (is Qdrant running?): {}", e),
        }
    }

    Ok(InitReport {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        checkpoint_path: config.checkpoint_path().display().to_string(),
        collection_created,
    })
}

async fn ensure_collection(config: &Config) -> Result<()> {
    let store = QdrantStore::connect(config).await?;
    store.ensure_collection().await
}

pub fn print_init_report(report: &InitReport) {
    println!("✓ streetlens initialized");
    println!("  Config: {}", report.config_path);
    println!("  Database: {}", report.db_path);
    println!("  Checkpoint: {}", report.checkpoint_path);
    if !report.collection_created {
        println!("  Qdrant collection: not created yet (created on first 'embed')");
    }
    println!("\nNext steps:");
    println!("  1. export GEMINI_API_KEY=... and COHERE_API_KEY=...");
    println!("  2. Start Qdrant: docker run -p 6333:6333 -p 6334:6334 qdrant/qdrant");
    println!("  3. Import images: streetlens import images.json");
    println!("  4. Run the pipeline: streetlens run");
}
