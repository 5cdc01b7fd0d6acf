//! Import command: load image records into the metadata database

use crate::error::{Error, Result};
use crate::meta::{ImageRecord, MetaDb};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportStats {
    pub read: usize,
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Check one record before it reaches the database
pub fn validate_record(record: &ImageRecord) -> std::result::Result<(), String> {
    let url = Url::parse(&record.image_url).map_err(|e| format!("invalid URL: {}", e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported URL scheme '{}'", url.scheme()));
    }
    if !(-90.0..=90.0).contains(&record.latitude) {
        return Err(format!("latitude {} out of range", record.latitude));
    }
    if !(-180.0..=180.0).contains(&record.longitude) {
        return Err(format!("longitude {} out of range", record.longitude));
    }
    Ok(())
}

/// Import a JSON array of image records. Invalid records are skipped.
pub async fn cmd_import(db: &MetaDb, path: &Path) -> Result<ImportStats> {
    let content = tokio::fs::read_to_string(path).await?;
    let records: Vec<ImageRecord> = serde_json::from_str(&content).map_err(|e| {
        Error::Other(format!("{} is not a JSON array of image records: {}", path.display(), e))
    })?;

    let mut stats = ImportStats {
        read: records.len(),
        ..Default::default()
    };

    let mut valid = Vec::with_capacity(records.len());
    for record in records {
        match validate_record(&record) {
            Ok(()) => valid.push(record),
            Err(reason) => {
                warn!(image_url = %record.image_url, "Skipping record: {}", reason);
                stats.skipped += 1;
                stats.errors.push(format!("{}: {}", record.image_url, reason));
            }
        }
    }

    stats.imported = db.upsert_images(&valid).await?;
    info!(imported = stats.imported, skipped = stats.skipped, "Import complete");
    Ok(stats)
}

pub fn print_import_stats(stats: &ImportStats) {
    println!("\n✓ Import complete");
    println!("  Records read: {}", stats.read);
    println!("  Imported: {}", stats.imported);
    if stats.skipped > 0 {
        println!("  Skipped: {}", stats.skipped);
        for error in &stats.errors {
            println!("    • {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ImageFilter, ImageStore};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_import_skips_invalid_records() {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::open(&tmp.path().join("metadata.db")).await.unwrap();

        let file = tmp.path().join("images.json");
        std::fs::write(
            &file,
            r#"[
                {"image_id": "a", "image_url": "https://img.example.com/a.jpg",
                 "latitude": 43.65, "longitude": -79.38, "heading": 90.0},
                {"image_url": "https://img.example.com/b.jpg",
                 "latitude": 43.66, "longitude": -79.39},
                {"image_url": "not a url", "latitude": 1.0, "longitude": 1.0},
                {"image_url": "https://img.example.com/c.jpg", "latitude": 123.0, "longitude": 1.0}
            ]"#,
        )
        .unwrap();

        let stats = cmd_import(&db, &file).await.unwrap();
        assert_eq!(stats.read, 4);
        assert_eq!(stats.imported, 2);
        assert_eq!(stats.skipped, 2);

        let rows = db.select(&ImageFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 2);
        let a = rows.iter().find(|r| r.image_id == "a").unwrap();
        assert_eq!(a.heading, Some(90.0));
        // Records without an id get a generated one.
        assert!(rows
            .iter()
            .any(|r| r.image_id != "a" && uuid::Uuid::try_parse(&r.image_id).is_ok()));
    }

    #[tokio::test]
    async fn test_import_rejects_non_array() {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::open(&tmp.path().join("metadata.db")).await.unwrap();
        let file = tmp.path().join("images.json");
        std::fs::write(&file, r#"{"image_url": "https://x/a.jpg"}"#).unwrap();

        assert!(cmd_import(&db, &file).await.is_err());
    }
}
