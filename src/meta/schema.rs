//! SQLite schema definition

/// SQL schema for the metadata database
pub const SCHEMA_SQL: &str = r#"
-- Images: geo-tagged street-level photographs
CREATE TABLE IF NOT EXISTS images (
    image_id TEXT PRIMARY KEY,
    image_url TEXT NOT NULL UNIQUE,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    heading REAL,
    pitch REAL,
    fov REAL,
    captured_at TEXT,
    description TEXT
);

-- Pipeline runs: per-stage history and accounting
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id TEXT PRIMARY KEY,
    stage TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    processed INTEGER DEFAULT 0,
    succeeded INTEGER DEFAULT 0,
    failed INTEGER DEFAULT 0,
    errors_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_images_location ON images(latitude, longitude);
CREATE INDEX IF NOT EXISTS idx_runs_stage ON pipeline_runs(stage, started_at);
"#;
