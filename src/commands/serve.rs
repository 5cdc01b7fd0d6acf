//! Serve command: run the HTTP search API

use super::build_search_service;
use crate::config::Config;
use crate::error::Result;
use crate::meta::MetaDb;
use crate::server::{serve, AppState};

pub async fn cmd_serve(config: &Config, db: &MetaDb, bind: Option<&str>) -> Result<()> {
    let search = build_search_service(config, db).await?;
    let bind = bind.unwrap_or(config.search.bind.as_str());
    serve(AppState::new(search), bind).await
}
