//! Search command implementation

use crate::config::Config;
use crate::embed::create_embedder;
use crate::error::Result;
use crate::meta::MetaDb;
use crate::search::{SearchResponse, SearchService};
use crate::store::QdrantStore;
use std::sync::Arc;

/// Wire the search service against the configured backends
pub async fn build_search_service(config: &Config, db: &MetaDb) -> Result<SearchService> {
    let embedder = create_embedder(&config.embedding)?;
    let store = QdrantStore::connect(config).await?;

    Ok(SearchService::new(
        Arc::from(embedder),
        Arc::new(store),
        Arc::new(db.clone()),
        config.search.limit,
        config.search.max_query_chars,
    ))
}

pub async fn cmd_search(config: &Config, db: &MetaDb, query: &str) -> Result<SearchResponse> {
    let service = build_search_service(config, db).await?;
    service.search(query).await
}

/// Print search results to console
pub fn print_search_results(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No results found for '{}'.", response.query);
        return;
    }

    println!("\nResults for '{}':\n", response.query);
    for (i, hit) in response.results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({:.5}, {:.5})",
            i + 1,
            hit.similarity,
            hit.record.image_url,
            hit.record.latitude,
            hit.record.longitude
        );
        if let Some(description) = &hit.record.description {
            let preview: String = description.chars().take(200).collect();
            println!("   {}", preview);
        }
        println!();
    }
}
