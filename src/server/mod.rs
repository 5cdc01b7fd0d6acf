//! HTTP search API

mod api;
mod error;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Error, Result};

pub use self::error::AppError;
pub use self::state::*;

/// Build the API router
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", get(api::search_handler))
        .route("/health", get(api::health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `bind` until the process is stopped
pub async fn serve(state: Arc<AppState>, bind: &str) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| Error::Config(format!("Invalid bind address '{}': {}", bind, e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Search API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_app(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{EmbedMode, Embedder};
    use crate::meta::ImageRecord;
    use crate::search::SearchService;
    use crate::store::{EmbeddingRecord, MemoryIndex, VectorIndex};
    use crate::testing::{InMemoryImageStore, KeywordEmbedder};
    use serde_json::Value;

    async fn spawn_app() -> String {
        let mut tram = ImageRecord::new("https://img.example.com/tram.jpg", 43.65, -79.38);
        tram.image_id = "tram".to_string();
        tram.description = Some("a tram crossing a bridge".to_string());

        let embedder = Arc::new(KeywordEmbedder::new());
        let index = Arc::new(MemoryIndex::new(embedder.dimension()));
        let vectors = embedder
            .embed(vec![tram.description.clone().unwrap()], EmbedMode::Document)
            .await
            .unwrap();
        index
            .upsert(vec![EmbeddingRecord::new("tram", vectors[0].clone())])
            .await
            .unwrap();

        let store = Arc::new(InMemoryImageStore::new(vec![tram]));
        let search = SearchService::new(embedder, index, store, 100, 100);
        let app = create_app(AppState::new(search));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_health() {
        let base = spawn_app().await;
        let body: Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "OK");
        assert_eq!(body["message"], "Health check passed");
    }

    #[tokio::test]
    async fn test_search_returns_results_and_heatmap() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();
        let response = client
            .get(format!("{}/search", base))
            .query(&[("q", "tram")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["query"], "tram");
        assert_eq!(body["results"][0]["image_id"], "tram");
        assert_eq!(body["heatmap_data"][0][0], 43.65);
    }

    #[tokio::test]
    async fn test_invalid_query_is_bad_request() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{}/search", base))
            .query(&[("q", "   ")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("empty"));

        let missing = client.get(format!("{}/search", base)).send().await.unwrap();
        assert_eq!(missing.status(), 400);
    }
}
