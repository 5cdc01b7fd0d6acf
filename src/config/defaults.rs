//! Default values for configuration

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default collection name
pub fn default_collection_name() -> String {
    "image_embeddings".to_string()
}

/// Default checkpoint file name (relative to the base dir)
pub fn default_checkpoint_file() -> String {
    "mappings.json".to_string()
}

/// Default number of uploads allowed in flight
pub fn default_upload_concurrency() -> usize {
    32
}

/// Default number of completions between checkpoint flushes
pub fn default_upload_flush_interval() -> usize {
    100
}

/// Default attempts for the backend upload call
pub fn default_upload_max_attempts() -> u32 {
    10
}

/// Default fixed delay between upload attempts
pub fn default_upload_retry_delay_ms() -> u64 {
    2000
}

/// Default download timeout in seconds
pub fn default_upload_timeout() -> u64 {
    30
}

/// Default user agent for image downloads
pub fn default_user_agent() -> String {
    format!("streetlens/{} (Image Ingest)", env!("CARGO_PKG_VERSION"))
}

/// Default captioning backend base URL
pub fn default_caption_backend_url() -> String {
    std::env::var("STREETLENS_CAPTION_BACKEND_URL")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string())
}

/// Default environment variable holding the captioning API key
pub fn default_caption_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

/// Default generation model
pub fn default_caption_model() -> String {
    "gemini-1.5-flash-002".to_string()
}

/// Default caption prompt
pub fn default_caption_prompt() -> String {
    "Describe the image in a detailed unformatted paragraph. Don't mention the Google logo."
        .to_string()
}

pub fn default_caption_temperature() -> f32 {
    0.0
}

pub fn default_caption_top_p() -> f32 {
    0.95
}

pub fn default_caption_top_k() -> u32 {
    40
}

pub fn default_caption_max_output_tokens() -> u32 {
    512
}

/// Default caption sub-batch width
pub fn default_caption_batch_size() -> usize {
    50
}

/// Default attempts per generation call
pub fn default_caption_max_attempts() -> u32 {
    3
}

/// Default fixed delay between generation attempts
pub fn default_caption_retry_delay_ms() -> u64 {
    1000
}

/// Default embedding backend base URL
pub fn default_embedding_backend_url() -> String {
    std::env::var("STREETLENS_EMBEDDING_BACKEND_URL")
        .unwrap_or_else(|_| "https://api.cohere.com".to_string())
}

/// Default environment variable holding the embedding API key
pub fn default_embedding_api_key_env() -> String {
    "COHERE_API_KEY".to_string()
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "embed-english-v3.0".to_string()
}

/// Default embedding dimension (embed-english-v3.0)
pub fn default_embedding_dimension() -> usize {
    1024
}

/// Largest batch the embedding backend accepts per request
pub fn default_embedding_batch_size() -> usize {
    96
}

/// Default HNSW graph degree
pub fn default_index_m() -> u64 {
    16
}

/// Default HNSW construction beam width
pub fn default_index_ef_construct() -> u64 {
    100
}

/// Segment size (KB) above which Qdrant builds the HNSW graph
pub fn default_index_indexing_threshold_kb() -> u64 {
    1
}

/// How long to wait for the index build to settle
pub fn default_index_build_timeout() -> u64 {
    120
}

/// Default number of neighbors per query
pub fn default_search_limit() -> usize {
    100
}

/// Default maximum query length in characters
pub fn default_search_max_query_chars() -> usize {
    100
}

/// Default bind address for the search server
pub fn default_search_bind() -> String {
    "0.0.0.0:8000".to_string()
}
