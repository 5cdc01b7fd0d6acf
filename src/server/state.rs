use std::sync::Arc;

use crate::search::SearchService;

/// Shared application state
pub struct AppState {
    pub search: SearchService,
}

impl AppState {
    pub fn new(search: SearchService) -> Arc<Self> {
        Arc::new(AppState { search })
    }
}
