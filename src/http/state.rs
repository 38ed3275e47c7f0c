use std::sync::Arc;

use crate::consistency::ConsistencyService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConsistencyService>,
}

impl AppState {
    pub fn new(service: Arc<ConsistencyService>) -> Self {
        Self { service }
    }
}
