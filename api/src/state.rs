use std::sync::Arc;

use lri_core::SessionStore;
use lri_ws::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub connections: ConnectionManager,
}

impl AppState {
    pub fn new(store: Arc<SessionStore>, connections: ConnectionManager) -> Self {
        Self { store, connections }
    }
}
