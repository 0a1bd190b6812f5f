//! HTTP API of the GameShelf library server.
//!
//! Exposes the registry, the reindex trigger and game downloads over a
//! small JSON API served by axum.

mod error;
mod routes;
mod server;

use std::sync::Arc;

use gameshelf_reconcile::Indexer;
use gameshelf_registry::GameStore;
use gameshelf_scanner::Scanner;
use gameshelf_transfer::Downloader;

pub use error::ApiError;
pub use routes::{ReindexResponse, router};
pub use server::serve;

/// Errors produced by the HTTP server itself.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state of every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn GameStore>,
    pub indexer: Arc<Indexer>,
    pub downloader: Arc<Downloader>,
}

impl AppState {
    /// `max_speed` caps every download, in bytes per second.
    pub fn new(store: Arc<dyn GameStore>, scanner: Scanner, max_speed: Option<u64>) -> Self {
        Self {
            indexer: Arc::new(Indexer::new(Arc::clone(&store), scanner)),
            downloader: Arc::new(Downloader::new(Arc::clone(&store)).with_max_speed(max_speed)),
            store,
        }
    }
}
