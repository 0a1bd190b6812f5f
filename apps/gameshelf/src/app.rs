//! Application wiring: registry, indexer, downloader and HTTP server.

use std::sync::Arc;

use anyhow::Context;
use gameshelf_reconcile::IndexSummary;
use gameshelf_registry::{FileGameStore, GameStore};
use gameshelf_scanner::Scanner;
use gameshelf_server::AppState;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let database = config.database_path();
    let store: Arc<dyn GameStore> = Arc::new(
        FileGameStore::open(&database)
            .with_context(|| format!("failed to open registry {}", database.display()))?,
    );
    let scanner = Scanner::new(config.scan_config()?);
    Ok(AppState::new(store, scanner, config.max_download_speed()))
}

/// Runs one reindex pass and returns its summary.
pub async fn reindex_once(config: Config) -> anyhow::Result<IndexSummary> {
    let state = build_state(&config)?;
    let report = state.indexer.reindex().await?;
    Ok(report.summary())
}

/// Serves the API until Ctrl-C.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let cancel = CancellationToken::new();

    if config.index_on_start {
        // Index in the background; the API is usable meanwhile and a manual
        // reindex request gets 409 until this pass is done.
        let indexer = Arc::clone(&state.indexer);
        tokio::spawn(async move {
            if let Err(e) = indexer.reindex().await {
                tracing::error!("startup reindex failed: {e}");
            }
        });
    }

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let mut server = tokio::spawn(gameshelf_server::serve(listener, state, cancel.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
            cancel.cancel();
        }
        result = &mut server => return Ok(result??),
    }
    server.await??;
    Ok(())
}
