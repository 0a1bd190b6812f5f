//! Listener lifecycle.

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{AppState, ServerError, router};

/// Serves the API on `listener` until `cancel` fires.
///
/// On cancellation the server stops accepting connections and waits for
/// in-flight requests, downloads included, to finish.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let local_addr = listener.local_addr()?;
    tracing::info!("library server listening on {local_addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!("library server stopped");
    Ok(())
}
