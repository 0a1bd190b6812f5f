//! Route table and request handlers.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use gameshelf_protocol::messages::{GamesResponse, HealthResponse};
use gameshelf_protocol::{GameId, GameRecord, SPEED_LIMIT_HEADER};
use gameshelf_reconcile::IndexSummary;
use gameshelf_registry::StoreError;
use gameshelf_transfer::{DownloadRequest, DownloadStatus};
use serde::Serialize;
use tracing::{info, warn};

use crate::{ApiError, AppState};

/// Response of `PUT /api/games/reindex`.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexResponse {
    pub report: IndexSummary,
    /// Live records after the pass.
    pub games: Vec<GameRecord>,
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/games", get(list_games))
        .route("/api/games/reindex", put(reindex))
        .route("/api/games/{id}", get(show_game))
        .route("/api/games/{id}/download", get(download))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn list_games(State(state): State<AppState>) -> Result<Json<GamesResponse>, ApiError> {
    let games = state.store.find_all_live()?;
    Ok(Json(GamesResponse { games }))
}

async fn show_game(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
) -> Result<Json<GameRecord>, ApiError> {
    let game = state.store.find_by_id(id)?;
    if !game.is_live() {
        return Err(StoreError::NotFound(id).into());
    }
    Ok(Json(game))
}

/// Fails with 409 while another pass is running.
async fn reindex(State(state): State<AppState>) -> Result<Json<ReindexResponse>, ApiError> {
    info!("reindex requested over HTTP");
    let report = state.indexer.try_reindex().await?;
    Ok(Json(ReindexResponse {
        report: report.summary(),
        games: report.games,
    }))
}

async fn download(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let range = match headers.get(header::RANGE) {
        // Non-ASCII garbage is treated like any other malformed range.
        Some(value) => value.to_str().ok().map(String::from),
        None => None,
    };
    let speed_limit = speed_limit(&headers)?;

    let download = state
        .downloader
        .download(DownloadRequest {
            game_id: id,
            range,
            speed_limit,
        })
        .await?;

    let status = match download.status {
        DownloadStatus::Ok => StatusCode::OK,
        DownloadStatus::PartialContent => StatusCode::PARTIAL_CONTENT,
    };
    let mut response = Body::from_stream(download.body).into_response();
    *response.status_mut() = status;
    for (name, value) in download.headers {
        match HeaderValue::try_from(value) {
            Ok(value) => {
                response.headers_mut().insert(HeaderName::from_static(name), value);
            }
            Err(_) => warn!(id, header = name, "dropping invalid response header"),
        }
    }
    Ok(response)
}

/// Parses the speed limit header (KiB/s) into bytes per second. Zero or
/// negative values mean no limit.
fn speed_limit(headers: &HeaderMap) -> Result<Option<u64>, ApiError> {
    let Some(value) = headers.get(SPEED_LIMIT_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .map(|kib| match u64::try_from(kib) {
            Ok(kib) if kib > 0 => Some(kib.saturating_mul(1024)),
            _ => None,
        })
        .ok_or_else(|| ApiError::BadHeader {
            header: SPEED_LIMIT_HEADER,
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use gameshelf_registry::{FileGameStore, GameStore};
    use gameshelf_scanner::{ScanConfig, Scanner};
    use serde_json::Value;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        dir: TempDir,
        state: AppState,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("alpha.zip"), b"0123456789").unwrap();
        fs::write(dir.path().join("beta.zip"), b"beta content").unwrap();
        let store: Arc<dyn GameStore> = Arc::new(FileGameStore::in_memory());
        let scanner = Scanner::new(ScanConfig {
            roots: vec![dir.path().to_path_buf()],
            ..Default::default()
        });
        Fixture {
            state: AppState::new(store, scanner, None),
            dir,
        }
    }

    async fn send(state: &AppState, request: Request<Body>) -> Response {
        router(state.clone()).oneshot(request).await.unwrap()
    }

    async fn get(state: &AppState, uri: &str) -> Response {
        send(state, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    async fn reindex(state: &AppState) -> Value {
        let response = send(
            state,
            Request::put("/api/games/reindex").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        json(response).await
    }

    /// Id of the live record whose file is `name`.
    fn id_of(state: &AppState, name: &str) -> GameId {
        state
            .store
            .find_all_live()
            .unwrap()
            .into_iter()
            .find(|g| g.file_name() == name)
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let f = fixture();
        let response = get(&f.state, "/api/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn reindex_returns_report_and_games() {
        let f = fixture();
        let body = reindex(&f.state).await;
        assert_eq!(body["report"]["created"], 2);
        assert_eq!(body["report"]["scanned"], 2);
        assert_eq!(body["games"].as_array().unwrap().len(), 2);

        let body = reindex(&f.state).await;
        assert_eq!(body["report"]["created"], 0);
        assert_eq!(body["games"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_and_show_games() {
        let f = fixture();
        reindex(&f.state).await;

        let list = json(get(&f.state, "/api/games").await).await;
        assert_eq!(list["games"].as_array().unwrap().len(), 2);

        let id = id_of(&f.state, "beta.zip");
        let response = get(&f.state, &format!("/api/games/{id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["id"], id);

        let response = get(&f.state, "/api/games/999").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["error"], "not_found");
    }

    #[tokio::test]
    async fn deleted_game_is_hidden() {
        let f = fixture();
        reindex(&f.state).await;
        let id = id_of(&f.state, "alpha.zip");

        fs::remove_file(f.dir.path().join("alpha.zip")).unwrap();
        reindex(&f.state).await;

        let response = get(&f.state, &format!("/api/games/{id}")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = get(&f.state, &format!("/api/games/{id}/download")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn full_download() {
        let f = fixture();
        reindex(&f.state).await;
        let id = id_of(&f.state, "alpha.zip");

        let response = get(&f.state, &format!("/api/games/{id}/download")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[header::CONTENT_LENGTH], "10");
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"alpha.zip\""
        );
        assert!(headers.get(header::CONTENT_RANGE).is_none());
        assert_eq!(body_bytes(response).await, b"0123456789");
    }

    #[tokio::test]
    async fn ranged_download() {
        let f = fixture();
        reindex(&f.state).await;
        let id = id_of(&f.state, "alpha.zip");

        let request = Request::get(format!("/api/games/{id}/download"))
            .header(header::RANGE, "bytes=-3")
            .header(SPEED_LIMIT_HEADER, "512")
            .body(Body::empty())
            .unwrap();
        let response = send(&f.state, request).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 7-9/10");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "3");
        assert_eq!(body_bytes(response).await, b"789");
    }

    #[tokio::test]
    async fn unsatisfiable_range_is_416() {
        let f = fixture();
        reindex(&f.state).await;
        let id = id_of(&f.state, "alpha.zip");

        for range in ["bytes=50-60", "bytes=0-1,4-5"] {
            let request = Request::get(format!("/api/games/{id}/download"))
                .header(header::RANGE, range)
                .body(Body::empty())
                .unwrap();
            let response = send(&f.state, request).await;
            assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE, "{range}");
            assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */10");
            assert_eq!(json(response).await["error"], "range_not_satisfiable");
        }
    }

    #[tokio::test]
    async fn vanished_file_is_503() {
        let f = fixture();
        reindex(&f.state).await;
        let id = id_of(&f.state, "alpha.zip");
        fs::remove_file(f.dir.path().join("alpha.zip")).unwrap();

        let response = get(&f.state, &format!("/api/games/{id}/download")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(response).await["error"], "file_unavailable");
    }

    #[tokio::test]
    async fn invalid_speed_limit_is_400() {
        let f = fixture();
        reindex(&f.state).await;
        let id = id_of(&f.state, "alpha.zip");

        let request = Request::get(format!("/api/games/{id}/download"))
            .header(SPEED_LIMIT_HEADER, "fast")
            .body(Body::empty())
            .unwrap();
        let response = send(&f.state, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn negative_speed_limit_is_unlimited() {
        let f = fixture();
        reindex(&f.state).await;
        let id = id_of(&f.state, "alpha.zip");

        let request = Request::get(format!("/api/games/{id}/download"))
            .header(SPEED_LIMIT_HEADER, "-1")
            .body(Body::empty())
            .unwrap();
        let response = send(&f.state, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"0123456789");
    }

    #[test]
    fn speed_limit_is_kib_per_second() {
        let mut headers = HeaderMap::new();
        assert_eq!(speed_limit(&headers).unwrap(), None);

        headers.insert(SPEED_LIMIT_HEADER, HeaderValue::from_static(" 64 "));
        assert_eq!(speed_limit(&headers).unwrap(), Some(64 * 1024));

        headers.insert(SPEED_LIMIT_HEADER, HeaderValue::from_static("0"));
        assert_eq!(speed_limit(&headers).unwrap(), None);

        headers.insert(SPEED_LIMIT_HEADER, HeaderValue::from_static("-1"));
        assert_eq!(speed_limit(&headers).unwrap(), None);

        headers.insert(SPEED_LIMIT_HEADER, HeaderValue::from_static("1.5"));
        assert!(speed_limit(&headers).is_err());
    }
}
