use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use gameshelf_protocol::messages::ErrorResponse;
use gameshelf_reconcile::IndexError;
use gameshelf_registry::StoreError;
use gameshelf_transfer::DownloadError;

/// Any failure a handler can return.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid {header} header: {value:?}")]
    BadHeader { header: &'static str, value: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Download(DownloadError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Download(DownloadError::Io { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Download(DownloadError::Range { .. }) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Download(DownloadError::Store(e)) | Self::Index(IndexError::Store(e)) | Self::Store(e) => {
                store_status(e)
            }
            Self::Index(IndexError::AlreadyRunning) => StatusCode::CONFLICT,
            Self::Index(IndexError::Join(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadHeader { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-readable kind carried in the error body.
    pub fn kind(&self) -> &'static str {
        match self.status() {
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::SERVICE_UNAVAILABLE => "file_unavailable",
            StatusCode::RANGE_NOT_SATISFIABLE => "range_not_satisfiable",
            StatusCode::CONFLICT => match self {
                Self::Index(IndexError::AlreadyRunning) => "reindex_running",
                _ => "duplicate_checksum",
            },
            StatusCode::BAD_REQUEST => "bad_request",
            _ => "internal",
        }
    }
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::DuplicateChecksum { .. } => StatusCode::CONFLICT,
        StoreError::Io { .. } | StoreError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "request failed: {self}");
        } else {
            tracing::debug!(status = status.as_u16(), "request rejected: {self}");
        }

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Self::Download(DownloadError::Range { file_size, .. }) = &self {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{file_size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}
