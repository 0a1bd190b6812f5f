//! JSON bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::types::GameRecord;

/// Response of `GET /api/games`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamesResponse {
    pub games: Vec<GameRecord>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error kind, e.g. `not_found`.
    pub error: String,
    pub message: String,
}

/// Response of `GET /api/health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
