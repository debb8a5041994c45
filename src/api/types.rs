// src/api/types.rs

use serde::{Deserialize, Serialize};

use crate::compute::Prediction;
use crate::service::UploadMetadata;
use crate::session::SessionId;

/// Query string for `POST /sessions`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionQuery {
    /// classifier | expert | image. Defaults to classifier.
    #[serde(default)]
    pub kind: Option<String>,
}

/// Query string for `POST /sessions/{id}/sweep`.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepQuery {
    pub n: i64,
}

/// Response for session creation.
#[derive(Debug, Serialize)]
pub struct SessionCreatedResponse {
    pub session_id: SessionId,
    pub message: String,
    pub metadata: UploadMetadata,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub decision: Prediction,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    /// JPEG data URLs, one per k starting at k = 2.
    pub images: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub message: String,
    pub invalidated: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub live_sessions: usize,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
