// src/api/handlers.rs

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::{types::*, ApiState};
use crate::infra::errors::SessionError;
use crate::session::{SessionId, SessionKind, SessionSummary};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// HTTP status for each session error.
pub fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Expired(_) | SessionError::Invalidated(_) => StatusCode::GONE,
        SessionError::Busy(_) => StatusCode::CONFLICT,
        SessionError::TooManyRetries { .. } => StatusCode::TOO_MANY_REQUESTS,
        SessionError::Parse(_)
        | SessionError::InvalidInput(_)
        | SessionError::InvalidSweep { .. }
        | SessionError::WrongKind { .. } => StatusCode::BAD_REQUEST,
        SessionError::Backend(_) | SessionError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn api_error(err: SessionError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("request failed: {err}");
    } else {
        tracing::debug!(status = status.as_u16(), "request rejected: {err}");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: String) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message }))
}

/// Body and query extractor failures are plain 400s with our error body.
fn rejected(message: String) -> ApiError {
    tracing::debug!("request rejected: {message}");
    bad_request(message)
}

/// Ids that are not even UUIDs cannot name a session.
fn parse_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse::<SessionId>().map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session '{raw}' not found"),
            }),
        )
    })
}

/// POST /sessions?kind= — Upload a file and open a session for it.
pub async fn create_session(
    State(state): State<ApiState>,
    Query(query): Query<CreateSessionQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionCreatedResponse>), ApiError> {
    let kind = query
        .kind
        .as_deref()
        .unwrap_or("classifier")
        .parse::<SessionKind>()
        .map_err(bad_request)?;

    let receipt = state
        .service
        .upload(kind, body.to_vec())
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(SessionCreatedResponse {
            session_id: receipt.session_id,
            message: "File uploaded successfully".into(),
            metadata: receipt.metadata,
        }),
    ))
}

/// POST /sessions/{id}/predict — Classify one row of answers.
pub async fn predict(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    input: Result<Json<Vec<f64>>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let id = parse_id(&id)?;
    let Json(input) = input.map_err(|r| rejected(r.body_text()))?;
    let decision = state
        .service
        .predict(&id, &input)
        .await
        .map_err(api_error)?;
    Ok(Json(PredictResponse { decision }))
}

/// POST /sessions/{id}/sweep?n= — Quantise the image for k = 2..=n.
pub async fn sweep(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    query: Result<Query<SweepQuery>, QueryRejection>,
) -> Result<Json<SweepResponse>, ApiError> {
    let id = parse_id(&id)?;
    let Query(query) = query.map_err(|r| rejected(r.body_text()))?;
    let artifacts = state
        .service
        .process_sweep(&id, query.n)
        .await
        .map_err(api_error)?;
    Ok(Json(SweepResponse {
        images: artifacts.iter().map(|a| a.to_data_url()).collect(),
    }))
}

/// POST /sessions/{id}/cleanup — Always succeeds.
pub async fn cleanup(State(state): State<ApiState>, Path(id): Path<String>) -> Json<CleanupResponse> {
    let invalidated = match id.parse::<SessionId>() {
        Ok(id) => state.service.cleanup(&id),
        Err(_) => false,
    };
    Json(CleanupResponse {
        message: "Session cleaned up".into(),
        invalidated,
    })
}

/// GET /sessions/{id} — Describe a session without touching it.
pub async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, ApiError> {
    let id = parse_id(&id)?;
    state.service.describe(&id).map(Json).map_err(api_error)
}

/// GET /health — Health check.
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        live_sessions: state.service.live_sessions(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ComputeError;
    use crate::parse::ParseError;

    #[test]
    fn test_status_mapping() {
        let id = SessionId::new();
        let cases = [
            (SessionError::NotFound(id), 404),
            (SessionError::Expired(id), 410),
            (SessionError::Invalidated(id), 410),
            (SessionError::Busy(id), 409),
            (SessionError::TooManyRetries { id, budget: 3 }, 429),
            (SessionError::Parse(ParseError::EmptyUpload), 400),
            (SessionError::InvalidInput("x".into()), 400),
            (SessionError::InvalidSweep { n: 1, max: 100 }, 400),
            (
                SessionError::WrongKind {
                    operation: "predict",
                    kind: "image".into(),
                },
                400,
            ),
            (SessionError::Backend(ComputeError::Failed("x".into())), 500),
            (SessionError::Invariant("x".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(status_for(&err).as_u16(), code, "{err}");
        }
    }

    #[test]
    fn test_garbage_id_is_not_found() {
        let (status, body) = parse_id("../etc/passwd").unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.0.error.contains("not found"));
    }
}
