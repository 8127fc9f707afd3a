use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use pipeline::{AnalysisConfig, AnalysisRecord, PipelineError};

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitAnalysisRequest {
    pub requester_id: Uuid,
    /// Competitor domains, e.g. ["rival.com", "other.io"].
    pub targets: Vec<String>,
    #[serde(default)]
    pub config: AnalysisConfig,
}

#[derive(Serialize)]
pub struct SubmitAnalysisResponse {
    pub analysis_id: Uuid,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// POST /api/analyses - accept a competitor analysis and return immediately.
pub async fn submit_analysis(
    State(state): State<AppState>,
    Json(request): Json<SubmitAnalysisRequest>,
) -> Result<(StatusCode, Json<SubmitAnalysisResponse>), (StatusCode, Json<ErrorResponse>)> {
    let analysis_id = state
        .pipeline
        .submit(request.requester_id, request.targets, request.config)
        .await
        .map_err(|e| match e {
            PipelineError::EmptyTargets => error_response(StatusCode::BAD_REQUEST, e.to_string()),
            PipelineError::QueueUnavailable { .. } => {
                error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            other => {
                error!(error = %other, "analysis submission failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitAnalysisResponse {
            analysis_id,
            status: "accepted",
        }),
    ))
}

/// GET /api/analyses/:id - current record for one analysis.
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnalysisRecord>, (StatusCode, Json<ErrorResponse>)> {
    let record = state.pipeline.status(id).await.map_err(|e| match e {
        PipelineError::NotFound(_) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        other => {
            error!(error = %other, analysis_id = %id, "status lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    })?;
    Ok(Json(record))
}
