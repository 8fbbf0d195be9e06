// src/api/types.rs

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::core::types::{FeedbackAction, LifecycleStatus, PatternType, TargetType};
use crate::evaluator::calibration::TierReport;
use crate::evaluator::weights::EnsembleWeights;
use crate::infra::errors::EngineError;
use crate::synergy::relationship::RelationshipType;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub run_in_progress: bool,
    pub weights_version: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatternParams {
    pub pattern_type: Option<PatternType>,
    pub status: Option<LifecycleStatus>,
    pub device_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SynergyParams {
    pub relationship_type: Option<RelationshipType>,
    pub status: Option<LifecycleStatus>,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

/// Request body for POST /api/v1/feedback. `reward` defaults per action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub target_id: String,
    pub target_type: TargetType,
    pub action: FeedbackAction,
    #[serde(default)]
    pub reward: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackAccepted {
    pub target_id: String,
    pub reward: f64,
    /// False when the target has no recorded score in this process.
    pub used_for_calibration: bool,
}

#[derive(Debug, Serialize)]
pub struct CalibrationResponse {
    pub weights: EnsembleWeights,
    pub tiers: TierReport,
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error carrying the HTTP status to answer with.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Input(_) => StatusCode::BAD_REQUEST,
            EngineError::RunInProgress => StatusCode::CONFLICT,
            EngineError::CalibrationDataInsufficient { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Persistence { retriable: true, .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}
