// src/api/handlers.rs

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use super::{auth::require_bearer, types::*, ApiState};
use crate::core::history::RunRecord;
use crate::core::types::{Feedback, Pattern};
use crate::evaluator::drift::DriftReport;
use crate::memory::{PatternQuery, SynergyQuery};
use crate::synergy::Synergy;

const DEFAULT_LIMIT: usize = 50;

fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    require_bearer(state.token.as_deref(), headers)
}

/// GET /api/v1/health — Liveness plus the current weights version. Unauthenticated.
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        run_in_progress: state.engine.scheduler().is_running(),
        weights_version: state.engine.weights().version,
    })
}

/// GET /api/v1/runs — Run history, newest first.
pub async fn list_runs(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<RunRecord>>, ApiError> {
    authorize(&state, &headers)?;
    let runs = state
        .engine
        .persistence()
        .list_runs(params.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(runs))
}

/// GET /api/v1/patterns — Persisted patterns, best quality first.
pub async fn list_patterns(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<PatternParams>,
) -> Result<Json<Vec<Pattern>>, ApiError> {
    authorize(&state, &headers)?;
    let query = PatternQuery {
        pattern_type: params.pattern_type,
        status: params.status,
        exclude_deprecated: false,
        device_id: params.device_id,
        min_quality: None,
        limit: Some(params.limit.unwrap_or(DEFAULT_LIMIT)),
    };
    Ok(Json(state.engine.persistence().get_patterns(&query).await?))
}

/// GET /api/v1/synergies — Persisted synergies, best benefit first.
pub async fn list_synergies(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<SynergyParams>,
) -> Result<Json<Vec<Synergy>>, ApiError> {
    authorize(&state, &headers)?;
    let query = SynergyQuery {
        relationship_type: params.relationship_type,
        status: params.status,
        entity_id: params.entity_id,
        limit: Some(params.limit.unwrap_or(DEFAULT_LIMIT)),
    };
    Ok(Json(state.engine.persistence().get_synergies(&query).await?))
}

/// GET /api/v1/drift — Current quality distribution against the baseline.
pub async fn get_drift(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<DriftReport>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(state.engine.check_drift().await?))
}

/// GET /api/v1/calibration — Live weights and acceptance by quality tier.
pub async fn get_calibration(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<CalibrationResponse>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(CalibrationResponse {
        weights: (*state.engine.weights()).clone(),
        tiers: state.engine.tier_report(),
    }))
}

/// POST /api/v1/feedback — Append a feedback event.
pub async fn submit_feedback(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackAccepted>), ApiError> {
    authorize(&state, &headers)?;
    if body.target_id.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "target_id cannot be empty",
        ));
    }

    let mut feedback = Feedback::new(&body.target_id, body.target_type, body.action);
    if let Some(reward) = body.reward {
        if !reward.is_finite() {
            return Err(ApiError::new(StatusCode::BAD_REQUEST, "reward must be finite"));
        }
        feedback.reward = reward.clamp(-1.0, 1.0);
    }
    let used = state.engine.submit_feedback(&feedback).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(FeedbackAccepted {
            target_id: feedback.target_id,
            reward: feedback.reward,
            used_for_calibration: used,
        }),
    ))
}
