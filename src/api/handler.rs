use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::async_webhook::AsyncWebhookProcessor;
use super::models::*;
use crate::{
    error::AppResult,
    middleware::ValidatedJson,
    settlement::SettlementEngine,
    sync::{SyncEntity, SyncService},
};

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SyncService>,
    pub settlement: Arc<SettlementEngine>,
    pub webhooks: Arc<AsyncWebhookProcessor>,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}

/// Batch sync one entity
/// POST /api/v1/sync/:entity
///
/// Answers 202 and keeps running in the background unless `wait` is set.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    ValidatedJson(request): ValidatedJson<SyncRequest>,
) -> AppResult<Response> {
    let entity: SyncEntity = entity.parse()?;
    let scope = request.scope(state.settlement.calendar().offset())?;
    info!(entity = %entity, ?scope, wait = request.wait, "Sync requested");

    if request.wait {
        let report = state.sync.batch_sync(entity, &scope).await?;
        return Ok(Json(report).into_response());
    }

    // the handle is dropped: the task logs its own failures
    let _ = state.sync.spawn_batch_sync(entity, scope);
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse::new(format!("{} sync started", entity))),
    )
        .into_response())
}

/// Sync every entity of one student, students first
/// POST /api/v1/sync/all-by-student
pub async fn sync_student(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<StudentRequest>,
) -> AppResult<Json<StudentSyncResponse>> {
    let identity = request.identity()?;
    info!(student = %identity, "Student sync requested");

    let reports = state.sync.sync_student(&identity).await?;
    Ok(Json(StudentSyncResponse {
        student: identity.compose(),
        reports,
    }))
}

/// Run the semester settlement for a date (today, locally, by default)
/// POST /api/v1/settlement/semester
pub async fn settle_semester(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<SettlementRequest>,
) -> AppResult<Json<SettlementResponse>> {
    let date = request
        .date
        .unwrap_or_else(|| state.settlement.calendar().today(Utc::now()));
    info!(%date, "Semester settlement requested");

    let outcome = state.settlement.settle_semester_points(date).await?;
    Ok(Json(SettlementResponse { date, outcome }))
}

/// Remote record event
/// POST /api/v1/webhooks/:entity
pub async fn record_webhook(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    ValidatedJson(payload): ValidatedJson<WebhookPayload>,
) -> AppResult<impl IntoResponse> {
    let entity: SyncEntity = entity.parse()?;
    state.webhooks.validate(entity, &payload)?;

    let (response, _handle) = state.webhooks.process_webhook_async(entity, payload);
    Ok((StatusCode::ACCEPTED, Json(response)))
}
