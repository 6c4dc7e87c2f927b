use super::{UpdateOutcome, UpdaterStatus};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    #[serde(default)]
    pub force: bool,
}

/// GET /api/auto-update/status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<UpdaterStatus> {
    Json(state.updater.status())
}

/// POST /api/auto-update/trigger - Runs the update inline and reports the
/// outcome. Refusals are 200s with `success: false`. An empty body means
/// an unforced trigger.
pub async fn trigger(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<Json<UpdateOutcome>> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerRequest::default()
    } else {
        serde_json::from_slice::<TriggerRequest>(&body)
            .map_err(|e| AppError::Validation(format!("invalid trigger body: {e}")))?
    };
    Ok(Json(state.updater.trigger(request.force).await))
}
