use super::store::{DeleteOutcome, SaveOutcome};
use super::types::{ChartConfig, ChartInput};
use crate::cache::Cached;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::state::AppState;
use crate::topledger::client::QueryParams;
use crate::topledger::handler::cached_rows;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub synced: usize,
    pub failed: usize,
}

fn data_resource(id: &str) -> String {
    format!("chart:{id}")
}

/// GET /api/charts - All chart configs, optionally for one page.
pub async fn list_charts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Vec<ChartConfig>>> {
    let page = params.page.as_deref().filter(|p| !p.is_empty());
    Ok(Json(state.charts.list(page).await?))
}

/// POST /api/charts
pub async fn create_chart(
    State(state): State<Arc<AppState>>,
    LoggedJson(input): LoggedJson<ChartInput>,
) -> AppResult<(StatusCode, Json<SaveOutcome>)> {
    let outcome = state.charts.create(input).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /api/charts/{id}
pub async fn get_chart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ChartConfig>> {
    state
        .charts
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("chart {id} not found")))
}

/// PUT /api/charts/{id} - Partial update. Cached data for the chart is
/// dropped since the endpoint or mapping may have changed.
pub async fn update_chart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    LoggedJson(input): LoggedJson<ChartInput>,
) -> AppResult<Json<SaveOutcome>> {
    let outcome = state.charts.update(&id, input).await?;
    state.data_cache.invalidate_resource(&data_resource(&id));
    Ok(Json(outcome))
}

/// DELETE /api/charts/{id}
pub async fn delete_chart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<DeleteOutcome>> {
    let outcome = state.charts.delete(&id).await?;
    state.data_cache.invalidate_resource(&data_resource(&id));
    Ok(Json(outcome))
}

/// GET /api/charts/{id}/data - Rows for the chart, shaped by its data
/// mapping. The query string is passed through as query parameters.
pub async fn chart_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(filters): Query<QueryParams>,
) -> AppResult<Json<Cached<Vec<Value>>>> {
    let chart = state
        .charts
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("chart {id} not found")))?;

    let rows = cached_rows(
        &state,
        &data_resource(&id),
        &chart.api_endpoint,
        chart.api_key.as_deref(),
        &filters,
        Some(&chart.data_mapping),
    )
    .await?;
    Ok(Json(rows))
}

/// POST /api/charts/sync - Restore chart objects missing from storage out of
/// the SQLite backup, and back up objects missing from SQLite.
pub async fn sync_charts(State(state): State<Arc<AppState>>) -> AppResult<Json<SyncResponse>> {
    let (synced, failed) = state.charts.reconcile().await?;
    Ok(Json(SyncResponse { synced, failed }))
}
