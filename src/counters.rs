use crate::error::{AppError, AppResult, LoggedJson};
use crate::state::AppState;
use crate::topledger::client::QueryParams;
use crate::topledger::handler::cached_rows;
use crate::types::{non_empty, now_rfc3339};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// How a counter reduces the query rows to a single number.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    First,
    Last,
    Sum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterConfig {
    pub id: String,
    pub title: String,
    pub page: String,
    pub api_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub value_field: String,
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterInput {
    pub id: Option<String>,
    pub title: Option<String>,
    pub page: Option<String>,
    pub api_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub value_field: Option<String>,
    pub aggregate: Option<Aggregate>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterValue {
    pub id: String,
    pub title: String,
    pub value: Option<f64>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub cached: bool,
    pub stale: bool,
    pub timestamp: i64,
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl CounterConfig {
    /// Reduce rows to the counter value. Rows whose field is missing or not
    /// numeric are ignored; no usable rows gives `None`.
    pub fn value_of(&self, rows: &[Value]) -> Option<f64> {
        let mut values = rows.iter().filter_map(|r| r.get(&self.value_field).and_then(number));
        match self.aggregate {
            Aggregate::First => values.next(),
            Aggregate::Last => values.last(),
            Aggregate::Sum => values.reduce(|a, b| a + b),
        }
    }

    fn check(&self) -> AppResult<()> {
        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.page.trim().is_empty() {
            missing.push("page");
        }
        if self.api_endpoint.trim().is_empty() {
            missing.push("apiEndpoint");
        }
        if self.value_field.trim().is_empty() {
            missing.push("valueField");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

fn data_resource(id: &str) -> String {
    format!("counter:{id}")
}

/// GET /api/counters
pub async fn list_counters(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<CounterConfig>>> {
    let mut counters: Vec<CounterConfig> = state.counters.list().await?;
    counters.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(Json(counters))
}

/// GET /api/counters/{id}
pub async fn get_counter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<CounterConfig>> {
    Ok(Json(state.counters.require(&id).await?))
}

/// POST /api/counters
pub async fn create_counter(
    State(state): State<Arc<AppState>>,
    LoggedJson(input): LoggedJson<CounterInput>,
) -> AppResult<(StatusCode, Json<CounterConfig>)> {
    let id = match non_empty(&input.id) {
        Some(id) => id.to_string(),
        None => uuid::Uuid::new_v4().to_string(),
    };
    if state.counters.exists(&id).await? {
        return Err(AppError::Validation(format!("counter {id} already exists")));
    }

    let now = now_rfc3339();
    let counter = CounterConfig {
        id,
        title: input.title.unwrap_or_default().trim().to_string(),
        page: input.page.unwrap_or_default().trim().to_string(),
        api_endpoint: input.api_endpoint.unwrap_or_default().trim().to_string(),
        api_key: input.api_key,
        value_field: input.value_field.unwrap_or_default().trim().to_string(),
        aggregate: input.aggregate.unwrap_or_default(),
        prefix: input.prefix,
        suffix: input.suffix,
        created_at: now.clone(),
        updated_at: now,
    };
    counter.check()?;
    state.counters.put(&counter.id, &counter).await?;
    Ok((StatusCode::CREATED, Json(counter)))
}

/// PUT /api/counters/{id}
pub async fn update_counter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    LoggedJson(input): LoggedJson<CounterInput>,
) -> AppResult<Json<CounterConfig>> {
    let mut counter: CounterConfig = state.counters.require(&id).await?;
    if let Some(title) = input.title {
        counter.title = title.trim().to_string();
    }
    if let Some(page) = input.page {
        counter.page = page.trim().to_string();
    }
    if let Some(endpoint) = input.api_endpoint {
        counter.api_endpoint = endpoint.trim().to_string();
    }
    if input.api_key.is_some() {
        counter.api_key = input.api_key;
    }
    if let Some(field) = input.value_field {
        counter.value_field = field.trim().to_string();
    }
    if let Some(aggregate) = input.aggregate {
        counter.aggregate = aggregate;
    }
    if input.prefix.is_some() {
        counter.prefix = input.prefix;
    }
    if input.suffix.is_some() {
        counter.suffix = input.suffix;
    }
    counter.check()?;
    counter.updated_at = now_rfc3339();

    state.counters.put(&id, &counter).await?;
    state.data_cache.invalidate_resource(&data_resource(&id));
    Ok(Json(counter))
}

/// DELETE /api/counters/{id}
pub async fn delete_counter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    state.counters.delete(&id).await?;
    state.data_cache.invalidate_resource(&data_resource(&id));
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// GET /api/counters/{id}/value
pub async fn counter_value(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(filters): Query<QueryParams>,
) -> AppResult<Json<CounterValue>> {
    let counter: CounterConfig = state.counters.require(&id).await?;
    let rows = cached_rows(
        &state,
        &data_resource(&id),
        &counter.api_endpoint,
        counter.api_key.as_deref(),
        &filters,
        None,
    )
    .await?;

    Ok(Json(CounterValue {
        value: counter.value_of(&rows.data),
        id: counter.id,
        title: counter.title,
        prefix: counter.prefix,
        suffix: counter.suffix,
        cached: rows.cached,
        stale: rows.stale,
        timestamp: rows.timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter(aggregate: Aggregate) -> CounterConfig {
        CounterConfig {
            id: "tps".into(),
            title: "Current TPS".into(),
            page: "network".into(),
            api_endpoint: "https://example.test/api/queries/9/results".into(),
            api_key: None,
            value_field: "tps".into(),
            aggregate,
            prefix: None,
            suffix: Some(" tx/s".into()),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_value_aggregates() {
        let rows = vec![
            json!({"tps": 1000}),
            json!({"tps": "2500.5"}),
            json!({"other": 1}),
            json!({"tps": 500}),
        ];
        assert_eq!(counter(Aggregate::First).value_of(&rows), Some(1000.0));
        assert_eq!(counter(Aggregate::Last).value_of(&rows), Some(500.0));
        assert_eq!(counter(Aggregate::Sum).value_of(&rows), Some(4000.5));
        assert_eq!(counter(Aggregate::Sum).value_of(&[]), None);
    }

    #[test]
    fn test_aggregate_defaults_to_first() {
        let c: CounterConfig = serde_json::from_value(json!({
            "id": "x", "title": "X", "page": "p", "apiEndpoint": "https://e",
            "valueField": "v", "createdAt": "", "updatedAt": ""
        }))
        .unwrap();
        assert_eq!(c.aggregate, Aggregate::First);
    }
}
