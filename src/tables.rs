use crate::cache::Cached;
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

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableColumn {
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableConfig {
    pub id: String,
    pub title: String,
    pub page: String,
    pub api_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub columns: Vec<TableColumn>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInput {
    pub id: Option<String>,
    pub title: Option<String>,
    pub page: Option<String>,
    pub api_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub columns: Option<Vec<TableColumn>>,
}

impl TableConfig {
    /// Keep only the configured columns of each row. Without columns the
    /// rows pass through unchanged.
    pub fn project(&self, rows: Vec<Value>) -> Vec<Value> {
        if self.columns.is_empty() {
            return rows;
        }
        rows.into_iter()
            .map(|row| {
                let mut out = serde_json::Map::new();
                for col in &self.columns {
                    out.insert(
                        col.key.clone(),
                        row.get(&col.key).cloned().unwrap_or(Value::Null),
                    );
                }
                Value::Object(out)
            })
            .collect()
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
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        if let Some(col) = self.columns.iter().find(|c| c.key.trim().is_empty()) {
            return Err(AppError::Validation(format!(
                "column {:?} has an empty key",
                col.label
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
}

fn data_resource(id: &str) -> String {
    format!("table:{id}")
}

/// GET /api/tables
pub async fn list_tables(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Vec<TableConfig>>> {
    let mut tables: Vec<TableConfig> = state.tables.list().await?;
    if let Some(page) = params.page.as_deref().filter(|p| !p.is_empty()) {
        tables.retain(|t| t.page == page);
    }
    tables.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(Json(tables))
}

/// GET /api/tables/{id}
pub async fn get_table(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<TableConfig>> {
    Ok(Json(state.tables.require(&id).await?))
}

/// POST /api/tables
pub async fn create_table(
    State(state): State<Arc<AppState>>,
    LoggedJson(input): LoggedJson<TableInput>,
) -> AppResult<(StatusCode, Json<TableConfig>)> {
    let id = match non_empty(&input.id) {
        Some(id) => id.to_string(),
        None => uuid::Uuid::new_v4().to_string(),
    };
    if state.tables.exists(&id).await? {
        return Err(AppError::Validation(format!("table {id} already exists")));
    }

    let now = now_rfc3339();
    let table = TableConfig {
        id,
        title: input.title.unwrap_or_default().trim().to_string(),
        page: input.page.unwrap_or_default().trim().to_string(),
        api_endpoint: input.api_endpoint.unwrap_or_default().trim().to_string(),
        api_key: input.api_key,
        columns: input.columns.unwrap_or_default(),
        created_at: now.clone(),
        updated_at: now,
    };
    table.check()?;
    state.tables.put(&table.id, &table).await?;
    Ok((StatusCode::CREATED, Json(table)))
}

/// PUT /api/tables/{id}
pub async fn update_table(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    LoggedJson(input): LoggedJson<TableInput>,
) -> AppResult<Json<TableConfig>> {
    let mut table: TableConfig = state.tables.require(&id).await?;
    if let Some(title) = input.title {
        table.title = title.trim().to_string();
    }
    if let Some(page) = input.page {
        table.page = page.trim().to_string();
    }
    if let Some(endpoint) = input.api_endpoint {
        table.api_endpoint = endpoint.trim().to_string();
    }
    if input.api_key.is_some() {
        table.api_key = input.api_key;
    }
    if let Some(columns) = input.columns {
        table.columns = columns;
    }
    table.check()?;
    table.updated_at = now_rfc3339();

    state.tables.put(&id, &table).await?;
    state.data_cache.invalidate_resource(&data_resource(&id));
    Ok(Json(table))
}

/// DELETE /api/tables/{id}
pub async fn delete_table(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    state.tables.delete(&id).await?;
    state.data_cache.invalidate_resource(&data_resource(&id));
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// GET /api/tables/{id}/data
pub async fn table_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(filters): Query<QueryParams>,
) -> AppResult<Json<Cached<Vec<Value>>>> {
    let table: TableConfig = state.tables.require(&id).await?;
    let mut rows = cached_rows(
        &state,
        &data_resource(&id),
        &table.api_endpoint,
        table.api_key.as_deref(),
        &filters,
        None,
    )
    .await?;
    rows.data = table.project(rows.data);
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(columns: Vec<TableColumn>) -> TableConfig {
        TableConfig {
            id: "top-dexes".into(),
            title: "Top DEXes".into(),
            page: "dex".into(),
            api_endpoint: "https://example.test/api/queries/1/results".into(),
            api_key: None,
            columns,
            created_at: "2024-01-01T00:00:00.000Z".into(),
            updated_at: "2024-01-01T00:00:00.000Z".into(),
        }
    }

    #[test]
    fn test_project_keeps_configured_columns() {
        let t = table(vec![
            TableColumn {
                key: "dex".into(),
                label: "DEX".into(),
                format: None,
            },
            TableColumn {
                key: "volume".into(),
                label: "Volume".into(),
                format: Some("currency".into()),
            },
        ]);
        let rows = t.project(vec![json!({"dex": "orca", "volume": 5, "extra": 1}), json!({"dex": "raydium"})]);
        assert_eq!(rows[0], json!({"dex": "orca", "volume": 5}));
        assert_eq!(rows[1], json!({"dex": "raydium", "volume": null}));
    }

    #[test]
    fn test_check_reports_missing_fields() {
        let mut t = table(vec![]);
        t.title = " ".into();
        t.api_endpoint.clear();
        let err = t.check().unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error: missing required fields: title, apiEndpoint"
        );
    }
}
