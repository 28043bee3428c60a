use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::db::engines::ColumnInfo;
use crate::db::proxy::Target;
use crate::error::{AppError, Result};

use super::extract::{ApiJson, ApiQuery};
use super::{AppState, AuthPrincipal};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionQuery {
    #[serde(default)]
    pub connection_string: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRequest {
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
}

impl TargetRequest {
    fn target(&self) -> Result<Target> {
        Ok(Target {
            container_id: required(&self.container_id, "containerId")?.to_string(),
            connection_string: required(&self.connection_string, "connectionString")?.to_string(),
        })
    }

    fn table(&self) -> Result<&str> {
        required(&self.table_name, "tableName")
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Validation(format!("Missing required parameter: {}", name)))
}

#[derive(Debug, Serialize)]
pub struct ConnectedResponse {
    pub message: &'static str,
    pub connect: bool,
}

#[derive(Debug, Serialize)]
pub struct TablesResponse {
    pub tables: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ColumnsResponse {
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Serialize)]
pub struct RowsResponse {
    pub data: Vec<JsonValue>,
}

pub async fn is_connected(
    State(state): State<Arc<AppState>>,
    _principal: AuthPrincipal,
    ApiQuery(query): ApiQuery<ConnectionQuery>,
) -> Result<Json<ConnectedResponse>> {
    let connection_string = required(&query.connection_string, "connectionString")?;
    state.proxy.is_connected(connection_string).await?;
    Ok(Json(ConnectedResponse {
        message: "Database connection successful",
        connect: true,
    }))
}

pub async fn get_tables(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
    ApiJson(req): ApiJson<TargetRequest>,
) -> Result<Json<TablesResponse>> {
    let tables = state.proxy.list_tables(principal.id, &req.target()?).await?;
    Ok(Json(TablesResponse { tables }))
}

pub async fn get_columns(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
    ApiJson(req): ApiJson<TargetRequest>,
) -> Result<Json<ColumnsResponse>> {
    let columns = state
        .proxy
        .list_columns(principal.id, &req.target()?, req.table()?)
        .await?;
    Ok(Json(ColumnsResponse { columns }))
}

pub async fn get_rows(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
    ApiJson(req): ApiJson<TargetRequest>,
) -> Result<Json<RowsResponse>> {
    let data = state
        .proxy
        .fetch_rows(principal.id, &req.target()?, req.table()?)
        .await?;
    Ok(Json(RowsResponse { data }))
}
