use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::instance::DatabaseInstance;
use crate::db::manager::CreatedInstance;
use crate::error::{AppError, Result};

use super::extract::{ApiJson, ApiPath, OptionalJson};
use super::{AppState, AuthPrincipal};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(default)]
    pub db_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRequest {
    #[serde(default)]
    pub container_id: Option<String>,
}

impl ContainerRequest {
    fn container_id(&self) -> Result<&str> {
        self.container_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Validation("Missing required parameter: containerId".to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub message: &'static str,
    pub container: DatabaseInstance,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: String,
}

pub async fn create_instance(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
    OptionalJson(req): OptionalJson<CreateRequest>,
) -> Result<(StatusCode, Json<CreatedInstance>)> {
    let created = state
        .manager
        .create_instance(&principal, req.db_name.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn pause_instance(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
    ApiJson(req): ApiJson<ContainerRequest>,
) -> Result<Json<TransitionResponse>> {
    let container = state
        .manager
        .pause_instance(principal.id, req.container_id()?)
        .await?;
    Ok(Json(TransitionResponse {
        message: "Container paused successfully",
        container,
    }))
}

pub async fn unpause_instance(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
    ApiJson(req): ApiJson<ContainerRequest>,
) -> Result<Json<TransitionResponse>> {
    let container = state
        .manager
        .unpause_instance(principal.id, req.container_id()?)
        .await?;
    Ok(Json(TransitionResponse {
        message: "Container unpaused successfully",
        container,
    }))
}

pub async fn delete_instance(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
    ApiJson(req): ApiJson<ContainerRequest>,
) -> Result<Json<MessageResponse>> {
    state
        .manager
        .delete_instance(principal.id, req.container_id()?)
        .await?;
    Ok(Json(MessageResponse {
        message: "Container deleted successfully",
    }))
}

pub async fn container_logs(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
    ApiPath(container_id): ApiPath<String>,
) -> Result<Json<LogsResponse>> {
    let logs = state.manager.logs(principal.id, &container_id).await?;
    Ok(Json(LogsResponse { logs }))
}
