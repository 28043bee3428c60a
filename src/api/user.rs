use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::instance::{DatabaseInstance, Principal};
use crate::error::Result;

use super::extract::ApiPath;
use super::{AppState, AuthPrincipal};

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: Principal,
}

#[derive(Debug, Serialize)]
pub struct ContainersResponse {
    pub containers: Vec<DatabaseInstance>,
}

#[derive(Debug, Serialize)]
pub struct InstanceResponse {
    pub instance: DatabaseInstance,
}

pub async fn profile(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<ProfileResponse>> {
    let user = state.manager.profile(principal.id).await?;
    Ok(Json(ProfileResponse { user }))
}

pub async fn containers(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<ContainersResponse>> {
    let containers = state.manager.list_instances(principal.id).await?;
    Ok(Json(ContainersResponse { containers }))
}

pub async fn instance(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
    ApiPath(instance_id): ApiPath<Uuid>,
) -> Result<Json<InstanceResponse>> {
    let instance = state.manager.get_instance(principal.id, instance_id).await?;
    Ok(Json(InstanceResponse { instance }))
}
