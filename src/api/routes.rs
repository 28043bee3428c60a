use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

use super::data::{get_columns, get_rows, get_tables, is_connected};
use super::health::health_check;
use super::instances::{
    container_logs, create_instance, delete_instance, pause_instance, unpause_instance,
};
use super::user::{containers, instance, profile};
use super::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let postgres_routes = Router::new()
        .route("/create", post(create_instance))
        .route("/pause", put(pause_instance))
        .route("/unpause", put(unpause_instance))
        .route("/delete", delete(delete_instance))
        .route("/logs/{container_id}", get(container_logs))
        .route("/data/isconnected", get(is_connected))
        .route("/data/getTables", post(get_tables))
        .route("/data/table/columns", post(get_columns))
        .route("/data/table/data", post(get_rows));

    let user_routes = Router::new()
        .route("/profile", get(profile))
        .route("/containers", get(containers))
        .route("/instance/{instance_id}", get(instance));

    Router::new()
        .nest("/api/v1/postgres", postgres_routes)
        .nest("/api/v1/user", user_routes)
        .route("/health", get(health_check))
        .with_state(state)
}
