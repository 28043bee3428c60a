mod auth;
mod data;
mod extract;
mod health;
mod instances;
mod routes;
mod user;

use std::sync::Arc;

use crate::db::{AccessProxy, InstanceManager};

pub use auth::AuthPrincipal;
pub use routes::create_router;

pub struct AppState {
    pub manager: Arc<InstanceManager>,
    pub proxy: Arc<AccessProxy>,
    /// Header carrying the principal id verified upstream.
    pub principal_header: String,
}
