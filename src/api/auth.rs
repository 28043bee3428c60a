use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::db::instance::Principal;
use crate::error::AppError;

use super::AppState;

/// The verified caller, loaded from the catalog.
///
/// Credential verification happens upstream; this only resolves the
/// principal id it forwards and requires the principal to be active.
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub Principal);

impl FromRequestParts<Arc<AppState>> for AuthPrincipal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(state.principal_header.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing principal".to_string()))?;

        let id = Uuid::parse_str(header.trim())
            .map_err(|_| AppError::Unauthorized("malformed principal".to_string()))?;

        match state.manager.catalog().get_principal(id).await? {
            Some(principal) if principal.is_active => Ok(Self(principal)),
            Some(_) => {
                warn!("Inactive principal {} rejected", id);
                Err(AppError::Unauthorized("principal is inactive".to_string()))
            }
            None => Err(AppError::Unauthorized("unknown principal".to_string())),
        }
    }
}
