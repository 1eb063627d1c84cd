use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::debug;

use crate::api::handler::AppState;
use crate::error::{AppError, AppResult};
use crate::ledger::{normalize_address, validate_address};
use crate::store::models::Role;

/// Header carrying the authenticated wallet address, set by the upstream auth layer
pub const CALLER_HEADER: &str = "x-caller-address";

/// Authenticated caller with its resolved role
#[derive(Debug, Clone)]
pub struct Caller {
    /// Lowercased address
    pub address: String,
    pub role: Role,
}

impl Caller {
    pub fn require(&self, allowed: &[Role]) -> AppResult<()> {
        if allowed.contains(&self.role) {
            return Ok(());
        }
        Err(AppError::Forbidden(format!(
            "role {} may not perform this action",
            self.role
        )))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CALLER_HEADER)
            .ok_or_else(|| AppError::Unauthorized("missing X-Caller-Address header".to_string()))?
            .to_str()
            .map_err(|_| AppError::Unauthorized("unreadable X-Caller-Address header".to_string()))?;

        let address = normalize_address(raw);
        validate_address(&address)
            .map_err(|_| AppError::Unauthorized(format!("{:?} is not a wallet address", raw)))?;

        let resolved = state.roles.resolve(&address).await?;
        debug!(caller = %address, role = %resolved.role, source = ?resolved.source, "caller resolved");
        Ok(Caller {
            address,
            role: resolved.role,
        })
    }
}
