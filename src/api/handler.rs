use axum::{extract::State, Json};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use super::models::*;
use crate::{
    credits::CreditService, error::AppResult, ledger::LedgerGateway,
    middleware::WriteRateLimiter, roles::RoleResolver, store::CreditStore,
};

#[derive(Clone)]
pub struct AppState {
    pub credits: Arc<CreditService>,
    pub roles: Arc<RoleResolver>,
    pub store: Arc<dyn CreditStore>,
    pub ledger: Arc<dyn LedgerGateway>,
    pub write_limiter: WriteRateLimiter,
}

/// GET /health
///
/// Reports `degraded` when the ledger read path is down; the service keeps
/// answering reads and role lookups fall back to cache/default.
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<ApiResponse<HealthResponse>>> {
    let ledger_reachable = match state.ledger.next_credit_id().await {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "Health check: ledger unreachable");
            false
        }
    };

    let response = HealthResponse {
        status: if ledger_reachable { "healthy" } else { "degraded" }.to_string(),
        timestamp: Utc::now(),
        ledger_reachable,
        role_cache_entries: state.roles.cache().len(),
    };
    Ok(ApiResponse::ok(response, "ok"))
}
