use axum::{
    extract::{Query, State},
    Json,
};

use super::{handler::AppState, models::*};
use crate::{
    error::{AppError, AppResult},
    ledger::normalize_address,
    middleware::{Caller, ValidatedJson},
    store::models::Role,
};

/// POST /api/v1/roles/assign
pub async fn assign_role(
    State(state): State<AppState>,
    caller: Caller,
    ValidatedJson(request): ValidatedJson<AssignRoleRequest>,
) -> AppResult<Json<ApiResponse<AssignRoleResponse>>> {
    caller.require(&[Role::Admin, Role::Teacher])?;

    let tx = state.roles.assign(&request.user_address, request.role).await?;
    Ok(ApiResponse::ok(
        AssignRoleResponse {
            tx_hash: tx.hash,
            user_address: normalize_address(&request.user_address),
            role: request.role,
        },
        "Role assigned",
    ))
}

/// GET /api/v1/roles?user_address=0x...
pub async fn get_role(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<RoleQuery>,
) -> AppResult<Json<ApiResponse<RoleResponse>>> {
    caller.require(&[Role::Admin, Role::Teacher])?;

    let address = query
        .user_address
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("user_address is required".to_string()))?;

    let resolved = state.roles.resolve(address.trim()).await?;
    Ok(ApiResponse::ok(
        RoleResponse {
            user_address: normalize_address(&address),
            role: resolved.role,
            source: resolved.source,
        },
        "ok",
    ))
}
