use axum::{extract::State, Json};
use tracing::info;

use super::{handler::AppState, models::*};
use crate::{
    error::AppResult,
    ledger::{normalize_address, validate_address},
    middleware::ValidatedJson,
};

/// POST /api/v1/users/wallet-login
///
/// Returns the user bound to the address, creating a `wallet_` user with the
/// ledger-resolved role on first login. Token issuance happens upstream.
pub async fn wallet_login(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<WalletLoginRequest>,
) -> AppResult<Json<ApiResponse<WalletLoginResponse>>> {
    validate_address(request.address.trim())?;
    let address = normalize_address(&request.address);

    if let Some(user) = state.store.get_user_by_address(&address).await? {
        return Ok(ApiResponse::ok(
            WalletLoginResponse {
                user,
                created: false,
            },
            "Login successful",
        ));
    }

    let resolved = state.roles.resolve(&address).await?;
    let (user, created) = state.store.create_wallet_user(&address, resolved.role).await?;
    if created {
        info!(
            "👤 Created wallet user {} with role {} ({:?})",
            user.username, resolved.role, resolved.source
        );
    }

    Ok(ApiResponse::ok(
        WalletLoginResponse { user, created },
        "Login successful",
    ))
}
