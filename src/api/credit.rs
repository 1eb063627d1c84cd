use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use super::{handler::AppState, models::*};
use crate::{
    credits::{CreditSubmission, ReviewedCredit, SubmittedCredit, SyncReport},
    error::AppResult,
    middleware::{Caller, ValidatedJson},
    store::models::{CreditRecord, Role},
};

/// POST /api/v1/credits - teacher records a credit on the ledger
pub async fn record_credit(
    State(state): State<AppState>,
    caller: Caller,
    ValidatedJson(request): ValidatedJson<RecordCreditRequest>,
) -> AppResult<Json<ApiResponse<SubmittedCredit>>> {
    caller.require(&[Role::Teacher])?;
    info!(
        "📝 Recording credit: teacher={} student={} course={}",
        caller.address, request.student_address, request.course_name
    );

    let submitted = state
        .credits
        .submit_credit(
            &caller.address,
            CreditSubmission {
                student_id: request.student_address,
                course_name: request.course_name,
                score: request.score,
            },
        )
        .await?;

    Ok(ApiResponse::ok(submitted, "Credit recorded"))
}

/// POST /api/v1/credits/approve
pub async fn approve_credit(
    State(state): State<AppState>,
    caller: Caller,
    ValidatedJson(request): ValidatedJson<ReviewCreditRequest>,
) -> AppResult<Json<ApiResponse<ReviewedCredit>>> {
    caller.require(&[Role::Admin])?;

    let reviewed = state
        .credits
        .approve_credit(request.credit_id, &caller.address)
        .await?;
    Ok(ApiResponse::ok(reviewed, "Credit approved"))
}

/// POST /api/v1/credits/reject
pub async fn reject_credit(
    State(state): State<AppState>,
    caller: Caller,
    ValidatedJson(request): ValidatedJson<ReviewCreditRequest>,
) -> AppResult<Json<ApiResponse<ReviewedCredit>>> {
    caller.require(&[Role::Admin])?;

    let reviewed = state
        .credits
        .reject_credit(request.credit_id, &caller.address)
        .await?;
    Ok(ApiResponse::ok(reviewed, "Credit rejected"))
}

/// GET /api/v1/credits - scoped by the caller's role
pub async fn list_credits(
    State(state): State<AppState>,
    caller: Caller,
) -> AppResult<Json<ApiResponse<Vec<CreditRecord>>>> {
    let credits = state.credits.list_for(&caller.address, caller.role).await?;
    Ok(ApiResponse::ok(credits, "ok"))
}

/// GET /api/v1/credits/pending
pub async fn pending_credits(
    State(state): State<AppState>,
    caller: Caller,
) -> AppResult<Json<ApiResponse<Vec<CreditRecord>>>> {
    caller.require(&[Role::Admin])?;
    let credits = state.credits.pending_credits().await?;
    Ok(ApiResponse::ok(credits, "ok"))
}

/// GET /api/v1/credits/:id
pub async fn get_credit(
    State(state): State<AppState>,
    _caller: Caller,
    Path(credit_id): Path<i64>,
) -> AppResult<Json<ApiResponse<CreditRecord>>> {
    let credit = state.credits.get_credit(credit_id).await?;
    Ok(ApiResponse::ok(credit, "ok"))
}

/// POST /api/v1/credits/sync
pub async fn sync_credits(
    State(state): State<AppState>,
    caller: Caller,
) -> AppResult<Json<ApiResponse<SyncReport>>> {
    caller.require(&[Role::Admin])?;
    let report = state.credits.sync_pending().await?;
    Ok(ApiResponse::ok(report, "Sync finished"))
}
