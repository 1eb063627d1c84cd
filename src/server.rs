use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::{
        credit::{
            approve_credit, get_credit, list_credits, pending_credits, record_credit,
            reject_credit, sync_credits,
        },
        handler::{health_check, AppState},
        role::{assign_role, get_role},
        user::wallet_login,
    },
    middleware::limit_writes,
};

pub fn create_app(state: AppState, cors: CorsLayer) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let api = Router::new()
        // Credits
        .route("/credits", post(record_credit).get(list_credits))
        .route("/credits/approve", post(approve_credit))
        .route("/credits/reject", post(reject_credit))
        .route("/credits/pending", get(pending_credits))
        .route("/credits/sync", post(sync_credits))
        .route("/credits/:id", get(get_credit))
        // Roles
        .route("/roles/assign", post(assign_role))
        .route("/roles", get(get_role))
        // Users
        .route("/users/wallet-login", post(wallet_login))
        .layer(from_fn_with_state(state.write_limiter.clone(), limit_writes));

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
