mod api;
mod bootstrap;
mod config;
mod credits;
mod error;
mod ledger;
mod middleware;
mod roles;
mod server;
mod store;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,credit_backend=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting campus credit backend");

    let config = config::Config::from_env()?;

    let state = bootstrap::initialize_app_state(&config).await?;

    let cors = middleware::create_cors_layer(&config.cors_allowed_origins);
    let app = server::create_app(state, cors);

    server::run_server(app, &config.bind_address).await?;

    Ok(())
}
