use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use crate::{
    api::handler::AppState,
    config::{Config, StoreBackend},
    credits::CreditService,
    error::AppResult,
    ledger::{ConfirmationWaiter, EthereumGateway, LedgerGateway},
    middleware::WriteRateLimiter,
    roles::{RoleCache, RoleResolver},
    store::{CreditStore, InMemoryCreditStore, PgCreditStore},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let store: Arc<dyn CreditStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = initialize_database(config).await?;
            Arc::new(PgCreditStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("⚠️  STORE_BACKEND=memory - credit rows will not survive a restart");
            Arc::new(InMemoryCreditStore::new())
        }
    };

    info!("⚙️  Connecting to ledger at {}...", config.eth_rpc_url);
    let gateway = EthereumGateway::connect(config.ethereum()).await?;
    info!("✅ Ledger gateway initialized (sender {:#x})", gateway.sender());
    let ledger: Arc<dyn LedgerGateway> = Arc::new(gateway);

    Ok(build_state(config, ledger, store))
}

/// Wire services over an already-built ledger and store
pub fn build_state(
    config: &Config,
    ledger: Arc<dyn LedgerGateway>,
    store: Arc<dyn CreditStore>,
) -> AppState {
    let waiter = ConfirmationWaiter::new(config.confirmation());
    let credits = Arc::new(CreditService::new(ledger.clone(), store.clone(), waiter));
    info!(
        "✅ Credit service initialized (poll {:?}, timeout {:?})",
        config.confirmation_poll_interval, config.confirmation_timeout
    );

    let roles = Arc::new(RoleResolver::new(
        ledger.clone(),
        Arc::new(RoleCache::new()),
        config.default_role,
    ));
    info!("✅ Role resolver initialized (default role: {})", config.default_role);

    AppState {
        credits,
        roles,
        store,
        ledger,
        write_limiter: WriteRateLimiter::per_minute(config.write_rate_limit_per_minute),
    }
}

async fn initialize_database(config: &Config) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    info!(
        "✓ Database pool configured: {} max connections",
        config.db_max_connections
    );

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
