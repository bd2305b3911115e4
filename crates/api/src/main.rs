//! bazaar-api: billing webhook and pricing server

use anyhow::Context;
use bazaar_api::{routes::create_router, AppState, Config};
use bazaar_billing::BillingService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("invalid server configuration")?;
    bazaar_api::init_tracing(config.log_format);

    tracing::info!("Starting bazaar-api v{}", env!("CARGO_PKG_VERSION"));

    let pool = bazaar_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;
    bazaar_shared::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let billing = BillingService::from_env(pool).context("invalid billing configuration")?;
    tracing::info!(
        catalog_plans = billing.catalog().plans().count(),
        "Billing configured"
    );

    let bind_address = config.bind_address.clone();
    let app = create_router(AppState::new(config, billing));

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!("bazaar-api listening on {bind_address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("bazaar-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
