use fleet::config::AppConfig;
use fleet::db::{init_pool, run_migrations};
use fleet::error::AppError;
use fleet::state::AppState;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    let db = init_pool(&config.database_url).await?;

    if let Err(err) = run_migrations(&db).await {
        error!("migration failed: {err:?}");
        return Err(err);
    }

    if config.matrix.access_token.trim().is_empty() {
        warn!("MATRIX_ACCESS_TOKEN not set, driver nudges are disabled");
    }

    let state = AppState::from_config(config.clone(), db.clone());
    let scheduler = state.scheduler.start().await?;
    info!(timezone = %config.timezone, "fleet service running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    scheduler.stop().await;
    db.close().await;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,fleet=debug".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
