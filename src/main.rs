use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seat_allocator::{build_router, config::Config, services::cleanup::CleanupService, AppState};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    if config.app.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Seat Allocator API ({})", config.app.environment);

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port).parse()?;
    let housekeeping_every = Duration::from_secs(config.housekeeping.interval_seconds.max(1));

    let app_state = AppState::new(config).await?;

    // --- Start background tasks ---

    // Уборка закрытых каналов наблюдателей
    let cleanup = CleanupService::new(app_state.registry.clone());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(housekeeping_every);
        loop {
            interval.tick().await;
            cleanup.run_housekeeping();
        }
    });

    // --- Start the web server ---

    let app = build_router(app_state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
