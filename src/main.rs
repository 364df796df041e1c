//! Toy lending server
//!
//! REST API server for the toy lending library.

use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toylend_server::{
    api,
    clock::{Clock, SystemClock},
    config::{AppConfig, StoreBackend},
    repository::{MemoryStore, PgStore, Repository},
    services::{
        notifications::{DisabledMailer, HttpMailer, Mailer, NotificationQueue, NotificationWorker},
        Services,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("toylend_server={},tower_http=debug", config.logging.level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting toy lending server v{}", env!("CARGO_PKG_VERSION"));

    let store: Repository = match config.store.backend {
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .connect(&config.database.url)
                .await?;
            tracing::info!("Connected to database");

            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("Database migrations completed");

            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mailer: Arc<dyn Mailer> = if config.notifications.enabled {
        Arc::new(HttpMailer::new(&config.notifications)?)
    } else {
        tracing::warn!("Notifications disabled");
        Arc::new(DisabledMailer)
    };

    // Notification worker drains the queue filled by the reservation engine
    let (queue, notifications) = NotificationQueue::channel(config.notifications.queue_capacity);
    let queue = queue.record_drops(store.clone(), clock.clone());
    let worker = NotificationWorker::new(notifications, mailer.clone(), store.clone(), clock.clone());
    tokio::spawn(worker.run());

    let services = Services::new(
        store,
        queue,
        mailer,
        clock,
        config.loans.clone(),
        config.database.max_transaction_retries,
    );

    let monitor = services.monitor.clone();
    let sweep_interval = Duration::from_secs(config.monitor.sweep_interval_secs.max(1));
    tokio::spawn(monitor.run(sweep_interval));

    // Save server address before moving config
    let server_host = config.server.host.clone();
    let server_port = config.server.port;

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    let app = api::router(state);

    let addr = SocketAddr::new(server_host.parse()?, server_port);
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
