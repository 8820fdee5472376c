use axum::Router;
use billing_rs::{config, db, events, routes, sweeps, webhooks};
use event_bus::{EventBus, InMemoryBus, NatsBus};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = config::Config::from_env()?;
    tracing::info!(bus = ?cfg.bus_type, "config loaded");

    let pool = db::create_pool(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("db connected + migrations applied");

    let bus: Arc<dyn EventBus> = match cfg.bus_type {
        config::BusType::Nats => {
            let nats_url = cfg.nats_url.as_deref().unwrap_or("nats://localhost:4222");
            let nats_client = async_nats::connect(nats_url).await?;
            tracing::info!(%nats_url, "nats connected");
            Arc::new(NatsBus::new(nats_client))
        }
        config::BusType::InMemory => {
            tracing::info!("using in-memory event bus");
            Arc::new(InMemoryBus::new())
        }
    };

    // The dispatcher subscribes before the publisher starts relaying, so
    // in-memory runs do not drop the first events.
    webhooks::start_webhook_dispatcher(bus.clone(), pool.clone()).await;

    let publisher_pool = pool.clone();
    let publisher_bus = bus.clone();
    tokio::spawn(async move {
        events::run_publisher_task(publisher_pool, publisher_bus).await;
    });

    let delivery_pool = pool.clone();
    let delivery_config = cfg.delivery_config();
    tokio::spawn(async move {
        webhooks::run_delivery_worker(delivery_pool, delivery_config).await;
    });

    let overdue_pool = pool.clone();
    let overdue_interval = cfg.overdue_sweep_secs;
    tokio::spawn(async move {
        sweeps::run_overdue_sweep(overdue_pool, overdue_interval).await;
    });

    let archive_pool = pool.clone();
    let archive_interval = cfg.archive_sweep_secs;
    let retention_days = cfg.archive_retention_days;
    tokio::spawn(async move {
        sweeps::run_archive_sweep(archive_pool, archive_interval, retention_days).await;
    });

    let app = Router::new()
        .merge(routes::health::router(pool.clone()))
        .merge(routes::api_router(pool))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
