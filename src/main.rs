//! Marketplace Orders - order cancellation and refund reconciliation service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketplace_orders::clock::SystemClock;
use marketplace_orders::services::publisher::{EventPublisher, NatsPublisher, NoopPublisher};
use marketplace_orders::{api, Config, DataGateway, InMemoryGateway, PgGateway, Services};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let gateway: Arc<dyn DataGateway> = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(config.max_connections).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Arc::new(PgGateway::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running on the in-memory gateway");
            Arc::new(InMemoryGateway::new())
        }
    };

    let publisher: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Arc::new(NatsPublisher::new(client, config.nats_subject_prefix.clone())),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, domain events will not be published");
                Arc::new(NoopPublisher)
            }
        },
        None => Arc::new(NoopPublisher),
    };

    let services = Services::build(gateway, publisher, Arc::new(SystemClock), &config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = tokio::spawn(services.relay.clone().run(shutdown_rx));

    let app = api::router(services);
    tracing::info!("🚀 Marketplace Orders listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app)
        .with_graceful_shutdown(async { tokio::signal::ctrl_c().await.ok(); })
        .await?;

    shutdown_tx.send(true).ok();
    relay.await?;
    Ok(())
}
