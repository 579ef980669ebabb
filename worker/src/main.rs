//! snapshare worker binary.

use anyhow::Context;
use snapshare_core::event_bus::EventBus;
use snapshare_core::repository::EventBusNotificationPublisher;
use snapshare_postgres::{
    PostgresCounterRepository, PostgresFollowRepository, PostgresImageRepository,
    PostgresUserRepository,
};
use snapshare_redpanda::RedpandaEventBus;
use snapshare_runtime::metrics::MetricsServer;
use snapshare_runtime::{ConsumerGroupRunner, Instrumented, RetryGateway, RetryPolicy};
use snapshare_worker::{Capabilities, Config, Supervisor, shutdown_signal, subscription_table};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.observability.log_filter).context("Invalid RUST_LOG")?)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        brokers = %config.redpanda.brokers,
        notification_topic = %config.redpanda.notification_topic,
        metrics_addr = %config.observability.metrics_addr,
        "Starting snapshare worker"
    );

    let metrics_addr: SocketAddr = config
        .observability
        .metrics_addr
        .parse()
        .context("Invalid METRICS_ADDR")?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start()?;

    info!("Connecting to PostgreSQL...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .idle_timeout(Duration::from_secs(config.postgres.idle_timeout))
        .connect(&config.postgres.url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    info!("PostgreSQL connected");

    let bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.redpanda.brokers)
            .producer_acks(&config.redpanda.producer_acks)
            .auto_offset_reset(&config.redpanda.auto_offset_reset)
            .session_timeout(Duration::from_millis(config.redpanda.session_timeout_ms))
            .build()?,
    );

    let capabilities = Capabilities {
        counters: Arc::new(Instrumented::new(
            "counters",
            PostgresCounterRepository::new(pool.clone()),
        )),
        users: Arc::new(Instrumented::new("users", PostgresUserRepository::new(pool.clone()))),
        images: Arc::new(Instrumented::new("images", PostgresImageRepository::new(pool.clone()))),
        follows: Arc::new(Instrumented::new("follows", PostgresFollowRepository::new(pool))),
        publisher: Arc::new(Instrumented::new(
            "notifications",
            EventBusNotificationPublisher::with_topic(
                Arc::clone(&bus),
                &config.redpanda.notification_topic,
            ),
        )),
    };

    let mut supervisor = Supervisor::new(config.pipeline.shutdown_grace());
    let policy = RetryPolicy::builder()
        .max_attempts(config.pipeline.retry_max_attempts)
        .initial_delay(config.pipeline.retry_backoff())
        .build();
    let gateway = RetryGateway::new(policy, supervisor.abort_token());

    for (runner, pipeline) in subscription_table(&config, &capabilities, gateway)? {
        supervisor.spawn(ConsumerGroupRunner::new(
            runner,
            Arc::clone(&bus),
            pipeline,
            supervisor.shutdown_token(),
        ));
    }

    let reports = supervisor.run_until(shutdown_signal()).await;
    let events_processed: u64 = reports.iter().map(|r| r.events_processed).sum();
    let decode_failures: u64 = reports.iter().map(|r| r.decode_failures).sum();

    info!(
        runners = reports.len(),
        events_processed,
        decode_failures,
        "Worker stopped"
    );
    Ok(())
}
