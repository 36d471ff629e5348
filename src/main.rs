use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use payments_service::api::{self, AppState};
use payments_service::config::Config;
use payments_service::database;
use payments_service::database::callback_repository::PaymentCallbackRepository;
use payments_service::database::event_repository::PaymentEventRepository;
use payments_service::database::payment_repository::PaymentRepository;
use payments_service::payments::providers::StripeProvider;
use payments_service::payments::service::PaymentService;
use payments_service::payments::traits::{Provider, ProviderRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting {}", config.app.service_name);

    // Database pool + migrations
    let pool = database::init_pool(
        &config.database.url,
        Some(database::PoolConfig {
            max_connections: config.database.max_connections,
            ..Default::default()
        }),
    )
    .await?;

    // Wire the payment service
    let stripe: Arc<dyn Provider> = Arc::new(StripeProvider::new(config.stripe.clone()));
    let registry = ProviderRegistry::new(vec![stripe]);
    let service = Arc::new(PaymentService::new(
        Arc::new(PaymentRepository::new(pool.clone())),
        Arc::new(PaymentEventRepository::new(pool.clone())),
        Arc::new(PaymentCallbackRepository::new(pool.clone())),
        registry,
        config.payments.clone(),
        &config.app.api_key,
    ));

    let config = Arc::new(config);
    spawn_workers(&config, service.clone());

    let state = AppState {
        config: config.clone(),
        service,
    };
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Each batch worker runs on its own ticker so replicas can disable them
/// (PAYMENTS_WORKERS_ENABLED=false) and run workers separately.
fn spawn_workers(config: &Config, service: Arc<PaymentService>) {
    if !config.jobs.workers_enabled {
        tracing::info!("batch workers disabled");
        return;
    }

    spawn_worker(
        "reconcile",
        config.jobs.reconcile_interval,
        service.clone(),
        |service| async move { service.run_reconcile_batch().await },
    );
    spawn_worker(
        "callbacks_dispatch",
        config.jobs.callback_dispatch_interval,
        service.clone(),
        |service| async move { service.run_dispatch_callbacks_batch().await },
    );
    spawn_worker(
        "expire_pending",
        config.jobs.expire_pending_interval,
        service,
        |service| async move { service.run_expire_pending_batch().await },
    );
}

fn spawn_worker<F, Fut>(
    name: &'static str,
    interval: std::time::Duration,
    service: Arc<PaymentService>,
    run: F,
) where
    F: Fn(Arc<PaymentService>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = payments_service::error::AppResult<()>> + Send + 'static,
{
    if interval.is_zero() {
        tracing::error!(job = name, "invalid worker interval, worker not started");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let start = Instant::now();
            match run(service.clone()).await {
                Ok(()) => {
                    tracing::info!(job = name, latency = ?start.elapsed(), "job_completed");
                }
                Err(err) => {
                    tracing::error!(job = name, latency = ?start.elapsed(), "job_failed: {}", err);
                }
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
    }
    tracing::info!("shutdown requested");
}
