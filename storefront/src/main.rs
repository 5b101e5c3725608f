//! Storefront HTTP server.
//!
//! ```bash
//! STRIPE_SECRET_KEY=sk_test_... STRIPE_WEBHOOK_SECRET=whsec_... \
//! FRONTEND_URL=http://localhost:5173 JWT_SECRET=... \
//! cargo run -p storefront
//! ```
//!
//! Set `DATABASE_URL` (and build with `--features postgres`) to use
//! `PostgreSQL`; otherwise everything lives in memory.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use storefront::{
    build_router,
    config::Config,
    metrics::register_business_metrics,
    orders::DatedOrderNumbers,
    payment::{PaymentProcessor, StripeClient},
    AppState,
};
use storefront_core::environment::SystemClock;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,storefront=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting storefront server");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        database = config.database.is_some(),
        "Configuration loaded"
    );

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.server.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    register_business_metrics();
    info!(address = %metrics_addr, "Metrics exporter listening");

    let processor: Arc<dyn PaymentProcessor> = Arc::new(
        StripeClient::new(config.stripe.secret_key.clone(), config.stripe.api_base.clone())
            .context("Failed to build Stripe client")?,
    );
    let clock = Arc::new(SystemClock);
    let order_numbers = Arc::new(DatedOrderNumbers);

    let state = match &config.database {
        #[cfg(feature = "postgres")]
        Some(database) => {
            info!("Connecting to PostgreSQL...");
            let shop = storefront::storage::PostgresShop::connect(
                &database.url,
                database.max_connections,
            )
            .await
            .context("Failed to connect to PostgreSQL")?;
            shop.migrate().await.context("Failed to run migrations")?;
            info!("PostgreSQL ready");
            AppState::new(Arc::new(shop), processor, clock, order_numbers, &config)
        },
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            warn!(
                "DATABASE_URL is set but the postgres feature is disabled, using in-memory storage"
            );
            in_memory(processor, clock, order_numbers, &config)
        },
        None => {
            warn!("No DATABASE_URL, using in-memory storage");
            in_memory(processor, clock, order_numbers, &config)
        },
    };

    let fulfillment = state.fulfillment.clone();
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("HTTP server stopped, draining fulfillment");
    if let Err(error) = fulfillment.shutdown(config.server.shutdown_timeout).await {
        warn!(%error, "Fulfillment did not drain cleanly");
    }

    info!("Server stopped");
    Ok(())
}

fn in_memory(
    processor: Arc<dyn PaymentProcessor>,
    clock: Arc<SystemClock>,
    order_numbers: Arc<DatedOrderNumbers>,
    config: &Config,
) -> AppState {
    let shop = Arc::new(storefront::storage::InMemoryShop::new());
    AppState::new(shop, processor, clock, order_numbers, config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(%error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(error) => {
                warn!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}
