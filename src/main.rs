use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rentledger_backend::api::{self, AppState, Stores};
use rentledger_backend::config::AppConfig;
use rentledger_backend::database::enrollment_repository::EnrollmentRepository;
use rentledger_backend::database::memory::{
    InMemoryEnrollmentStore, InMemoryPaymentMethodStore, InMemoryPaymentStore,
    InMemoryTenantReader,
};
use rentledger_backend::database::payment_method_repository::PaymentMethodRepository;
use rentledger_backend::database::payment_repository::PaymentRepository;
use rentledger_backend::database::tenant_repository::TenantRepository;
use rentledger_backend::database::{init_pool_from_config, run_migrations};
use rentledger_backend::health::HealthChecker;
use rentledger_backend::logging::init_tracing;
use rentledger_backend::middleware::auth::AuthConfig;
use rentledger_backend::payments::{ProcessorGateway, StripeProcessor};
use rentledger_backend::workers::{BillingSchedulerConfig, BillingSchedulerWorker};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        skip_externals = config.skip_externals,
        "Starting rent ledger backend"
    );

    let (stores, db_pool) = match &config.database {
        Some(db_config) => {
            info!("Initializing database connection pool...");
            let pool = init_pool_from_config(db_config).await?;
            run_migrations(&pool).await?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "Database connection pool initialized"
            );
            let stores = Stores {
                payments: Arc::new(PaymentRepository::new(pool.clone())),
                enrollments: Arc::new(EnrollmentRepository::new(pool.clone())),
                tenants: Arc::new(TenantRepository::new(pool.clone())),
                methods: Arc::new(PaymentMethodRepository::new(pool.clone())),
            };
            (stores, Some(pool))
        }
        None => {
            warn!("Skipping database initialization (SKIP_EXTERNALS=true), using in-memory stores");
            let stores = Stores {
                payments: Arc::new(InMemoryPaymentStore::new()),
                enrollments: Arc::new(InMemoryEnrollmentStore::new()),
                tenants: Arc::new(InMemoryTenantReader::new()),
                methods: Arc::new(InMemoryPaymentMethodStore::new()),
            };
            (stores, None)
        }
    };

    let processor = StripeProcessor::new(config.processor.clone())?;
    let gateway = ProcessorGateway::new(
        Arc::new(processor),
        stores.methods.clone(),
        config.processor.currency.clone(),
    );

    let processor_configured = !config.processor.secret_key.is_empty();
    let state = AppState::new(
        stores,
        gateway,
        AuthConfig {
            cron_secret: config.billing.cron_secret.clone(),
            admin_token: config.billing.admin_token.clone(),
        },
        HealthChecker::new(db_pool, processor_configured),
        config.billing.max_concurrency,
    );

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let scheduler_handle = if config.billing.scheduler_enabled {
        let worker = BillingSchedulerWorker::new(
            state.billing.clone(),
            BillingSchedulerConfig::from(&config.billing),
        );
        Some(tokio::spawn(worker.run(worker_shutdown_rx)))
    } else {
        info!("Billing scheduler disabled (BILLING_SCHEDULER_ENABLED not set)");
        None
    };

    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = scheduler_handle {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!("Timed out waiting for billing scheduler shutdown");
        }
    }

    info!("Server shutdown complete");

    Ok(())
}
