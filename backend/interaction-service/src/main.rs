use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use anyhow::{anyhow, Context, Result};
use idempotent_consumer::{IdempotencyGuard, DEFAULT_RETENTION};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tonic::transport::Server;
use tower::limit::GlobalConcurrencyLimitLayer;
use tracing::{error, info, warn};

use interaction_service::cache::{CacheClient, RedisCache};
use interaction_service::config::Config;
use interaction_service::grpc::proto::interaction_service_server::InteractionServiceServer;
use interaction_service::grpc::{AdmissionInterceptor, InteractionServiceImpl};
use interaction_service::metrics;
use interaction_service::queue::{EventPublisher, KafkaEventConsumer, KafkaEventPublisher};
use interaction_service::repository::{InteractionStore, PgInteractionStore};
use interaction_service::services::InteractionOrchestrator;
use interaction_service::workers::{
    dedupe_cleanup, redis_health, ReconciliationWorker,
};

type ServiceServer = InteractionServiceServer<InteractionServiceImpl>;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("interaction_service=info,info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn readiness(ready: web::Data<Arc<AtomicBool>>) -> impl Responder {
    if ready.load(Ordering::Relaxed) {
        HttpResponse::Ok().body("READY")
    } else {
        HttpResponse::ServiceUnavailable().body("reconciliation worker stopped")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting interaction-service");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "Configuration loaded: env={}, http_port={}, grpc_port={}",
        config.app.env, config.app.http_port, config.grpc.port
    );

    // Prepared statement caching disabled for PgBouncer transaction mode
    let connect_options = PgConnectOptions::from_str(&config.database.url)
        .context("Failed to parse DATABASE_URL")?
        .statement_cache_capacity(0);

    let pg_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(connect_options)
        .await
        .context("Failed to connect to database")?;

    sqlx::query("SELECT 1")
        .execute(&pg_pool)
        .await
        .context("Failed to verify database connection")?;
    info!("Database pool created and verified");

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let redis_client =
        redis::Client::open(config.redis.url.as_str()).context("Failed to create Redis client")?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("Failed to connect to Redis")?;
    info!("Redis connection established");

    let store: Arc<dyn InteractionStore> = Arc::new(PgInteractionStore::new(pg_pool.clone()));
    let cache: Arc<dyn CacheClient> = Arc::new(RedisCache::new(
        redis_conn,
        Duration::from_millis(config.redis.op_timeout_ms),
    ));
    let publisher: Arc<dyn EventPublisher> = Arc::new(
        KafkaEventPublisher::new(&config.kafka).context("Failed to create Kafka producer")?,
    );
    let consumer =
        KafkaEventConsumer::new(&config.kafka).context("Failed to create Kafka consumer")?;

    let orchestrator = Arc::new(InteractionOrchestrator::new(
        store.clone(),
        cache.clone(),
        publisher,
        config.orchestrator_config(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ready = Arc::new(AtomicBool::new(true));

    // Reconciliation worker: started once, joined on shutdown
    let worker = ReconciliationWorker::new(
        Box::new(consumer),
        store.clone(),
        cache.clone(),
        config.reconciliation_config(),
    );
    let mut worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));
    info!("Reconciliation worker started");

    tokio::spawn(redis_health::start_redis_health_check(
        cache.clone(),
        redis_health::RedisHealthConfig::default(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(dedupe_cleanup::run(
        IdempotencyGuard::new(pg_pool.clone(), DEFAULT_RETENTION),
        dedupe_cleanup::CLEANUP_INTERVAL,
        shutdown_rx.clone(),
    ));

    let grpc_addr = format!("{}:{}", config.app.host, config.grpc.port)
        .parse()
        .context("Invalid gRPC address")?;
    let http_addr = format!("{}:{}", config.app.host, config.app.http_port);

    info!("Starting servers:");
    info!("  - HTTP health checks: http://{}", http_addr);
    info!("  - gRPC service: grpc://{}", grpc_addr);

    let mut join_set = JoinSet::new();

    let http_ready = ready.clone();
    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(http_ready.clone()))
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/ready", web::get().to(readiness))
            .route("/metrics", web::get().to(metrics::serve_metrics))
    })
    .disable_signals()
    .bind(&http_addr)
    .context("Failed to bind HTTP server")?
    .run();
    let http_handle = http_server.handle();

    join_set.spawn(async move {
        http_server
            .await
            .map_err(|e| anyhow!("HTTP server error: {}", e))
    });

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter.set_serving::<ServiceServer>().await;

    let admission = config.admission.clone();
    let grpc_service = InteractionServiceServer::with_interceptor(
        InteractionServiceImpl::new(orchestrator),
        AdmissionInterceptor::new(admission.max_requests_per_second),
    );
    let mut grpc_shutdown = shutdown_rx.clone();

    join_set.spawn(async move {
        let mut builder = Server::builder();
        if admission.max_concurrent_per_connection > 0 {
            builder = builder.concurrency_limit_per_connection(admission.max_concurrent_per_connection);
        }

        builder
            .layer(GlobalConcurrencyLimitLayer::new(
                admission.max_concurrent_requests.max(1),
            ))
            .add_service(health_service)
            .add_service(grpc_service)
            .serve_with_shutdown(grpc_addr, async move {
                let _ = grpc_shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| anyhow!("gRPC server error: {}", e))
    });

    info!("interaction-service is running");

    let mut failure: Option<anyhow::Error> = None;
    let mut worker_joined = false;

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
        joined = &mut worker_handle => {
            worker_joined = true;
            let err = match joined {
                Ok(Ok(())) => anyhow!("reconciliation worker exited unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => anyhow!("reconciliation worker panicked: {}", e),
            };
            error!("Reconciliation worker failed: {:#}", err);
            ready.store(false, Ordering::Relaxed);
            health_reporter.set_not_serving::<ServiceServer>().await;
            failure = Some(err);
        }
        Some(joined) = join_set.join_next() => {
            let err = match joined {
                Ok(Ok(())) => anyhow!("server task exited unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => anyhow!("server task panicked: {}", e),
            };
            error!("Task failed: {:#}", err);
            failure = Some(err);
        }
    }

    info!("interaction-service shutting down");
    let _ = shutdown_tx.send(true);
    http_handle.stop(true).await;

    if !worker_joined {
        match worker_handle.await {
            Ok(Ok(())) => info!("Reconciliation worker drained"),
            Ok(Err(e)) => {
                error!("Reconciliation worker failed during shutdown: {:#}", e);
                failure.get_or_insert(e);
            }
            Err(e) => {
                error!("Reconciliation worker panicked: {}", e);
                failure.get_or_insert(anyhow!("reconciliation worker panicked: {}", e));
            }
        }
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Task ended with error during shutdown: {:#}", e),
            Err(e) => warn!("Task panicked during shutdown: {}", e),
        }
    }

    pg_pool.close().await;

    match failure {
        Some(err) => Err(err),
        None => {
            info!("interaction-service stopped");
            Ok(())
        }
    }
}
