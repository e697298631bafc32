//! HTTP server initialization and runtime setup.
//!
//! Handles storage and cache setup, spawns the evaluation worker, the stale
//! sweeper and the click aggregator registry, and runs the Axum server until
//! a shutdown signal arrives.

use crate::analytics::AggregatorRegistry;
use crate::application::services::AuthService;
use crate::config::{Config, StorageBackend};
use crate::domain::job_queue::JobQueue;
use crate::evaluation::{
    ContentScorer, EvaluationEngine, EvaluationQueue, HtmlRenderer, HttpFetcher,
    HttpInferenceClient, InferenceClient, JobHandler, PageRenderer, StaleSweeper,
};
use crate::infrastructure::Repositories;
use crate::infrastructure::cache::{CacheService, NullCache, RedisCache};
use crate::routes::app_router;
use crate::state::AppState;

use anyhow::{Context, Result};
use axum::ServiceExt;
use axum::extract::Request;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Runs the HTTP server with the given configuration.
///
/// Initializes:
/// - PostgreSQL connection pool and migrations (or in-memory stores)
/// - Redis cache (or NullCache fallback)
/// - Evaluation queue, worker and stale sweeper
/// - Click aggregator registry
/// - Axum HTTP server with graceful shutdown
///
/// Jobs whose workflow checkpoints survived a restart are queued again
/// before the server starts accepting requests.
///
/// # Errors
///
/// Returns an error if:
/// - Database connection or migration fails
/// - An outbound HTTP client cannot be built
/// - Server bind fails
/// - Server runtime error occurs
pub async fn run(config: Config) -> Result<()> {
    let repositories = connect_storage(&config).await?;
    let cache = connect_cache(&config).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (queue, worker) = EvaluationQueue::new(config.queue_settings());
    let engine = Arc::new(build_engine(&config, &repositories)?);
    let job_queue: Arc<dyn JobQueue> = Arc::new(queue.clone());

    match engine.resume_pending(job_queue.as_ref()).await {
        Ok(resumed) => tracing::info!(resumed, "Checked for interrupted evaluations"),
        Err(e) => tracing::error!(error = %e, "Failed to resume interrupted evaluations"),
    }

    let handler: Arc<dyn JobHandler> = engine;
    let worker_task = tokio::spawn(worker.run(handler, shutdown_rx.clone()));
    tracing::info!("Evaluation worker started");

    let sweeper = StaleSweeper::new(&repositories, job_queue, config.sweep_settings());
    let sweeper_task = tokio::spawn(sweeper.run(shutdown_rx.clone()));

    let aggregators = Arc::new(AggregatorRegistry::new(
        repositories.aggregates.clone(),
        repositories.links.clone(),
        config.aggregator_settings(),
    ));

    let auth_service = AuthService::new(&config.api_token, config.token_signing_secret.clone())
        .context("Failed to initialize token authentication")?;

    let state = AppState::new(
        &repositories,
        cache,
        queue,
        aggregators.clone(),
        auth_service,
        config.request_settings(),
    );

    let app = app_router(state, config.behind_proxy)?;

    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{addr}");

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(
        listener,
        ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app),
    )
    .with_graceful_shutdown(async move {
        let _ = server_shutdown.changed().await;
    })
    .await?;

    tracing::info!("HTTP server stopped; draining background tasks");

    let drain_timeout = Duration::from_secs(config.job_timeout_secs);
    if tokio::time::timeout(drain_timeout, worker_task).await.is_err() {
        tracing::warn!("Evaluation worker did not drain in time; checkpoints will resume on restart");
    }
    let _ = sweeper_task.await;

    let flushed = aggregators.flush_all().await;
    tracing::info!(flushed, "Flushed open click buckets");

    Ok(())
}

async fn connect_storage(config: &Config) -> Result<Repositories> {
    match config.storage {
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for postgres storage")?;

            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .acquire_timeout(Duration::from_secs(config.db_connect_timeout))
                .idle_timeout(Duration::from_secs(config.db_idle_timeout))
                .max_lifetime(Duration::from_secs(config.db_max_lifetime))
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Connected to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;

            Ok(Repositories::postgres(Arc::new(pool)))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; all state is lost on restart");
            Ok(Repositories::in_memory())
        }
    }
}

async fn connect_cache(config: &Config) -> Arc<dyn CacheService> {
    if let Some(redis_url) = &config.redis_url {
        match RedisCache::connect(redis_url, config.cache_ttl_seconds).await {
            Ok(redis) => {
                tracing::info!("Cache enabled (Redis)");
                Arc::new(redis)
            }
            Err(e) => {
                tracing::warn!("Failed to connect to Redis: {}. Using NullCache.", e);
                Arc::new(NullCache::new())
            }
        }
    } else {
        tracing::info!("Cache disabled (NullCache)");
        Arc::new(NullCache::new())
    }
}

fn build_engine(config: &Config, repositories: &Repositories) -> Result<EvaluationEngine> {
    let fetcher = HttpFetcher::new(Duration::from_secs(config.fetch_timeout_secs))
        .context("Failed to build fetch client")?;

    let renderer: Option<Arc<dyn PageRenderer>> = if config.render_enabled {
        Some(Arc::new(HtmlRenderer::new()))
    } else {
        tracing::info!("Rendering disabled; scoring raw content");
        None
    };

    let inference: Option<Arc<dyn InferenceClient>> = match &config.inference_url {
        Some(url) => {
            let client =
                HttpInferenceClient::new(url.clone(), Duration::from_secs(config.fetch_timeout_secs))
                    .context("Failed to build inference client")?;
            Some(Arc::new(client))
        }
        None => {
            tracing::info!("INFERENCE_URL not set; using heuristic scoring only");
            None
        }
    };

    Ok(EvaluationEngine::new(
        Arc::new(fetcher),
        renderer,
        ContentScorer::new(inference),
        repositories,
        config.engine_settings(),
    ))
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received");
}
