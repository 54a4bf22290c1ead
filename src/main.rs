use std::{net::SocketAddr, process, sync::Arc};

use habit_tracker::{
    application::{error::AppError, notifications::LogNotifier, repos::HabitsRepo},
    cache::{Invalidator, KeyValueStore, MemoryStore, RedisStore},
    config::{self, CacheCommand, StoreBackend},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AppState},
        telemetry,
    },
};
use tokio::signal;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Cache(args) => match args.command {
            CacheCommand::Flush(flush) => run_cache_flush(settings, flush.user).await,
        },
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let store = init_store(&settings).await?;

    let repo: Arc<dyn HabitsRepo> = repositories;
    let state = AppState::new(&settings, repo, store, Arc::new(LogNotifier::default()));

    serve_http(&settings, state).await
}

async fn run_cache_flush(
    settings: config::Settings,
    user: Option<habit_tracker::domain::entities::UserId>,
) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let invalidator = Invalidator::new(store);

    let deleted = match user {
        Some(user_id) => invalidator.flush_owner(user_id).await?,
        None => invalidator.flush_all().await?,
    };

    info!(user_id = ?user, deleted, "cache flushed");
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    if settings.database.run_migrations {
        PostgresRepositories::run_migrations(&pool)
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    }

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn init_store(settings: &config::Settings) -> Result<Arc<dyn KeyValueStore>, AppError> {
    match settings.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(
                &settings.store.url,
                settings.store.connect_timeout,
                settings.store.op_timeout,
            )
            .await
            .map_err(|err| AppError::from(InfraError::store(err.to_string())))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("using the in-process store; cache and rate limits are not shared");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "listening");

    let grace = settings.server.graceful_shutdown;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!(grace_seconds = grace.as_secs(), "shutdown signal received");
        // Force exit if in-flight requests outlive the grace period.
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            warn!("graceful shutdown timed out");
            process::exit(1);
        });
    })
    .await
    .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
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
}
