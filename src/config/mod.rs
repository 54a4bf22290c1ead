//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CacheArgs, CacheCommand, CliArgs, Command, FlushArgs, ServeArgs, ServeOverrides, StoreOverride,
};

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::{Parser, ValueEnum};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "habit-tracker";
const ENV_PREFIX: &str = "HABIT_TRACKER";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_STORE_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_STORE_OP_TIMEOUT_MS: u64 = 500;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 100;
const DEFAULT_CACHE_RESPONSE_TTL_SECS: u64 = 120;
const DEFAULT_CACHE_STATS_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_MAX_BODY_BYTES: u64 = 1024 * 1024;
const DEFAULT_STATS_MAX_CONCURRENCY: u32 = 16;
const DEFAULT_STATS_DEADLINE_MS: u64 = 5_000;
const DEFAULT_NOTIFICATION_WORKERS: u32 = 5;
const DEFAULT_BULK_WORKERS: u32 = 8;
const DEFAULT_WORKERS_DEADLINE_MS: u64 = 30_000;
/// Upper bound for cache lifetimes and rate windows: 30 days.
const MAX_TTL_SECS: u64 = 30 * 24 * 60 * 60;
/// Upper bound for statistics and worker deadlines: one hour.
const MAX_DEADLINE_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub store: StoreSettings,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
    pub stats: StatsSettings,
    pub workers: WorkersSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    /// Process-local store; only meaningful for a single instance.
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub url: String,
    pub connect_timeout: Duration,
    pub op_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub window_seconds: NonZeroU32,
    pub max_requests: NonZeroU32,
    /// Meter by the first `X-Forwarded-For` hop instead of the peer address.
    pub trust_forwarded: bool,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub response_ttl_seconds: NonZeroU64,
    pub stats_ttl_seconds: NonZeroU64,
    pub max_body_bytes: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct StatsSettings {
    pub max_concurrency: NonZeroU32,
    /// `None` waits for every habit task.
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct WorkersSettings {
    pub notification_workers: NonZeroU32,
    pub bulk_workers: NonZeroU32,
    pub deadline: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Cache(args)) => match &args.command {
            CacheCommand::Flush(flush) => raw.apply_store_override(&flush.store),
        },
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    store: RawStoreSettings,
    rate_limit: RawRateLimitSettings,
    cache: RawCacheSettings,
    stats: RawStatsSettings,
    workers: RawWorkersSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_max_requests {
            self.rate_limit.max_requests = Some(max);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(deadline) = overrides.stats_deadline_ms {
            self.stats.deadline_ms = Some(deadline);
        }
        if let Some(workers) = overrides.workers_notifications {
            self.workers.notification_workers = Some(workers);
        }

        self.apply_store_override(&overrides.store);
    }

    fn apply_store_override(&mut self, overrides: &StoreOverride) {
        if let Some(backend) = overrides.store_backend {
            self.store.backend = Some(backend);
        }
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
    }
}

impl Settings {
    /// Built-in defaults without consulting files, environment or CLI.
    pub fn defaults() -> Result<Self, LoadError> {
        Self::from_raw(RawSettings::default())
    }

    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            store,
            rate_limit,
            cache,
            stats,
            workers,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            store: build_store_settings(store)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            cache: build_cache_settings(cache)?,
            stats: build_stats_settings(stats)?,
            workers: build_workers_settings(workers)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        run_migrations: database.run_migrations.unwrap_or(true),
    })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let backend = store.backend.unwrap_or(StoreBackend::Redis);
    let url = store
        .url
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_STORE_URL.to_string());
    if backend == StoreBackend::Redis && url.is_empty() {
        return Err(LoadError::invalid(
            "store.url",
            "url must not be empty for the redis backend",
        ));
    }

    let connect_timeout_ms = store
        .connect_timeout_ms
        .unwrap_or(DEFAULT_STORE_CONNECT_TIMEOUT_MS);
    let op_timeout_ms = store.op_timeout_ms.unwrap_or(DEFAULT_STORE_OP_TIMEOUT_MS);

    Ok(StoreSettings {
        backend,
        url,
        connect_timeout: Duration::from_millis(
            non_zero_u64(connect_timeout_ms, "store.connect_timeout_ms")?.get(),
        ),
        op_timeout: Duration::from_millis(
            non_zero_u64(op_timeout_ms, "store.op_timeout_ms")?.get(),
        ),
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let window_seconds_val = rate_limit
        .window_seconds
        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS);
    let window_seconds = non_zero_u32(
        at_most(window_seconds_val, MAX_TTL_SECS, "rate_limit.window_seconds")?,
        "rate_limit.window_seconds",
    )?;

    let max_requests_val = rate_limit
        .max_requests
        .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS);
    let max_requests = non_zero_u32(max_requests_val, "rate_limit.max_requests")?;

    Ok(RateLimitSettings {
        enabled: rate_limit.enabled.unwrap_or(true),
        window_seconds,
        max_requests,
        trust_forwarded: rate_limit.trust_forwarded.unwrap_or(false),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let response_ttl_seconds = non_zero_u64(
        at_most(
            cache
                .response_ttl_seconds
                .unwrap_or(DEFAULT_CACHE_RESPONSE_TTL_SECS),
            MAX_TTL_SECS,
            "cache.response_ttl_seconds",
        )?,
        "cache.response_ttl_seconds",
    )?;
    let stats_ttl_seconds = non_zero_u64(
        at_most(
            cache
                .stats_ttl_seconds
                .unwrap_or(DEFAULT_CACHE_STATS_TTL_SECS),
            MAX_TTL_SECS,
            "cache.stats_ttl_seconds",
        )?,
        "cache.stats_ttl_seconds",
    )?;

    let max_body_value = cache
        .max_body_bytes
        .unwrap_or(DEFAULT_CACHE_MAX_BODY_BYTES);
    let max_body_usize = usize::try_from(max_body_value).map_err(|_| {
        LoadError::invalid(
            "cache.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;
    let max_body_bytes = NonZeroUsize::new(max_body_usize)
        .ok_or_else(|| LoadError::invalid("cache.max_body_bytes", "must be greater than zero"))?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        response_ttl_seconds,
        stats_ttl_seconds,
        max_body_bytes,
    })
}

fn build_stats_settings(stats: RawStatsSettings) -> Result<StatsSettings, LoadError> {
    let max_concurrency = non_zero_u32(
        stats
            .max_concurrency
            .unwrap_or(DEFAULT_STATS_MAX_CONCURRENCY)
            .into(),
        "stats.max_concurrency",
    )?;

    Ok(StatsSettings {
        max_concurrency,
        deadline: optional_millis(at_most(
            stats.deadline_ms.unwrap_or(DEFAULT_STATS_DEADLINE_MS),
            MAX_DEADLINE_MS,
            "stats.deadline_ms",
        )?),
    })
}

fn build_workers_settings(workers: RawWorkersSettings) -> Result<WorkersSettings, LoadError> {
    let notification_workers = non_zero_u32(
        workers
            .notification_workers
            .unwrap_or(DEFAULT_NOTIFICATION_WORKERS)
            .into(),
        "workers.notification_workers",
    )?;
    let bulk_workers = non_zero_u32(
        workers.bulk_workers.unwrap_or(DEFAULT_BULK_WORKERS).into(),
        "workers.bulk_workers",
    )?;

    Ok(WorkersSettings {
        notification_workers,
        bulk_workers,
        deadline: optional_millis(at_most(
            workers.deadline_ms.unwrap_or(DEFAULT_WORKERS_DEADLINE_MS),
            MAX_DEADLINE_MS,
            "workers.deadline_ms",
        )?),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    run_migrations: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<StoreBackend>,
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
    op_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    enabled: Option<bool>,
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
    trust_forwarded: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    response_ttl_seconds: Option<u64>,
    stats_ttl_seconds: Option<u64>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStatsSettings {
    max_concurrency: Option<u32>,
    deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkersSettings {
    notification_workers: Option<u32>,
    bulk_workers: Option<u32>,
    deadline_ms: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn at_most(value: u64, max: u64, key: &'static str) -> Result<u64, LoadError> {
    if value > max {
        return Err(LoadError::invalid(key, format!("must be at most {max}")));
    }
    Ok(value)
}

/// Zero disables the limit.
fn optional_millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
