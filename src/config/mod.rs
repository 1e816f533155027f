//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CliArgs, Command, DatabaseOverride, LoggingOverrides, MigrateArgs, ServeArgs, ServeOverrides,
    WorkerArgs, WorkerOverrides,
};

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::worker::StatusPolicy;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "imgproc";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_STORAGE_DIR: &str = "images";
const DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_CHANNEL_TOPIC: &str = "image-processing";
const DEFAULT_CHANNEL_GROUP: &str = "image-workers";
const DEFAULT_CHANNEL_LEASE_SECS: u64 = 30;
const DEFAULT_CHANNEL_FETCH_WAIT_MS: u64 = 1000;
const DEFAULT_CHANNEL_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1;
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
const DEFAULT_WATERMARK_PATH: &str = "assets/watermark.png";
const DEFAULT_RESIZE: (u32, u32) = (1024, 768);
const DEFAULT_THUMBNAIL: (u32, u32) = (128, 128);
const DEFAULT_WATERMARK_MARGIN: u32 = 10;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub channel: ChannelSettings,
    pub retry: RetrySettings,
    pub processing: ProcessingSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub run_worker: bool,
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
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub directory: PathBuf,
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub topic: String,
    pub group: String,
    pub consumer_id: String,
    pub lease: Duration,
    pub fetch_wait: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub attempts: NonZeroU32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct ProcessingSettings {
    pub watermark_path: PathBuf,
    pub resize_width: NonZeroU32,
    pub resize_height: NonZeroU32,
    pub thumbnail_width: NonZeroU32,
    pub thumbnail_height: NonZeroU32,
    pub watermark_margin: u32,
    pub status_policy: StatusPolicy,
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

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("IMGPROC").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Worker(args)) => raw.apply_worker_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    storage: RawStorageSettings,
    channel: RawChannelSettings,
    retry: RawRetrySettings,
    processing: RawProcessingSettings,
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
        if let Some(run_worker) = overrides.server_run_worker {
            self.server.run_worker = Some(run_worker);
        }
        if let Some(limit) = overrides.storage_max_request_bytes {
            self.storage.max_request_bytes = Some(limit);
        }

        self.apply_worker_overrides(&overrides.worker);
    }

    fn apply_worker_overrides(&mut self, overrides: &WorkerOverrides) {
        self.apply_database_override(&overrides.database);
        self.apply_logging_overrides(&overrides.logging);

        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(topic) = overrides.channel_topic.as_ref() {
            self.channel.topic = Some(topic.clone());
        }
        if let Some(consumer_id) = overrides.channel_consumer_id.as_ref() {
            self.channel.consumer_id = Some(consumer_id.clone());
        }
        if let Some(attempts) = overrides.retry_attempts {
            self.retry.attempts = Some(attempts);
        }
        if let Some(path) = overrides.processing_watermark_path.as_ref() {
            self.processing.watermark_path = Some(path.clone());
        }
        if let Some(policy) = overrides.processing_status_policy.as_ref() {
            self.processing.status_policy = Some(policy.clone());
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            storage,
            channel,
            retry,
            processing,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            storage: build_storage_settings(storage)?,
            channel: build_channel_settings(channel)?,
            retry: build_retry_settings(retry)?,
            processing: build_processing_settings(processing)?,
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
        run_worker: server.run_worker.unwrap_or(true),
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
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let directory = storage
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.directory",
            "path must not be empty",
        ));
    }

    let max_request_bytes_value = storage
        .max_request_bytes
        .unwrap_or(DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("storage.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "storage.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(StorageSettings {
        directory,
        max_request_bytes,
    })
}

fn build_channel_settings(channel: RawChannelSettings) -> Result<ChannelSettings, LoadError> {
    let topic = non_empty(channel.topic, DEFAULT_CHANNEL_TOPIC, "channel.topic")?;
    let group = non_empty(channel.group, DEFAULT_CHANNEL_GROUP, "channel.group")?;
    let consumer_id = match channel.consumer_id {
        Some(value) if value.trim().is_empty() => {
            return Err(LoadError::invalid(
                "channel.consumer_id",
                "must not be empty",
            ));
        }
        Some(value) => value.trim().to_string(),
        None => format!("consumer-{}", std::process::id()),
    };

    let lease_secs = channel.lease_seconds.unwrap_or(DEFAULT_CHANNEL_LEASE_SECS);
    if lease_secs == 0 {
        return Err(LoadError::invalid(
            "channel.lease_seconds",
            "must be greater than zero",
        ));
    }

    let fetch_wait_ms = channel
        .fetch_wait_millis
        .unwrap_or(DEFAULT_CHANNEL_FETCH_WAIT_MS);
    let poll_interval_ms = channel
        .poll_interval_millis
        .unwrap_or(DEFAULT_CHANNEL_POLL_INTERVAL_MS);
    if poll_interval_ms == 0 {
        return Err(LoadError::invalid(
            "channel.poll_interval_millis",
            "must be greater than zero",
        ));
    }

    Ok(ChannelSettings {
        topic,
        group,
        consumer_id,
        lease: Duration::from_secs(lease_secs),
        fetch_wait: Duration::from_millis(fetch_wait_ms),
        poll_interval: Duration::from_millis(poll_interval_ms),
    })
}

fn build_retry_settings(retry: RawRetrySettings) -> Result<RetrySettings, LoadError> {
    let attempts = non_zero_u32(
        retry.attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS).into(),
        "retry.attempts",
    )?;

    let multiplier = retry.multiplier.unwrap_or(DEFAULT_RETRY_MULTIPLIER);
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(LoadError::invalid(
            "retry.multiplier",
            "must be a finite number of at least 1.0",
        ));
    }

    Ok(RetrySettings {
        attempts,
        base_delay: Duration::from_millis(
            retry.base_delay_millis.unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
        ),
        multiplier,
    })
}

fn build_processing_settings(
    processing: RawProcessingSettings,
) -> Result<ProcessingSettings, LoadError> {
    let watermark_path = processing
        .watermark_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WATERMARK_PATH));
    if watermark_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "processing.watermark_path",
            "path must not be empty",
        ));
    }

    let status_policy = match processing.status_policy {
        Some(value) => StatusPolicy::from_str(&value)
            .map_err(|reason| LoadError::invalid("processing.status_policy", reason))?,
        None => StatusPolicy::default(),
    };

    Ok(ProcessingSettings {
        watermark_path,
        resize_width: non_zero_u32(
            processing.resize_width.unwrap_or(DEFAULT_RESIZE.0).into(),
            "processing.resize_width",
        )?,
        resize_height: non_zero_u32(
            processing.resize_height.unwrap_or(DEFAULT_RESIZE.1).into(),
            "processing.resize_height",
        )?,
        thumbnail_width: non_zero_u32(
            processing
                .thumbnail_width
                .unwrap_or(DEFAULT_THUMBNAIL.0)
                .into(),
            "processing.thumbnail_width",
        )?,
        thumbnail_height: non_zero_u32(
            processing
                .thumbnail_height
                .unwrap_or(DEFAULT_THUMBNAIL.1)
                .into(),
            "processing.thumbnail_height",
        )?,
        watermark_margin: processing
            .watermark_margin
            .unwrap_or(DEFAULT_WATERMARK_MARGIN),
        status_policy,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    run_worker: Option<bool>,
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
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    directory: Option<PathBuf>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawChannelSettings {
    topic: Option<String>,
    group: Option<String>,
    consumer_id: Option<String>,
    lease_seconds: Option<u64>,
    fetch_wait_millis: Option<u64>,
    poll_interval_millis: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRetrySettings {
    attempts: Option<u32>,
    base_delay_millis: Option<u64>,
    multiplier: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProcessingSettings {
    watermark_path: Option<PathBuf>,
    resize_width: Option<u32>,
    resize_height: Option<u32>,
    thumbnail_width: Option<u32>,
    thumbnail_height: Option<u32>,
    watermark_margin: Option<u32>,
    status_policy: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    match value {
        Some(value) if value.trim().is_empty() => {
            Err(LoadError::invalid(key, "must not be empty"))
        }
        Some(value) => Ok(value.trim().to_string()),
        None => Ok(default.to_string()),
    }
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
