use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the imgproc binary.
#[derive(Debug, Parser)]
#[command(name = "imgproc", version, about = "Image upload and processing service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "IMGPROC_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service, with an in-process worker unless disabled.
    Serve(Box<ServeArgs>),
    /// Run only the processing worker loop.
    Worker(WorkerArgs),
    /// Apply database migrations and exit.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the blob storage root directory.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub storage_directory: Option<PathBuf>,

    /// Override the message channel topic.
    #[arg(long = "channel-topic", value_name = "TOPIC")]
    pub channel_topic: Option<String>,

    /// Override the consumer identity used for message leases.
    #[arg(long = "channel-consumer-id", value_name = "ID")]
    pub channel_consumer_id: Option<String>,

    /// Override the number of attempts for retried calls.
    #[arg(long = "retry-attempts", value_name = "COUNT")]
    pub retry_attempts: Option<u32>,

    /// Override the watermark overlay image.
    #[arg(long = "processing-watermark-path", value_name = "PATH")]
    pub processing_watermark_path: Option<PathBuf>,

    /// Override the final status policy (last_write_wins|worst_status_wins).
    #[arg(long = "processing-status-policy", value_name = "POLICY")]
    pub processing_status_policy: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub worker: WorkerOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Run the processing worker inside the HTTP process.
    #[arg(
        long = "server-run-worker",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub server_run_worker: Option<bool>,

    /// Override the maximum upload request size in bytes.
    #[arg(long = "storage-max-request-bytes", value_name = "BYTES")]
    pub storage_max_request_bytes: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub overrides: WorkerOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}
