use std::{process, sync::Arc};

use imgproc::{
    application::{
        blobs::BlobStore,
        channel::MessageChannel,
        error::AppError,
        repos::TasksRepo,
        retry::RetryPolicy,
        tasks::TaskService,
        transform::ImageTransformer,
        worker::{Dimensions, ProcessingWorker, WorkerOptions},
    },
    config,
    infra::{
        blobs::FilesystemBlobStore,
        db::{ChannelOptions, PostgresChannel, PostgresRepositories},
        error::InfraError,
        http::{self, ApiState},
        telemetry,
        transform::ImageModifier,
    },
};
use sqlx::postgres::PgPool;
use tokio_util::sync::CancellationToken;
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
        config::Command::Worker(_) => run_worker(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

struct Runtime {
    repositories: Arc<PostgresRepositories>,
    blobs: Arc<FilesystemBlobStore>,
    channel: Arc<PostgresChannel>,
    retry: RetryPolicy,
}

async fn connect_database(settings: &config::Settings) -> Result<PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}

async fn init_runtime(settings: &config::Settings) -> Result<Runtime, AppError> {
    let pool = connect_database(settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let repositories = Arc::new(PostgresRepositories::new(pool.clone()));
    repositories
        .health_check()
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let blobs = Arc::new(
        FilesystemBlobStore::new(settings.storage.directory.clone())
            .map_err(|err| AppError::from(InfraError::from(err)))?,
    );

    let channel = Arc::new(PostgresChannel::new(
        pool,
        ChannelOptions {
            topic: settings.channel.topic.clone(),
            group: settings.channel.group.clone(),
            consumer_id: settings.channel.consumer_id.clone(),
            lease: settings.channel.lease,
            fetch_wait: settings.channel.fetch_wait,
            poll_interval: settings.channel.poll_interval,
        },
    ));

    let retry = RetryPolicy::new(
        settings.retry.attempts,
        settings.retry.base_delay,
        settings.retry.multiplier,
    );

    Ok(Runtime {
        repositories,
        blobs,
        channel,
        retry,
    })
}

fn build_worker(
    runtime: &Runtime,
    settings: &config::Settings,
) -> Result<ProcessingWorker, AppError> {
    let processing = &settings.processing;
    let watermark = ImageModifier::load_watermark(&processing.watermark_path)?;
    let blobs: Arc<dyn BlobStore> = runtime.blobs.clone();
    let transformer: Arc<dyn ImageTransformer> = Arc::new(ImageModifier::new(
        blobs,
        watermark,
        processing.watermark_margin,
    ));
    let channel: Arc<dyn MessageChannel> = runtime.channel.clone();
    let tasks: Arc<dyn TasksRepo> = runtime.repositories.clone();

    let options = WorkerOptions {
        resize: Dimensions {
            width: processing.resize_width.get(),
            height: processing.resize_height.get(),
        },
        thumbnail: Dimensions {
            width: processing.thumbnail_width.get(),
            height: processing.thumbnail_height.get(),
        },
        status_policy: processing.status_policy,
    };

    Ok(ProcessingWorker::new(
        channel,
        tasks,
        transformer,
        runtime.retry,
        options,
    ))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let runtime = init_runtime(&settings).await?;
    let shutdown = spawn_shutdown_listener();

    let worker_handle = if settings.server.run_worker {
        let worker = build_worker(&runtime, &settings)?;
        let token = shutdown.clone();
        Some(tokio::spawn(async move { worker.run(token).await }))
    } else {
        info!("in-process worker disabled");
        None
    };

    let tasks = Arc::new(TaskService::new(
        runtime.repositories.clone(),
        runtime.blobs.clone(),
        runtime.channel.clone(),
        runtime.retry,
    ));
    let state = ApiState {
        tasks,
        blobs: runtime.blobs.clone(),
    };
    let body_limit = usize::try_from(settings.storage.max_request_bytes.get())
        .map_err(|_| AppError::from(InfraError::configuration("request limit exceeds usize")))?;
    let router = http::build_router(state, body_limit);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "http server listening");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;
    shutdown.cancel();

    if let Some(handle) = worker_handle {
        match tokio::time::timeout(settings.server.graceful_shutdown, handle).await {
            Ok(Ok(result)) => result?,
            Ok(Err(err)) => {
                return Err(AppError::unexpected(format!("worker task failed: {err}")));
            }
            Err(_) => warn!(
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "worker did not stop within the graceful shutdown timeout"
            ),
        }
    }

    served.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
    info!("shutdown complete");
    Ok(())
}

async fn run_worker(settings: config::Settings) -> Result<(), AppError> {
    let runtime = init_runtime(&settings).await?;
    let worker = build_worker(&runtime, &settings)?;
    let shutdown = spawn_shutdown_listener();

    worker.run(shutdown).await?;
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_database(&settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    info!("migrations applied");
    Ok(())
}

/// Cancel the returned token on Ctrl-C or SIGTERM.
fn spawn_shutdown_listener() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        trigger.cancel();
    });
    token
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
