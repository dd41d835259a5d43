use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use vigil_server::{logging, AppConfig, Services, ShutdownSignal, SignalHandler};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径（默认读取 ./vigil.toml，不存在时使用默认值）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 覆盖配置中的日志级别，如 `debug` 或 `vigil_video=trace`
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;
    logging::init(&config.logging, args.log_level.as_deref())?;

    let bind = config.server.bind_address();
    info!(
        bind = %bind,
        cameras = config.cameras.len(),
        recordings = %config.recording.base_dir.display(),
        "Starting vigil server"
    );

    let signals = SignalHandler::new();
    let mut services = Services::build(config, signals.clone());
    let tasks = services.spawn_background();

    let added = services.add_configured_cameras().await;
    info!(cameras = added, "Cameras registered");

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!(bind = %bind, "HTTP server listening");

    let signal_waiter = signals.clone();
    tokio::spawn(async move {
        signal_waiter.wait_for_system_signal().await;
    });

    let served = axum::serve(listener, services.router())
        .with_graceful_shutdown(signals.signalled())
        .await;
    if let Err(e) = &served {
        error!(error = %e, "HTTP server error");
        signals.trigger(ShutdownSignal::Manual);
    }

    services.shutdown().await;
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task failed");
        }
    }
    info!("Vigil server stopped");

    served.context("HTTP server error")
}
