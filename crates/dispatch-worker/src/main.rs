//! 通知调度服务入口

use anyhow::Context;
use clap::Parser;
use dispatch_shared::config::AppConfig;
use dispatch_shared::observability;
use dispatch_worker::cli::{Cli, Commands, RunArgs};
use dispatch_worker::server::DispatchServer;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

const SERVICE_NAME: &str = "cns-dispatch";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            let version = AppConfig::load(SERVICE_NAME)
                .map(|c| c.project.version)
                .unwrap_or_default();
            println!("{} {} ({})", SERVICE_NAME, env!("CARGO_PKG_VERSION"), version);
            Ok(())
        }
        Commands::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME).context("配置加载失败")?;

    let observability_config = config
        .observability
        .clone()
        .with_service_name(&config.project.service_name);
    let _guard = observability::init(&observability_config)
        .await
        .context("可观测性初始化失败")?;

    info!(
        service = %config.project.service_name,
        version = %config.project.version,
        environment = %config.project.environment,
        channel = %args.channel,
        priority = %args.priority,
        "Starting dispatch worker..."
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    DispatchServer::new(config, args.channel, args.priority)
        .run(shutdown_rx)
        .await
        .context("调度服务运行失败")?;

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "无法监听 Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "无法监听 SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
