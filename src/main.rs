use bsc_wallet_watcher::api::ApiServer;
use bsc_wallet_watcher::config::AppConfig;
use bsc_wallet_watcher::logging::init_logging;
use bsc_wallet_watcher::orchestrator::Orchestrator;
use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "watcher")]
#[command(about = "Watches BSC blocks for wallet activity and pushes webhook alerts")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to $CONFIG_FILE or ./config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Override the admin API port
    #[arg(long)]
    port: Option<u16>,

    /// Print a sample configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn load_config(args: &Args) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = AppConfig::load_from_path(path)?;
            config.apply_env_overrides()?;
            config
        }
        None => AppConfig::load()?,
    };
    if let Some(port) = args.port {
        config.api.port = port;
    }
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", AppConfig::generate_sample_config()?);
        return Ok(());
    }

    let config = load_config(&args)?;
    init_logging(&config.logging)?;

    info!(
        "Starting BSC wallet watcher: {} RPC endpoint(s), {} websocket endpoint(s), {} wallet(s)",
        config.rpc.endpoints.len(),
        config.subscription.endpoints.len(),
        config.processing.watched_wallets.len()
    );

    let orchestrator = Arc::new(Orchestrator::new(config.clone())?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api_handle = if config.api.enabled {
        let server = ApiServer::new(orchestrator.clone(), &config.api.host, config.api.port);
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.start(shutdown).await {
                error!("HTTP API stopped: {}", e);
            }
        }))
    } else {
        info!("HTTP API disabled");
        None
    };

    let pipeline = tokio::spawn(orchestrator.clone().run(shutdown_rx));

    shutdown_signal().await;
    info!("Shutdown signal received, stopping");
    let _ = shutdown_tx.send(true);

    match pipeline.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Pipeline ended with error: {}", e),
        Err(e) => error!("Pipeline task failed: {}", e),
    }
    if let Some(handle) = api_handle {
        let _ = handle.await;
    }

    info!("Watcher stopped");
    Ok(())
}
