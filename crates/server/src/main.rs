//! Intake Agent Server Entry Point

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use intake_config::{load_settings, Settings};
use intake_server::{build_call_deps, create_router, init_metrics, AppState};

#[derive(Debug, Parser)]
#[command(name = "intake-server", version, about = "Patient intake voice agent")]
struct Args {
    /// Point the carrier at a local loopback stream instead of the public host
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Config file layered over config/default
    #[arg(short = 'c', long = "config", env = "INTAKE_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = load_settings(args.config.as_deref())?;
    if args.test {
        config.server.testing = true;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config);

    tracing::info!("Starting Intake Agent Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        testing = config.server.testing,
        practice = %config.dialogue.practice_name,
        "Loaded configuration"
    );

    if config.observability.metrics_enabled {
        init_metrics()?;
        tracing::info!("Initialized Prometheus metrics at /metrics");
    }

    let deps = build_call_deps(&config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(config, deps, shutdown_rx);
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // live calls say goodbye before their sockets close
            let _ = shutdown_tx.send(true);
        })
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("intake={},tower_http=debug", level).into()
    });

    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
