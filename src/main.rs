use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use timeline_thread_collector::config::Config;
use timeline_thread_collector::fetch::{TimelineFetcher, UpstreamApi};
use timeline_thread_collector::gateway::{GatewayConfig, RequestGateway};
use timeline_thread_collector::store::SaveStoreClient;
use timeline_thread_collector::web;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting timeline-thread-collector");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(upstream = %config.upstream_api_url, "Configuration loaded");

    let gateway = Arc::new(RequestGateway::new(GatewayConfig {
        retry_base_delay: Duration::from_millis(config.fetch.retry_base_delay_ms),
        request_timeout: config.request_timeout,
        ..GatewayConfig::default()
    }));

    let settings = Arc::new(RwLock::new(config.fetch));
    let api = UpstreamApi::new(&config.upstream_api_url);
    let fetcher = Arc::new(TimelineFetcher::new(
        gateway,
        api,
        Arc::clone(&settings),
    ));

    let store = match config.save_store_url.as_deref() {
        Some(url) => {
            info!(url = %url, "Save store configured");
            Some(Arc::new(
                SaveStoreClient::new(url, config.request_timeout)
                    .context("Failed to initialize save store client")?,
            ))
        }
        None => {
            info!("No save store configured, save endpoints disabled");
            None
        }
    };

    let state = web::AppState {
        fetcher,
        store,
        settings,
        config: Arc::new(config),
    };

    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::serve(state).await {
            error!("Web server error: {e:#}");
        }
    });

    shutdown_signal().await;

    info!("Shutting down...");
    web_handle.abort();
    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,timeline_thread_collector=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
