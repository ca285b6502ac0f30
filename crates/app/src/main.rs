//! The hosting daemon: wires a slave banker to a master transport, drives
//! the periodic loops, and exposes the liveness indicator over HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;

use api_types::{CurrencyPool, MonitorIndicator};
use banker::{ApplicationLayer, BusLayer, HttpLayer, MemoryMaster, SlaveBanker, SlaveBankerConfig};

#[derive(Parser, Debug)]
#[command(name = "bidbank")]
#[command(about = "Locally-cached budget authority for bidding workers")]
struct Cli {
    /// Identifies this instance within the master's namespace (also read
    /// from `ACCOUNT_SUFFIX`).
    #[arg(long, env = "ACCOUNT_SUFFIX")]
    account_suffix: String,

    /// Budget slice re-requested on every reauthorize cycle.
    #[arg(long, default_value = "100000USD/1M")]
    spend_rate: CurrencyPool,

    /// Master bank base URL (also read from `BANKER_URI`).
    #[arg(long, env = "BANKER_URI", default_value = "http://127.0.0.1:9985")]
    banker_uri: String,

    /// Talk to the master over HTTP. Disable to run against the embedded
    /// in-memory master (development mode).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    use_http_banker: bool,

    /// Seconds without a successful sync before /healthz reports failure.
    #[arg(long, default_value_t = 3)]
    slow_mode_timeout: u64,

    /// Bind address for the health endpoint.
    #[arg(long, default_value = "127.0.0.1:7701")]
    health_bind: String,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "bidbank={level},banker={level}",
            level = cli.log_level
        ))
        .init();

    let layer: Arc<dyn ApplicationLayer> = if cli.use_http_banker {
        tracing::info!("using http interface for the master bank at {}", cli.banker_uri);
        Arc::new(HttpLayer::new(&cli.banker_uri)?)
    } else {
        tracing::info!("using embedded in-memory master (development mode)");
        let (layer, endpoint) = BusLayer::channel();
        MemoryMaster::spawn(endpoint);
        Arc::new(layer)
    };

    let mut config = SlaveBankerConfig::new(cli.account_suffix, cli.spend_rate);
    config.max_fail_sync = Duration::from_secs(cli.slow_mode_timeout);
    let slave = SlaveBanker::new(config, layer)?;

    let mut tasks = tokio::task::JoinSet::new();

    let runner = slave.clone();
    tasks.spawn(async move {
        runner.run().await;
    });

    let health = slave.clone();
    let bind = cli.health_bind.clone();
    tasks.spawn(async move {
        if let Err(err) = serve_health(health, &bind).await {
            tracing::error!("health endpoint failed: {err}");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down, waiting for the in-flight reauthorize pass...");
    slave.wait_reauthorized().await;
    tasks.shutdown().await;

    Ok(())
}

async fn serve_health(
    slave: SlaveBanker,
    bind: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = Router::new().route("/healthz", get(healthz)).with_state(slave);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("health endpoint listening on {bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz(State(slave): State<SlaveBanker>) -> (StatusCode, Json<MonitorIndicator>) {
    let indicator = slave.provider_indicators();
    let status = if indicator.status {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(indicator))
}
