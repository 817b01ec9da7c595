use dbhub_k8s_util::client::new_client_with_metrics;
use dbhub_operator::controller::State;
use dbhub_operator::telemetry;

use axum::extract::State as AxumState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{Router, get};
use clap::{Parser, crate_authors, crate_description, crate_version};
use kube::Config;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};

async fn metrics(AxumState(state): AxumState<State>) -> impl IntoResponse {
    match state.metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [(
                "content-type",
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            metrics,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to get metrics: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    Json("healthy")
}

#[derive(Parser, Debug)]
#[command(
    name = "dbhub-operator",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Listen on given port for /health and /metrics.
    #[arg(short, long, default_value_t = 8080, env)]
    port: u16,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    /// Example: "info,kube=debug,dbhub=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format.
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// Enable leader election. Accepted for controller-manager parity; this operator
    /// runs a single replica and `kube::runtime::Controller` already coalesces
    /// per-key work in-process, so the flag is otherwise inert.
    #[arg(long, default_value_t = false, env)]
    leader_election: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    telemetry::init(&args.log_filter, args.log_format)
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {e}"))?;

    if args.leader_election {
        tracing::info!(msg = "leader election flag set; this build runs a single replica and ignores it");
    }

    let config = Config::infer().await?;
    let mut registry = Registry::default();
    let client = new_client_with_metrics(config, &mut registry).await?;

    let controllers = [
        dbhub_database::controller::CONTROLLER_ID,
        dbhub_gateway::controller::CONTROLLER_ID,
    ];
    let state = State::new(registry, &controllers);

    let database_c = dbhub_database::controller::run(state.clone(), client.clone());
    let gateway_c = dbhub_gateway::controller::run(state.clone(), client);

    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    tokio::join!(database_c, gateway_c, server).2?;
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
