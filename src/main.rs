use std::net::SocketAddr;

use career_compass::{app, initialize_state, telemetry};
use tokio::net::TcpListener;
use tokio::signal;

const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = std::env::var(OTLP_ENDPOINT).ok().filter(|e| !e.is_empty());
    let tracer = telemetry::init_subscriber(endpoint.as_deref())?;
    let metrics = telemetry::setup_metrics_recorder()?;

    let state = initialize_state(Some(metrics))?;
    if state.placeholder {
        tracing::warn!("running without backend credentials");
    }
    let pruner = state.sessions.spawn_pruner();

    let address = format!("0.0.0.0:{}", state.config.port);
    let listener = TcpListener::bind(&address).await?;
    tracing::info!(%address, name = state.config.name, "server started");

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pruner.abort();
    if let Some(tracer) = tracer {
        if let Err(err) = tracer.shutdown() {
            tracing::error!(error = %err, "traces not flushed");
        }
    }
    tracing::info!("server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("received terminate signal, shutting down");
            },
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
