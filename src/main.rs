//! `http-lifecycle`: a small HTTP service that drains gracefully.
//!
//! Serves a demo router behind the configured pipeline and shuts down on
//! SIGINT or SIGTERM, waiting up to the configured grace period for
//! in-flight requests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use clap::Parser;

use http_lifecycle::config::{load_config, ServerConfig};
use http_lifecycle::http::middleware::{access_log, recover_panics, track_metrics};
use http_lifecycle::lifecycle::TracingLogger;
use http_lifecycle::net::Listener;
use http_lifecycle::observability::{logging, metrics};
use http_lifecycle::{rate_limiter, start_graceful_shutdown, MiddlewareChain, ServerHandle};

#[derive(Debug, Parser)]
#[command(name = "http-lifecycle", version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "http-lifecycle starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        grace_period_ms = config.shutdown.grace_period_ms,
        rate_limit = config.rate_limit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let listener = Listener::bind(&config.listener).await?;
    let handler = pipeline(&config).build(demo_router());

    let server = ServerHandle::new();
    let done = start_graceful_shutdown(
        server.clone(),
        config.shutdown.grace_period(),
        Some(Arc::new(TracingLogger)),
    )?;

    server.serve(listener, handler).await?;
    done.wait().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Stages in registration order; the last one is outermost.
fn pipeline(config: &ServerConfig) -> MiddlewareChain {
    let mut chain = MiddlewareChain::new();
    if config.rate_limit.enabled {
        chain.push(rate_limiter(
            config.rate_limit.interval(),
            config.rate_limit.limit,
            config.rate_limit.burst,
        ));
    }
    chain.push(recover_panics());
    if config.observability.access_log {
        chain.push(access_log());
    }
    if config.observability.metrics_enabled {
        chain.push(track_metrics());
    }
    chain
}

fn demo_router() -> Router {
    Router::new()
        .route("/", get(|| async { "hello\n" }))
        .route("/healthz", get(|| async { "ok\n" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "done\n"
            }),
        )
}
