//! Gale demo server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net (listener, deadlines, TLS gate)
//!            ──▶ http::server (hyper auto: h1 / h2 / h2c)
//!            ──▶ http::dispatcher (pooled Request/Response)
//!            ──▶ pregases ─▶ router ─▶ gases ─▶ handler
//!            ◀── http::response (commit once, stream body)
//! ```
//!
//! Routes:
//! - `GET /`                          plain text greeting
//! - `GET /users/:id/posts/:post`     route parameters as JSON
//! - `GET /static/*`                  files under `--public-dir`
//! - `GET /ws`                        websocket echo

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use http::StatusCode;

use gale::config::{load_config, ServerConfig};
use gale::http::{gas_fn, handler_fn, Error, Incoming, Server, ServerContext};
use gale::lifecycle::signals::terminate_requested;
use gale::observability::init_logging;
use gale::routing::RouteTable;

#[derive(Debug, Parser)]
#[command(name = "gale", version, about = "Gale HTTP server with a demo route table")]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory served under /static/.
    #[arg(long, default_value = "public")]
    public_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    init_logging(&config.logging, config.debug_mode)?;

    tracing::info!(
        app = %config.app_name,
        address = %config.listener.address,
        max_connections = config.listener.max_connections,
        tls = config.tls_active(),
        "Configuration loaded"
    );

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    let ctx = ServerContext::builder(config)
        .router(demo_routes(args.public_dir))
        .pregas(gas_fn(|next, req, res| {
            Box::pin(async move {
                let started = Instant::now();
                let result = next.call(req, res).await;
                tracing::info!(
                    method = %req.method(),
                    path = %req.path(),
                    status = res.status().as_u16(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Request served"
                );
                result
            })
        }))
        .build();

    let server = Server::new(ctx);
    tokio::select! {
        result = server.serve() => result?,
        _ = terminate_requested() => {
            tracing::info!("Termination requested");
            if let Err(e) = server.shutdown(grace).await {
                tracing::warn!(error = %e, "Shutdown was not clean");
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn demo_routes(public_dir: PathBuf) -> RouteTable {
    let public_dir = Arc::new(public_dir);

    RouteTable::new()
        .get(
            "/",
            handler_fn(|_req, res| Box::pin(async move { res.write_string("Hello from Gale").await })),
        )
        .get(
            "/users/:id/posts/:post",
            handler_fn(|req, res| {
                let params: BTreeMap<String, String> = req
                    .route_params()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect();
                Box::pin(async move { res.write_json(&params).await })
            }),
        )
        .get(
            "/static/*",
            handler_fn(move |req, res| {
                let target = req.route_param("*").and_then(|rest| confined(&public_dir, rest));
                Box::pin(async move {
                    match target {
                        Some(path) => res.write_file(path).await,
                        None => Err(Error::status_with(StatusCode::NOT_FOUND, "no such file")),
                    }
                })
            }),
        )
        .get(
            "/ws",
            handler_fn(|_req, res| {
                Box::pin(async move {
                    let mut socket = res.websocket().await?;
                    while let Some(message) = socket.receive().await? {
                        match message {
                            Incoming::Text(text) => socket.send_text(text).await?,
                            Incoming::Binary(data) => socket.send_binary(data).await?,
                        }
                    }
                    Ok(())
                })
            }),
        )
}

/// Join `rest` onto `root`, refusing anything that climbs out of it.
fn confined(root: &Path, rest: &str) -> Option<PathBuf> {
    let relative = Path::new(rest);
    if relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Some(root.join(relative))
    } else {
        None
    }
}
