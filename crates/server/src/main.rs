//! Parley Server
//!
//! Serves chat and template state to browsers over a websocket and fans out
//! changes made by any client, or relayed by the `parley` CLI, to every
//! connected browser.

mod client;
mod dispatch;
mod hub;
mod logging;
mod relay;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use clap::Parser;
use parley_core::Services;
use parley_protocol::{RELAY_PATH, WS_PATH};
use parley_provider::{ProviderRegistry, ProviderSettings};
use parley_store::{DataDir, Store};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::client::{ws_handler, ClientConfig};
use crate::hub::{HubHandle, DEFAULT_QUEUE_CAPACITY};
use crate::logging::init_logging;
use crate::relay::relay_handler;
use crate::state::AppState;

const HEALTH_PATH: &str = "/api/v1/health-check";

#[derive(Debug, Parser)]
#[command(name = "parley-server", version, about = "Parley chat server")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "PARLEY_BIND", default_value = "127.0.0.1:4100")]
    bind: SocketAddr,

    /// Address CLI processes use to reach this server (defaults to http://{bind})
    #[arg(long, env = "PARLEY_PUBLIC_URL")]
    public_url: Option<String>,

    /// Data directory (database, logs, providers.toml)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Outbound frames buffered per browser before new ones are dropped
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    client_queue_capacity: usize,

    /// Seconds a browser may stay silent before it is disconnected
    #[arg(long, default_value_t = 60)]
    pong_wait_secs: u64,

    /// Largest accepted inbound websocket message
    #[arg(long, default_value_t = 512 * 1024)]
    max_message_bytes: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = DataDir::resolve(args.data_dir.as_deref())?;
    data_dir.ensure_dirs()?;
    let logging = init_logging(&data_dir.log_dir())?;
    let _log_guard = logging.guard;

    info!(
        component = "server",
        event = "server.starting",
        log_path = %logging.log_path.display(),
        data_dir = %data_dir.root().display(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting Parley server"
    );

    let store = Store::open(data_dir.db_path())?;
    let settings = ProviderSettings::load(&data_dir.providers_path())?;
    let providers = Arc::new(ProviderRegistry::from_settings(&settings)?);
    let services = Services::new(store.clone(), providers);

    let (hub, _hub_task) = HubHandle::spawn(args.client_queue_capacity);
    let client_config = ClientConfig::new(
        Duration::from_secs(args.pong_wait_secs.max(1)),
        args.max_message_bytes,
    );
    let state = Arc::new(AppState::new(hub, services, client_config));

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    let local_addr = listener.local_addr()?;
    let public_url = args
        .public_url
        .unwrap_or_else(|| format!("http://{local_addr}"));

    store
        .register_active_session(store.identity(), &public_url)
        .await?;

    info!(
        component = "server",
        event = "server.listening",
        bind = %local_addr,
        public_url = %public_url,
        "Listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(component = "server", event = "server.stopped", "Server stopped");
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .route(WS_PATH, get(ws_handler))
        .route(RELAY_PATH, post(relay_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(
            component = "server",
            event = "server.signal_failed",
            error = %e,
            "Failed to listen for ctrl-c"
        );
        std::future::pending::<()>().await;
    }
    info!(component = "server", event = "server.shutdown", "Shutting down");
}
