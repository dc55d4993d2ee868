// src/server/context.rs

use super::routes::AppState;
use crate::config::Config;
use crate::connection::{Prober, Registry};
use crate::core::publisher::Producer;
use crate::core::worker::Pool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::EnvFilter, reload};

pub type LogReloadHandle = Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub config: Config,
    /// Where the config was loaded from, re-read on SIGHUP for the log level.
    pub config_path: Option<String>,
    pub log_reload_handle: LogReloadHandle,
    pub registry: Arc<Registry>,
    pub pool: Arc<Pool>,
    pub producer: Arc<dyn Producer>,
    pub app_state: AppState,
    /// Taken by the spawner when the prober task starts.
    pub prober: Option<Prober>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    /// Parent of every connection's token. Cancelling it closes all live connections.
    pub connections_shutdown: CancellationToken,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}
