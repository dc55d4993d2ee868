// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
pub mod routes;
mod spawner;

pub use context::LogReloadHandle;
pub use initialization::build_producer;
pub use routes::{AppState, router};

/// The main server startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    config_path: Option<String>,
    log_reload_handle: LogReloadHandle,
) -> Result<()> {
    // 1. Build the registry, pipeline and publisher, and bind the listener.
    let mut server_context = initialization::setup(config, config_path, log_reload_handle).await?;

    // 2. Start the workers and spawn all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Serve until shutdown, then drain.
    connection_loop::run(server_context).await
}
