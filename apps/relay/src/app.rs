//! Relay orchestrator: runs the WebSocket server until a shutdown signal.

use std::sync::Arc;

use p2pburger_rendezvous::{RelayHandler, RelayServer, ServerConfig};

use crate::config::Config;

/// Runs the relay until shutdown is requested.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let handler = RelayHandler::new(config.ice_servers);
    let server = RelayServer::new(ServerConfig { port: config.port }, handler);

    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    // -- Main loop: wait for shutdown --
    tokio::select! {
        result = &mut server_task => {
            // The server only returns on its own when binding fails.
            return Ok(result??);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        _ = terminate() => {
            tracing::info!("SIGTERM received, shutting down");
        }
    }

    // -- Graceful shutdown --
    tracing::info!(
        connections = server.connection_count(),
        rooms = server.handler().registry().room_count(),
        "stopping relay"
    );
    server.shutdown();
    server_task.await??;

    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("cannot listen for SIGTERM: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
