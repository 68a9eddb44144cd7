//! Accept loop: one task per accepted TCP connection, each pairing a
//! `ConnectionHandler` (driven by `russh`) with its `ConnectionActor`
//! (owning all connection-scoped state).

use std::sync::Arc;

use anyhow::{Context, Result};
use sshesame_core::commands::Registry;
use sshesame_core::config::ConfigView;
use sshesame_core::connection::{ConnectionActor, ConnectionHandler};
use sshesame_core::direct_tcpip::PortRegistry;
use sshesame_core::event::Sink;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

pub async fn run(
    listen_address: &str,
    russh_config: Arc<russh::server::Config>,
    config: Arc<ConfigView>,
    sink: Arc<dyn Sink>,
) -> Result<()> {
    let listener = TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("binding {listen_address}"))?;
    info!(address = listen_address, "listening");

    let registry = Arc::new(Registry::new());
    let ports = Arc::new(PortRegistry::new());

    loop {
        let (stream, source) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    error!(%error, "accept error");
                    continue;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, no longer accepting connections");
                return Ok(());
            }
        };

        let russh_config = russh_config.clone();
        let config = config.clone();
        let sink = sink.clone();
        let registry = registry.clone();
        let ports = ports.clone();

        tokio::spawn(async move {
            let (event_tx, events) = mpsc::unbounded_channel();
            let handler = ConnectionHandler { event_tx };
            let actor = ConnectionActor {
                source,
                config,
                sink,
                registry,
                ports,
                events,
            };
            let actor_task = tokio::spawn(actor.run());

            if let Err(error) = run_stream(russh_config, stream, handler).await {
                error!(%error, %source, "session failed");
            }
            let _ = actor_task.await;
        });
    }
}

async fn run_stream(
    config: Arc<russh::server::Config>,
    stream: tokio::net::TcpStream,
    handler: ConnectionHandler,
) -> Result<()> {
    let session = russh::server::run_stream(config, stream, handler).await?;
    session.await?;
    Ok(())
}
