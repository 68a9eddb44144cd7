mod cli;
mod config;
mod keys;
mod logging;

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use russh::{MethodKind, MethodSet, Preferred};
use sshesame_core::proxy::{ProxyBridge, ProxyEventSink, ProxyServerHandler, ProxySink};
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let file_config = config::load(cli.config.as_deref()).context("loading config")?;
    logging::init(&cli, &file_config)?;

    let host_key = keys::ensure_host_key(&cli.data_dir).context("loading proxy host key")?;
    let proxy_config = config::to_proxy_config(&file_config);

    let russh_config = Arc::new(russh::server::Config {
        auth_rejection_time: std::time::Duration::from_secs(1),
        auth_rejection_time_initial: Some(std::time::Duration::from_secs(0)),
        methods: MethodSet::from(&[MethodKind::Password][..]),
        keys: vec![host_key],
        preferred: Preferred {
            key: Cow::Owned(vec![russh::keys::Algorithm::Ed25519]),
            ..Preferred::default()
        },
        ..Default::default()
    });

    let sink: Arc<dyn ProxySink> = build_sink(&file_config)?;

    let listener = tokio::net::TcpListener::bind(&file_config.server.listen_address)
        .await
        .with_context(|| format!("binding {}", file_config.server.listen_address))?;
    info!(address = %file_config.server.listen_address, "proxy listening");

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
        let proxy_config = proxy_config.clone();
        let sink = sink.clone();

        tokio::spawn(async move {
            let (event_tx, events) = mpsc::unbounded_channel();
            let handler = ProxyServerHandler { event_tx };
            let bridge = ProxyBridge {
                source,
                config: proxy_config,
                sink,
                events,
            };
            let bridge_task = tokio::spawn(bridge.run());

            if let Err(error) = run_stream(russh_config, stream, handler).await {
                error!(%error, %source, "proxy session failed");
            }
            let _ = bridge_task.await;
        });
    }
}

async fn run_stream(
    config: Arc<russh::server::Config>,
    stream: tokio::net::TcpStream,
    handler: ProxyServerHandler,
) -> Result<()> {
    let session = russh::server::run_stream(config, stream, handler).await?;
    session.await?;
    Ok(())
}

fn build_sink(config: &config::FileConfig) -> Result<Arc<dyn ProxySink>> {
    let json = config.logging.json;
    let timestamps = config.logging.timestamps;
    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            Ok(Arc::new(ProxyEventSink::new(
                tokio::fs::File::from_std(file),
                json,
                timestamps,
            )))
        }
        None => Ok(Arc::new(ProxyEventSink::new(tokio::io::stderr(), json, timestamps))),
    }
}
