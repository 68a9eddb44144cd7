//! Process bootstrap: parse CLI, load config, generate/load host keys,
//! build the event sink and the `russh::server::Config`, then run the
//! accept loop until shutdown.

mod cli;
mod config;
mod keys;
mod logging;
mod server;

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use russh::keys::{Algorithm, HashAlg};
use russh::{MethodKind, MethodSet, Preferred};
use sshesame_core::event::{EventSink, Sink};
use tokio::io::AsyncWrite;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let file_config = config::load(cli.config.as_deref()).context("loading config")?;
    logging::init(&cli, &file_config)?;

    let key_paths = keys::ensure_host_keys(&cli.data_dir, &file_config.server.host_keys)
        .context("generating host keys")?;
    let host_keys = keys::load_host_keys(&key_paths).context("loading host keys")?;

    let russh_config = Arc::new(russh::server::Config {
        auth_rejection_time: std::time::Duration::from_secs(1),
        auth_rejection_time_initial: Some(std::time::Duration::from_secs(0)),
        methods: auth_methods(&file_config),
        keys: host_keys,
        preferred: Preferred {
            key: Cow::Owned(vec![
                Algorithm::Ed25519,
                Algorithm::Rsa {
                    hash: Some(HashAlg::Sha512),
                },
                Algorithm::Rsa {
                    hash: Some(HashAlg::Sha256),
                },
            ]),
            ..Preferred::default()
        },
        server_id: russh::SshId::Standard(file_config.ssh_proto.version.clone()),
        ..Default::default()
    });

    let config = Arc::new(config::to_view(&file_config));
    let sink: Arc<dyn Sink> = build_sink(&file_config)?;

    server::run(&file_config.server.listen_address, russh_config, config, sink).await?;
    info!("exiting");
    Ok(())
}

fn auth_methods(config: &config::FileConfig) -> MethodSet {
    let mut kinds = Vec::new();
    if config.auth.password_auth.enabled {
        kinds.push(MethodKind::Password);
    }
    if config.auth.public_key_auth.enabled {
        kinds.push(MethodKind::PublicKey);
    }
    if config.auth.keyboard_interactive_auth.enabled {
        kinds.push(MethodKind::KeyboardInteractive);
    }
    if config.auth.no_auth {
        kinds.push(MethodKind::None);
    }
    MethodSet::from(&kinds[..])
}

fn build_sink(config: &config::FileConfig) -> Result<Arc<dyn Sink>> {
    let json = config.logging.json;
    let timestamps = config.logging.timestamps;
    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            Ok(Arc::new(EventSink::new(
                tokio::fs::File::from_std(file),
                json,
                timestamps,
            )))
        }
        None => Ok(Arc::new(EventSink::new(stderr_writer(), json, timestamps))),
    }
}

fn stderr_writer() -> impl AsyncWrite + Unpin + Send {
    tokio::io::stderr()
}
