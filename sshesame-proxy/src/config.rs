//! Proxy config: where to listen, which upstream to dial, and whether to
//! verify its host key. Same flat-YAML, `#[serde(default)]` style as
//! `sshesame`'s own config.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sshesame_core::proxy::ProxyConfig;

fn default_listen_address() -> String {
    "127.0.0.1:2023".to_owned()
}

fn default_upstream_port() -> u16 {
    22
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: Option<String>,
    pub json: bool,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    pub debug: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub host: String,
    #[serde(default = "default_upstream_port")]
    pub port: u16,
    #[serde(default)]
    pub ignore_host_key: bool,
    /// Fixed credentials overriding the ones captured from the
    /// downstream client's password auth attempt, if set.
    pub credentials: Option<CredentialsConfig>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: default_upstream_port(),
            ignore_host_key: false,
            credentials: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

pub fn load(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

pub fn to_proxy_config(config: &FileConfig) -> ProxyConfig {
    ProxyConfig {
        upstream_host: config.upstream.host.clone(),
        upstream_port: config.upstream.port,
        ignore_host_key: config.upstream.ignore_host_key,
        credentials: config
            .upstream
            .credentials
            .as_ref()
            .map(|c| (c.username.clone(), c.password.clone())),
    }
}
