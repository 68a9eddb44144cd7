//! On-disk config: a `serde::Deserialize` tree loaded from YAML, with
//! per-field `#[serde(default = "...")]` functions rather than a layered
//! `config`-crate setup — there is no environment overlay to support, so
//! one is not invented here.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sshesame_core::config::{
    ConfigView, KeyboardInteractiveAuthPolicy, KeyboardInteractiveQuestion, PasswordAuthPolicy,
    PublicKeyAuthPolicy,
};

fn default_listen_address() -> String {
    "127.0.0.1:2022".to_owned()
}

fn default_host_keys() -> Vec<String> {
    vec![
        "ssh_host_rsa_key".to_owned(),
        "ssh_host_ecdsa_key".to_owned(),
        "ssh_host_ed25519_key".to_owned(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_ssh_version() -> String {
    "SSH-2.0-sshesame".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_host_keys")]
    pub host_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            host_keys: default_host_keys(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: Option<String>,
    #[serde(default)]
    pub json: bool,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PasswordAuthConfig {
    pub enabled: bool,
    pub accepted: bool,
}

impl Default for PasswordAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            accepted: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublicKeyAuthConfig {
    pub enabled: bool,
    pub accepted: bool,
}

impl Default for PublicKeyAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            accepted: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionConfig {
    pub text: String,
    #[serde(default)]
    pub echo: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeyboardInteractiveAuthConfig {
    pub enabled: bool,
    pub accepted: bool,
    pub instruction: String,
    pub questions: Vec<QuestionConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub max_tries: u32,
    pub no_auth: bool,
    pub password_auth: PasswordAuthConfig,
    pub public_key_auth: PublicKeyAuthConfig,
    pub keyboard_interactive_auth: KeyboardInteractiveAuthConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SshProtoConfig {
    #[serde(default = "default_ssh_version")]
    pub version: String,
    pub banner: Option<String>,
    pub rekey_threshold: Option<u64>,
    pub key_exchanges: Vec<String>,
    pub ciphers: Vec<String>,
    pub macs: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub ssh_proto: SshProtoConfig,
}

/// Reads `path` and deserializes it, or returns all-defaults if the file
/// doesn't exist or no path was given.
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

/// Narrows the on-disk config down to the frozen view the engine consumes.
pub fn to_view(config: &FileConfig) -> ConfigView {
    ConfigView {
        no_auth: config.auth.no_auth,
        password_auth: config.auth.password_auth.enabled.then(|| PasswordAuthPolicy {
            accepted: config.auth.password_auth.accepted,
        }),
        public_key_auth: config.auth.public_key_auth.enabled.then(|| PublicKeyAuthPolicy {
            accepted: config.auth.public_key_auth.accepted,
        }),
        keyboard_interactive_auth: config.auth.keyboard_interactive_auth.enabled.then(|| {
            KeyboardInteractiveAuthPolicy {
                accepted: config.auth.keyboard_interactive_auth.accepted,
                instruction: config.auth.keyboard_interactive_auth.instruction.clone(),
                questions: config
                    .auth
                    .keyboard_interactive_auth
                    .questions
                    .iter()
                    .map(|q| KeyboardInteractiveQuestion {
                        text: q.text.clone(),
                        echo: q.echo,
                    })
                    .collect(),
            }
        }),
        max_tries: config.auth.max_tries,
    }
}
