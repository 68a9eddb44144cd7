//! Host key generation and on-disk persistence: one RSA-3072, one
//! ECDSA-P256, one Ed25519, each an OpenSSH-format private key file with
//! mode 0600, generated on first run and loaded back on every run after.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use russh::keys::{Algorithm, HashAlg, PrivateKey};
use tracing::info;

fn write_pem(key: &PrivateKey, path: &Path) -> Result<()> {
    let pem = key
        .to_openssh(russh::keys::ssh_key::LineEnding::LF)
        .with_context(|| format!("encoding host key for {}", path.display()))?;
    fs::write(path, pem.as_bytes())
        .with_context(|| format!("writing host key {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("securing host key {}", path.display()))?;
    Ok(())
}

/// Generates any host key file named in `names` (relative to `data_dir`)
/// that doesn't already exist. Names containing "rsa"/"ecdsa"/"ed25519"
/// pick the matching algorithm; any other name defaults to Ed25519.
pub fn ensure_host_keys(data_dir: &Path, names: &[String]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(data_dir).with_context(|| format!("creating {}", data_dir.display()))?;

    let mut paths = Vec::new();
    for name in names {
        let path = data_dir.join(name);
        if !path.exists() {
            let algorithm = if name.contains("rsa") {
                Algorithm::Rsa {
                    hash: Some(HashAlg::Sha256),
                }
            } else if name.contains("ecdsa") {
                Algorithm::Ecdsa {
                    curve: russh::keys::EcdsaCurve::NistP256,
                }
            } else {
                Algorithm::Ed25519
            };
            info!(path = %path.display(), ?algorithm, "generating host key");
            let key = PrivateKey::random(&mut rand::thread_rng(), algorithm)
                .with_context(|| format!("generating host key {name}"))?;
            write_pem(&key, &path)?;
        }
        paths.push(path);
    }
    Ok(paths)
}

pub fn load_host_keys(paths: &[PathBuf]) -> Result<Vec<PrivateKey>> {
    paths
        .iter()
        .map(|path| {
            PrivateKey::read_openssh_file(path)
                .with_context(|| format!("loading host key {}", path.display()))
        })
        .collect()
}
