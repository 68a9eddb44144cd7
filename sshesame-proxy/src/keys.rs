//! The proxy's own host key, used to terminate the real client's side of
//! the connection. One Ed25519 key is enough; unlike `sshesame` itself the
//! proxy's identity isn't part of what's being observed.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use russh::keys::{Algorithm, PrivateKey};
use tracing::info;

pub fn ensure_host_key(data_dir: &Path) -> Result<PrivateKey> {
    fs::create_dir_all(data_dir).with_context(|| format!("creating {}", data_dir.display()))?;
    let path: PathBuf = data_dir.join("ssh_host_ed25519_key");

    if !path.exists() {
        info!(path = %path.display(), "generating proxy host key");
        let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .context("generating proxy host key")?;
        let pem = key
            .to_openssh(russh::keys::ssh_key::LineEnding::LF)
            .context("encoding proxy host key")?;
        fs::write(&path, pem.as_bytes()).with_context(|| format!("writing {}", path.display()))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("securing {}", path.display()))?;
    }

    PrivateKey::read_openssh_file(&path).with_context(|| format!("loading {}", path.display()))
}
