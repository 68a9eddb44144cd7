//! Public-key fingerprinting for the auth log record.
//!
//! Host-key *generation and persistence* are explicitly out of core scope;
//! this module only covers the one host-key-adjacent thing the engine
//! itself needs: rendering an offered client key for the audit log.

use russh::keys::{HashAlg, PublicKey};

/// SHA-256 fingerprint of `key`, rendered `SHA256:<base64>` the way common
/// SSH tooling does.
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}
