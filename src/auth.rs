//! Materialization of SSH authentication methods from a configuration.

use std::path::Path;
use std::sync::Arc;

use russh::keys::{decode_secret_key, load_secret_key, PrivateKey};

use crate::config::{BastionCfg, ConnectionCfg};
use crate::error::{ConnectionError, Result};

/// One authentication method, tried in order during the handshake.
#[derive(Clone)]
pub enum AuthMethod {
    /// Password authentication.
    Password(String),
    /// Public-key authentication with a parsed signer.
    Key(Arc<PrivateKey>),
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("AuthMethod::Password(<redacted>)"),
            AuthMethod::Key(_) => f.write_str("AuthMethod::Key(<redacted>)"),
        }
    }
}

/// Build the ordered auth method list for a target configuration.
///
/// Password first (when set), then key material: in-memory key bytes win over
/// a key file path. An empty result is an error; there is nothing to try.
pub fn auth_methods(cfg: &ConnectionCfg) -> Result<Vec<AuthMethod>> {
    build(
        &cfg.host,
        cfg.password.as_deref(),
        cfg.private_key.as_deref(),
        cfg.private_key_path.as_deref(),
    )
}

/// Build the ordered auth method list for a bastion configuration.
pub fn bastion_auth_methods(cfg: &BastionCfg) -> Result<Vec<AuthMethod>> {
    build(
        &cfg.host,
        cfg.password.as_deref(),
        cfg.private_key.as_deref(),
        cfg.private_key_path.as_deref(),
    )
}

fn build(
    host: &str,
    password: Option<&str>,
    private_key: Option<&[u8]>,
    private_key_path: Option<&Path>,
) -> Result<Vec<AuthMethod>> {
    let mut methods = Vec::new();

    if let Some(password) = password {
        if !password.is_empty() {
            methods.push(AuthMethod::Password(password.to_string()));
        }
    }

    match private_key {
        Some(bytes) if !bytes.is_empty() => {
            let pem = std::str::from_utf8(bytes).map_err(|e| {
                ConnectionError::new(host, format!("private key is not valid UTF-8: {}", e))
            })?;
            let key = decode_secret_key(pem, None)
                .map_err(|e| ConnectionError::new(host, format!("failed to parse private key: {}", e)))?;
            methods.push(AuthMethod::Key(Arc::new(key)));
        }
        _ => {
            if let Some(path) = private_key_path {
                let key = load_secret_key(path, None).map_err(|e| {
                    ConnectionError::new(
                        host,
                        format!("failed to load private key {}: {}", path.display(), e),
                    )
                })?;
                methods.push(AuthMethod::Key(Arc::new(key)));
            }
        }
    }

    if methods.is_empty() {
        return Err(ConnectionError::message(
            host,
            "no authentication method: set a password, key bytes, or a key file path",
        )
        .into());
    }

    Ok(methods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionCfg;

    #[test]
    fn no_credentials_is_an_error() {
        let cfg = ConnectionCfg::new("node-1", 22, "root");
        let err = auth_methods(&cfg).unwrap_err();
        assert!(err.to_string().contains("no authentication method"));
        assert!(err.to_string().contains("node-1"));
    }

    #[test]
    fn password_only() {
        let mut cfg = ConnectionCfg::new("node-1", 22, "root");
        cfg.password = Some("secret".into());
        let methods = auth_methods(&cfg).unwrap();
        assert_eq!(methods.len(), 1);
        assert!(matches!(&methods[0], AuthMethod::Password(p) if p == "secret"));
    }

    #[test]
    fn empty_password_does_not_count() {
        let mut cfg = ConnectionCfg::new("node-1", 22, "root");
        cfg.password = Some(String::new());
        assert!(auth_methods(&cfg).is_err());
    }

    #[test]
    fn garbage_key_bytes_fail_with_host() {
        let mut cfg = ConnectionCfg::new("node-1", 22, "root");
        cfg.private_key = Some(b"not a key".to_vec());
        let err = auth_methods(&cfg).unwrap_err();
        assert!(err.to_string().contains("node-1"));
    }

    #[test]
    fn missing_key_file_fails_with_host() {
        let mut cfg = ConnectionCfg::new("node-1", 22, "root");
        cfg.private_key_path = Some("/nonexistent/id_ed25519".into());
        let err = auth_methods(&cfg).unwrap_err();
        assert!(err.to_string().contains("node-1"));
    }

    #[test]
    fn password_ordered_before_key_failure_is_still_reported() {
        // A bad key makes the whole build fail even when a password exists;
        // a broken credential is a configuration error, not a fallback case.
        let mut cfg = ConnectionCfg::new("node-1", 22, "root");
        cfg.password = Some("secret".into());
        cfg.private_key = Some(b"not a key".to_vec());
        assert!(auth_methods(&cfg).is_err());
    }

    #[test]
    fn debug_never_prints_material() {
        let method = AuthMethod::Password("hunter2".into());
        assert!(!format!("{:?}", method).contains("hunter2"));
    }
}
