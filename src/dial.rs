//! The SSH dial pipeline: TCP connect, handshake, auth, optional bastion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::auth::{auth_methods, bastion_auth_methods, AuthMethod};
use crate::config::ConnectionCfg;
use crate::error::{ConnectionError, Error, Result};
use crate::transport::{ClientHandler, SshTransport, Transport};

/// The transports produced by one dial: the target and, when a bastion was
/// used, the bastion the tunnel runs over. The bastion must outlive the
/// target transport and is owned alongside it.
pub struct Dialed<T> {
    /// Transport to the requested target.
    pub target: T,
    /// Transport to the bastion carrying the tunnel, if one was used.
    pub bastion: Option<T>,
}

/// Establishes transports for the pool and the SSH connector.
///
/// Injected rather than reached through a process-global, so tests can swap
/// in a dialer that counts dials or hands out scripted transports.
#[async_trait]
pub trait Dial: Send + Sync + 'static {
    /// The transport type this dialer produces.
    type Transport: Transport;

    /// Dial `cfg`, honoring `connect_timeout` for each network step.
    async fn dial(
        &self,
        cfg: &ConnectionCfg,
        connect_timeout: Duration,
    ) -> Result<Dialed<Self::Transport>>;
}

/// The production dialer: direct TCP + SSH handshake, or a direct-tcpip
/// tunnel through a bastion when one is configured.
#[derive(Debug, Clone, Default)]
pub struct SshDialer;

impl SshDialer {
    fn client_config() -> Arc<client::Config> {
        // Liveness is handled by explicit keepalive probes, not by russh's
        // inactivity teardown, so pooled idle transports stay up.
        Arc::new(client::Config::default())
    }

    /// TCP dial + handshake + auth against a single endpoint.
    async fn dial_endpoint(
        cfg: &ConnectionCfg,
        methods: Vec<AuthMethod>,
        connect_timeout: Duration,
    ) -> Result<Handle<ClientHandler>> {
        let addr = format!("{}:{}", cfg.host, cfg.port);
        let handshake = async {
            let socket = TcpStream::connect(&addr)
                .await
                .map_err(|e| ConnectionError::new(&cfg.host, e))?;
            socket
                .set_nodelay(true)
                .map_err(|e| ConnectionError::new(&cfg.host, e))?;

            let handler = ClientHandler::new(&cfg.host, cfg.port, cfg.host_key.clone());
            let mut handle = client::connect_stream(Self::client_config(), socket, handler)
                .await
                .map_err(|e| {
                    ConnectionError::new(&cfg.host, format!("ssh handshake failed: {}", e))
                })?;
            Self::authenticate(&mut handle, &cfg.host, &cfg.user, methods).await?;
            Ok::<_, Error>(handle)
        };

        match tokio::time::timeout(connect_timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::message(
                &cfg.host,
                format!("connect timed out after {:?}", connect_timeout),
            )
            .into()),
        }
    }

    /// Try each auth method in order; the first one the server accepts wins.
    async fn authenticate(
        handle: &mut Handle<ClientHandler>,
        host: &str,
        user: &str,
        methods: Vec<AuthMethod>,
    ) -> Result<()> {
        for method in methods {
            match method {
                AuthMethod::Password(password) => {
                    let result = handle
                        .authenticate_password(user.to_string(), password)
                        .await
                        .map_err(|e| {
                            ConnectionError::new(host, format!("password auth failed: {}", e))
                        })?;
                    if result.success() {
                        debug!(host = %host, user = %user, "authenticated with password");
                        return Ok(());
                    }
                }
                AuthMethod::Key(key) => {
                    let rsa_hash = handle
                        .best_supported_rsa_hash()
                        .await
                        .map_err(|e| {
                            ConnectionError::new(host, format!("rsa hash negotiation failed: {}", e))
                        })?
                        .flatten();
                    let result = handle
                        .authenticate_publickey(
                            user.to_string(),
                            russh::keys::key::PrivateKeyWithHashAlg::new(key, rsa_hash),
                        )
                        .await
                        .map_err(|e| {
                            ConnectionError::new(host, format!("public key auth failed: {}", e))
                        })?;
                    if result.success() {
                        debug!(host = %host, user = %user, "authenticated with public key");
                        return Ok(());
                    }
                }
            }
        }
        Err(ConnectionError::message(host, "all authentication methods failed").into())
    }
}

#[async_trait]
impl Dial for SshDialer {
    type Transport = SshTransport;

    async fn dial(
        &self,
        cfg: &ConnectionCfg,
        connect_timeout: Duration,
    ) -> Result<Dialed<SshTransport>> {
        let Some(bastion) = &cfg.bastion else {
            debug!(host = %cfg.host, port = %cfg.port, user = %cfg.user, "dialing direct");
            let methods = auth_methods(cfg)?;
            let handle = Self::dial_endpoint(cfg, methods, connect_timeout).await?;
            return Ok(Dialed {
                target: SshTransport::new(&cfg.host, handle),
                bastion: None,
            });
        };

        debug!(
            host = %cfg.host,
            bastion = %bastion.host,
            "dialing through bastion"
        );

        let bastion_methods = bastion_auth_methods(bastion)?;
        let bastion_cfg = bastion.as_connection_cfg();
        let bastion_handle =
            Self::dial_endpoint(&bastion_cfg, bastion_methods, bastion.effective_timeout()).await?;
        let bastion_transport = SshTransport::new(&bastion.host, bastion_handle);

        // TCP tunnel to the target, then an SSH handshake over it. Any
        // failure past this point has to tear the bastion down too.
        let channel = match bastion_transport.open_direct_tcpip(&cfg.host, cfg.port).await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = bastion_transport.close().await {
                    warn!(bastion = %bastion.host, error = %close_err, "failed to close bastion after tunnel failure");
                }
                return Err(ConnectionError::new(
                    &cfg.host,
                    format!("failed to open tunnel via bastion {}: {}", bastion.host, e),
                )
                .into());
            }
        };

        let methods = auth_methods(cfg)?;
        let target_handshake = async {
            let handler = ClientHandler::new(&cfg.host, cfg.port, cfg.host_key.clone());
            let mut handle =
                client::connect_stream(Self::client_config(), channel.into_stream(), handler)
                    .await
                    .map_err(|e| {
                        ConnectionError::new(&cfg.host, format!("ssh handshake failed: {}", e))
                    })?;
            Self::authenticate(&mut handle, &cfg.host, &cfg.user, methods).await?;
            Ok::<_, Error>(handle)
        };

        let target_handle = match tokio::time::timeout(connect_timeout, target_handshake).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                if let Err(close_err) = bastion_transport.close().await {
                    warn!(bastion = %bastion.host, error = %close_err, "failed to close bastion after handshake failure");
                }
                return Err(e);
            }
            Err(_) => {
                if let Err(close_err) = bastion_transport.close().await {
                    warn!(bastion = %bastion.host, error = %close_err, "failed to close bastion after handshake timeout");
                }
                return Err(ConnectionError::message(
                    &cfg.host,
                    format!("connect timed out after {:?}", connect_timeout),
                )
                .into());
            }
        };

        Ok(Dialed {
            target: SshTransport::new(&cfg.host, target_handle),
            bastion: Some(bastion_transport),
        })
    }
}
