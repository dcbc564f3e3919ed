//! Established SSH transports and the minimal surface the pool needs.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::keys::ssh_key::{HashAlg, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::config::HostKeyVerifier;

/// Byte stream of a subsystem channel, as handed to the SFTP client.
pub trait SubsystemStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SubsystemStream for T {}

/// Boxed subsystem stream returned by [`Session::request_subsystem_stream`].
pub type SessionStream = Box<dyn SubsystemStream>;

/// One exec or subsystem session on a transport.
///
/// The SSH implementation wraps a session channel; tests script sessions to
/// exercise connector behavior without a live server.
#[async_trait]
pub trait Session: Send {
    /// Set an environment variable, best-effort; servers commonly refuse
    /// setenv and the failure is ignored.
    async fn set_env(&mut self, name: &str, value: &str);

    /// Start a command on the session.
    async fn exec(&mut self, command: &str) -> Result<(), russh::Error>;

    /// Stream bytes into the command's stdin.
    async fn data(&mut self, stdin: &mut (dyn AsyncRead + Send + Unpin))
        -> Result<(), russh::Error>;

    /// Close the stdin side so the command sees EOF.
    async fn eof(&mut self) -> Result<(), russh::Error>;

    /// Next event on the session; `None` once the channel is gone.
    async fn wait(&mut self) -> Option<ChannelMsg>;

    /// Turn the session into a subsystem byte stream (e.g. `sftp`).
    async fn request_subsystem_stream(
        self: Box<Self>,
        name: &str,
    ) -> Result<SessionStream, russh::Error>;
}

/// The minimal capability set of an established SSH transport.
///
/// The pool only ever probes, lends, and closes transports; the SSH connector
/// additionally opens sessions for exec and SFTP. Abstracting at this seam
/// lets pool and connector behavior be tested without a live SSH server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The host this transport is connected to, for diagnostics.
    fn host(&self) -> &str;

    /// Whether the underlying connection has already been torn down.
    fn is_closed(&self) -> bool;

    /// Cheap liveness probe: the `keepalive@openssh.com` global request with
    /// want-reply set.
    async fn keepalive(&self) -> Result<(), russh::Error>;

    /// Open a fresh session for one exec or subsystem request.
    async fn open_session(&self) -> Result<Box<dyn Session>, russh::Error>;

    /// Disconnect the transport.
    async fn close(&self) -> Result<(), russh::Error>;
}

/// russh client handler carrying the host-key verification policy.
pub struct ClientHandler {
    host: String,
    port: u16,
    verifier: Option<Arc<dyn HostKeyVerifier>>,
}

impl ClientHandler {
    /// Handler for a handshake with `host:port` under the given policy.
    pub fn new(host: impl Into<String>, port: u16, verifier: Option<Arc<dyn HostKeyVerifier>>) -> Self {
        Self {
            host: host.into(),
            port,
            verifier,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match &self.verifier {
            Some(verifier) => {
                let accepted = verifier.verify(&self.host, self.port, server_public_key);
                if accepted {
                    debug!(host = %self.host, port = %self.port, "host key accepted by verifier");
                } else {
                    warn!(
                        host = %self.host,
                        port = %self.port,
                        fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
                        "host key rejected by verifier"
                    );
                }
                Ok(accepted)
            }
            None => {
                warn!(
                    host = %self.host,
                    port = %self.port,
                    fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
                    "no host-key verifier configured, accepting any host key"
                );
                Ok(true)
            }
        }
    }
}

/// A session channel on a live SSH connection.
pub struct SshSession {
    channel: Channel<Msg>,
}

#[async_trait]
impl Session for SshSession {
    async fn set_env(&mut self, name: &str, value: &str) {
        let _ = self.channel.set_env(false, name, value).await;
    }

    async fn exec(&mut self, command: &str) -> Result<(), russh::Error> {
        self.channel.exec(true, command).await
    }

    async fn data(
        &mut self,
        stdin: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), russh::Error> {
        self.channel.data(stdin).await
    }

    async fn eof(&mut self) -> Result<(), russh::Error> {
        self.channel.eof().await
    }

    async fn wait(&mut self) -> Option<ChannelMsg> {
        self.channel.wait().await
    }

    async fn request_subsystem_stream(
        self: Box<Self>,
        name: &str,
    ) -> Result<SessionStream, russh::Error> {
        let Self { channel } = *self;
        channel.request_subsystem(true, name).await?;
        Ok(Box::new(channel.into_stream()))
    }
}

/// A live SSH connection to one host.
pub struct SshTransport {
    host: String,
    handle: Handle<ClientHandler>,
}

impl SshTransport {
    /// Wrap an authenticated russh handle.
    pub fn new(host: impl Into<String>, handle: Handle<ClientHandler>) -> Self {
        Self {
            host: host.into(),
            handle,
        }
    }

    /// Open a TCP tunnel through this transport to `host:port`.
    ///
    /// Used by the dialer to reach a target through a bastion.
    pub(crate) async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Channel<Msg>, russh::Error> {
        self.handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn host(&self) -> &str {
        &self.host
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn keepalive(&self) -> Result<(), russh::Error> {
        if self.handle.is_closed() {
            return Err(russh::Error::Disconnect);
        }
        self.handle.send_keepalive(true).await
    }

    async fn open_session(&self) -> Result<Box<dyn Session>, russh::Error> {
        let channel = self.handle.channel_open_session().await?;
        Ok(Box::new(SshSession { channel }))
    }

    async fn close(&self) -> Result<(), russh::Error> {
        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
    }
}
