//! # Hostlink - Uniform Host Execution and File Transfer
//!
//! Hostlink is the connector layer of a cluster-provisioning engine: one
//! contract for running commands and moving files against many heterogeneous
//! hosts, whether they sit behind SSH (optionally through a bastion) or are
//! the control machine itself.
//!
//! ## Core Concepts
//!
//! - **Connector**: the uniform capability set - exec with retries, timeouts
//!   and sudo, file transfer (privileged writes via a sudo-tee pipeline),
//!   metadata, OS introspection, checksums
//! - **Backends**: [`connector::ssh::SshConnector`] over russh/SFTP and
//!   [`connector::local::LocalConnector`] over the local shell and filesystem
//! - **Dial pipeline**: TCP + SSH handshake + ordered auth methods, with an
//!   optional bastion tunneled over `direct-tcpip`
//! - **Connection pool**: keyed reuse of SSH transports with keepalive
//!   probes, idle/age expiry, per-key caps, and a background scrubber
//! - **Factory**: picks the backend per host record and builds its
//!   connection configuration
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Provisioning Engine                       │
//! │            (task graph, plan execution, inventory)            │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      factory::connector_for_host              │
//! └──────────────────────────────────────────────────────────────┘
//!            │                                      │
//!            ▼                                      ▼
//! ┌──────────────────────┐            ┌──────────────────────────┐
//! │     LocalConnector   │            │       SshConnector        │
//! │  (sh -c, filesystem) │            │  (sessions, SFTP, sudo)   │
//! └──────────────────────┘            └──────────────────────────┘
//!                                                  │
//!                                      ┌───────────┴───────────┐
//!                                      ▼                       ▼
//!                           ┌──────────────────┐   ┌──────────────────┐
//!                           │  ConnectionPool  │   │     SshDialer     │
//!                           │ (keyed transports│   │ (direct / bastion)│
//!                           │  + scrubber)     │   └──────────────────┘
//!                           └──────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use hostlink::config::ConnectionCfg;
//! use hostlink::connector::{ssh::SshConnector, Connector};
//! use hostlink::dial::SshDialer;
//! use hostlink::options::ExecOptions;
//! use hostlink::pool::{ConnectionPool, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> hostlink::Result<()> {
//!     let pool = ConnectionPool::new(SshDialer, PoolConfig::default());
//!
//!     let mut cfg = ConnectionCfg::new("10.0.0.11", 22, "root");
//!     cfg.private_key_path = Some("/root/.ssh/id_ed25519".into());
//!
//!     let mut conn = SshConnector::new(cfg, Some(pool.clone()));
//!     conn.connect().await?;
//!
//!     let out = conn.exec("uname -r", &ExecOptions::new()).await?;
//!     println!("kernel: {}", out.stdout_str().trim());
//!
//!     conn.close().await?;
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

/// Authentication method construction.
pub mod auth;

/// Connection configuration and pool-key derivation.
pub mod config;

/// The connector contract and its SSH and local backends.
pub mod connector;

/// The SSH dial pipeline, bastion tunneling included.
pub mod dial;

/// Error taxonomy.
pub mod error;

/// Operating-system facts and their parsers.
pub mod facts;

/// Option records for exec, transfer, and removal.
pub mod options;

/// The keyed connection pool.
pub mod pool;

/// Shell quoting for interpolated paths and arguments.
pub mod shell;

/// Established SSH transports.
pub mod transport;

/// Connector selection from host records.
pub mod factory;

pub use config::{
    BastionCfg, ConnectionCfg, FingerprintVerifier, HostKeyVerifier, DEFAULT_CONNECT_TIMEOUT,
};
pub use connector::local::LocalConnector;
pub use connector::ssh::SshConnector;
pub use connector::{Connector, ExecOutput, FileStat};
pub use dial::{Dial, Dialed, SshDialer};
pub use error::{CommandError, ConnectionError, Error, Result};
pub use facts::Os;
pub use factory::{connection_cfg_for_host, connector_for_host, Host};
pub use options::{ExecOptions, FileTransferOptions, OutputSink, RemoveOptions};
pub use pool::{ConnectionPool, ManagedConnection, PoolConfig, PoolStats};
pub use transport::{Session, SessionStream, SshSession, SshTransport, SubsystemStream, Transport};
