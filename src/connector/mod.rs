//! The connector contract and its two backends.
//!
//! A [`Connector`] is the uniform capability set the provisioning engine
//! drives hosts through: command execution with retries and timeouts, file
//! transfer (privileged and not), metadata, OS introspection, checksums. Two
//! backends implement it: [`ssh::SshConnector`] for remote hosts and
//! [`local::LocalConnector`] for the control machine itself.
//!
//! A connector instance is single-owner: the engine gives each worker its own
//! connector, so the methods take `&mut self` and operations on one instance
//! are serial.

pub mod local;
pub mod ssh;

use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::Result;
use crate::facts::Os;
use crate::options::{ExecOptions, FileTransferOptions, RemoveOptions};

/// Captured output of a successful command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Bytes the command wrote to stdout.
    pub stdout: Vec<u8>,
    /// Bytes the command wrote to stderr.
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    /// Stdout decoded lossily as UTF-8.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily as UTF-8.
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Metadata for a remote or local path.
///
/// A missing path is not an error: `exists` is false and the other fields
/// are zeroed.
#[derive(Debug, Clone, Default)]
pub struct FileStat {
    /// Base name of the path.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// POSIX mode bits, permission and type flags included.
    pub mode: u32,
    /// Last modification time, when the backend reports one.
    pub mod_time: Option<SystemTime>,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// Whether the path exists at all.
    pub exists: bool,
}

impl FileStat {
    /// The stat returned for a path that does not exist.
    pub fn missing(path: &Path) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            exists: false,
            ..Self::default()
        }
    }
}

/// Uniform host capability set consumed by the provisioning engine's tasks.
#[async_trait]
pub trait Connector: Send {
    /// Establish the transport. Idempotent once connected.
    async fn connect(&mut self) -> Result<()>;

    /// Liveness: whether the transport currently answers a probe.
    async fn is_connected(&mut self) -> bool;

    /// Release the transport, returning it to the pool when it was borrowed
    /// from one. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// Run a command, honoring the retry/timeout/sudo/stream options.
    /// Returns captured stdout and stderr on success.
    async fn exec(&mut self, command: &str, options: &ExecOptions) -> Result<ExecOutput>;

    /// Transfer a control-machine file to `dst` on the host.
    async fn copy(&mut self, src: &Path, dst: &Path, options: &FileTransferOptions) -> Result<()>;

    /// Write in-memory content to `dst` on the host.
    async fn copy_content(
        &mut self,
        content: &[u8],
        dst: &Path,
        options: &FileTransferOptions,
    ) -> Result<()>;

    /// Write content to `dst` with the given octal permission text; `sudo`
    /// selects the privileged write path.
    async fn write_file(
        &mut self,
        content: &[u8],
        dst: &Path,
        permissions: &str,
        sudo: bool,
    ) -> Result<()>;

    /// Read a file on the host to completion.
    async fn read_file(&mut self, path: &Path) -> Result<Vec<u8>>;

    /// Download a file from the host to `local` on the control machine,
    /// creating parent directories as needed.
    async fn fetch(&mut self, remote: &Path, local: &Path) -> Result<()>;

    /// Stat a path without following symlinks. A missing path yields
    /// `FileStat { exists: false, .. }` and no error.
    async fn stat(&mut self, path: &Path) -> Result<FileStat>;

    /// Resolve an executable name to an absolute path on the host.
    async fn look_path(&mut self, executable: &str) -> Result<String>;

    /// Operating-system facts, cached after the first successful discovery.
    async fn os(&mut self) -> Result<Os>;

    /// Create a directory and its parents; apply `permissions` when
    /// non-empty.
    async fn mkdir(&mut self, path: &Path, permissions: &str) -> Result<()>;

    /// Remove a path per the options.
    async fn remove(&mut self, path: &Path, options: &RemoveOptions) -> Result<()>;

    /// Hex digest of a file; `checksum_type` is `sha256` or `md5`,
    /// case-insensitive.
    async fn file_checksum(&mut self, path: &Path, checksum_type: &str) -> Result<String>;
}

/// Parse octal permission text like `"0644"` into mode bits.
pub(crate) fn parse_permissions(text: &str) -> Result<u32> {
    u32::from_str_radix(text, 8).map_err(|_| {
        crate::error::Error::Validation(format!("invalid permissions '{}': expected octal", text))
    })
}
