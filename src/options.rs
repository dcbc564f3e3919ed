//! Option records for command execution, file transfer, and removal.
//!
//! These are plain configuration values passed per call. They follow the
//! chainable `with_*` builder convention so call sites stay readable:
//!
//! ```rust
//! use std::time::Duration;
//! use hostlink::options::ExecOptions;
//!
//! let opts = ExecOptions::new()
//!     .with_sudo(true)
//!     .with_timeout(Duration::from_secs(30))
//!     .with_retries(2, Duration::from_secs(1));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

/// Destination for live command output.
///
/// When attached to [`ExecOptions::stream`], stdout and stderr bytes are
/// forwarded here as they arrive, in addition to being captured in the
/// buffers returned from `exec`.
pub type OutputSink = Arc<Mutex<dyn AsyncWrite + Send + Unpin>>;

/// Options for a single command execution.
#[derive(Clone, Default)]
pub struct ExecOptions {
    /// Run the command under sudo.
    pub sudo: bool,
    /// Per-attempt timeout; `None` means no timeout at this layer.
    pub timeout: Option<Duration>,
    /// Extra environment, as `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Additional attempts after the first failure; total attempts = retries + 1.
    pub retries: u32,
    /// Sleep between attempts.
    pub retry_delay: Duration,
    /// Advisory to the caller: a failure of this command should abort the plan.
    pub fatal: bool,
    /// Advisory: do not echo the command line into logs.
    pub hidden: bool,
    /// Live output destination; see [`OutputSink`].
    pub stream: Option<OutputSink>,
    /// Bytes piped to the command's stdin (after the sudo password line, when
    /// one is prepended).
    pub stdin: Option<Vec<u8>>,
}

impl ExecOptions {
    /// Create options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run under sudo.
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Append an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(format!("{}={}", key.into(), value.into()));
        self
    }

    /// Set the retry policy.
    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    /// Mark the command as fatal for the caller.
    pub fn with_fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    /// Keep the command line out of logs.
    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// Attach a live output sink.
    pub fn with_stream(mut self, sink: OutputSink) -> Self {
        self.stream = Some(sink);
        self
    }

    /// Pipe bytes to the command's stdin.
    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

impl fmt::Debug for ExecOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecOptions")
            .field("sudo", &self.sudo)
            .field("timeout", &self.timeout)
            .field("env", &self.env)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("fatal", &self.fatal)
            .field("hidden", &self.hidden)
            .field("stream", &self.stream.as_ref().map(|_| "<sink>"))
            .field("stdin", &self.stdin.as_ref().map(|b| b.len()))
            .finish()
    }
}

/// Options for file transfer operations.
#[derive(Debug, Clone, Default)]
pub struct FileTransferOptions {
    /// Octal permission text, e.g. `"0644"`. Empty keeps the connector's
    /// default umask behavior.
    pub permissions: String,
    /// Owner to apply after the write (reserved for chown).
    pub owner: String,
    /// Group to apply after the write (reserved for chown).
    pub group: String,
    /// Transfer timeout; `None` means no timeout at this layer.
    pub timeout: Option<Duration>,
    /// Perform the write under sudo.
    pub sudo: bool,
}

impl FileTransferOptions {
    /// Create options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the octal permission text.
    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = permissions.into();
        self
    }

    /// Set the owner (reserved).
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Set the group (reserved).
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Set the transfer timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Perform the transfer under sudo.
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }
}

/// Options for removing files and directories.
#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Remove directories recursively.
    pub recursive: bool,
    /// Treat a missing path as success.
    pub ignore_not_exist: bool,
    /// Remove under sudo.
    pub sudo: bool,
}

impl RemoveOptions {
    /// Create options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove directories recursively.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Treat a missing path as success.
    pub fn with_ignore_not_exist(mut self, ignore: bool) -> Self {
        self.ignore_not_exist = ignore;
        self
    }

    /// Remove under sudo.
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }
}
