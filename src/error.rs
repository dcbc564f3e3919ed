//! Error types for the host connector layer.
//!
//! Two carrier types travel through the crate: [`CommandError`] for command
//! executions that ran (or failed to run) on a host, and [`ConnectionError`]
//! for dial, authentication, and liveness failures bound to a host name. Both
//! preserve their underlying cause for `source()` chains. The crate-level
//! [`Error`] enum wraps them together with the pool-exhaustion sentinel and
//! the validation/I-O cases.

use std::fmt;
use thiserror::Error;

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error cause carried inside [`CommandError`] and [`ConnectionError`].
pub type Cause = Box<dyn std::error::Error + Send + Sync>;

/// A command ran on a host and failed, or could not be run at all.
///
/// Carries the command line, the exit code (`-1` when unknown), everything the
/// command wrote to stdout/stderr, and the underlying cause when the failure
/// was not a plain non-zero exit.
#[derive(Debug)]
pub struct CommandError {
    /// The command line as handed to the shell.
    pub command: String,
    /// Exit code reported by the remote or local process; `-1` when unknown.
    pub exit_code: i32,
    /// Captured standard output of the final attempt.
    pub stdout: String,
    /// Captured standard error of the final attempt.
    pub stderr: String,
    /// Underlying cause (timeout, transport failure, spawn error).
    pub source: Option<Cause>,
}

impl CommandError {
    /// Build a command error from the final attempt's outcome.
    pub fn new(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        source: Option<Cause>,
    ) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            source,
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command '{}' failed with exit code {}",
            self.command, self.exit_code
        )?;
        if self.stderr.is_empty() {
            write!(f, " (no stderr)")?;
        } else {
            write!(f, ", stderr: {}", self.stderr.trim_end())?;
        }
        if let Some(cause) = &self.source {
            write!(f, ", underlying error: {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// A dial, authentication, handshake, or liveness failure bound to a host.
#[derive(Debug)]
pub struct ConnectionError {
    /// The host (or bastion host) the failure is attributed to.
    pub host: String,
    /// Underlying cause.
    pub source: Cause,
}

impl ConnectionError {
    /// Wrap a cause with the host it belongs to.
    pub fn new(host: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self {
            host: host.into(),
            source: source.into(),
        }
    }

    /// Wrap a plain message with the host it belongs to.
    pub fn message(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            source: message.into().into(),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to connect to host {}: {}", self.host, self.source)
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Errors surfaced by connectors, the dial pipeline, and the connection pool.
#[derive(Error, Debug)]
pub enum Error {
    /// Command execution failure, with exit code and captured output.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Dial/auth/handshake/liveness failure bound to a host.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The pool is at its per-key connection cap.
    #[error("connection pool exhausted for key '{key}' (limit {limit})")]
    PoolExhausted {
        /// The pool key that hit the cap.
        key: String,
        /// The configured per-key limit.
        limit: usize,
    },

    /// Invalid input: permission strings, executable names, checksum kinds.
    #[error("{0}")]
    Validation(String),

    /// Filesystem or SFTP failure, wrapped with the path or host context.
    #[error("{context}: {source}")]
    Io {
        /// What was being done, including the path involved.
        context: String,
        /// Underlying error.
        #[source]
        source: Cause,
    },

    /// OS introspection exhausted every probe without recovering an id.
    #[error("failed to detect remote operating system: {0}")]
    Os(String),
}

impl Error {
    /// Wrap an I/O-ish error with a contextual message.
    pub fn io(context: impl Into<String>, source: impl Into<Cause>) -> Self {
        Error::Io {
            context: context.into(),
            source: source.into(),
        }
    }

    /// The exit code, when this error is a [`CommandError`].
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::Command(e) => Some(e.exit_code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_display_with_stderr() {
        let err = CommandError::new("ls /missing", 2, "", "ls: cannot access '/missing'", None);
        assert_eq!(
            err.to_string(),
            "command 'ls /missing' failed with exit code 2, stderr: ls: cannot access '/missing'"
        );
    }

    #[test]
    fn command_error_display_without_stderr() {
        let err = CommandError::new("false", 1, "", "", None);
        assert_eq!(
            err.to_string(),
            "command 'false' failed with exit code 1 (no stderr)"
        );
    }

    #[test]
    fn command_error_display_with_cause() {
        let cause: Cause = "deadline exceeded".into();
        let err = CommandError::new("sleep 10", -1, "", "", Some(cause));
        assert_eq!(
            err.to_string(),
            "command 'sleep 10' failed with exit code -1 (no stderr), underlying error: deadline exceeded"
        );
    }

    #[test]
    fn connection_error_display() {
        let err = ConnectionError::message("node-1", "connection refused");
        assert_eq!(
            err.to_string(),
            "failed to connect to host node-1: connection refused"
        );
    }

    #[test]
    fn error_source_chain_is_preserved() {
        use std::error::Error as _;

        // `transparent` forwards source() through the carrier to the cause.
        let cause: Cause = "handshake failed".into();
        let err = Error::from(ConnectionError::new("node-2", cause));
        let source = err.source();
        assert_eq!(source.map(|e| e.to_string()).as_deref(), Some("handshake failed"));
    }

    #[test]
    fn exit_code_recoverable_from_wrapped_error() {
        let err = Error::from(CommandError::new("false", 1, "", "", None));
        assert_eq!(err.exit_code(), Some(1));

        let other = Error::Validation("bad input".into());
        assert_eq!(other.exit_code(), None);
    }

    #[test]
    fn pool_exhausted_names_key_and_limit() {
        let err = Error::PoolExhausted {
            key: "root@node-1:22".into(),
            limit: 10,
        };
        assert_eq!(
            err.to_string(),
            "connection pool exhausted for key 'root@node-1:22' (limit 10)"
        );
    }
}
