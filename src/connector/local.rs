//! Local connector: the control machine driven through the same contract as
//! remote hosts.

use std::io::Cursor;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::Digest;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::config::ConnectionCfg;
use crate::connector::{parse_permissions, Connector, ExecOutput, FileStat};
use crate::error::{Cause, CommandError, Error, Result};
use crate::facts::{self, Os};
use crate::options::{ExecOptions, FileTransferOptions, OutputSink, RemoveOptions};
use crate::shell::{quote, validate_exec_name};

/// Outcome of one failed execution attempt, fed into the retry loop.
struct AttemptFailure {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    cause: Option<Cause>,
}

/// Connector that executes through the local OS shell and touches the local
/// filesystem directly. Sudo runs `sudo -S` with the configured password on
/// stdin.
pub struct LocalConnector {
    cfg: ConnectionCfg,
    identifier: String,
    os: Option<Os>,
}

impl LocalConnector {
    /// Connector for the control machine. The configuration supplies the
    /// sudo password; everything else is ignored.
    pub fn new(cfg: ConnectionCfg) -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            cfg,
            identifier,
            os: None,
        }
    }

    /// The local hostname this connector reports as its identity.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    fn effective_command(&self, command: &str, sudo: bool) -> String {
        if !sudo {
            return command.to_string();
        }
        if self.cfg.password.as_deref().is_some_and(|p| !p.is_empty()) {
            format!("sudo -S -p '' -E -- {}", command)
        } else {
            format!("sudo -E -- {}", command)
        }
    }

    fn sudo_stdin_prefix(&self) -> Vec<u8> {
        match self.cfg.password.as_deref() {
            Some(password) if !password.is_empty() => {
                let mut prefix = Vec::with_capacity(password.len() + 1);
                prefix.extend_from_slice(password.as_bytes());
                prefix.push(b'\n');
                prefix
            }
            _ => Vec::new(),
        }
    }

    fn reject_sudo_on_windows(sudo: bool) -> Result<()> {
        if sudo && cfg!(target_os = "windows") {
            return Err(Error::Validation(
                "sudo is not supported on windows".to_string(),
            ));
        }
        Ok(())
    }

    fn shell(command: &str) -> Command {
        if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("/bin/sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }

    /// Run one command through the local shell.
    ///
    /// Caller env is appended to the inherited process environment. Stdin is
    /// streamed concurrently with the output pumps, and output bytes are
    /// forwarded to `sink` as they arrive when one is attached.
    async fn run_shell<R>(
        &self,
        command: &str,
        stdin: R,
        env: &[String],
        sink: Option<&OutputSink>,
        timeout: Option<Duration>,
    ) -> std::result::Result<ExecOutput, AttemptFailure>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut cmd = Self::shell(command);
        for entry in env {
            if let Some((key, value)) = entry.split_once('=') {
                cmd.env(key, value);
            }
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Err(AttemptFailure {
                    exit_code: -1,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    cause: Some(Box::new(e)),
                })
            }
        };

        let stdout_buf = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let stdin_handle = child.stdin.take();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let run = {
            let stdout_buf = Arc::clone(&stdout_buf);
            let stderr_buf = Arc::clone(&stderr_buf);
            async move {
                let feed_stdin = async {
                    if let Some(mut handle) = stdin_handle {
                        let mut stdin = stdin;
                        if let Err(e) = tokio::io::copy(&mut stdin, &mut handle).await {
                            trace!(error = %e, "stdin pipe closed early");
                        }
                        // Close the pipe so the child sees EOF.
                        let _ = handle.shutdown().await;
                    }
                };
                let pump_stdout = pump(stdout_pipe, stdout_buf, sink);
                let pump_stderr = pump(stderr_pipe, stderr_buf, sink);
                let (status, _, _, _) =
                    tokio::join!(child.wait(), feed_stdin, pump_stdout, pump_stderr);
                status.map_err(|e| Box::new(e) as Cause)
            }
        };

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(elapsed) => Err(Box::new(elapsed) as Cause),
            },
            None => run.await,
        };

        let stdout = std::mem::take(&mut *stdout_buf.lock().await);
        let stderr = std::mem::take(&mut *stderr_buf.lock().await);

        match outcome {
            Ok(status) if status.success() => Ok(ExecOutput { stdout, stderr }),
            Ok(status) => Err(AttemptFailure {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
                cause: status
                    .code()
                    .is_none()
                    .then(|| "process terminated by signal".into()),
            }),
            Err(cause) => Err(AttemptFailure {
                exit_code: -1,
                stdout,
                stderr,
                cause: Some(cause),
            }),
        }
    }

    /// Privileged write: `sudo mkdir -p`, content streamed into `sudo tee`,
    /// then `sudo chmod`. The password, when configured, rides as the first
    /// stdin line ahead of the content.
    async fn write_via_sudo_tee<R>(&mut self, reader: R, dst: &Path, permissions: &str) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        Self::reject_sudo_on_windows(true)?;
        let mode = if permissions.is_empty() {
            None
        } else {
            Some(parse_permissions(permissions)?)
        };

        if let Some(parent) = dst.parent() {
            let mkdir = format!("mkdir -p {}", quote(&parent.to_string_lossy()));
            self.exec(&mkdir, &ExecOptions::new().with_sudo(true)).await?;
        }

        let tee = format!("tee {} > /dev/null", quote(&dst.to_string_lossy()));
        let command = self.effective_command(&tee, true);
        let stdin = Cursor::new(self.sudo_stdin_prefix()).chain(reader);

        debug!(dst = %dst.display(), "writing file via sudo tee");
        if let Err(failure) = self.run_shell(&command, stdin, &[], None, None).await {
            return Err(CommandError::new(
                tee,
                failure.exit_code,
                String::from_utf8_lossy(&failure.stdout),
                String::from_utf8_lossy(&failure.stderr),
                failure.cause,
            )
            .into());
        }

        if let Some(mode) = mode {
            let chmod = format!("chmod {:o} {}", mode, quote(&dst.to_string_lossy()));
            self.exec(&chmod, &ExecOptions::new().with_sudo(true)).await?;
        }
        Ok(())
    }

    /// Non-privileged write straight through the filesystem.
    async fn write_direct(&self, content: &[u8], dst: &Path, permissions: &str) -> Result<()> {
        let mode = if permissions.is_empty() {
            None
        } else {
            Some(parse_permissions(permissions)?)
        };

        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::io(format!("failed to create directory {}", parent.display()), e)
            })?;
        }
        tokio::fs::write(dst, content)
            .await
            .map_err(|e| Error::io(format!("failed to write {}", dst.display()), e))?;

        if let Some(mode) = mode {
            if let Err(e) =
                tokio::fs::set_permissions(dst, std::fs::Permissions::from_mode(mode)).await
            {
                warn!(path = %dst.display(), error = %e, "failed to apply permissions after write");
            }
        }
        Ok(())
    }

    async fn with_transfer_timeout<F>(timeout: Option<Duration>, dst: &Path, fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::io(
                    format!("transfer to {} timed out", dst.display()),
                    format!("no completion within {:?}", limit),
                )),
            },
            None => fut.await,
        }
    }
}

async fn pump<R>(
    src: Option<R>,
    buf: Arc<tokio::sync::Mutex<Vec<u8>>>,
    sink: Option<&OutputSink>,
) where
    R: AsyncRead + Unpin,
{
    let Some(mut src) = src else { return };
    let mut chunk = [0u8; 8192];
    loop {
        match src.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.lock().await.extend_from_slice(&chunk[..n]);
                if let Some(sink) = sink {
                    if let Err(e) = sink.lock().await.write_all(&chunk[..n]).await {
                        warn!(error = %e, "output sink write failed");
                    }
                }
            }
            Err(e) => {
                trace!(error = %e, "output pipe closed");
                break;
            }
        }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&mut self) -> Result<()> {
        // Nothing to dial; the configuration is kept for the sudo password.
        Ok(())
    }

    async fn is_connected(&mut self) -> bool {
        true
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn exec(&mut self, command: &str, options: &ExecOptions) -> Result<ExecOutput> {
        Self::reject_sudo_on_windows(options.sudo)?;
        if options.hidden {
            debug!(host = %self.identifier, "executing local command (hidden)");
        } else {
            debug!(host = %self.identifier, command = %command, "executing local command");
        }

        let full_command = self.effective_command(command, options.sudo);
        let mut stdin_bytes = if options.sudo {
            self.sudo_stdin_prefix()
        } else {
            Vec::new()
        };
        if let Some(extra) = &options.stdin {
            stdin_bytes.extend_from_slice(extra);
        }

        let mut last_failure: Option<AttemptFailure> = None;
        for attempt in 0..=options.retries {
            if attempt > 0 {
                tokio::time::sleep(options.retry_delay).await;
                debug!(attempt = %attempt, "retrying command");
            }
            match self
                .run_shell(
                    &full_command,
                    &stdin_bytes[..],
                    &options.env,
                    options.stream.as_ref(),
                    options.timeout,
                )
                .await
            {
                Ok(output) => return Ok(output),
                Err(failure) => last_failure = Some(failure),
            }
        }

        let failure = last_failure.unwrap_or_else(|| AttemptFailure {
            exit_code: -1,
            stdout: Vec::new(),
            stderr: Vec::new(),
            cause: Some("command was never attempted".into()),
        });
        Err(CommandError::new(
            command,
            failure.exit_code,
            String::from_utf8_lossy(&failure.stdout),
            String::from_utf8_lossy(&failure.stderr),
            failure.cause,
        )
        .into())
    }

    async fn copy(&mut self, src: &Path, dst: &Path, options: &FileTransferOptions) -> Result<()> {
        debug!(src = %src.display(), dst = %dst.display(), sudo = %options.sudo, "copying file locally");
        if options.sudo {
            let file = tokio::fs::File::open(src).await.map_err(|e| {
                Error::io(format!("failed to open local file {}", src.display()), e)
            })?;
            let permissions = options.permissions.clone();
            let timeout = options.timeout;
            return Self::with_transfer_timeout(timeout, dst, async {
                self.write_via_sudo_tee(file, dst, &permissions).await
            })
            .await;
        }

        let copy = async {
            let mode = if options.permissions.is_empty() {
                None
            } else {
                Some(parse_permissions(&options.permissions)?)
            };
            if let Some(parent) = dst.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::io(format!("failed to create directory {}", parent.display()), e)
                })?;
            }
            tokio::fs::copy(src, dst).await.map_err(|e| {
                Error::io(
                    format!("failed to copy {} to {}", src.display(), dst.display()),
                    e,
                )
            })?;
            if let Some(mode) = mode {
                if let Err(e) =
                    tokio::fs::set_permissions(dst, std::fs::Permissions::from_mode(mode)).await
                {
                    warn!(path = %dst.display(), error = %e, "failed to apply permissions after copy");
                }
            }
            Ok(())
        };
        Self::with_transfer_timeout(options.timeout, dst, copy).await
    }

    async fn copy_content(
        &mut self,
        content: &[u8],
        dst: &Path,
        options: &FileTransferOptions,
    ) -> Result<()> {
        self.write_file(content, dst, &options.permissions, options.sudo)
            .await
    }

    async fn write_file(
        &mut self,
        content: &[u8],
        dst: &Path,
        permissions: &str,
        sudo: bool,
    ) -> Result<()> {
        debug!(dst = %dst.display(), size = %content.len(), sudo = %sudo, "writing file locally");
        if sudo {
            self.write_via_sudo_tee(content, dst, permissions).await
        } else {
            self.write_direct(content, dst, permissions).await
        }
    }

    async fn read_file(&mut self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))
    }

    async fn fetch(&mut self, remote: &Path, local: &Path) -> Result<()> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::io(format!("failed to create directory {}", parent.display()), e)
            })?;
        }
        tokio::fs::copy(remote, local).await.map_err(|e| {
            Error::io(
                format!("failed to copy {} to {}", remote.display(), local.display()),
                e,
            )
        })?;
        Ok(())
    }

    async fn stat(&mut self, path: &Path) -> Result<FileStat> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => Ok(FileStat {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                size: metadata.len(),
                mode: metadata.mode(),
                mod_time: metadata.modified().ok(),
                is_dir: metadata.is_dir(),
                exists: true,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileStat::missing(path)),
            Err(e) => Err(Error::io(format!("failed to stat {}", path.display()), e)),
        }
    }

    async fn look_path(&mut self, executable: &str) -> Result<String> {
        validate_exec_name(executable)?;
        match which::which(executable) {
            Ok(path) => Ok(path.to_string_lossy().into_owned()),
            Err(_) => Err(Error::Validation(format!(
                "executable '{}' not found in PATH",
                executable
            ))),
        }
    }

    async fn os(&mut self) -> Result<Os> {
        if let Some(os) = &self.os {
            return Ok(os.clone());
        }

        let mut os = Os {
            arch: facts::normalize_arch(std::env::consts::ARCH),
            ..Os::default()
        };

        match std::env::consts::OS {
            "linux" => {
                if let Ok(content) = tokio::fs::read_to_string("/etc/os-release").await {
                    facts::apply_os_release(&mut os, &content);
                }
                if os.id.is_empty() {
                    os.id = "linux".to_string();
                }
            }
            "macos" => {
                os.id = "darwin".to_string();
                if let Ok(output) = self.exec("sw_vers -productName", &ExecOptions::new()).await {
                    os.pretty_name = output.stdout_str().trim().to_string();
                }
                if let Ok(output) = self
                    .exec("sw_vers -productVersion", &ExecOptions::new())
                    .await
                {
                    os.version_id = output.stdout_str().trim().to_string();
                }
            }
            other => os.id = other.to_string(),
        }

        if let Ok(output) = self.exec("uname -r", &ExecOptions::new()).await {
            os.kernel = output.stdout_str().trim().to_string();
        }

        self.os = Some(os.clone());
        Ok(os)
    }

    async fn mkdir(&mut self, path: &Path, permissions: &str) -> Result<()> {
        let mode = if permissions.is_empty() {
            None
        } else {
            Some(parse_permissions(permissions)?)
        };
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| Error::io(format!("failed to create directory {}", path.display()), e))?;
        if let Some(mode) = mode {
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| {
                    Error::io(format!("failed to set permissions on {}", path.display()), e)
                })?;
        }
        Ok(())
    }

    async fn remove(&mut self, path: &Path, options: &RemoveOptions) -> Result<()> {
        if options.ignore_not_exist {
            match tokio::fs::symlink_metadata(path).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    return Err(Error::io(format!("failed to stat {}", path.display()), e))
                }
            }
        }

        if options.sudo {
            let flags = if options.recursive { "-rf" } else { "-f" };
            let command = format!("rm {} {}", flags, quote(&path.to_string_lossy()));
            self.exec(&command, &ExecOptions::new().with_sudo(true))
                .await?;
            return Ok(());
        }

        // rm -f semantics: a path that is already gone is a success.
        let result = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) if metadata.is_dir() => {
                if options.recursive {
                    tokio::fs::remove_dir_all(path).await
                } else {
                    tokio::fs::remove_dir(path).await
                }
            }
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io(format!("failed to stat {}", path.display()), e)),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("failed to remove {}", path.display()), e)),
        }
    }

    async fn file_checksum(&mut self, path: &Path, checksum_type: &str) -> Result<String> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::io(format!("failed to open {}", path.display()), e))?;
        let mut chunk = [0u8; 64 * 1024];

        match checksum_type.to_ascii_lowercase().as_str() {
            "sha256" => {
                let mut hasher = sha2::Sha256::new();
                loop {
                    let n = file.read(&mut chunk).await.map_err(|e| {
                        Error::io(format!("failed to read {}", path.display()), e)
                    })?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&chunk[..n]);
                }
                Ok(format!("{:x}", hasher.finalize()))
            }
            "md5" => {
                let mut context = md5::Context::new();
                loop {
                    let n = file.read(&mut chunk).await.map_err(|e| {
                        Error::io(format!("failed to read {}", path.display()), e)
                    })?;
                    if n == 0 {
                        break;
                    }
                    context.consume(&chunk[..n]);
                }
                Ok(format!("{:x}", context.compute()))
            }
            other => Err(Error::Validation(format!(
                "unsupported checksum type '{}': expected sha256 or md5",
                other
            ))),
        }
    }
}
