//! SSH-backed connector: exec over session channels, file I/O over SFTP,
//! privileged writes through a sudo-tee pipeline.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use russh::ChannelMsg;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::FileAttributes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::config::ConnectionCfg;
use crate::connector::{parse_permissions, Connector, ExecOutput, FileStat};
use crate::dial::{Dial, SshDialer};
use crate::error::{Cause, CommandError, ConnectionError, Error, Result};
use crate::facts::{self, Os};
use crate::options::{ExecOptions, FileTransferOptions, OutputSink, RemoveOptions};
use crate::pool::{ConnectionPool, ManagedConnection};
use crate::shell::{quote, validate_exec_name};
use crate::transport::Transport;

/// Outcome of one failed execution attempt, fed into the retry loop.
struct AttemptFailure {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    cause: Option<Cause>,
}

/// Connector over an SSH transport, pooled or directly dialed.
///
/// When a pool is attached and no bastion is configured, `connect` borrows a
/// transport from the pool and `close` hands it back; bastion connections are
/// always dialed directly and owned by the connector.
pub struct SshConnector<D: Dial = SshDialer> {
    cfg: ConnectionCfg,
    dialer: D,
    pool: Option<Arc<ConnectionPool<D>>>,
    conn: Option<ManagedConnection<D::Transport>>,
    from_pool: bool,
    sftp: Option<SftpSession>,
    os: Option<Os>,
    connected: bool,
}

impl SshConnector<SshDialer> {
    /// Connector with the production dialer, optionally sharing `pool`.
    pub fn new(cfg: ConnectionCfg, pool: Option<Arc<ConnectionPool<SshDialer>>>) -> Self {
        Self::with_dialer(cfg, SshDialer, pool)
    }
}

impl<D: Dial> SshConnector<D> {
    /// Connector with an injected dialer, for wiring and for tests.
    pub fn with_dialer(cfg: ConnectionCfg, dialer: D, pool: Option<Arc<ConnectionPool<D>>>) -> Self {
        Self {
            cfg,
            dialer,
            pool,
            conn: None,
            from_pool: false,
            sftp: None,
            os: None,
            connected: false,
        }
    }

    /// The host this connector targets.
    pub fn host(&self) -> &str {
        &self.cfg.host
    }

    fn live_conn(&self) -> Result<&ManagedConnection<D::Transport>> {
        if !self.connected {
            return Err(ConnectionError::message(&self.cfg.host, "not connected").into());
        }
        self.conn
            .as_ref()
            .ok_or_else(|| ConnectionError::message(&self.cfg.host, "not connected").into())
    }

    /// Prefix the command for privileged execution. With a password the
    /// `-S -p ''` form reads it from the first line of stdin.
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

    /// Run one command in a fresh session channel.
    ///
    /// Stdin is streamed before the output loop starts; stdout and stderr are
    /// captured, and forwarded to `sink` as they arrive when one is attached.
    /// Buffers survive a per-attempt timeout so the final error can carry
    /// whatever the command managed to print.
    async fn run_session<R>(
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
        let Some(conn) = self.conn.as_ref() else {
            return Err(AttemptFailure {
                exit_code: -1,
                stdout: Vec::new(),
                stderr: Vec::new(),
                cause: Some("not connected".into()),
            });
        };
        let transport = conn.transport();

        let stdout_buf = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let run = {
            let stdout_buf = Arc::clone(&stdout_buf);
            let stderr_buf = Arc::clone(&stderr_buf);
            async move {
                let mut session = transport
                    .open_session()
                    .await
                    .map_err(|e| Box::new(e) as Cause)?;

                // Environment is best-effort; servers commonly refuse setenv.
                for entry in env {
                    if let Some((key, value)) = entry.split_once('=') {
                        session.set_env(key, value).await;
                    }
                }

                session
                    .exec(command)
                    .await
                    .map_err(|e| Box::new(e) as Cause)?;
                let mut stdin = stdin;
                session
                    .data(&mut stdin)
                    .await
                    .map_err(|e| Box::new(e) as Cause)?;
                session.eof().await.map_err(|e| Box::new(e) as Cause)?;

                let mut exit_code = None;
                while let Some(msg) = session.wait().await {
                    match msg {
                        ChannelMsg::Data { ref data } => {
                            stdout_buf.lock().await.extend_from_slice(data);
                            if let Some(sink) = sink {
                                if let Err(e) = sink.lock().await.write_all(data).await {
                                    warn!(error = %e, "output sink write failed");
                                }
                            }
                        }
                        ChannelMsg::ExtendedData { ref data, ext } => {
                            if ext == 1 {
                                stderr_buf.lock().await.extend_from_slice(data);
                                if let Some(sink) = sink {
                                    if let Err(e) = sink.lock().await.write_all(data).await {
                                        warn!(error = %e, "output sink write failed");
                                    }
                                }
                            }
                        }
                        ChannelMsg::ExitStatus { exit_status } => {
                            exit_code = Some(exit_status);
                        }
                        ChannelMsg::Close => break,
                        _ => {}
                    }
                }

                Ok::<_, Cause>(exit_code)
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
            Ok(Some(0)) => Ok(ExecOutput { stdout, stderr }),
            Ok(Some(code)) => Err(AttemptFailure {
                exit_code: code as i32,
                stdout,
                stderr,
                cause: None,
            }),
            Ok(None) => Err(AttemptFailure {
                exit_code: -1,
                stdout,
                stderr,
                cause: Some("command ended without an exit status".into()),
            }),
            Err(cause) => Err(AttemptFailure {
                exit_code: -1,
                stdout,
                stderr,
                cause: Some(cause),
            }),
        }
    }

    /// Allocate the SFTP subsystem on first use.
    async fn ensure_sftp(&mut self) -> Result<()> {
        if self.sftp.is_some() {
            return Ok(());
        }
        let conn = self.live_conn()?;
        let session = conn.transport().open_session().await.map_err(|e| {
            Error::io(format!("failed to open sftp channel on {}", self.cfg.host), e)
        })?;
        let stream = session.request_subsystem_stream("sftp").await.map_err(|e| {
            Error::io(
                format!("failed to request sftp subsystem on {}", self.cfg.host),
                e,
            )
        })?;
        let sftp = SftpSession::new(stream).await.map_err(|e| {
            Error::io(
                format!("failed to start sftp session on {}", self.cfg.host),
                e,
            )
        })?;
        trace!(host = %self.cfg.host, "sftp subsystem allocated");
        self.sftp = Some(sftp);
        Ok(())
    }

    fn sftp(&self) -> Result<&SftpSession> {
        self.sftp
            .as_ref()
            .ok_or_else(|| ConnectionError::message(&self.cfg.host, "sftp not allocated").into())
    }

    /// Create every directory component of `path`, ignoring already-exists
    /// failures per component.
    async fn create_remote_dirs(sftp: &SftpSession, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            let text = current.to_string_lossy();
            if text == "/" {
                continue;
            }
            let _ = sftp.create_dir(text.to_string()).await;
        }
    }

    /// Non-privileged write: SFTP mkdir-all, create, stream, chmod.
    async fn write_via_sftp<R>(&mut self, mut reader: R, dst: &Path, permissions: &str) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        // Validate before touching the remote side.
        let mode = if permissions.is_empty() {
            None
        } else {
            Some(parse_permissions(permissions)?)
        };

        self.ensure_sftp().await?;
        let host = self.cfg.host.clone();
        let sftp = self.sftp()?;
        let dst_str = dst.to_string_lossy().into_owned();

        if let Some(parent) = dst.parent() {
            Self::create_remote_dirs(sftp, parent).await;
        }

        let mut file = sftp.create(&dst_str).await.map_err(|e| {
            Error::io(format!("failed to create {} on {}", dst.display(), host), e)
        })?;
        tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
            Error::io(format!("failed to write {} on {}", dst.display(), host), e)
        })?;
        file.shutdown().await.map_err(|e| {
            Error::io(format!("failed to flush {} on {}", dst.display(), host), e)
        })?;

        if let Some(mode) = mode {
            let attrs = FileAttributes {
                permissions: Some(mode),
                ..Default::default()
            };
            // Permission application is advisory on the non-sudo path.
            if let Err(e) = sftp.set_metadata(&dst_str, attrs).await {
                warn!(host = %host, path = %dst.display(), error = %e, "failed to apply permissions after write");
            }
        }
        Ok(())
    }

    /// Privileged write: `sudo mkdir -p`, then content streamed into
    /// `sudo tee` (stdout dropped), then `sudo chmod`.
    ///
    /// `tee` keeps the write atomic per kernel write semantics and accepts
    /// arbitrarily large content, since bytes stream through stdin.
    async fn write_via_sudo_tee<R>(&mut self, reader: R, dst: &Path, permissions: &str) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
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

        debug!(host = %self.cfg.host, path = %dst.display(), "writing file via sudo tee");
        if let Err(failure) = self.run_session(&command, stdin, &[], None, None).await {
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
            // A failed chmod here breaks the permission contract of a
            // privileged write, so it surfaces unlike the sftp path.
            let chmod = format!("chmod {:o} {}", mode, quote(&dst.to_string_lossy()));
            self.exec(&chmod, &ExecOptions::new().with_sudo(true)).await?;
        }
        Ok(())
    }

    async fn write_reader<R>(
        &mut self,
        reader: R,
        dst: &Path,
        permissions: &str,
        sudo: bool,
        timeout: Option<Duration>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let write = async {
            if sudo {
                self.write_via_sudo_tee(reader, dst, permissions).await
            } else {
                self.write_via_sftp(reader, dst, permissions).await
            }
        };
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result,
                Err(_) => Err(Error::io(
                    format!("transfer to {} timed out", dst.display()),
                    format!("no completion within {:?}", limit),
                )),
            },
            None => write.await,
        }
    }

    fn is_not_found(error: &russh_sftp::client::error::Error) -> bool {
        let text = error.to_string().to_lowercase();
        text.contains("no such file") || text.contains("not found")
    }
}

#[async_trait]
impl<D: Dial> Connector for SshConnector<D> {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }

        // Bastion targets always dial directly; tunneled transports are not
        // interchangeable enough to be worth pooling alongside direct ones.
        if self.cfg.bastion.is_none() {
            if let Some(pool) = self.pool.clone() {
                let conn = pool.get(&self.cfg).await?;
                match conn.transport().keepalive().await {
                    Ok(()) => {
                        trace!(host = %self.cfg.host, "using pooled connection");
                        self.conn = Some(conn);
                        self.from_pool = true;
                        self.connected = true;
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(host = %self.cfg.host, error = %e, "pooled connection failed probe, dialing directly");
                        pool.put(conn, false).await;
                    }
                }
            }
        }

        let dialed = self
            .dialer
            .dial(&self.cfg, self.cfg.effective_timeout())
            .await?;
        self.conn = Some(ManagedConnection::from_dialed(self.cfg.pool_key(), dialed));
        self.from_pool = false;
        self.connected = true;
        debug!(host = %self.cfg.host, "connected");
        Ok(())
    }

    async fn is_connected(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        match &self.conn {
            Some(conn) => conn.transport().keepalive().await.is_ok(),
            None => false,
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.connected && self.conn.is_none() && self.sftp.is_none() {
            return Ok(());
        }
        self.connected = false;
        let mut first_err: Option<Error> = None;

        if let Some(sftp) = self.sftp.take() {
            // Dropping the session tears down its channel with the transport.
            trace!(host = %self.cfg.host, "releasing sftp subsystem");
            drop(sftp);
        }

        if let Some(conn) = self.conn.take() {
            match (&self.pool, self.from_pool) {
                (Some(pool), true) => {
                    let healthy = conn.transport().keepalive().await.is_ok();
                    trace!(host = %self.cfg.host, healthy = %healthy, "returning connection to pool");
                    pool.put(conn, healthy).await;
                }
                _ => {
                    if let Err(e) = conn.close().await {
                        warn!(host = %self.cfg.host, error = %e, "failed to close connection");
                        first_err = Some(Error::io(
                            format!("failed to close connection to {}", self.cfg.host),
                            e,
                        ));
                    }
                }
            }
        }
        self.from_pool = false;

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    async fn exec(&mut self, command: &str, options: &ExecOptions) -> Result<ExecOutput> {
        self.live_conn()?;
        if options.hidden {
            debug!(host = %self.cfg.host, "executing remote command (hidden)");
        } else {
            debug!(host = %self.cfg.host, command = %command, "executing remote command");
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
                debug!(host = %self.cfg.host, attempt = %attempt, "retrying command");
            }
            match self
                .run_session(
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
        self.live_conn()?;
        let file = tokio::fs::File::open(src).await.map_err(|e| {
            Error::io(format!("failed to open local file {}", src.display()), e)
        })?;
        debug!(host = %self.cfg.host, src = %src.display(), dst = %dst.display(), sudo = %options.sudo, "copying file");
        self.write_reader(file, dst, &options.permissions, options.sudo, options.timeout)
            .await
    }

    async fn copy_content(
        &mut self,
        content: &[u8],
        dst: &Path,
        options: &FileTransferOptions,
    ) -> Result<()> {
        self.live_conn()?;
        debug!(host = %self.cfg.host, dst = %dst.display(), size = %content.len(), sudo = %options.sudo, "writing content");
        self.write_reader(content, dst, &options.permissions, options.sudo, options.timeout)
            .await
    }

    async fn write_file(
        &mut self,
        content: &[u8],
        dst: &Path,
        permissions: &str,
        sudo: bool,
    ) -> Result<()> {
        self.live_conn()?;
        debug!(host = %self.cfg.host, dst = %dst.display(), size = %content.len(), sudo = %sudo, "writing file");
        self.write_reader(content, dst, permissions, sudo, None).await
    }

    async fn read_file(&mut self, path: &Path) -> Result<Vec<u8>> {
        self.live_conn()?;
        self.ensure_sftp().await?;
        let host = self.cfg.host.clone();
        let sftp = self.sftp()?;
        let mut file = sftp
            .open(path.to_string_lossy().into_owned())
            .await
            .map_err(|e| Error::io(format!("failed to open {} on {}", path.display(), host), e))?;
        let mut content = Vec::new();
        file.read_to_end(&mut content).await.map_err(|e| {
            Error::io(format!("failed to read {} on {}", path.display(), host), e)
        })?;
        Ok(content)
    }

    async fn fetch(&mut self, remote: &Path, local: &Path) -> Result<()> {
        self.live_conn()?;
        self.ensure_sftp().await?;
        let host = self.cfg.host.clone();

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::io(format!("failed to create directory {}", parent.display()), e)
            })?;
        }

        let sftp = self.sftp()?;
        let mut src = sftp
            .open(remote.to_string_lossy().into_owned())
            .await
            .map_err(|e| {
                Error::io(format!("failed to open {} on {}", remote.display(), host), e)
            })?;
        let mut dst = tokio::fs::File::create(local).await.map_err(|e| {
            Error::io(format!("failed to create local file {}", local.display()), e)
        })?;
        tokio::io::copy(&mut src, &mut dst).await.map_err(|e| {
            Error::io(
                format!("failed to fetch {} from {}", remote.display(), host),
                e,
            )
        })?;
        dst.flush().await.map_err(|e| {
            Error::io(format!("failed to flush local file {}", local.display()), e)
        })?;
        Ok(())
    }

    async fn stat(&mut self, path: &Path) -> Result<FileStat> {
        self.live_conn()?;
        self.ensure_sftp().await?;
        let host = self.cfg.host.clone();
        let sftp = self.sftp()?;

        // Lstat semantics: report the link itself, never its target.
        match sftp.symlink_metadata(path.to_string_lossy().into_owned()).await {
            Ok(attrs) => Ok(FileStat {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                size: attrs.size.unwrap_or(0),
                mode: attrs.permissions.unwrap_or(0),
                mod_time: attrs.mtime.map(|t| {
                    SystemTime::UNIX_EPOCH + Duration::from_secs(u64::from(t))
                }),
                is_dir: attrs.is_dir(),
                exists: true,
            }),
            Err(e) if Self::is_not_found(&e) => Ok(FileStat::missing(path)),
            Err(e) => Err(Error::io(
                format!("failed to stat {} on {}", path.display(), host),
                e,
            )),
        }
    }

    async fn look_path(&mut self, executable: &str) -> Result<String> {
        validate_exec_name(executable)?;
        let command = format!("command -v {}", quote(executable));
        match self.exec(&command, &ExecOptions::new()).await {
            Ok(output) => {
                let stdout = output.stdout_str();
                match stdout.split_whitespace().next() {
                    Some(path) => Ok(path.to_string()),
                    None => Err(Error::Validation(format!(
                        "executable '{}' not found in PATH",
                        executable
                    ))),
                }
            }
            Err(Error::Command(e)) if e.exit_code == 1 => Err(Error::Validation(format!(
                "executable '{}' not found in PATH",
                executable
            ))),
            Err(e) => Err(e),
        }
    }

    async fn os(&mut self) -> Result<Os> {
        if let Some(os) = &self.os {
            return Ok(os.clone());
        }
        self.live_conn()?;

        let mut os = Os::default();
        let mut probe_errors: Vec<String> = Vec::new();

        match self.exec("cat /etc/os-release", &ExecOptions::new()).await {
            Ok(output) => facts::apply_os_release(&mut os, &output.stdout_str()),
            Err(e) => probe_errors.push(format!("os-release: {}", e)),
        }

        if os.id.is_empty() {
            match self.exec("lsb_release -a", &ExecOptions::new()).await {
                Ok(output) => facts::apply_lsb_release(&mut os, &output.stdout_str()),
                Err(e) => probe_errors.push(format!("lsb_release: {}", e)),
            }
        }

        if os.id.is_empty() {
            match self.exec("uname -s", &ExecOptions::new()).await {
                Ok(output) => {
                    if let Some(id) = facts::id_from_uname(&output.stdout_str()) {
                        os.id = id.to_string();
                        if id == "darwin" {
                            if let Ok(output) =
                                self.exec("sw_vers -productName", &ExecOptions::new()).await
                            {
                                os.pretty_name = output.stdout_str().trim().to_string();
                            }
                            if let Ok(output) =
                                self.exec("sw_vers -productVersion", &ExecOptions::new()).await
                            {
                                os.version_id = output.stdout_str().trim().to_string();
                            }
                        }
                    }
                }
                Err(e) => probe_errors.push(format!("uname -s: {}", e)),
            }
        }

        match self.exec("uname -m", &ExecOptions::new()).await {
            Ok(output) => os.arch = facts::normalize_arch(&output.stdout_str()),
            Err(e) => probe_errors.push(format!("uname -m: {}", e)),
        }
        match self.exec("uname -r", &ExecOptions::new()).await {
            Ok(output) => os.kernel = output.stdout_str().trim().to_string(),
            Err(e) => probe_errors.push(format!("uname -r: {}", e)),
        }

        if os.id.is_empty() {
            if probe_errors.is_empty() {
                probe_errors.push("no probe recovered an os id".to_string());
            }
            return Err(Error::Os(probe_errors.join("; ")));
        }

        debug!(host = %self.cfg.host, id = %os.id, version = %os.version_id, arch = %os.arch, "detected remote os");
        self.os = Some(os.clone());
        Ok(os)
    }

    async fn mkdir(&mut self, path: &Path, permissions: &str) -> Result<()> {
        let mode = if permissions.is_empty() {
            None
        } else {
            Some(parse_permissions(permissions)?)
        };
        let command = format!("mkdir -p {}", quote(&path.to_string_lossy()));
        self.exec(&command, &ExecOptions::new()).await?;
        if let Some(mode) = mode {
            let chmod = format!("chmod {:o} {}", mode, quote(&path.to_string_lossy()));
            self.exec(&chmod, &ExecOptions::new()).await?;
        }
        Ok(())
    }

    async fn remove(&mut self, path: &Path, options: &RemoveOptions) -> Result<()> {
        if options.ignore_not_exist {
            let stat = self.stat(path).await?;
            if !stat.exists {
                return Ok(());
            }
        }
        let flags = if options.recursive { "-rf" } else { "-f" };
        let command = format!("rm {} {}", flags, quote(&path.to_string_lossy()));
        self.exec(&command, &ExecOptions::new().with_sudo(options.sudo))
            .await?;
        Ok(())
    }

    async fn file_checksum(&mut self, path: &Path, checksum_type: &str) -> Result<String> {
        let program = match checksum_type.to_ascii_lowercase().as_str() {
            "sha256" => "sha256sum",
            "md5" => "md5sum",
            other => {
                return Err(Error::Validation(format!(
                    "unsupported checksum type '{}': expected sha256 or md5",
                    other
                )))
            }
        };
        let command = format!("{} -b {}", program, quote(&path.to_string_lossy()));
        let output = self.exec(&command, &ExecOptions::new()).await?;
        let stdout = output.stdout_str();
        stdout
            .split_whitespace()
            .next()
            .map(|digest| digest.to_string())
            .ok_or_else(|| {
                Error::io(
                    format!("failed to checksum {} on {}", path.display(), self.cfg.host),
                    format!("{} produced no output", program),
                )
            })
    }
}
