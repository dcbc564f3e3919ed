//! End-to-end tests for the local connector: command execution with
//! retries/timeouts/streaming, file round trips, metadata, lookups, and
//! checksums, all against the real local shell and filesystem.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio::sync::Mutex;

use hostlink::config::ConnectionCfg;
use hostlink::connector::local::LocalConnector;
use hostlink::connector::Connector;
use hostlink::error::Error;
use hostlink::options::{ExecOptions, FileTransferOptions, OutputSink, RemoveOptions};

fn connector() -> LocalConnector {
    LocalConnector::new(ConnectionCfg::new("localhost", 22, "root"))
}

// ============================================================================
// Exec
// ============================================================================

#[tokio::test]
async fn exec_captures_stdout_and_stderr_separately() {
    let mut conn = connector();
    let out = conn
        .exec("echo out; echo err 1>&2", &ExecOptions::new())
        .await
        .unwrap();
    assert_eq!(out.stdout_str(), "out\n");
    assert_eq!(out.stderr_str(), "err\n");
}

#[tokio::test]
async fn exec_failure_carries_exit_code_and_output() {
    let mut conn = connector();
    let err = conn
        .exec("echo before-failure; exit 3", &ExecOptions::new())
        .await
        .unwrap_err();
    match err {
        Error::Command(cmd) => {
            assert_eq!(cmd.exit_code, 3);
            assert!(cmd.stdout.contains("before-failure"));
            assert!(cmd.to_string().contains("exit code 3"));
        }
        other => panic!("expected a command error, got {other}"),
    }
}

#[tokio::test]
async fn exec_pipes_stdin_to_the_command() {
    let mut conn = connector();
    let opts = ExecOptions::new().with_stdin(b"line one\nline two\n".to_vec());
    let out = conn.exec("cat", &opts).await.unwrap();
    assert_eq!(out.stdout_str(), "line one\nline two\n");
}

#[tokio::test]
async fn exec_streams_output_to_the_sink_as_well() {
    let mut conn = connector();
    let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let sink: OutputSink = buffer.clone();
    let opts = ExecOptions::new().with_stream(sink);

    let out = conn.exec("echo streamed", &opts).await.unwrap();
    assert_eq!(out.stdout_str(), "streamed\n");
    assert_eq!(&*buffer.lock().await, b"streamed\n");
}

#[tokio::test]
async fn exec_applies_caller_environment_on_top_of_inherited() {
    let mut conn = connector();
    let opts = ExecOptions::new().with_env("HOSTLINK_IT_MARKER", "present");
    let out = conn
        .exec("echo ${HOSTLINK_IT_MARKER}:${HOME}", &opts)
        .await
        .unwrap();
    let stdout = out.stdout_str();
    assert!(stdout.starts_with("present:"));
    // HOME came from the inherited environment.
    assert!(stdout.trim().len() > "present:".len());
}

#[tokio::test]
async fn exec_timeout_with_retries_stays_bounded() {
    let mut conn = connector();
    let opts = ExecOptions::new()
        .with_timeout(Duration::from_millis(50))
        .with_retries(1, Duration::from_millis(10));

    let started = Instant::now();
    let err = conn.exec("sleep 0.2", &opts).await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        Error::Command(cmd) => {
            assert_eq!(cmd.exit_code, -1);
            assert!(cmd.source.is_some(), "timeout must be carried as the cause");
        }
        other => panic!("expected a command error, got {other}"),
    }
    // Two attempts of 50ms plus one 10ms delay, with generous slack.
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}

#[tokio::test]
async fn exec_retries_until_attempts_are_spent() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("attempts");
    // Each attempt appends a line; the command always fails, so with two
    // retries exactly three attempts land.
    let cmd = format!("echo x >> {} ; exit 1", marker.display());
    let opts = ExecOptions::new().with_retries(2, Duration::from_millis(5));

    let err = conn.exec(&cmd, &opts).await.unwrap_err();
    assert_eq!(err.exit_code(), Some(1));

    let attempts = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(attempts.lines().count(), 3);
}

#[tokio::test]
async fn exec_succeeds_at_most_once_despite_retry_budget() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("attempts");
    let cmd = format!("echo x >> {}", marker.display());
    let opts = ExecOptions::new().with_retries(5, Duration::from_millis(5));

    conn.exec(&cmd, &opts).await.unwrap();

    let attempts = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(attempts.lines().count(), 1);
}

// ============================================================================
// File transfer
// ============================================================================

#[tokio::test]
async fn write_then_read_round_trips() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let dst = dir.path().join("nested/dir/artifact.conf");
    let content = b"listen-address = 0.0.0.0\n";

    conn.write_file(content, &dst, "0644", false).await.unwrap();
    let read_back = conn.read_file(&dst).await.unwrap();
    assert_eq!(read_back, content);
}

#[tokio::test]
async fn write_file_applies_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let dst = dir.path().join("secret.key");

    conn.write_file(b"key material", &dst, "0600", false).await.unwrap();
    let mode = std::fs::metadata(&dst).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn write_file_rejects_bad_permission_text() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let dst = dir.path().join("file");
    let err = conn
        .write_file(b"x", &dst, "not-octal", false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid permissions"));
}

#[tokio::test]
async fn copy_content_defaults_to_plain_write() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let dst = dir.path().join("rendered.yaml");

    conn.copy_content(b"kind: Config\n", &dst, &FileTransferOptions::new())
        .await
        .unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), b"kind: Config\n");
}

#[tokio::test]
async fn copy_transfers_and_creates_parents() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("source.bin");
    let dst = dir.path().join("deep/tree/copy.bin");
    std::fs::write(&src, b"payload bytes").unwrap();

    conn.copy(&src, &dst, &FileTransferOptions::new().with_permissions("0640"))
        .await
        .unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), b"payload bytes");
}

#[tokio::test]
async fn fetch_downloads_to_a_fresh_directory() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let remote = dir.path().join("kubelet.conf");
    let local = dir.path().join("collected/node-1/kubelet.conf");
    std::fs::write(&remote, b"cluster: test\n").unwrap();

    conn.fetch(&remote, &local).await.unwrap();
    assert_eq!(std::fs::read(&local).unwrap(), b"cluster: test\n");
}

// ============================================================================
// Metadata and directory operations
// ============================================================================

#[tokio::test]
async fn stat_missing_path_is_not_an_error() {
    let mut conn = connector();
    let stat = conn
        .stat(Path::new("/definitely/not/here/anywhere"))
        .await
        .unwrap();
    assert!(!stat.exists);
    assert_eq!(stat.name, "anywhere");
}

#[tokio::test]
async fn stat_reports_size_and_kind() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("twelve.bytes");
    std::fs::write(&file, b"exactly 12 b").unwrap();

    let stat = conn.stat(&file).await.unwrap();
    assert!(stat.exists);
    assert!(!stat.is_dir);
    assert_eq!(stat.size, 12);
    assert!(stat.mod_time.is_some());

    let dir_stat = conn.stat(dir.path()).await.unwrap();
    assert!(dir_stat.exists);
    assert!(dir_stat.is_dir);
}

#[tokio::test]
async fn stat_does_not_follow_symlinks() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("target");
    let link = dir.path().join("link");
    std::fs::write(&target, b"content").unwrap();
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let stat = conn.stat(&link).await.unwrap();
    assert!(stat.exists);
    // Lstat semantics: the link itself, not the 7-byte target.
    assert_ne!(stat.size, 0);
    assert!(!stat.is_dir);
}

#[tokio::test]
async fn mkdir_is_idempotent() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a/b/c");

    conn.mkdir(&path, "0755").await.unwrap();
    conn.mkdir(&path, "0755").await.unwrap();
    assert!(path.is_dir());
}

#[tokio::test]
async fn mkdir_applies_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("restricted");

    conn.mkdir(&path, "0700").await.unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o700);
}

#[tokio::test]
async fn remove_missing_path_with_ignore_flag_is_ok() {
    let mut conn = connector();
    let opts = RemoveOptions::new().with_ignore_not_exist(true);
    conn.remove(Path::new("/no/such/path/at/all"), &opts)
        .await
        .unwrap();
}

#[tokio::test]
async fn remove_missing_path_without_ignore_flag_matches_rm_f() {
    let mut conn = connector();
    // rm -f tolerates an absent path; the default options must too.
    conn.remove(Path::new("/no/such/path/at/all"), &RemoveOptions::new())
        .await
        .unwrap();
    conn.remove(
        Path::new("/no/such/tree/either"),
        &RemoveOptions::new().with_recursive(true),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn remove_file_and_recursive_directory() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("doomed.txt");
    let tree = dir.path().join("tree");
    std::fs::write(&file, b"x").unwrap();
    std::fs::create_dir_all(tree.join("nested")).unwrap();
    std::fs::write(tree.join("nested/file"), b"y").unwrap();

    conn.remove(&file, &RemoveOptions::new()).await.unwrap();
    assert!(!file.exists());

    conn.remove(&tree, &RemoveOptions::new().with_recursive(true))
        .await
        .unwrap();
    assert!(!tree.exists());
}

// ============================================================================
// LookPath
// ============================================================================

#[tokio::test]
async fn look_path_finds_a_real_binary() {
    let mut conn = connector();
    let path = conn.look_path("sh").await.unwrap();
    assert!(path.starts_with('/'), "expected absolute path, got {path}");
}

#[tokio::test]
async fn look_path_rejects_injection_and_leaves_no_droppings() {
    let mut conn = connector();
    let cwd = std::env::current_dir().unwrap();

    let err = conn.look_path("sh;id").await.unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("invalid characters") || message.contains("not found"),
        "unexpected error: {message}"
    );
    // The payload after the separator never ran.
    assert!(!cwd.join("id").exists());
}

#[tokio::test]
async fn look_path_misses_are_reported_as_not_found() {
    let mut conn = connector();
    let err = conn
        .look_path("hostlink-no-such-binary-0f2a")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}

// ============================================================================
// Checksums
// ============================================================================

#[tokio::test]
async fn sha256_checksum_matches_known_digest() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("fixture");
    // 16 bytes, no trailing newline.
    std::fs::write(&file, b"checksum content").unwrap();

    let digest = conn.file_checksum(&file, "sha256").await.unwrap();
    assert_eq!(
        digest,
        "9efff2fbcd7ffa03ea04175167372d970629a2ea7fc00efb08819df557f92d97"
    );
    // Case-insensitive dispatch.
    let digest_upper = conn.file_checksum(&file, "SHA256").await.unwrap();
    assert_eq!(digest, digest_upper);
}

#[tokio::test]
async fn md5_checksum_matches_known_digest() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("fixture");
    std::fs::write(&file, b"checksum content").unwrap();

    let digest = conn.file_checksum(&file, "md5").await.unwrap();
    assert_eq!(digest, "4a432d04c510ea67cafef4a5bcf11e57");
}

#[tokio::test]
async fn unsupported_checksum_type_is_rejected() {
    let mut conn = connector();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("fixture");
    std::fs::write(&file, b"x").unwrap();

    let err = conn.file_checksum(&file, "crc32").await.unwrap_err();
    assert!(err.to_string().contains("unsupported checksum type"));
}

// ============================================================================
// OS facts
// ============================================================================

#[tokio::test]
async fn os_facts_have_id_arch_and_kernel() {
    let mut conn = connector();
    let os = conn.os().await.unwrap();
    assert!(!os.id.is_empty());
    assert!(!os.arch.is_empty());
    assert_ne!(os.arch, "x86_64", "arch must be normalized");
    assert_ne!(os.arch, "aarch64", "arch must be normalized");
}
