//! Helpers for running child processes with timeouts and bounded output.
//!
//! On unix the child leads its own process group. Timeouts and cancellation
//! kill the whole group, so tools the agent started cannot keep the session
//! alive by holding its output pipes open.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// How long to keep draining output after the child has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// A pipe was still held open by a leftover process after the child
    /// exited; reading stopped after a grace period.
    pub pipes_abandoned: bool,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }
}

/// Configure `cmd` for [`collect_with_timeout`] and spawn it.
///
/// The child is killed if the returned handle is dropped, which is what
/// happens when the caller's future is cancelled.
pub fn spawn_piped(cmd: &mut Command, with_stdin: bool) -> std::io::Result<Child> {
    if with_stdin {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    debug!("spawning child process");
    cmd.spawn()
}

/// Kills the child's process group when dropped while still armed.
struct GroupKiller {
    pgid: Option<u32>,
}

impl GroupKiller {
    fn new(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for GroupKiller {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        warn!(pgid, "process group id out of range");
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pgid, "killed process group"),
        Err(err) => debug!(pgid, err = %err, "process group already gone"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Output collected by a reader task. Shared so a reader that never sees EOF
/// can be aborted without losing what it already read.
#[derive(Debug, Default)]
struct Capture {
    buf: Vec<u8>,
    truncated: usize,
}

type SharedCapture = Arc<Mutex<Capture>>;

/// Feed `stdin` to a spawned child, wait with a timeout and capture stdout/stderr.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub async fn collect_with_timeout(
    mut child: Child,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    let mut group = GroupKiller::new(&child);

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            // Closing stdin (dropping it at the end of the task) signals EOF to the child.
            Some(tokio::spawn(async move {
                child_stdin.write_all(&input).await?;
                child_stdin.shutdown().await
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_capture = SharedCapture::default();
    let stderr_capture = SharedCapture::default();
    let stdout_handle = tokio::spawn(read_stream_limited(
        stdout,
        output_limit_bytes,
        Arc::clone(&stdout_capture),
    ));
    let stderr_handle = tokio::spawn(read_stream_limited(
        stderr,
        output_limit_bytes,
        Arc::clone(&stderr_capture),
    ));

    let mut timed_out = false;
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            group.disarm();
            status.context("wait for command")?
        }
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            timed_out = true;
            group.kill();
            if let Err(err) = child.start_kill() {
                debug!(err = %err, "child already exited");
            }
            child.wait().await.context("wait command after kill")?
        }
    };

    if let Some(handle) = stdin_handle {
        match handle.await {
            Ok(Ok(())) => {}
            // The child may exit without draining its input.
            Ok(Err(err)) => debug!(err = %err, "stdin write did not complete"),
            Err(err) => return Err(anyhow!("stdin writer task failed: {err}")),
        }
    }

    let deadline = Instant::now() + DRAIN_GRACE;
    let stdout_abandoned = join_reader(stdout_handle, deadline).await.context("join stdout")?;
    let stderr_abandoned = join_reader(stderr_handle, deadline).await.context("join stderr")?;
    let pipes_abandoned = stdout_abandoned || stderr_abandoned;
    if pipes_abandoned {
        warn!(
            grace_secs = DRAIN_GRACE.as_secs(),
            "output pipe still held open after exit, stopped reading"
        );
    }

    let (stdout, stdout_truncated) = take_capture(&stdout_capture)?;
    let (stderr, stderr_truncated) = take_capture(&stderr_capture)?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, pipes_abandoned, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        pipes_abandoned,
    })
}

/// Wait for a reader until `deadline`. Returns true if it had to be aborted.
async fn join_reader(
    mut handle: JoinHandle<std::io::Result<()>>,
    deadline: Instant,
) -> Result<bool> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(result)) => result.context("read output").map(|()| false),
        Ok(Err(_)) => Err(anyhow!("output reader task panicked")),
        Err(_) => {
            handle.abort();
            Ok(true)
        }
    }
}

fn take_capture(capture: &SharedCapture) -> Result<(Vec<u8>, usize)> {
    let mut capture = capture
        .lock()
        .map_err(|_| anyhow!("output buffer poisoned"))?;
    Ok((std::mem::take(&mut capture.buf), capture.truncated))
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
    capture: SharedCapture,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let mut capture = capture
            .lock()
            .map_err(|_| std::io::Error::other("output buffer poisoned"))?;
        let remaining = limit.saturating_sub(capture.buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            capture.buf.extend_from_slice(&chunk[..keep]);
            capture.truncated += n.saturating_sub(keep);
        } else {
            capture.truncated += n;
        }
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    /// Zombies count as dead: nothing may reap them inside a container.
    fn is_alive(pid: i32) -> bool {
        if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err() {
            return false;
        }
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_feeds_stdin() {
        let mut cmd = sh("cat; echo done >&2");
        let child = spawn_piped(&mut cmd, true).expect("spawn");

        let output = collect_with_timeout(
            child,
            Some(b"hello agent".to_vec()),
            Duration::from_secs(10),
            1024,
        )
        .await
        .expect("run");

        assert!(output.status.success());
        assert!(!output.timed_out);
        assert!(!output.pipes_abandoned);
        assert_eq!(output.stdout, b"hello agent");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "done");
    }

    #[tokio::test]
    async fn truncates_output_beyond_limit() {
        let mut cmd = sh("printf 'abcdefghij'");
        let child = spawn_piped(&mut cmd, false).expect("spawn");

        let output = collect_with_timeout(child, None, Duration::from_secs(10), 4)
            .await
            .expect("run");

        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.stdout_truncated_notice("agent").contains("truncated 6 bytes"));
        assert!(output.stderr_truncated_notice("agent").is_empty());
    }

    #[tokio::test]
    async fn kills_child_after_timeout() {
        let mut cmd = sh("exec sleep 30");
        let child = spawn_piped(&mut cmd, false).expect("spawn");

        let output = collect_with_timeout(child, None, Duration::from_millis(100), 1024)
            .await
            .expect("run");

        assert!(output.timed_out);
        assert!(!output.status.success());
    }

    #[tokio::test]
    async fn timeout_kills_grandchildren_holding_pipes() {
        // `sh` forks `sleep`, which inherits stdout/stderr.
        let mut cmd = sh("sleep 30; true");
        let child = spawn_piped(&mut cmd, false).expect("spawn");

        let started = std::time::Instant::now();
        let output = collect_with_timeout(child, None, Duration::from_secs(1), 1024)
            .await
            .expect("run");

        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn background_process_does_not_block_after_exit() {
        let mut cmd = sh("echo done; sleep 5 &");
        let child = spawn_piped(&mut cmd, false).expect("spawn");

        let started = std::time::Instant::now();
        let output = collect_with_timeout(child, None, Duration::from_secs(30), 1024)
            .await
            .expect("run");

        assert!(output.status.success());
        assert!(output.pipes_abandoned);
        assert_eq!(output.stdout, b"done\n");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn cancellation_kills_process_group() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pid_file = temp.path().join("grandchild.pid");
        let mut cmd = sh(&format!(
            "sleep 30 & echo $! > '{}'; wait",
            pid_file.display()
        ));
        let child = spawn_piped(&mut cmd, false).expect("spawn");

        let collect = collect_with_timeout(child, None, Duration::from_secs(30), 1024);
        let cancelled = tokio::time::timeout(Duration::from_millis(500), collect).await;
        assert!(cancelled.is_err(), "collect should still be running");

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .expect("pid file")
            .trim()
            .parse()
            .expect("pid");
        let mut alive = is_alive(pid);
        for _ in 0..40 {
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            alive = is_alive(pid);
        }
        assert!(!alive, "grandchild {pid} survived cancellation");
    }
}
