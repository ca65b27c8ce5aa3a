//! Child process execution with a timeout and bounded output capture.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long reader threads may keep draining after the child is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Output of a finished (or killed) child process.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    /// `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Bytes dropped from stdout + stderr beyond the capture limit.
    pub truncated_bytes: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CapturedOutput {
    /// Exit code 0 and not timed out.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stderr followed by a truncation notice, if any bytes were dropped.
    pub fn stderr_with_notice(&self) -> String {
        if self.truncated_bytes == 0 {
            return self.stderr.clone();
        }
        format!(
            "{}\n[output truncated {} bytes]\n",
            self.stderr, self.truncated_bytes
        )
    }
}

/// Spawn `cmd`, optionally feed `stdin`, and wait at most `timeout`.
///
/// Stdout and stderr are drained on reader threads while the child runs so a
/// chatty child cannot block on a full pipe. At most `output_limit_bytes` of
/// each stream is kept. On Unix the child leads its own process group, and a
/// timed-out child is killed together with its descendants and reported with
/// `timed_out = true`. Output still held open by an escaped descendant is
/// abandoned after a short grace period. Only spawn/wait/kill failures are
/// returned as errors.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CapturedOutput> {
    let started = Instant::now();
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading stdin closes the pipe early; that
        // is reported through its exit status, not as a write failure.
        if let Err(err) = pipe.write_all(input) {
            warn!(err = %err, "child closed stdin early");
        }
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || drain_limited(stdout, output_limit_bytes));
    let stderr_reader = thread::spawn(move || drain_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_ms = timeout.as_millis() as u64, "command timed out, killing");
            timed_out = true;
            kill_tree(&mut child)?;
            child.wait().context("wait for killed command")?
        }
    };

    let deadline = Instant::now() + READER_GRACE;
    let stdout = join_reader(stdout_reader, deadline).context("join stdout")?;
    let stderr = join_reader(stderr_reader, deadline).context("join stderr")?;
    let abandoned = stdout.is_none() || stderr.is_none();
    let (stdout, stdout_dropped) = stdout.unwrap_or_default();
    let (mut stderr, stderr_dropped) = stderr.unwrap_or_default();
    if abandoned {
        warn!("a descendant process kept the output pipes open; capture abandoned");
        stderr.extend_from_slice(b"\n[output capture abandoned: pipe held open by a descendant]\n");
    }
    let truncated_bytes = stdout_dropped + stderr_dropped;
    if truncated_bytes > 0 {
        warn!(truncated_bytes, "child output truncated");
    }

    let exit_code = if timed_out { None } else { status.code() };
    debug!(?exit_code, timed_out, "command finished");
    Ok(CapturedOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        truncated_bytes,
        timed_out,
        elapsed: started.elapsed(),
    })
}

/// Kill the child's whole process group, falling back to the child alone.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let group = Pid::from_raw(child.id() as i32);
    if let Err(err) = killpg(group, Signal::SIGKILL) {
        warn!(err = %err, "killpg failed, killing child only");
        child.kill().context("kill command")?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

/// Join a reader thread, giving up once `deadline` passes. `None` means the
/// pipe was still open and the thread was left detached.
fn join_reader(
    handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>,
    deadline: Instant,
) -> Result<Option<(Vec<u8>, usize)>> {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(10));
    }
    match handle.join() {
        Ok(result) => result.map(Some),
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        let keep = n.min(room);
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
    Ok((kept, dropped))
}
