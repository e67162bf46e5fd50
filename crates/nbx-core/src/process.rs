use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::RuntimeError;

const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READER_GRACE: Duration = Duration::from_millis(100);

fn max_capture_bytes() -> usize {
    std::env::var("NBX_MAX_CAPTURE_BYTES")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_CAPTURE_BYTES)
}

/// How long a synchronous invocation may block the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    Unbounded,
    Millis(u64),
}

impl Timeout {
    /// Negative values mean "wait until the child exits".
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        u64::try_from(millis).map_or(Timeout::Unbounded, Timeout::Millis)
    }

    #[must_use]
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Timeout::Unbounded => None,
            Timeout::Millis(millis) => Some(Duration::from_millis(millis)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub stdout: String,
    /// `None` when the child was still running at the deadline.
    pub status: Option<ExitStatus>,
    pub truncated: bool,
}

impl CapturedOutput {
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }
}

#[derive(Default)]
struct CaptureBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Spawn `program`, wait according to `timeout` and return whatever stdout
/// was captured by then.
///
/// Stdin is closed and stderr is discarded. A child that outlives its
/// deadline is left running; a detached thread reaps it once it exits.
pub(crate) fn run_captured(
    program: &Path,
    args: &[String],
    timeout: Timeout,
) -> Result<CapturedOutput, RuntimeError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    debug!(program = %program.display(), ?args, ?timeout, "spawning");
    let mut child = command.spawn().map_err(|source| RuntimeError::Spawn {
        program: program.to_path_buf(),
        source,
    })?;

    let buffer = Arc::new(Mutex::new(CaptureBuffer::default()));
    let (done_tx, done_rx) = mpsc::channel::<()>();
    if let Some(stdout) = child.stdout.take() {
        let sink = Arc::clone(&buffer);
        let limit = max_capture_bytes();
        thread::spawn(move || {
            pump_limited(stdout, &sink, limit);
            let _ = done_tx.send(());
        });
    }

    let status = match timeout.as_duration() {
        None => {
            let status = wait_blocking(&mut child, program)?;
            let _ = done_rx.recv();
            Some(status)
        }
        Some(limit) => {
            let deadline = Instant::now() + limit;
            if let Some(status) = wait_until(&mut child, deadline, program)? {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let _ = done_rx.recv_timeout(remaining.max(READER_GRACE));
                Some(status)
            } else {
                warn!(
                    program = %program.display(),
                    pid = child.id(),
                    timeout_ms = limit.as_millis(),
                    "child still running at deadline; leaving it detached"
                );
                detach(child);
                None
            }
        }
    };

    let guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(CapturedOutput {
        stdout: String::from_utf8_lossy(&guard.bytes).into_owned(),
        status,
        truncated: guard.truncated,
    })
}

fn wait_blocking(child: &mut Child, program: &Path) -> Result<ExitStatus, RuntimeError> {
    child.wait().map_err(|source| wait_error(program, source))
}

fn wait_until(
    child: &mut Child,
    deadline: Instant,
    program: &Path,
) -> Result<Option<ExitStatus>, RuntimeError> {
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|source| wait_error(program, source))?
        {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn wait_error(program: &Path, source: io::Error) -> RuntimeError {
    let program = program.to_path_buf();
    if source.kind() == io::ErrorKind::Interrupted {
        RuntimeError::Interrupted { program, source }
    } else {
        RuntimeError::Wait { program, source }
    }
}

fn detach(mut child: Child) {
    let spawned = thread::Builder::new()
        .name("nbx-reaper".into())
        .spawn(move || {
            let _ = child.wait();
        });
    if let Err(err) = spawned {
        debug!(%err, "failed to start reaper thread");
    }
}

fn pump_limited(mut reader: impl Read, sink: &Mutex<CaptureBuffer>, limit: usize) {
    let mut chunk = [0u8; 8192];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(%err, "stopped reading child stdout");
                break;
            }
        };
        let mut guard = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let CaptureBuffer { bytes, truncated } = &mut *guard;
        append_limited(bytes, &chunk[..read], limit, truncated);
    }
}

fn append_limited(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize, truncated: &mut bool) {
    if limit == 0 {
        return;
    }
    if buffer.len().saturating_add(chunk.len()) <= limit {
        buffer.extend_from_slice(chunk);
        return;
    }
    *truncated = true;
    let old_len = buffer.len();
    let excess = old_len.saturating_add(chunk.len()).saturating_sub(limit);
    if excess >= old_len {
        buffer.clear();
        let drop_from_chunk = excess.saturating_sub(old_len).min(chunk.len());
        buffer.extend_from_slice(&chunk[drop_from_chunk..]);
    } else {
        buffer.drain(0..excess);
        buffer.extend_from_slice(chunk);
    }
}
