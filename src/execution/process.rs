//! Thumbnailer process execution and output collection

use crate::errors::{Result, ThumbnailError};
use log::{debug, warn};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::ffi::OsStr;
use std::fs;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Interval between exit checks while a timeout is armed
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Wait for the stderr reader after the process group was killed
const STDERR_GRACE: Duration = Duration::from_millis(500);

/// Result of one process run
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit status
    pub status: ExitStatus,
    /// Captured standard error, lossily decoded
    pub stderr: String,
    /// Wall-clock run time
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// Exited with status zero
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// `exit status N` or `signal N`
    pub fn describe_status(&self) -> String {
        describe_status(&self.status)
    }
}

/// Render an exit status for diagnostics
pub fn describe_status(status: &ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit status {}", code),
        (None, Some(signal)) => format!("signal {}", signal),
        (None, None) => "unknown status".to_string(),
    }
}

/// Synchronous process executor
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    name: String,
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    /// Executor for the thumbnailer `name`, used in errors
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
        }
    }

    /// Kill the process after `timeout`
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Spawn `argv` (searching `PATH`) and block until it exits.
    ///
    /// Every descriptor in `inherit` stays open across exec. stdin and stdout
    /// are `/dev/null`; stderr is captured. With a timeout, the deadline also
    /// bounds draining stderr: descendants still holding the pipe when it
    /// passes are killed with the rest of the process group.
    pub fn run<S: AsRef<OsStr>>(&self, argv: &[S], inherit: &[OwnedFd]) -> Result<ProcessOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ThumbnailError::TemplateSyntax("empty command".to_string()))?;
        let program = program.as_ref();

        let fds: Vec<RawFd> = inherit.iter().map(|fd| fd.as_raw_fd()).collect();

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0);

        unsafe {
            command.pre_exec(move || {
                for fd in &fds {
                    clear_cloexec(*fd)?;
                }
                Ok(())
            });
        }

        debug!("Running {:?}", command);
        let start = Instant::now();
        let deadline = self.timeout.map(|limit| start + limit);
        let mut child = command.spawn().map_err(|source| ThumbnailError::Spawn {
            program: program.to_string_lossy().into_owned(),
            source,
        })?;
        let pgid = Pid::from_raw(child.id() as i32);

        let stderr = child.stderr.take().map(|mut pipe| {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                let _ = tx.send(buf);
            });
            rx
        });

        let status = match self.timeout {
            None => child.wait()?,
            Some(limit) => match wait_with_deadline(&mut child, start + limit)? {
                Some(status) => status,
                None => {
                    kill_group(&mut child);
                    // Descendants may still hold stderr; leave the reader behind
                    drop(stderr);
                    warn!("Thumbnailer {} timed out after {:?}", self.name, limit);
                    return Err(ThumbnailError::Timeout {
                        name: self.name.clone(),
                        after: limit,
                    });
                }
            },
        };

        let stderr = self.drain_stderr(stderr, deadline, pgid);
        Ok(ProcessOutput {
            status,
            stderr,
            elapsed: start.elapsed(),
        })
    }

    /// Collect stderr once the child has exited
    fn drain_stderr(
        &self,
        reader: Option<Receiver<Vec<u8>>>,
        deadline: Option<Instant>,
        pgid: Pid,
    ) -> String {
        let Some(reader) = reader else {
            return String::new();
        };

        let buf = match deadline {
            None => reader.recv().ok(),
            Some(deadline) => {
                match reader.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(buf) => Some(buf),
                    Err(RecvTimeoutError::Timeout) => {
                        warn!(
                            "Thumbnailer {} left processes holding stderr past the deadline, killing them",
                            self.name
                        );
                        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                            debug!("killpg({}) failed: {}", pgid, e);
                        }
                        reader.recv_timeout(STDERR_GRACE).ok()
                    }
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            }
        };

        buf.map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }

    /// Turn a failed run into [`ThumbnailError::ThumbnailerFailed`]
    pub fn check(&self, output: ProcessOutput) -> Result<ProcessOutput> {
        if output.success() {
            if !output.stderr.trim().is_empty() {
                debug!("{} stderr: {}", self.name, output.stderr.trim_end());
            }
            return Ok(output);
        }

        Err(ThumbnailError::ThumbnailerFailed {
            name: self.name.clone(),
            status: output.describe_status(),
            stderr: output.stderr.trim_end().to_string(),
        })
    }
}

fn clear_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Poll for exit until `deadline`; `None` when it passed first
fn wait_with_deadline(child: &mut Child, deadline: Instant) -> Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// SIGKILL the child's process group and reap the child
fn kill_group(child: &mut Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        debug!("killpg({}) failed: {}, killing child only", pgid, e);
        let _ = child.kill();
    }
    let _ = child.wait();
}



/// Reads the thumbnailer's output file
pub struct ResultCollector;

impl ResultCollector {
    /// Read the whole output file. Missing or empty output is an error.
    pub fn read(path: &Path) -> Result<Vec<u8>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ThumbnailError::EmptyOutput(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        if bytes.is_empty() {
            return Err(ThumbnailError::EmptyOutput(path.to_path_buf()));
        }
        Ok(bytes)
    }
}
