//! The monitored subprocess supervisor.
//!
//! One [`Supervisor::run`] call owns one child from spawn to exit:
//!
//! ```text
//!   stdin ──(thread)──► child ──one pipe (stdout+stderr)──► tee ──► our stdout
//!                         ▲                        └──► OutputStore
//!   SIGINT/TERM/HUP ──────┘ (process group, until wait completes)
//!
//!   reports: run ─► complete|fail (tail + length) ─► log upload
//! ```
//!
//! Every report is tracked in a `JoinSet` and awaited before `run` returns.

use std::io::{ErrorKind, PipeReader, Read};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cronsentry_core::config::{LOG_UPLOAD_BYTES, PING_TAIL_BYTES};
use cronsentry_ping::types::new_series;
use cronsentry_ping::{Ping, PingState, Pinger};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SupervisorError};
use crate::output::OutputStore;
use crate::platform::{self, ProcessControl, SignalSource};
use crate::shell::Shell;
use crate::types::RunOptions;

/// Delay between subscribing to signals and spawning the child.
pub const RELAY_SETTLE: Duration = Duration::from_millis(100);

const CHUNK: usize = 8192;

pub struct Supervisor {
    pinger: Option<Arc<dyn Pinger>>,
    control: Arc<dyn ProcessControl>,
    output_dir: PathBuf,
    shell: Option<Shell>,
}

impl Supervisor {
    /// A supervisor that reports through `pinger`, if one is configured.
    pub fn new(pinger: Option<Arc<dyn Pinger>>) -> Self {
        Self {
            pinger,
            control: platform::native(),
            output_dir: OutputStore::default_dir(),
            shell: None,
        }
    }

    /// Buffer output under `dir` instead of the system temp directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Use `shell` instead of searching `PATH`.
    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn with_process_control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.control = control;
        self
    }

    /// Run `command` to completion and return its normalized exit code.
    ///
    /// Only failing to find a shell is an error. Every other failure is
    /// logged and either degrades the run or becomes a non-zero exit code.
    pub async fn run(&self, command: &str, options: &RunOptions) -> Result<i32> {
        let shell = match &self.shell {
            Some(shell) => shell.clone(),
            None => Shell::resolve()?,
        };
        let pinger = if options.monitor {
            self.pinger.clone()
        } else {
            None
        };
        let series = new_series();
        let mut reports = JoinSet::new();

        let store = match OutputStore::create(&self.output_dir, &options.monitor_key) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(
                    error = %SupervisorError::OutputStore(e),
                    "output buffer unavailable; child output goes straight to the terminal"
                );
                None
            }
        };

        let mut signals = match self.control.subscribe() {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(error = %e, "cannot subscribe to signals; they will not be relayed");
                None
            }
        };
        tokio::time::sleep(RELAY_SETTLE).await;

        let mut cmd = shell.command(command, options.inherit_env);
        self.control.isolate(&mut cmd);
        cmd.stdin(Stdio::piped());
        let merged = match &store {
            Some(_) => match merged_output() {
                Ok((reader, stdout, stderr)) => {
                    cmd.stdout(stdout).stderr(stderr);
                    Some(reader)
                }
                Err(e) => {
                    warn!(error = %e, "cannot create output pipe; child output goes straight to the terminal");
                    None
                }
            },
            None => None,
        };
        if merged.is_none() {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let started = Instant::now();
        let spawned = cmd.spawn();
        // The command still holds our copies of the pipe's write end; the
        // reader only sees EOF once they are closed.
        drop(cmd);
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let code = spawn_failure_code(&e);
                error!(
                    key = %options.monitor_key,
                    shell = %shell.program.display(),
                    error = %SupervisorError::Spawn(e),
                    "child failed to start"
                );
                if let Some(pinger) = &pinger {
                    let ping = Ping::new(PingState::Fail, &options.monitor_key, &series)
                        .with_message(format!("failed to start: {command}"))
                        .with_exit_code(code)
                        .with_host(options.host.clone());
                    dispatch(&mut reports, pinger.clone(), ping);
                }
                drain(reports).await;
                return Ok(code);
            }
        };

        let pid = child.id();
        info!(key = %options.monitor_key, pid, "child started");
        if let Some(pinger) = &pinger {
            let ping = Ping::new(PingState::Run, &options.monitor_key, &series)
                .with_host(options.host.clone());
            dispatch(&mut reports, pinger.clone(), ping);
        }

        if let Some(stdin) = child.stdin.take() {
            relay_stdin(stdin);
        }

        let tee = merged.map(|reader| {
            let file = store.as_ref().and_then(|s| match s.writer() {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(error = %e, "cannot write output buffer; relaying only");
                    None
                }
            });
            spawn_tee(reader, file, !options.no_stdout)
        });

        let mut wait = tokio::spawn(async move { child.wait().await });
        let status = loop {
            tokio::select! {
                joined = &mut wait => break joined,
                Some(signal) = next_signal(&mut signals) => {
                    if let Some(pid) = pid {
                        info!(pid, %signal, "relaying signal to child");
                        if let Err(e) = self.control.forward(pid, signal) {
                            warn!(pid, %signal, error = %e, "signal relay failed");
                        }
                    }
                }
            }
        };
        drop(signals);

        if let Some(tee) = tee {
            if let Err(e) = tee.await {
                warn!(error = %e, "output relay task failed");
            }
        }
        let elapsed = started.elapsed();

        let code = match status {
            Ok(Ok(status)) => exit_code(status),
            Ok(Err(e)) => {
                warn!(error = %e, "waiting on child failed");
                1
            }
            Err(e) => {
                warn!(error = %e, "wait task failed");
                1
            }
        };
        info!(
            key = %options.monitor_key,
            code,
            duration_ms = elapsed.as_millis() as u64,
            "child exited"
        );

        if let Some(pinger) = &pinger {
            let state = if code == 0 {
                PingState::Complete
            } else {
                PingState::Fail
            };
            let mut ping = Ping::new(state, &options.monitor_key, &series)
                .with_duration(elapsed.as_secs_f64())
                .with_exit_code(code)
                .with_host(options.host.clone());

            if let Some(store) = &store {
                match (store.gather_text(PING_TAIL_BYTES), store.len()) {
                    (Ok(tail), Ok(len)) => {
                        ping = ping.with_message(tail).with_metric("length", len);
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(error = %e, "cannot read output tail");
                    }
                }
            }
            dispatch(&mut reports, pinger.clone(), ping);

            if let Some(store) = &store {
                match store.gather_text(LOG_UPLOAD_BYTES) {
                    Ok(log) => {
                        let pinger = pinger.clone();
                        let key = options.monitor_key.clone();
                        let series = series.clone();
                        reports.spawn(async move {
                            pinger
                                .upload_log(&key, &series, log)
                                .await
                                .map_err(|e| format!("log upload: {e}"))
                        });
                    }
                    Err(e) => warn!(error = %e, "cannot read output for log upload"),
                }
            }
        }

        drain(reports).await;

        if let Some(store) = store {
            let path = store.path().to_path_buf();
            if let Err(e) = store.close() {
                warn!(path = %path.display(), error = %e, "cannot remove output buffer");
            }
        }

        Ok(code)
    }
}

fn dispatch(
    reports: &mut JoinSet<std::result::Result<(), String>>,
    pinger: Arc<dyn Pinger>,
    ping: Ping,
) {
    reports.spawn(async move {
        pinger
            .send(&ping)
            .await
            .map_err(|e| format!("{} ping: {e}", ping.state))
    });
}

/// Await every outstanding report, logging failures.
async fn drain(mut reports: JoinSet<std::result::Result<(), String>>) {
    while let Some(joined) = reports.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "report not delivered"),
            Err(e) => warn!(error = %e, "report task failed"),
        }
    }
}

async fn next_signal(
    signals: &mut Option<Box<dyn SignalSource>>,
) -> Option<platform::ProcessSignal> {
    match signals {
        Some(source) => source.next().await,
        None => std::future::pending().await,
    }
}

/// Exit code as a shell would report it.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

fn spawn_failure_code(e: &std::io::Error) -> i32 {
    match e.kind() {
        ErrorKind::NotFound => 127,
        ErrorKind::PermissionDenied => 126,
        _ => 1,
    }
}

/// Copy our stdin into the child on a dedicated thread; a blocking
/// terminal read must not hold up the runtime.
fn relay_stdin(mut child_stdin: ChildStdin) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(16);

    let spawned = std::thread::Builder::new()
        .name("cronsentry-stdin".into())
        .spawn(move || {
            let mut stdin = std::io::stdin();
            let mut buf = [0u8; CHUNK];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "cannot start stdin relay; child stdin is closed");
        return;
    }

    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if child_stdin.write_all(&chunk).await.is_err() {
                break;
            }
        }
        debug!("stdin relay finished");
    });
}

/// One pipe whose write end serves as both stdout and stderr, so the
/// kernel keeps the child's writes in the order they were made.
fn merged_output() -> std::io::Result<(PipeReader, Stdio, Stdio)> {
    let (reader, writer) = std::io::pipe()?;
    let stderr = writer.try_clone()?;
    Ok((reader, Stdio::from(writer), Stdio::from(stderr)))
}

/// Copy the merged output to our stdout and the output buffer. Resolves
/// once every writer of the pipe has closed it.
fn spawn_tee(
    mut reader: PipeReader,
    mut file: Option<tokio::fs::File>,
    passthrough: bool,
) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);

    // Pipe reads block, so they stay off the runtime.
    let spawned = std::thread::Builder::new()
        .name("cronsentry-output".into())
        .spawn(move || {
            let mut buf = vec![0u8; CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "cannot start output reader; child output is discarded");
    }

    tokio::spawn(async move {
        let mut out = tokio::io::stdout();
        while let Some(chunk) = rx.recv().await {
            if passthrough {
                if let Err(e) = out.write_all(&chunk).await {
                    debug!(error = %e, "stdout relay write failed");
                }
            }
            let mut failed = false;
            if let Some(f) = file.as_mut() {
                if let Err(e) = f.write_all(&chunk).await {
                    warn!(error = %e, "output buffer write failed; buffering stopped");
                    failed = true;
                }
            }
            if failed {
                file = None;
            }
        }
        if passthrough {
            let _ = out.flush().await;
        }
        if let Some(mut f) = file {
            if let Err(e) = f.flush().await {
                warn!(error = %e, "output buffer flush failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_failures_map_to_shell_codes() {
        assert_eq!(spawn_failure_code(&ErrorKind::NotFound.into()), 127);
        assert_eq!(spawn_failure_code(&ErrorKind::PermissionDenied.into()), 126);
        assert_eq!(spawn_failure_code(&ErrorKind::Other.into()), 1);
    }

    #[cfg(unix)]
    #[test]
    fn signalled_exit_maps_to_128_plus_signal() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
    }
}
