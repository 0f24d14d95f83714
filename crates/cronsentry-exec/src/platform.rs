//! Platform process control.
//!
//! On unix the child runs in its own process group and relayed signals go
//! to the whole group, so a shell's grandchildren see them too. Elsewhere
//! only an interrupt can be observed and nothing can be forwarded.
//! [`native`] selects the implementation once at startup.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Signals cronsentry can observe or deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessSignal {
    Interrupt,
    Terminate,
    Hangup,
    Quit,
    Kill,
    User1,
    User2,
}

impl ProcessSignal {
    /// The signals relayed from the supervisor to its child.
    pub const RELAYED: [ProcessSignal; 3] = [
        ProcessSignal::Interrupt,
        ProcessSignal::Terminate,
        ProcessSignal::Hangup,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProcessSignal::Interrupt => "INT",
            ProcessSignal::Terminate => "TERM",
            ProcessSignal::Hangup => "HUP",
            ProcessSignal::Quit => "QUIT",
            ProcessSignal::Kill => "KILL",
            ProcessSignal::User1 => "USR1",
            ProcessSignal::User2 => "USR2",
        }
    }

    #[cfg(unix)]
    pub fn number(self) -> libc::c_int {
        match self {
            ProcessSignal::Interrupt => libc::SIGINT,
            ProcessSignal::Terminate => libc::SIGTERM,
            ProcessSignal::Hangup => libc::SIGHUP,
            ProcessSignal::Quit => libc::SIGQUIT,
            ProcessSignal::Kill => libc::SIGKILL,
            ProcessSignal::User1 => libc::SIGUSR1,
            ProcessSignal::User2 => libc::SIGUSR2,
        }
    }
}

impl fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG{}", self.name())
    }
}

impl FromStr for ProcessSignal {
    type Err = String;

    /// Accepts `TERM`, `SIGTERM`, `term` and the numeric forms `15` etc.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        match name {
            "INT" | "2" => Ok(ProcessSignal::Interrupt),
            "TERM" | "15" => Ok(ProcessSignal::Terminate),
            "HUP" | "1" => Ok(ProcessSignal::Hangup),
            "QUIT" | "3" => Ok(ProcessSignal::Quit),
            "KILL" | "9" => Ok(ProcessSignal::Kill),
            "USR1" => Ok(ProcessSignal::User1),
            "USR2" => Ok(ProcessSignal::User2),
            _ => Err(format!("unknown signal: {s}")),
        }
    }
}

/// Stream of termination signals delivered to this process.
#[async_trait]
pub trait SignalSource: Send {
    /// Wait for the next signal; `None` once the source is exhausted.
    async fn next(&mut self) -> Option<ProcessSignal>;
}

/// How the supervisor isolates, watches and signals its child.
pub trait ProcessControl: Send + Sync {
    /// Configure `command` so the child can be signalled as a unit.
    fn isolate(&self, command: &mut Command);

    /// Begin observing the relayed termination signals.
    fn subscribe(&self) -> io::Result<Box<dyn SignalSource>>;

    /// Forward `signal` to the child started with [`isolate`](Self::isolate)
    /// and everything it spawned. A child that already exited is not an error.
    fn forward(&self, pid: u32, signal: ProcessSignal) -> io::Result<()>;

    /// Deliver `signal` to exactly one process.
    fn deliver(&self, pid: u32, signal: ProcessSignal) -> io::Result<()>;
}

/// The implementation for the platform we were compiled for.
pub fn native() -> Arc<dyn ProcessControl> {
    #[cfg(unix)]
    {
        Arc::new(UnixControl)
    }
    #[cfg(not(unix))]
    {
        Arc::new(FallbackControl)
    }
}

// ---------------------------------------------------------------------------
// unix
// ---------------------------------------------------------------------------

#[cfg(unix)]
pub struct UnixControl;

#[cfg(unix)]
impl UnixControl {
    fn kill(target: libc::pid_t, signal: ProcessSignal) -> io::Result<()> {
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(target, signal.number()) };
        if rc == 0 {
            return Ok(());
        }
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
impl ProcessControl for UnixControl {
    fn isolate(&self, command: &mut Command) {
        command.process_group(0);
    }

    fn subscribe(&self) -> io::Result<Box<dyn SignalSource>> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Box::new(UnixSignals {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        }))
    }

    fn forward(&self, pid: u32, signal: ProcessSignal) -> io::Result<()> {
        let group = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        match Self::kill(-group, signal) {
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                debug!(pid, %signal, "process group already gone");
                Ok(())
            }
            other => other,
        }
    }

    fn deliver(&self, pid: u32, signal: ProcessSignal) -> io::Result<()> {
        let target = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        Self::kill(target, signal)
    }
}

#[cfg(unix)]
struct UnixSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
#[async_trait]
impl SignalSource for UnixSignals {
    async fn next(&mut self) -> Option<ProcessSignal> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(ProcessSignal::Interrupt),
            Some(()) = self.terminate.recv() => Some(ProcessSignal::Terminate),
            Some(()) = self.hangup.recv() => Some(ProcessSignal::Hangup),
            else => None,
        }
    }
}

// ---------------------------------------------------------------------------
// everything else
// ---------------------------------------------------------------------------

#[cfg(not(unix))]
pub struct FallbackControl;

#[cfg(not(unix))]
impl ProcessControl for FallbackControl {
    fn isolate(&self, _command: &mut Command) {}

    fn subscribe(&self) -> io::Result<Box<dyn SignalSource>> {
        Ok(Box::new(CtrlC))
    }

    fn forward(&self, pid: u32, signal: ProcessSignal) -> io::Result<()> {
        debug!(pid, %signal, "signal forwarding unsupported on this platform");
        Ok(())
    }

    fn deliver(&self, _pid: u32, _signal: ProcessSignal) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "signal delivery is not supported on this platform",
        ))
    }
}

#[cfg(not(unix))]
struct CtrlC;

#[cfg(not(unix))]
#[async_trait]
impl SignalSource for CtrlC {
    async fn next(&mut self) -> Option<ProcessSignal> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|()| ProcessSignal::Interrupt)
    }
}
