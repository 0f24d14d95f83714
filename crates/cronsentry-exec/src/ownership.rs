//! Process ownership validation.
//!
//! Before cronsentry acts on a PID it did not spawn, the PID has to pass
//! every rule below, checked in order. The first violation is returned.
//!
//! 1. positive and no larger than the OS maximum
//! 2. not reserved (0, init, kthreadd)
//! 3. the process exists
//! 4. not a kernel thread
//! 5. optionally, an ancestor within `max_depth` generations is on the
//!    allow-list (cron daemons, cronsentry itself)

use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::error::ValidationError;

/// PIDs no job can own.
pub const RESERVED_PIDS: [u32; 3] = [0, 1, 2];

pub const DEFAULT_PID_MAX: u32 = 4_194_304;

#[cfg(target_os = "macos")]
const PLATFORM_PID_MAX: u32 = 99_998;

#[cfg(not(target_os = "macos"))]
const PLATFORM_PID_MAX: u32 = DEFAULT_PID_MAX;

/// What the validator needs to know about one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    /// Short command name (`comm`).
    pub name: String,
    /// Full command line; kernel threads appear as `[name]`.
    pub command: String,
    pub exe: Option<PathBuf>,
}

impl ProcessInfo {
    pub fn is_kernel_thread(&self) -> bool {
        let cmd = self.command.trim();
        cmd.len() > 2 && cmd.starts_with('[') && cmd.ends_with(']')
    }

    fn matches(&self, allowed: &str) -> bool {
        if self.name == allowed {
            return true;
        }
        if let Some(name) = self.exe.as_ref().and_then(|p| p.file_name()) {
            if name.to_string_lossy() == allowed {
                return true;
            }
        }
        self.command
            .split_whitespace()
            .next()
            .and_then(|argv0| argv0.rsplit('/').next())
            .is_some_and(|base| base == allowed)
    }
}

/// Read-only view of the process table.
pub trait ProcessInspector {
    /// Non-destructive existence probe.
    fn exists(&self, pid: u32) -> bool;

    fn info(&self, pid: u32) -> Option<ProcessInfo>;
}

/// Which processes may be acted on.
#[derive(Debug, Clone)]
pub struct OwnershipPolicy {
    pub allowed_ancestors: Vec<String>,
    pub max_depth: usize,
    pub require_ancestor: bool,
}

impl OwnershipPolicy {
    pub fn new(allowed_ancestors: Vec<String>, max_depth: usize) -> Self {
        Self {
            allowed_ancestors,
            max_depth,
            require_ancestor: true,
        }
    }

    /// Also allow ancestors named like the running executable.
    pub fn with_self_identity(mut self) -> Self {
        if let Some(name) = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        {
            if !self.allowed_ancestors.contains(&name) {
                self.allowed_ancestors.push(name);
            }
        }
        self
    }
}

pub struct OwnershipValidator<I> {
    inspector: I,
    policy: OwnershipPolicy,
    pid_max: u32,
}

impl OwnershipValidator<SystemInspector> {
    pub fn system(policy: OwnershipPolicy) -> Self {
        Self::new(SystemInspector, policy)
    }
}

impl<I: ProcessInspector> OwnershipValidator<I> {
    pub fn new(inspector: I, policy: OwnershipPolicy) -> Self {
        Self {
            inspector,
            policy,
            pid_max: os_pid_max(),
        }
    }

    pub fn with_pid_max(mut self, pid_max: u32) -> Self {
        self.pid_max = pid_max;
        self
    }

    /// Check `pid` against every rule and return it as a native PID.
    pub fn validate(&self, pid: i64) -> Result<u32, ValidationError> {
        if pid <= 0 {
            return Err(ValidationError::NotPositive { pid });
        }
        if pid > i64::from(self.pid_max) {
            return Err(ValidationError::AboveMaximum {
                pid,
                max: self.pid_max,
            });
        }
        let pid = pid as u32;
        if RESERVED_PIDS.contains(&pid) {
            return Err(ValidationError::Reserved { pid });
        }
        if !self.inspector.exists(pid) {
            return Err(ValidationError::NotFound { pid });
        }

        let info = self
            .inspector
            .info(pid)
            .ok_or(ValidationError::NotFound { pid })?;
        if info.is_kernel_thread() {
            return Err(ValidationError::KernelThread {
                pid,
                name: info.command.trim().to_string(),
            });
        }

        if self.policy.require_ancestor {
            self.check_ancestry(&info)?;
        }
        Ok(pid)
    }

    fn check_ancestry(&self, process: &ProcessInfo) -> Result<(), ValidationError> {
        let mut parent = process.ppid;
        let mut walked = 0;
        while walked < self.policy.max_depth && parent > 1 {
            let Some(ancestor) = self.inspector.info(parent) else {
                break;
            };
            walked += 1;
            if let Some(allowed) = self
                .policy
                .allowed_ancestors
                .iter()
                .find(|a| ancestor.matches(a))
            {
                debug!(
                    pid = process.pid,
                    ancestor = ancestor.pid,
                    allowed = %allowed,
                    "allowed ancestor found"
                );
                return Ok(());
            }
            parent = ancestor.ppid;
        }
        Err(ValidationError::NoAllowedAncestor {
            pid: process.pid,
            depth: walked,
        })
    }
}

/// Highest PID the OS will hand out.
pub fn os_pid_max() -> u32 {
    #[cfg(target_os = "linux")]
    {
        if let Some(max) = std::fs::read_to_string("/proc/sys/kernel/pid_max")
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            return max;
        }
    }
    PLATFORM_PID_MAX
}

/// The live process table: `/proc` on Linux, `ps` elsewhere.
pub struct SystemInspector;

impl ProcessInspector for SystemInspector {
    #[cfg(unix)]
    fn exists(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 performs the permission and existence checks only.
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return true;
        }
        // EPERM: it exists, we just may not signal it.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn exists(&self, pid: u32) -> bool {
        self.info(pid).is_some()
    }

    #[cfg(target_os = "linux")]
    fn info(&self, pid: u32) -> Option<ProcessInfo> {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let (name, ppid) = parse_stat(&stat)?;
        let cmdline = std::fs::read(format!("/proc/{pid}/cmdline")).unwrap_or_default();
        let command = if cmdline.is_empty() {
            format!("[{name}]")
        } else {
            cmdline
                .split(|b| *b == 0)
                .filter(|part| !part.is_empty())
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect::<Vec<_>>()
                .join(" ")
        };
        let exe = std::fs::read_link(format!("/proc/{pid}/exe")).ok();
        Some(ProcessInfo {
            pid,
            ppid,
            name,
            command,
            exe,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn info(&self, pid: u32) -> Option<ProcessInfo> {
        let ppid = ps_field(pid, "ppid=")?.trim().parse().ok()?;
        let comm = ps_field(pid, "comm=")?;
        let command = ps_field(pid, "command=").unwrap_or_default();
        let comm = comm.trim();
        let name = comm.rsplit('/').next().unwrap_or(comm).to_string();
        let exe = comm.starts_with('/').then(|| PathBuf::from(comm));
        Some(ProcessInfo {
            pid,
            ppid,
            name,
            command: command.trim().to_string(),
            exe,
        })
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
/// `(comm, ppid)` from the contents of `/proc/<pid>/stat`.
///
/// `comm` may itself contain spaces and parentheses, so it is delimited by
/// the first `(` and the last `)`.
fn parse_stat(stat: &str) -> Option<(String, u32)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let name = stat.get(open + 1..close)?.to_string();
    let mut rest = stat.get(close + 1..)?.split_whitespace();
    let _state = rest.next()?;
    let ppid = rest.next()?.parse().ok()?;
    Some((name, ppid))
}

#[cfg_attr(target_os = "linux", allow(dead_code))]
fn ps_field(pid: u32, field: &str) -> Option<String> {
    let output = Command::new("ps")
        .args(["-o", field, "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeTable(HashMap<u32, ProcessInfo>);

    impl FakeTable {
        fn new(entries: &[(u32, u32, &str, &str)]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(pid, ppid, name, command)| {
                        (
                            *pid,
                            ProcessInfo {
                                pid: *pid,
                                ppid: *ppid,
                                name: name.to_string(),
                                command: command.to_string(),
                                exe: None,
                            },
                        )
                    })
                    .collect(),
            )
        }
    }

    impl ProcessInspector for FakeTable {
        fn exists(&self, pid: u32) -> bool {
            self.0.contains_key(&pid)
        }

        fn info(&self, pid: u32) -> Option<ProcessInfo> {
            self.0.get(&pid).cloned()
        }
    }

    fn table() -> FakeTable {
        FakeTable::new(&[
            (1, 0, "systemd", "/sbin/init"),
            (2, 0, "kthreadd", "[kthreadd]"),
            (40, 2, "kworker/0:1", "[kworker/0:1]"),
            (500, 1, "cron", "/usr/sbin/cron -f"),
            (600, 500, "sh", "/bin/sh -c backup.sh"),
            (700, 600, "backup.sh", "/bin/bash ./backup.sh"),
            (800, 1, "sshd", "/usr/sbin/sshd -D"),
            (900, 800, "bash", "-bash"),
        ])
    }

    fn validator() -> OwnershipValidator<FakeTable> {
        let policy = OwnershipPolicy::new(vec!["cron".into(), "crond".into()], 10);
        OwnershipValidator::new(table(), policy).with_pid_max(32_768)
    }

    #[test]
    fn accepts_a_descendant_of_cron() {
        assert_eq!(validator().validate(700), Ok(700));
    }

    #[test]
    fn rejects_non_positive_pids() {
        assert_eq!(validator().validate(0).unwrap_err().rule(), "pid-positive");
        assert_eq!(validator().validate(-5).unwrap_err().rule(), "pid-positive");
    }

    #[test]
    fn rejects_pids_above_the_maximum() {
        assert_eq!(
            validator().validate(40_000),
            Err(ValidationError::AboveMaximum {
                pid: 40_000,
                max: 32_768
            })
        );
    }

    #[test]
    fn rejects_reserved_pids() {
        assert_eq!(validator().validate(1), Err(ValidationError::Reserved { pid: 1 }));
        assert_eq!(validator().validate(2), Err(ValidationError::Reserved { pid: 2 }));
    }

    #[test]
    fn rejects_missing_processes() {
        assert_eq!(validator().validate(4242), Err(ValidationError::NotFound { pid: 4242 }));
    }

    #[test]
    fn rejects_kernel_threads() {
        assert_eq!(validator().validate(40).unwrap_err().rule(), "not-kernel-thread");
    }

    #[test]
    fn rejects_processes_outside_cron() {
        assert_eq!(
            validator().validate(900),
            Err(ValidationError::NoAllowedAncestor { pid: 900, depth: 1 })
        );
    }

    #[test]
    fn ancestor_walk_is_bounded() {
        let policy = OwnershipPolicy::new(vec!["cron".into()], 1);
        let shallow = OwnershipValidator::new(table(), policy).with_pid_max(32_768);
        assert_eq!(
            shallow.validate(700),
            Err(ValidationError::NoAllowedAncestor { pid: 700, depth: 1 })
        );
    }

    #[test]
    fn ancestry_can_be_waived() {
        let mut policy = OwnershipPolicy::new(vec![], 10);
        policy.require_ancestor = false;
        let lenient = OwnershipValidator::new(table(), policy).with_pid_max(32_768);
        assert_eq!(lenient.validate(900), Ok(900));
    }

    #[test]
    fn matches_on_executable_basename() {
        let info = ProcessInfo {
            pid: 10,
            ppid: 1,
            name: "cronsentry-wrap".into(),
            command: "/usr/local/bin/cronsentry exec abc ls".into(),
            exe: None,
        };
        assert!(info.matches("cronsentry"));
        assert!(!info.matches("cron"));
    }

    #[test]
    fn parses_stat_with_awkward_comm() {
        let stat = "1234 (my (weird) job) S 99 1234 1234 0 -1";
        assert_eq!(parse_stat(stat), Some(("my (weird) job".to_string(), 99)));
    }

    #[cfg(unix)]
    #[test]
    fn system_inspector_sees_this_process() {
        let me = std::process::id();
        assert!(SystemInspector.exists(me));
        let info = SystemInspector.info(me).unwrap();
        assert_eq!(info.pid, me);
        assert!(info.ppid > 0);
    }

    #[test]
    fn pid_max_is_sane() {
        assert!(os_pid_max() >= 32_768 || cfg!(target_os = "macos"));
    }
}
