//! Subcommand implementations. Each returns the process exit code.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use cronsentry_core::CronsentryConfig;
use cronsentry_crontab::{
    Crontab, DiscoveryInvocation, KeyDeriver, ParseError, ParseOptions, SystemUserLookup,
    WriteOptions,
};
use cronsentry_exec::ownership::{OwnershipPolicy, OwnershipValidator};
use cronsentry_exec::{platform, ProcessControl, ProcessSignal, RunOptions, Supervisor};
use cronsentry_ping::{HttpPinger, Pinger};
use tracing::{debug, info, warn};

pub struct ExecFlags {
    pub no_stdout: bool,
    pub cron_env: bool,
    pub no_monitor: bool,
}

pub struct DiscoverFlags {
    pub save: bool,
    pub suppress: bool,
    pub verbose: bool,
}

// ---------------------------------------------------------------------------
// exec
// ---------------------------------------------------------------------------

pub async fn exec(
    config: &CronsentryConfig,
    key: String,
    command: &str,
    flags: ExecFlags,
) -> anyhow::Result<i32> {
    let pinger: Option<Arc<dyn Pinger>> = match HttpPinger::from_config(&config.ping) {
        Some(pinger) => Some(Arc::new(pinger)),
        None => {
            debug!("no api key configured; reports disabled");
            None
        }
    };
    let host = KeyDeriver::for_host(config.hostname.as_deref()).host().to_string();

    let options = RunOptions {
        monitor_key: key,
        inherit_env: !(flags.cron_env || config.exec.cron_env),
        monitor: !flags.no_monitor,
        no_stdout: flags.no_stdout || config.exec.no_stdout,
        host: Some(host),
    };

    let code = Supervisor::new(pinger)
        .run(command, &options)
        .await
        .context("cannot run command")?;
    Ok(code)
}

// ---------------------------------------------------------------------------
// discover
// ---------------------------------------------------------------------------

pub fn discover(
    config: &CronsentryConfig,
    path: Option<PathBuf>,
    user: Option<String>,
    flags: DiscoverFlags,
) -> anyhow::Result<i32> {
    let keys = KeyDeriver::for_host(config.hostname.as_deref());
    let write_options = WriteOptions {
        exec_name: config.exec.exec_name.clone(),
        no_stdout: config.exec.no_stdout,
    };
    let users = SystemUserLookup;

    let mut sources = resolve_sources(path.as_deref(), user.as_deref())?;
    // A directory is several sources; none of them gets its own discovery line.
    let single = !path.as_deref().is_some_and(Path::is_dir);

    for crontab in &mut sources {
        let parse_options = ParseOptions {
            exec_name: config.exec.exec_name.clone(),
            suppress_discovery: flags.suppress,
            discovery: single.then(|| current_invocation(path.as_deref())),
        };

        match crontab.load(&parse_options, &users) {
            Ok(()) => {}
            Err(ParseError::Empty { source_name }) => {
                info!(source = %source_name, "crontab is empty; nothing to discover");
                continue;
            }
            Err(e) => return Err(e).context(format!("cannot read {}", crontab.display_name())),
        }

        if flags.verbose {
            for line in crontab.jobs() {
                debug!(
                    line = line.number + 1,
                    monitorable = line.is_monitorable(),
                    wrapped = line.is_wrapped(),
                    command = line.command.as_deref().unwrap_or(""),
                    "job"
                );
            }
        }

        let text = crontab.write(&keys, &write_options);
        if flags.save {
            crontab
                .save(&text)
                .with_context(|| format!("cannot save {}", crontab.display_name()))?;
            info!(crontab = %crontab.display_name(), jobs = crontab.jobs().count(), "crontab saved");
        } else {
            if !single {
                println!("# {}", crontab.display_name());
            }
            println!("{text}");
        }
    }
    Ok(0)
}

/// argv of this process with argv[0] made absolute, so the discovery line
/// works from cron's working directory.
fn current_invocation(path: Option<&Path>) -> DiscoveryInvocation {
    let mut argv: Vec<String> = std::env::args().collect();
    match std::env::current_exe() {
        Ok(exe) => {
            if let Some(first) = argv.first_mut() {
                *first = exe.display().to_string();
            }
        }
        Err(e) => warn!(error = %e, "cannot resolve own executable path"),
    }
    DiscoveryInvocation {
        argv,
        source_arg: path.map(|p| p.display().to_string()),
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

pub fn list(
    config: &CronsentryConfig,
    path: Option<PathBuf>,
    user: Option<String>,
    json: bool,
) -> anyhow::Result<i32> {
    let keys = KeyDeriver::for_host(config.hostname.as_deref());
    let parse_options = ParseOptions {
        exec_name: config.exec.exec_name.clone(),
        ..ParseOptions::default()
    };
    let users = SystemUserLookup;

    let mut rows = Vec::new();
    for mut crontab in resolve_sources(path.as_deref(), user.as_deref())? {
        match crontab.load(&parse_options, &users) {
            Ok(()) => {}
            Err(ParseError::Empty { .. }) => continue,
            Err(e) => return Err(e).context(format!("cannot read {}", crontab.display_name())),
        }
        for line in crontab.jobs() {
            let key = keys
                .line_key(line, crontab.identity())
                .map(|k| k.to_string())
                .unwrap_or_default();
            rows.push((crontab.display_name(), key, status(line), line.clone()));
        }
    }

    if json {
        let entries: Vec<_> = rows
            .iter()
            .map(|(source, key, status, line)| {
                serde_json::json!({
                    "source": source,
                    "key": key,
                    "status": status,
                    "line": line,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(0);
    }

    for (source, key, status, line) in &rows {
        println!(
            "{source}:{:<4} {key:<12} {status:<11} {:<10} {} {}",
            line.number + 1,
            line.run_as.as_deref().unwrap_or("-"),
            line.expression.as_deref().unwrap_or(""),
            line.command.as_deref().unwrap_or(""),
        );
    }
    Ok(0)
}

fn status(line: &cronsentry_crontab::CronLine) -> &'static str {
    if line.is_discovery {
        "discovery"
    } else if line.is_wrapped() {
        "monitored"
    } else if line.ignored {
        "ignored"
    } else if line.is_meta_job() {
        "meta"
    } else if line.has_legacy_integration() {
        "legacy-ping"
    } else {
        "unmonitored"
    }
}

fn resolve_sources(path: Option<&Path>, user: Option<&str>) -> anyhow::Result<Vec<Crontab>> {
    match path {
        Some(path) if path.is_dir() => Crontab::drop_in_dir(path)
            .with_context(|| format!("cannot list {}", path.display())),
        Some(path) => Ok(vec![Crontab::system_file(path)]),
        None => Ok(vec![Crontab::user(user)]),
    }
}

// ---------------------------------------------------------------------------
// signal
// ---------------------------------------------------------------------------

pub fn signal(
    config: &CronsentryConfig,
    pid: i64,
    signal: ProcessSignal,
    any_ancestor: bool,
) -> anyhow::Result<i32> {
    let mut policy = OwnershipPolicy::new(
        config.safety.allowed_ancestors.clone(),
        config.safety.max_ancestor_depth,
    )
    .with_self_identity();
    policy.require_ancestor = !any_ancestor;

    let pid = match OwnershipValidator::system(policy).validate(pid) {
        Ok(pid) => pid,
        Err(e) => {
            eprintln!("refusing to signal: {e} [{}]", e.rule());
            return Ok(2);
        }
    };

    platform::native()
        .deliver(pid, signal)
        .with_context(|| format!("cannot send {signal} to {pid}"))?;
    info!(pid, %signal, "signal delivered");
    Ok(0)
}
