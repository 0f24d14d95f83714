//! `cronsentry` — wrap cron jobs with monitoring.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cronsentry_core::CronsentryConfig;
use cronsentry_exec::ProcessSignal;
use tracing::warn;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "cronsentry")]
#[command(about = "Monitor cron jobs without changing how they run")]
#[command(version)]
struct Cli {
    /// Config file path.
    #[arg(long, global = true, env = "CRONSENTRY_CONFIG")]
    config: Option<String>,

    /// Do not copy the command's output to stdout (`exec` only). Accepted
    /// before the subcommand too, which is where rewritten crontab lines
    /// put it.
    #[arg(long, global = true)]
    no_stdout: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a command under monitoring; exits with the command's status.
    Exec {
        /// Run with cron's minimal environment instead of ours.
        #[arg(long)]
        cron_env: bool,

        /// Run without sending any reports.
        #[arg(long)]
        no_monitor: bool,

        /// Monitor key identifying the job.
        key: String,

        /// The command line; words are joined with spaces and run by a shell.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Wrap every eligible job of a crontab with `exec`.
    Discover {
        /// Crontab file or drop-in directory. Defaults to the user's crontab.
        path: Option<PathBuf>,

        /// Operate on this user's crontab.
        #[arg(short, long, conflicts_with = "path")]
        user: Option<String>,

        /// Non-interactive run from the self-installed discovery line; implies --save.
        #[arg(long)]
        auto: bool,

        /// Write the result back instead of printing it.
        #[arg(short, long)]
        save: bool,

        /// Remove the discovery line and never install one.
        #[arg(long)]
        no_auto_discover: bool,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Show the jobs of a crontab with their monitor keys.
    List {
        path: Option<PathBuf>,

        #[arg(short, long, conflicts_with = "path")]
        user: Option<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Send a signal to a process started by cron, after ownership checks.
    Signal {
        #[arg(allow_hyphen_values = true)]
        pid: i64,

        #[arg(short, long, default_value = "TERM")]
        signal: ProcessSignal,

        /// Skip the cron ancestry requirement.
        #[arg(long)]
        any_ancestor: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Command::Discover { verbose: true, .. });
    init_tracing(if verbose { "info,cronsentry_crontab=debug" } else { "warn" });

    let config = CronsentryConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        CronsentryConfig::default()
    });

    let code = match cli.command {
        Command::Exec {
            cron_env,
            no_monitor,
            key,
            command,
        } => {
            let flags = commands::ExecFlags {
                no_stdout: cli.no_stdout,
                cron_env,
                no_monitor,
            };
            commands::exec(&config, key, &command.join(" "), flags).await?
        }
        Command::Discover {
            path,
            user,
            auto,
            save,
            no_auto_discover,
            verbose,
        } => {
            let flags = commands::DiscoverFlags {
                save: save || auto,
                suppress: no_auto_discover || config.discovery.suppress,
                verbose,
            };
            commands::discover(&config, path, user, flags)?
        }
        Command::List { path, user, json } => commands::list(&config, path, user, json)?,
        Command::Signal {
            pid,
            signal,
            any_ancestor,
        } => commands::signal(&config, pid, signal, any_ancestor)?,
    };

    std::process::exit(code);
}

/// Logs go to stderr so a job's stdout stays exactly the job's.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
