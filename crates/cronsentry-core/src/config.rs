use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Name of the monitoring executable as it appears inside wrapped crontab lines.
pub const EXEC_NAME: &str = "cronsentry";
/// Injected into every supervised child so jobs can tell they are monitored.
pub const MARKER_ENV: &str = "CRONSENTRY_EXEC";
/// Subdirectory of the platform temp root holding output buffers.
pub const TEMP_SUBDIR: &str = "cronsentry";
/// Output tail included in a status report.
pub const PING_TAIL_BYTES: u64 = 1_000;
/// Output ceiling for a full log upload (100 MiB).
pub const LOG_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Top-level config (cronsentry.toml + CRONSENTRY_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronsentryConfig {
    /// Overrides the host identity mixed into monitor keys.
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub ping: PingConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Executable name written into wrapped lines.
    #[serde(default = "default_exec_name")]
    pub exec_name: String,
    /// Do not relay child output to our own stdout.
    #[serde(default)]
    pub no_stdout: bool,
    /// Run children with a minimal cron-like environment.
    #[serde(default)]
    pub cron_env: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            exec_name: default_exec_name(),
            no_stdout: false,
            cron_env: false,
        }
    }
}

/// Status reporting endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingConfig {
    /// Reporting is disabled when no key is configured.
    pub api_key: Option<String>,
    /// Primary and fallback hosts, tried in order. Only the first two are used.
    #[serde(default = "default_ping_hosts")]
    pub hosts: Vec<String>,
    /// Attempts per host before failing over.
    #[serde(default = "default_ping_retries")]
    pub retries: u32,
    #[serde(default = "default_ping_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            hosts: default_ping_hosts(),
            retries: default_ping_retries(),
            timeout_secs: default_ping_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Never synthesize the self-reinstalling discovery line; drop one if present.
    #[serde(default)]
    pub suppress: bool,
}

/// Process ownership checks for the `signal` capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Command names accepted as an ancestor of a target process.
    #[serde(default = "default_allowed_ancestors")]
    pub allowed_ancestors: Vec<String>,
    #[serde(default = "default_max_ancestor_depth")]
    pub max_ancestor_depth: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            allowed_ancestors: default_allowed_ancestors(),
            max_ancestor_depth: default_max_ancestor_depth(),
        }
    }
}

fn default_exec_name() -> String {
    EXEC_NAME.to_string()
}
fn default_ping_hosts() -> Vec<String> {
    vec![
        "https://ping.cronsentry.dev".to_string(),
        "https://ping-fallback.cronsentry.dev".to_string(),
    ]
}
fn default_ping_retries() -> u32 {
    3
}
fn default_ping_timeout_secs() -> u64 {
    10
}
fn default_allowed_ancestors() -> Vec<String> {
    ["cron", "crond", "anacron", "cronie", EXEC_NAME]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_ancestor_depth() -> usize {
    10
}

impl CronsentryConfig {
    /// Load config from a TOML file with CRONSENTRY_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.cronsentry/cronsentry.toml
    ///
    /// Nested keys use a double underscore: `CRONSENTRY_PING__API_KEY`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CronsentryError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CRONSENTRY_").ignore(&["CONFIG", "EXEC"]).split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronsentry/cronsentry.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_when_file_missing() {
        Jail::expect_with(|_jail| {
            let cfg = CronsentryConfig::load(Some("does-not-exist.toml")).unwrap();
            assert_eq!(cfg.exec.exec_name, EXEC_NAME);
            assert!(cfg.ping.api_key.is_none());
            assert_eq!(cfg.ping.hosts.len(), 2);
            assert_eq!(cfg.safety.max_ancestor_depth, 10);
            Ok(())
        });
    }

    #[test]
    fn file_and_env_are_layered() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "cronsentry.toml",
                r#"
                hostname = "web-1"

                [ping]
                api_key = "from-file"
                retries = 5

                [discovery]
                suppress = true
                "#,
            )?;
            jail.set_env("CRONSENTRY_PING__API_KEY", "from-env");
            jail.set_env("CRONSENTRY_EXEC__NO_STDOUT", "true");

            let cfg = CronsentryConfig::load(Some("cronsentry.toml")).unwrap();
            assert_eq!(cfg.hostname.as_deref(), Some("web-1"));
            assert_eq!(cfg.ping.api_key.as_deref(), Some("from-env"));
            assert_eq!(cfg.ping.retries, 5);
            assert!(cfg.exec.no_stdout);
            assert!(cfg.discovery.suppress);
            Ok(())
        });
    }

    #[test]
    fn marker_variable_is_not_read_as_config() {
        Jail::expect_with(|jail| {
            jail.set_env(MARKER_ENV, "1");
            let cfg = CronsentryConfig::load(Some("missing.toml")).unwrap();
            assert!(!cfg.exec.cron_env);
            Ok(())
        });
    }
}
