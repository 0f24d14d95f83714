//! One schedule source and its parsed lines.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{
    discover,
    error::{ParseError, WriteError},
    key::KeyDeriver,
    parse::{self, Classified, LineContext, TIMEZONE_VARS},
    source,
    types::{CronLine, LineKind, ParseOptions, WriteOptions},
    users::UserLookup,
};

/// One origin of schedule lines: a user's crontab or a crontab file.
///
/// A `Crontab` is parsed exactly once and then read or rewritten; it is not
/// meant to outlive a single read-or-rewrite cycle.
#[derive(Debug, Clone)]
pub struct Crontab {
    user: Option<String>,
    is_user_crontab: bool,
    path: Option<PathBuf>,
    identity: String,
    lines: Vec<CronLine>,
    timezone: Option<String>,
    wide_fields: bool,
    parsed: bool,
}

impl Crontab {
    /// The crontab of `user`, or of the invoking user when `None`.
    pub fn user(user: Option<&str>) -> Self {
        let owner = user
            .map(str::to_string)
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("LOGNAME").ok());
        let identity = format!("user:{}", owner.as_deref().unwrap_or("current"));
        Self {
            user: user.map(str::to_string),
            is_user_crontab: true,
            path: None,
            identity,
            lines: Vec::new(),
            timezone: None,
            wide_fields: false,
            parsed: false,
        }
    }

    /// A system-level crontab file (`/etc/crontab`, a file of `/etc/cron.d`, …).
    pub fn system_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let identity = std::fs::canonicalize(&path)
            .unwrap_or_else(|_| path.clone())
            .display()
            .to_string();
        Self {
            user: None,
            is_user_crontab: false,
            path: Some(path),
            identity,
            lines: Vec::new(),
            timezone: None,
            wide_fields: false,
            parsed: false,
        }
    }

    /// One source per file of a drop-in directory.
    pub fn drop_in_dir(dir: &Path) -> Result<Vec<Self>, ParseError> {
        Ok(source::drop_in_files(dir)?
            .into_iter()
            .map(Self::system_file)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Read the source's text and parse it.
    pub fn load(&mut self, options: &ParseOptions, users: &dyn UserLookup) -> Result<(), ParseError> {
        let text = match &self.path {
            Some(path) => source::read_file(path)?,
            None => source::read_user_crontab(self.user.as_deref())?,
        };
        self.parse(&text, options, users);
        Ok(())
    }

    /// Parse `text` into this crontab.
    ///
    /// # Panics
    ///
    /// If the crontab was already parsed.
    pub fn parse(&mut self, text: &str, options: &ParseOptions, users: &dyn UserLookup) {
        assert!(
            !self.parsed && self.lines.is_empty(),
            "crontab {} parsed twice",
            self.display_name()
        );
        self.parsed = true;

        let mut ignore_next = false;
        for (number, raw) in text.split('\n').enumerate() {
            let ctx = LineContext {
                system_level: !self.is_user_crontab,
                exec_name: &options.exec_name,
                users,
            };

            let line = match parse::classify(raw, &ctx) {
                Classified::Inert(kind) => CronLine::inert(raw, number, kind),
                Classified::IgnoreDirective => {
                    ignore_next = true;
                    CronLine::inert(raw, number, LineKind::Comment)
                }
                Classified::Env { name, value } => {
                    if self.timezone.is_none() && TIMEZONE_VARS.contains(&name.as_str()) {
                        self.timezone = Some(value);
                    }
                    CronLine::inert(raw, number, LineKind::Env)
                }
                Classified::Job(fields) => {
                    self.wide_fields |= fields.wide;
                    CronLine {
                        expression: Some(fields.expression),
                        command: fields.command,
                        key: fields.key,
                        run_as: fields.run_as,
                        ignored: std::mem::take(&mut ignore_next),
                        is_discovery: fields.is_discovery,
                        ..CronLine::inert(raw, number, LineKind::Job)
                    }
                }
            };
            self.lines.push(line);
        }

        self.manage_discovery_line(options);

        debug!(
            source = %self.display_name(),
            lines = self.lines.len(),
            jobs = self.jobs().count(),
            wide_fields = self.wide_fields,
            "crontab parsed"
        );
    }

    /// Keep at most one discovery line; drop it when suppressed; create one
    /// when missing and an invocation to reproduce is known.
    fn manage_discovery_line(&mut self, options: &ParseOptions) {
        let mut seen = false;
        let suppress = options.suppress_discovery;
        self.lines.retain(|line| {
            if !line.is_discovery {
                return true;
            }
            let keep = !suppress && !seen;
            seen = true;
            keep
        });
        if suppress {
            if seen {
                info!(source = %self.display_name(), "discovery line removed");
            }
            return;
        }
        if seen {
            return;
        }
        let Some(invocation) = &options.discovery else {
            return;
        };

        let canonical = self.path.as_ref().map(|_| self.identity.as_str());
        let command = discover::discovery_command(invocation, &options.exec_name, canonical);
        let expression = discover::discovery_expression(self.wide_fields);
        let line = CronLine {
            expression: Some(expression.clone()),
            command: Some(command.clone()),
            is_discovery: true,
            ..CronLine::inert(format!("{expression} {command}"), self.lines.len(), LineKind::Job)
        };

        // Keep a trailing newline trailing.
        let at = match self.lines.last() {
            Some(last) if last.raw.is_empty() => self.lines.len() - 1,
            _ => self.lines.len(),
        };
        self.lines.insert(at, line);
        info!(source = %self.display_name(), %expression, "discovery line added");
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Render the crontab with every eligible, unwrapped job wrapped.
    ///
    /// Lines that are not wrapped are emitted exactly as read.
    pub fn write(&self, keys: &KeyDeriver, options: &WriteOptions) -> String {
        self.lines
            .iter()
            .map(|line| self.write_line(line, keys, options))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn write_line(&self, line: &CronLine, keys: &KeyDeriver, options: &WriteOptions) -> String {
        if !line.is_monitorable() || line.is_wrapped() {
            return line.raw.clone();
        }
        let (Some(expression), Some(command), Some(key)) = (
            line.expression.as_deref(),
            line.command.as_deref(),
            keys.line_key(line, &self.identity),
        ) else {
            return line.raw.clone();
        };

        let command = if parse::needs_quoting(command) {
            parse::shell_quote(command)
        } else {
            command.to_string()
        };

        let parts = [
            expression,
            line.run_as.as_deref().unwrap_or(""),
            options.exec_name.as_str(),
            if options.no_stdout { "--no-stdout" } else { "" },
            "exec",
            key.as_str(),
            command.as_str(),
        ];
        parts
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Persist rewritten text back to where it was read from.
    pub fn save(&self, text: &str) -> Result<(), WriteError> {
        match &self.path {
            Some(path) => source::write_file(path, text),
            None => source::install_user_crontab(self.user.as_deref(), text),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn lines(&self) -> &[CronLine] {
        &self.lines
    }

    pub fn jobs(&self) -> impl Iterator<Item = &CronLine> {
        self.lines.iter().filter(|l| l.is_job())
    }

    pub fn discovery_line(&self) -> Option<&CronLine> {
        self.lines.iter().find(|l| l.is_discovery)
    }

    /// First `TZ`/`CRON_TZ` assignment.
    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn uses_wide_fields(&self) -> bool {
        self.wide_fields
    }

    pub fn is_user_crontab(&self) -> bool {
        self.is_user_crontab
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Canonical absolute path, or `user:<name>` for user crontabs.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn display_name(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => source::user_source_name(self.user.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserLookup;

    struct NoUsers;

    impl UserLookup for NoUsers {
        fn is_user(&self, _name: &str) -> bool {
            false
        }
    }

    fn parse_user(text: &str, options: &ParseOptions) -> Crontab {
        let mut tab = Crontab::user(Some("ops"));
        tab.parse(text, options, &NoUsers);
        tab
    }

    #[test]
    fn timezone_first_occurrence_wins() {
        let tab = parse_user("TZ=UTC\nCRON_TZ=Asia/Tokyo\n0 3 * * * true\n", &ParseOptions::default());
        assert_eq!(tab.timezone(), Some("UTC"));
    }

    #[test]
    fn ignore_directive_applies_to_next_job_only() {
        let text = "# cronsentry: ignore\n\n0 1 * * * /bin/a\n0 2 * * * /bin/b\n";
        let tab = parse_user(text, &ParseOptions::default());
        let jobs: Vec<_> = tab.jobs().collect();
        assert!(jobs[0].ignored);
        assert!(!jobs[1].ignored);

        let out = tab.write(&KeyDeriver::new("h"), &WriteOptions::default());
        assert!(out.contains("\n0 1 * * * /bin/a\n"));
        assert!(out.contains("0 2 * * * cronsentry exec "));
    }

    #[test]
    #[should_panic(expected = "parsed twice")]
    fn parsing_twice_panics() {
        let mut tab = Crontab::user(Some("ops"));
        tab.parse("0 3 * * * true", &ParseOptions::default(), &NoUsers);
        tab.parse("0 3 * * * true", &ParseOptions::default(), &NoUsers);
    }

    #[test]
    fn wrapped_command_with_operators_is_quoted() {
        let tab = parse_user("*/5 * * * * cd /srv && ./sync.sh\n", &ParseOptions::default());
        let keys = KeyDeriver::new("h");
        let out = tab.write(&keys, &WriteOptions::default());
        let key = keys.job_key("cd /srv && ./sync.sh", "*/5 * * * *", None);
        assert_eq!(out, format!("*/5 * * * * cronsentry exec {key} 'cd /srv && ./sync.sh'\n"));
    }

    #[test]
    fn no_stdout_flag_is_emitted() {
        let tab = parse_user("0 3 * * * /bin/x", &ParseOptions::default());
        let options = WriteOptions {
            no_stdout: true,
            ..WriteOptions::default()
        };
        let out = tab.write(&KeyDeriver::new("h"), &options);
        assert!(out.starts_with("0 3 * * * cronsentry --no-stdout exec "));
    }

    #[test]
    fn run_as_sits_between_expression_and_wrapper() {
        struct Root;
        impl UserLookup for Root {
            fn is_user(&self, name: &str) -> bool {
                name == "root"
            }
        }
        let mut tab = Crontab::system_file("/nonexistent/crontab");
        tab.parse("0 3 * * * root /usr/bin/backup.sh", &ParseOptions::default(), &Root);
        let out = tab.write(&KeyDeriver::new("h"), &WriteOptions::default());
        assert!(out.starts_with("0 3 * * * root cronsentry exec "));
        assert!(out.ends_with(" /usr/bin/backup.sh"));
    }

    #[test]
    fn discovery_line_is_synthesized_before_trailing_newline() {
        let options = ParseOptions {
            discovery: Some(crate::types::DiscoveryInvocation {
                argv: vec!["/usr/local/bin/cronsentry".into(), "discover".into()],
                source_arg: None,
            }),
            ..ParseOptions::default()
        };
        let tab = parse_user("0 3 * * * /bin/x\n", &options);
        let discovery = tab.discovery_line().expect("discovery line");
        assert_eq!(
            discovery.command.as_deref(),
            Some("/usr/local/bin/cronsentry discover --auto")
        );
        assert_eq!(tab.lines().last().map(|l| l.raw.as_str()), Some(""));

        let keys = KeyDeriver::new("h");
        let out = tab.write(&keys, &WriteOptions::default());
        let expected_key = keys.discovery_key(tab.identity());
        assert!(out.contains(&format!("cronsentry exec {expected_key} /usr/local/bin/cronsentry discover --auto")));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn existing_discovery_line_is_kept_once() {
        let text = "5 * * * * cronsentry discover --auto\n7 * * * * cronsentry discover --auto\n";
        let options = ParseOptions {
            discovery: Some(Default::default()),
            ..ParseOptions::default()
        };
        let tab = parse_user(text, &options);
        assert_eq!(tab.lines().iter().filter(|l| l.is_discovery).count(), 1);
        assert_eq!(tab.discovery_line().map(|l| l.number), Some(0));
    }

    #[test]
    fn suppression_drops_discovery_line() {
        let text = "5 * * * * cronsentry discover --auto\n0 3 * * * /bin/x\n";
        let options = ParseOptions {
            suppress_discovery: true,
            discovery: Some(Default::default()),
            ..ParseOptions::default()
        };
        let tab = parse_user(text, &options);
        assert!(tab.discovery_line().is_none());
        let out = tab.write(&KeyDeriver::new("h"), &WriteOptions::default());
        assert!(!out.contains("discover"));
    }

    #[test]
    fn wide_dialect_discovery_expression() {
        let options = ParseOptions {
            discovery: Some(Default::default()),
            ..ParseOptions::default()
        };
        let tab = parse_user("0 0 3 * * MON /bin/x\n", &options);
        assert!(tab.uses_wide_fields());
        let expr = tab.discovery_line().and_then(|l| l.expression.clone()).unwrap();
        assert_eq!(expr.split(' ').count(), 6);
    }

    #[test]
    fn five_field_job_after_six_field_job_keeps_its_command() {
        let text = "0 0 1 * * MON /opt/report\n0 3 * * * /usr/bin/backup.sh --full\n";
        let tab = parse_user(text, &ParseOptions::default());
        assert!(tab.uses_wide_fields());

        let jobs: Vec<_> = tab.jobs().collect();
        assert_eq!(jobs[0].expression.as_deref(), Some("0 0 1 * * MON"));
        assert_eq!(jobs[1].expression.as_deref(), Some("0 3 * * *"));
        assert_eq!(jobs[1].command.as_deref(), Some("/usr/bin/backup.sh --full"));

        let keys = KeyDeriver::new("h");
        let out = tab.write(&keys, &WriteOptions::default());
        let key = keys.job_key("/usr/bin/backup.sh --full", "0 3 * * *", None);
        assert!(out.contains(&format!("\n0 3 * * * cronsentry exec {key} /usr/bin/backup.sh --full\n")));
    }
}
