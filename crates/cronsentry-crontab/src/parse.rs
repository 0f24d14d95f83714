//! Line classifier: turns one raw crontab line into a structured record.

use crate::discover;
use crate::key::MonitorKey;
use crate::types::LineKind;
use crate::users::UserLookup;

/// Shorthand schedules that are not periodic and therefore cannot be monitored.
const SKIPPED_SHORTHANDS: &[&str] = &["@reboot"];

/// Environment variables that set the timezone for the whole crontab.
pub const TIMEZONE_VARS: &[&str] = &["TZ", "CRON_TZ"];

const DAYS_OF_WEEK: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Per-source flags consulted while classifying a line.
pub struct LineContext<'a> {
    /// System crontabs carry a user field before the command.
    pub system_level: bool,
    pub exec_name: &'a str,
    pub users: &'a dyn UserLookup,
}

/// Fields extracted from a job line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFields {
    pub expression: String,
    pub command: Option<String>,
    pub key: Option<MonitorKey>,
    pub run_as: Option<String>,
    /// The expression has six timing fields.
    pub wide: bool,
    pub is_discovery: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Inert(LineKind),
    Env { name: String, value: String },
    /// `# <exec-name>: ignore`; the next job is left alone.
    IgnoreDirective,
    Job(JobFields),
}

/// Classify one line. `line` may carry surrounding whitespace or a CR.
pub fn classify(line: &str, ctx: &LineContext<'_>) -> Classified {
    let line = line.trim();

    if line.is_empty() {
        return Classified::Inert(LineKind::Blank);
    }
    if let Some(comment) = line.strip_prefix('#') {
        return if is_ignore_directive(comment, ctx.exec_name) {
            Classified::IgnoreDirective
        } else {
            Classified::Inert(LineKind::Comment)
        };
    }

    let tokens = tokenize(line);

    if tokens.len() == 1 && tokens[0].1.contains('=') {
        let (name, value) = tokens[0].1.split_once('=').unwrap_or((tokens[0].1, ""));
        return Classified::Env {
            name: name.to_string(),
            value: value.to_string(),
        };
    }

    let (expression, command_start, wide) = if tokens[0].1.starts_with('@') {
        let shorthand = tokens[0].1.to_ascii_lowercase();
        if SKIPPED_SHORTHANDS.contains(&shorthand.as_str()) {
            return Classified::Inert(LineKind::Skipped);
        }
        (tokens[0].1.to_string(), 1, false)
    } else {
        if tokens.len() < 5 {
            return Classified::Inert(LineKind::Unparsed);
        }
        // Decided per line: a six-field line elsewhere in the file says
        // nothing about this one.
        let wide = tokens.len() >= 6 && is_wide_field_token(tokens[5].1);
        let fields = if wide { 6 } else { 5 };
        let (last_start, last) = tokens[fields - 1];
        (line[..last_start + last.len()].to_string(), fields, wide)
    };

    let mut command_tokens: Vec<(usize, &str)> = tokens[command_start..].to_vec();
    let mut run_as = None;

    if ctx.system_level && command_tokens.len() > 1 && ctx.users.is_user(command_tokens[0].1) {
        run_as = Some(command_tokens[0].1.to_string());
        command_tokens.remove(0);
    }

    let mut key = None;
    let mut command = command_tokens
        .first()
        .map(|(start, _)| line[*start..].to_string());

    if let Some((existing, rest)) = strip_wrapper(&command_tokens, ctx.exec_name) {
        key = Some(MonitorKey::from(existing));
        command = rest.map(|start| {
            let rest = &line[start..];
            unquote(rest).unwrap_or_else(|| rest.to_string())
        });
    }

    let is_discovery = command
        .as_deref()
        .is_some_and(|c| discover::is_discovery_command(c, ctx.exec_name));

    Classified::Job(JobFields {
        expression,
        command,
        key,
        run_as,
        wide,
        is_discovery,
    })
}

/// Whitespace tokens with their byte offsets in `s`.
fn tokenize(s: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() {
            if let Some(st) = start.take() {
                out.push((st, &s[st..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(st) = start {
        out.push((st, &s[st..]));
    }
    out
}

fn is_ignore_directive(comment: &str, exec_name: &str) -> bool {
    comment.split_once(':').is_some_and(|(name, value)| {
        name.trim().eq_ignore_ascii_case(exec_name) && value.trim().eq_ignore_ascii_case("ignore")
    })
}

/// Whether `token` looks like a sixth timing field rather than a command.
///
/// Best effort: a command named like a number or weekday is misread.
pub fn is_wide_field_token(token: &str) -> bool {
    is_numeric_field(token) || is_day_of_week_field(token)
}

fn is_numeric_field(token: &str) -> bool {
    token
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | ',' | '-' | '?' | 'L' | 'W' | '#'))
        && token
            .chars()
            .any(|c| c.is_ascii_digit() || c == '*' || c == '?')
}

fn is_day_of_week_field(token: &str) -> bool {
    let token = token.split('/').next().unwrap_or(token);
    !token.is_empty()
        && token.split(',').all(|item| {
            item.split('-').all(|day| {
                DAYS_OF_WEEK
                    .iter()
                    .any(|known| day.eq_ignore_ascii_case(known))
            })
        })
}

/// If `tokens` start with `<exec> [--flag…] exec <key>`, return the key and
/// the offset of the wrapped command, if any.
fn strip_wrapper<'a>(tokens: &[(usize, &'a str)], exec_name: &str) -> Option<(&'a str, Option<usize>)> {
    let (_, program) = tokens.first()?;
    if program_name(program) != exec_name {
        return None;
    }
    let mut i = 1;
    while tokens.get(i).is_some_and(|(_, t)| t.starts_with("--")) {
        i += 1;
    }
    if tokens.get(i)?.1 != "exec" {
        return None;
    }
    let (_, key) = tokens.get(i + 1)?;
    Some((key, tokens.get(i + 2).map(|(start, _)| *start)))
}

/// Final path component of a program word.
pub(crate) fn program_name(word: &str) -> &str {
    word.rsplit(['/', '\\']).next().unwrap_or(word)
}

/// Characters the outer shell would interpret inside a wrapped command.
const SHELL_META: &[char] = &[
    ';', '|', '&', '<', '>', '(', ')', '$', '`', '\\', '"', '\'', '*', '?', '[', '{', '~', '!',
    '\n',
];

pub fn needs_quoting(command: &str) -> bool {
    command.contains(SHELL_META)
}

/// POSIX single-quote `s`.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Inverse of [`shell_quote`]; `None` unless `s` is exactly one quoted word.
pub fn unquote(s: &str) -> Option<String> {
    let inner = s.strip_prefix('\'')?.strip_suffix('\'')?;
    if inner.replace(r"'\''", "").contains('\'') {
        return None;
    }
    Some(inner.replace(r"'\''", "'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Users(&'static [&'static str]);

    impl UserLookup for Users {
        fn is_user(&self, name: &str) -> bool {
            self.0.contains(&name)
        }
    }

    fn ctx(system_level: bool) -> LineContext<'static> {
        static USERS: Users = Users(&["root", "www-data"]);
        LineContext {
            system_level,
            exec_name: "cronsentry",
            users: &USERS,
        }
    }

    fn job(line: &str, system_level: bool) -> JobFields {
        match classify(line, &ctx(system_level)) {
            Classified::Job(fields) => fields,
            other => panic!("expected job, got {other:?}"),
        }
    }

    #[test]
    fn blank_and_comment() {
        assert_eq!(classify("   ", &ctx(false)), Classified::Inert(LineKind::Blank));
        assert_eq!(classify("# nightly", &ctx(false)), Classified::Inert(LineKind::Comment));
    }

    #[test]
    fn ignore_directive_is_recognized() {
        assert_eq!(classify("# cronsentry: ignore", &ctx(false)), Classified::IgnoreDirective);
        assert_eq!(classify("#CronSentry:IGNORE", &ctx(false)), Classified::IgnoreDirective);
        assert_eq!(
            classify("# something: ignore", &ctx(false)),
            Classified::Inert(LineKind::Comment)
        );
    }

    #[test]
    fn env_assignment() {
        assert_eq!(
            classify("CRON_TZ=Europe/Berlin", &ctx(false)),
            Classified::Env {
                name: "CRON_TZ".to_string(),
                value: "Europe/Berlin".to_string()
            }
        );
    }

    #[test]
    fn reboot_is_skipped() {
        assert_eq!(
            classify("@reboot /usr/bin/startup.sh", &ctx(false)),
            Classified::Inert(LineKind::Skipped)
        );
    }

    #[test]
    fn shorthand_schedule() {
        let f = job("@daily /usr/bin/rotate --all", false);
        assert_eq!(f.expression, "@daily");
        assert_eq!(f.command.as_deref(), Some("/usr/bin/rotate --all"));
    }

    #[test]
    fn too_few_fields_is_unparsed() {
        assert_eq!(classify("* * * cmd", &ctx(false)), Classified::Inert(LineKind::Unparsed));
    }

    #[test]
    fn day_of_week_literal_is_wide() {
        let f = job("* * * * * MON do-thing", false);
        assert!(f.wide);
        assert_eq!(f.expression, "* * * * * MON");
        assert_eq!(f.command.as_deref(), Some("do-thing"));
    }

    #[test]
    fn standard_five_fields() {
        let f = job("1 2 3 4 5 do-thing", false);
        assert!(!f.wide);
        assert_eq!(f.expression, "1 2 3 4 5");
        assert_eq!(f.command.as_deref(), Some("do-thing"));
    }

    #[test]
    fn wide_field_heuristics() {
        assert!(is_wide_field_token("*/5"));
        assert!(is_wide_field_token("1-5"));
        assert!(is_wide_field_token("mon-fri"));
        assert!(is_wide_field_token("MON,WED,FRI"));
        assert!(!is_wide_field_token("/usr/bin/x"));
        assert!(!is_wide_field_token("monitor.sh"));
        assert!(!is_wide_field_token("-"));
    }

    #[test]
    fn program_name_in_sixth_position_is_a_command() {
        let f = job("0 3 * * * /usr/bin/backup.sh --full", false);
        assert!(!f.wide);
        assert_eq!(f.expression, "0 3 * * *");
        assert_eq!(f.command.as_deref(), Some("/usr/bin/backup.sh --full"));

        let f = job("0 0 3 * * run backup", false);
        assert!(!f.wide);
        assert_eq!(f.command.as_deref(), Some("run backup"));
    }

    #[test]
    fn command_whitespace_is_preserved() {
        let f = job("0 3 * * *   echo  'a   b'", false);
        assert_eq!(f.command.as_deref(), Some("echo  'a   b'"));
    }

    #[test]
    fn run_as_only_for_system_sources() {
        let f = job("0 3 * * * root /usr/bin/backup.sh", true);
        assert_eq!(f.run_as.as_deref(), Some("root"));
        assert_eq!(f.command.as_deref(), Some("/usr/bin/backup.sh"));

        let f = job("0 3 * * * root /usr/bin/backup.sh", false);
        assert_eq!(f.run_as, None);
        assert_eq!(f.command.as_deref(), Some("root /usr/bin/backup.sh"));
    }

    #[test]
    fn lone_command_is_never_a_user() {
        let f = job("0 3 * * * root", true);
        assert_eq!(f.run_as, None);
        assert_eq!(f.command.as_deref(), Some("root"));
    }

    #[test]
    fn existing_wrapper_is_stripped() {
        let f = job("0 3 * * * /usr/local/bin/cronsentry exec abc123 /usr/bin/backup.sh -v", false);
        assert_eq!(f.key, Some(MonitorKey::from("abc123")));
        assert_eq!(f.command.as_deref(), Some("/usr/bin/backup.sh -v"));
    }

    #[test]
    fn wrapper_with_flag_and_quoted_command() {
        let f = job(
            r"0 3 * * * www-data cronsentry --no-stdout exec k1 'cd /srv && echo '\''done'\'''",
            true,
        );
        assert_eq!(f.run_as.as_deref(), Some("www-data"));
        assert_eq!(f.key, Some(MonitorKey::from("k1")));
        assert_eq!(f.command.as_deref(), Some("cd /srv && echo 'done'"));
    }

    #[test]
    fn discovery_line_is_flagged() {
        let f = job("17 * * * * /usr/local/bin/cronsentry discover --auto /etc/crontab", false);
        assert!(f.is_discovery);
        assert!(!job("0 3 * * * /usr/bin/discover", false).is_discovery);
    }

    #[test]
    fn quoting_round_trips() {
        for s in ["a && b", "echo 'x'", "it's", "''"] {
            assert_eq!(unquote(&shell_quote(s)).as_deref(), Some(s));
        }
        assert_eq!(unquote("'a' 'b'"), None);
        assert!(needs_quoting("a; b"));
        assert!(needs_quoting("a | b"));
        assert!(!needs_quoting("/usr/bin/backup.sh --full"));
    }
}
