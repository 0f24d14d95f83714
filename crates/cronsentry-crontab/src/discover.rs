//! The self-reinstalling discovery line.
//!
//! Every parse ensures the source carries exactly one line that re-runs
//! discovery on a schedule, unless discovery is suppressed for the pass.

use rand::Rng;

use crate::parse::{needs_quoting, program_name, shell_quote};
use crate::types::DiscoveryInvocation;

/// Subcommand that performs discovery.
pub const DISCOVER_SUBCOMMAND: &str = "discover";
/// Flag marking a non-interactive, self-invoked discovery run.
pub const AUTO_FLAG: &str = "--auto";

/// Flags that would make a scheduled re-invocation interactive, write
/// unconditionally or chatty. `--auto` is re-inserted exactly once.
const STRIPPED_FLAGS: &[&str] = &[
    AUTO_FLAG,
    "--save",
    "-s",
    "--interactive",
    "-i",
    "--verbose",
    "-v",
    "--dry-run",
];

/// Whether `command` invokes discovery through the monitoring executable.
pub fn is_discovery_command(command: &str, exec_name: &str) -> bool {
    let mut words = command.split_whitespace();
    match words.next() {
        Some(program) if program_name(program) == exec_name => {
            words.any(|w| w == DISCOVER_SUBCOMMAND)
        }
        _ => false,
    }
}

/// Timing expression for a new discovery line: hourly at a random minute so
/// many installations do not all fire together.
pub fn discovery_expression(wide_fields: bool) -> String {
    let minute: u8 = rand::rng().random_range(0..=58);
    let expression = format!("{minute} * * * *");
    if wide_fields {
        format!("* {expression}")
    } else {
        expression
    }
}

/// Rebuild the current discovery invocation as a schedulable command.
///
/// `canonical_source` replaces the source argument exactly as the user typed
/// it so the line works from any working directory.
pub fn discovery_command(
    invocation: &DiscoveryInvocation,
    exec_name: &str,
    canonical_source: Option<&str>,
) -> String {
    let argv: Vec<&str> = if invocation.argv.is_empty() {
        vec![exec_name, DISCOVER_SUBCOMMAND]
    } else {
        invocation.argv.iter().map(String::as_str).collect()
    };

    let mut words: Vec<String> = Vec::with_capacity(argv.len() + 1);
    let mut saw_subcommand = false;
    for (i, arg) in argv.iter().enumerate() {
        if i > 0 && STRIPPED_FLAGS.contains(arg) {
            continue;
        }
        let word = match (invocation.source_arg.as_deref(), canonical_source) {
            (Some(typed), Some(canonical)) if i > 0 && *arg == typed => canonical,
            _ => *arg,
        };
        words.push(quote_word(word));
        if !saw_subcommand && i > 0 && *arg == DISCOVER_SUBCOMMAND {
            saw_subcommand = true;
            words.push(AUTO_FLAG.to_string());
        }
    }
    if !saw_subcommand {
        words.insert(1.min(words.len()), DISCOVER_SUBCOMMAND.to_string());
        words.insert(2.min(words.len()), AUTO_FLAG.to_string());
    }
    words.join(" ")
}

fn quote_word(word: &str) -> String {
    if word.is_empty() || needs_quoting(word) || word.contains(char::is_whitespace) {
        shell_quote(word)
    } else {
        word.to_string()
    }
}
