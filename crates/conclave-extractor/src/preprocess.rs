//! Line-level cleanup applied before any extraction strategy runs.

use once_cell::sync::Lazy;
use regex::Regex;

static EPOCH_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[\d{13}\]\s?").expect("valid regex"));
static AGENT_PIPE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.-]+\s*\|\s?").expect("valid regex"));

/// Sentinel substrings that mean the run produced nothing extractable, regardless of anything
/// else in the log.
const FATAL_SENTINELS: &[&str] = &["Task not found", "Process terminated"];

/// Strips an optional `[<13-digit epoch>]` prefix and an optional `agent-name | ` prefix from
/// one line.
pub fn strip_line_prefixes(line: &str) -> &str {
    let without_epoch = EPOCH_PREFIX.find(line).map(|m| &line[m.end()..]).unwrap_or(line);
    AGENT_PIPE_PREFIX
        .find(without_epoch)
        .map(|m| &without_epoch[m.end()..])
        .unwrap_or(without_epoch)
}

/// `true` if `output` contains a fatal sentinel anywhere, meaning extraction should short-circuit
/// to `None` without trying any strategy.
pub fn has_fatal_sentinel(output: &str) -> bool {
    FATAL_SENTINELS.iter().any(|sentinel| output.contains(sentinel))
}

/// Applies [`strip_line_prefixes`] to every line, rejoining with `\n`.
pub fn clean_output(output: &str) -> String {
    output.lines().map(strip_line_prefixes).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_epoch_prefix() {
        assert_eq!(strip_line_prefixes("[1700000000000] hello"), "hello");
    }

    #[test]
    fn strips_agent_pipe_prefix() {
        assert_eq!(strip_line_prefixes("validator | checking output"), "checking output");
    }

    #[test]
    fn strips_both_prefixes_in_order() {
        assert_eq!(strip_line_prefixes("[1700000000000] validator | done"), "done");
    }

    #[test]
    fn leaves_unprefixed_lines_untouched() {
        assert_eq!(strip_line_prefixes("plain line"), "plain line");
    }

    #[test]
    fn detects_fatal_sentinels() {
        assert!(has_fatal_sentinel("some text\nTask not found\nmore text"));
        assert!(!has_fatal_sentinel("all good here"));
    }
}
