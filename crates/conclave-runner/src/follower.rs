//! Tails a task's log file by repeated stat+seek, splitting complete lines out of a byte
//! buffer that may straddle two reads (mirrors the circular in-memory buffer `PtyManager` keeps
//! over a live child stream, but over a file on disk instead of a pipe).

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use conclave_extractor::preprocess::strip_line_prefixes;

pub const TAIL_CADENCE: Duration = Duration::from_millis(300);

static SYSTEM_INIT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*\{.*"type"\s*:\s*"(system|init)".*\}\s*$"#).expect("valid regex")
});

/// Byte offset and partial-line carry across successive reads of one log file.
#[derive(Debug, Default)]
pub struct TailState {
    pub offset: u64,
    partial: String,
}

impl TailState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `chunk` into complete lines, carrying any trailing partial line forward to the
    /// next call. Returned lines have had their epoch/agent-name prefixes stripped but have not
    /// yet been run through [`should_skip`].
    pub fn ingest(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            lines.push(strip_line_prefixes(line.trim_end_matches('\n')).to_string());
        }
        lines
    }
}

/// `true` for lines the follow phase must not surface as `AGENT_OUTPUT` or add to the output
/// buffer: section banners, the run footer, and system/init events.
pub fn should_skip(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("===")
        || trimmed.starts_with("Finished:")
        || trimmed.starts_with("Exit code:")
        || SYSTEM_INIT_LINE.is_match(trimmed)
}

/// Reads whatever bytes have been appended to `path` since `state.offset`, advances the offset,
/// and returns the non-skipped, prefix-stripped lines. A shrunk file (rotated under us) resets
/// the offset to zero rather than erroring.
pub async fn tail_once(path: &Path, state: &mut TailState) -> std::io::Result<Vec<String>> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    if len < state.offset {
        state.offset = 0;
    }
    if len == state.offset {
        return Ok(Vec::new());
    }
    file.seek(SeekFrom::Start(state.offset)).await?;
    let mut buf = Vec::with_capacity((len - state.offset) as usize);
    file.read_to_end(&mut buf).await?;
    state.offset = len;
    let chunk = String::from_utf8_lossy(&buf);
    Ok(state.ingest(&chunk).into_iter().filter(|line| !should_skip(line)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_buffers_a_trailing_partial_line() {
        let mut state = TailState::new();
        assert_eq!(state.ingest("first line\nsecond"), vec!["first line".to_string()]);
        assert_eq!(state.ingest(" line\nthird\n"), vec!["second line".to_string(), "third".to_string()]);
    }

    #[test]
    fn ingest_strips_prefixes_per_line() {
        let mut state = TailState::new();
        let lines = state.ingest("[1700000000000] validator | hello\n");
        assert_eq!(lines, vec!["hello".to_string()]);
    }

    #[test]
    fn should_skip_recognises_banners_and_footers() {
        assert!(should_skip("=== task starting ==="));
        assert!(should_skip("Finished: ok"));
        assert!(should_skip("Exit code: 0"));
        assert!(!should_skip("ordinary output"));
    }

    #[test]
    fn should_skip_recognises_system_init_json() {
        assert!(should_skip(r#"{"type":"system","subtype":"init"}"#));
        assert!(!should_skip(r#"{"type":"text","text":"hi"}"#));
    }

    #[tokio::test]
    async fn tail_once_reads_only_newly_appended_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.log");
        tokio::fs::write(&path, "line one\n").await.unwrap();
        let mut state = TailState::new();
        let first = tail_once(&path, &mut state).await.unwrap();
        assert_eq!(first, vec!["line one".to_string()]);

        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        let mut file = tokio::fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        use tokio::io::AsyncWriteExt;
        file.write_all(b"line two\n").await.unwrap();

        let second = tail_once(&path, &mut state).await.unwrap();
        assert_eq!(second, vec!["line two".to_string()]);
    }
}
