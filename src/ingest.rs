use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use tracing::warn;

use crate::types::UsageEvent;

/// Events parsed from a JSON-lines stream, plus how many lines were unusable.
#[derive(Debug, Default)]
pub struct ParsedEvents {
    pub events: Vec<UsageEvent>,
    pub skipped: usize,
}

/// Parse one `UsageEvent` per line. Blank lines are ignored; lines that
/// fail to parse are logged with their line number and counted.
pub fn parse_jsonl<R: Read>(reader: R) -> std::io::Result<ParsedEvents> {
    let reader = BufReader::new(reader);
    let mut out = ParsedEvents::default();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<UsageEvent>(line) {
            Ok(ev) => out.events.push(ev),
            Err(e) => {
                warn!(line = i + 1, error = %e, "skipping malformed event");
                out.skipped += 1;
            }
        }
    }

    Ok(out)
}

pub fn parse_jsonl_file(path: &Path) -> std::io::Result<ParsedEvents> {
    parse_jsonl(std::fs::File::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_bad_lines_and_blanks() {
        let data = r#"{"usage_key":"chat.ask","provider":"openai","model":"gpt-4o-mini","usage":{"input_tokens":10,"output_tokens":5},"latency_ms":120}

{"usage_key": 42}
not json at all
{"usage_key":"search","provider":"anthropic","model":"claude-haiku","ok":false,"error_code":"timeout","timestamp":"2025-01-10T10:00:00Z"}
"#;
        let parsed = parse_jsonl(data.as_bytes()).unwrap();
        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.skipped, 2);
        assert_eq!(parsed.events[0].usage.input_tokens, Some(10));
        assert!(!parsed.events[1].ok);
        assert_eq!(parsed.events[1].error_code.as_deref(), Some("timeout"));
    }
}
