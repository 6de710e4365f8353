//! `DELETE <path>` and `MOVE <from> TO <to>` directive lines

use std::sync::LazyLock;

use regex::Regex;

use super::{Fence, Found, MatchOutput, Matcher, ParsedOperation, Residual, line_spans};
use crate::core::ops::normalize_rel_path;

// A path is a backquoted span (may hold spaces) or a whitespace-free token
static DELETE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]\s+)?DELETE:?\s+(`[^`]+`|\S+)\s*$").expect("valid DELETE regex")
});

static MOVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]\s+)?MOVE:?\s+(`[^`]+`|\S+)\s+(?i:to):?\s+(`[^`]+`|\S+)\s*$")
        .expect("valid MOVE regex")
});

/// Directive paths may carry a trailing colon, as in `DELETE src/a.rs:`.
fn directive_path(raw: &str) -> Option<String> {
    normalize_rel_path(raw.trim_end_matches(':'))
}

/// Parse a single line as a directive.
pub fn parse_directive(line: &str) -> Option<ParsedOperation> {
    if let Some(caps) = MOVE_RE.captures(line) {
        let from_path = directive_path(&caps[1])?;
        let to_path = directive_path(&caps[2])?;
        if from_path == to_path {
            return None;
        }
        return Some(ParsedOperation::Move { from_path, to_path });
    }
    if let Some(caps) = DELETE_RE.captures(line) {
        let file_path = directive_path(&caps[1])?;
        return Some(ParsedOperation::Delete { file_path });
    }
    None
}

/// Matches directive lines outside fenced blocks.
pub struct DirectiveMatcher;

impl Matcher for DirectiveMatcher {
    fn name(&self) -> &'static str {
        "directive"
    }

    fn scan(&self, input: &Residual<'_>, fences: &[Fence]) -> MatchOutput {
        let mut out = MatchOutput::default();
        for line in line_spans(input.text()) {
            if fences.iter().any(|f| f.contains(line.start)) || !input.is_free(&line.range()) {
                continue;
            }
            if let Some(op) = parse_directive(line.text) {
                out.found.push(Found {
                    offset: line.start,
                    op,
                });
                out.spans.push(line.range());
            }
        }
        out
    }
}
