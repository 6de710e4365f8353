//! Markdown change parser
//!
//! Turns a pasted LLM response into raw file operations. Parsing is a fixed
//! sequence of matchers over the immutable input; each matcher reports the
//! operations it found plus the byte spans it consumed, and later matchers
//! only see what is left. Nothing here touches the filesystem and nothing
//! fails: text that matches no form is simply ignored.
//!
//! Recognized forms, in priority order:
//! 1. `DELETE <path>` / `MOVE <from> TO <to>` directive lines
//! 2. unified-diff fences (`--- a/x` / `+++ b/x` with `@@` hunks)
//! 3. fenced blocks headed by a file path, holding either
//!    `<<<<<<< SEARCH` / `=======` / `>>>>>>> REPLACE` blocks or a whole file

use std::ops::Range;

use serde::Serialize;
use tracing::{debug, instrument};

pub mod block;
pub mod directive;
pub mod fence;
pub mod udiff;

pub use fence::{Fence, scan_fences};

/// One localized edit: replace the first occurrence of `search` with `replace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchReplace {
    pub search: String,
    pub replace: String,
}

/// Operation as written in the markdown, before it is resolved against
/// the file's current content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParsedOperation {
    #[serde(rename_all = "camelCase")]
    Patch {
        file_path: String,
        blocks: Vec<SearchReplace>,
        is_new_file: bool,
    },
    #[serde(rename_all = "camelCase")]
    Overwrite {
        file_path: String,
        content: String,
        is_new_file: bool,
    },
    #[serde(rename_all = "camelCase")]
    Delete { file_path: String },
    #[serde(rename_all = "camelCase")]
    Move { from_path: String, to_path: String },
}

impl ParsedOperation {
    /// Path the operation reads from; `from_path` for moves.
    pub fn primary_path(&self) -> &str {
        match self {
            ParsedOperation::Patch { file_path, .. }
            | ParsedOperation::Overwrite { file_path, .. }
            | ParsedOperation::Delete { file_path } => file_path,
            ParsedOperation::Move { from_path, .. } => from_path,
        }
    }
}

/// Input text plus the spans already claimed by earlier matchers.
#[derive(Debug, Clone)]
pub struct Residual<'a> {
    text: &'a str,
    consumed: Vec<Range<usize>>,
}

impl<'a> Residual<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            consumed: Vec::new(),
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    /// True when no consumed span overlaps `range`.
    pub fn is_free(&self, range: &Range<usize>) -> bool {
        !self
            .consumed
            .iter()
            .any(|c| c.start < range.end && range.start < c.end)
    }

    /// Derive the residual left after claiming `spans`.
    pub fn consume(&self, spans: &[Range<usize>]) -> Residual<'a> {
        let mut consumed = self.consumed.clone();
        consumed.extend(spans.iter().cloned());
        consumed.sort_by_key(|r| r.start);
        Residual {
            text: self.text,
            consumed,
        }
    }
}

/// An operation with the byte offset it was found at.
#[derive(Debug, Clone)]
pub struct Found {
    pub offset: usize,
    pub op: ParsedOperation,
}

#[derive(Debug, Default)]
pub struct MatchOutput {
    pub found: Vec<Found>,
    pub spans: Vec<Range<usize>>,
}

/// One recognition pass over the residual input.
pub trait Matcher {
    fn name(&self) -> &'static str;

    fn scan(&self, input: &Residual<'_>, fences: &[Fence]) -> MatchOutput;
}

/// Parse markdown into raw operations in document order.
#[instrument(level = "debug", skip_all, fields(bytes = markdown.len()))]
pub fn parse(markdown: &str) -> Vec<ParsedOperation> {
    let fences = scan_fences(markdown);
    let matchers: [&dyn Matcher; 3] = [
        &directive::DirectiveMatcher,
        &udiff::DiffMatcher,
        &block::PathBlockMatcher,
    ];

    let mut residual = Residual::new(markdown);
    let mut found = Vec::new();
    for matcher in matchers {
        let out = matcher.scan(&residual, &fences);
        debug!(
            matcher = matcher.name(),
            ops = out.found.len(),
            spans = out.spans.len(),
            "matcher pass"
        );
        found.extend(out.found);
        residual = residual.consume(&out.spans);
    }

    // Stable: ops sharing an offset keep matcher emission order
    found.sort_by_key(|f| f.offset);
    found.into_iter().map(|f| f.op).collect()
}

/// A line of the input with its byte range.
#[derive(Debug, Clone, Copy)]
pub struct LineSpan<'a> {
    /// Offset of the first byte of the line
    pub start: usize,
    /// Offset just past the line terminator
    pub end: usize,
    /// Line content without `\n` / `\r\n`
    pub text: &'a str,
}

impl LineSpan<'_> {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Split `text` into lines, keeping byte offsets into the original.
pub fn line_spans(text: &str) -> Vec<LineSpan<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    for piece in text.split_inclusive('\n') {
        let end = start + piece.len();
        let body = piece.strip_suffix('\n').unwrap_or(piece);
        let body = body.strip_suffix('\r').unwrap_or(body);
        out.push(LineSpan {
            start,
            end,
            text: body,
        });
        start = end;
    }
    out
}
