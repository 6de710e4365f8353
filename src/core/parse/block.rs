//! Fenced blocks headed by a file path
//!
//! The header is either a path token in the info string (```` ```rust src/main.rs ````)
//! or the last non-blank line before the fence. A body holding
//! `<<<<<<< SEARCH` blocks is a patch; anything else replaces the whole file.

use std::sync::LazyLock;

use regex::Regex;

use super::{
    Fence, Found, LineSpan, MatchOutput, Matcher, ParsedOperation, Residual, SearchReplace,
    line_spans,
};
use crate::core::ops::normalize_rel_path;

const SEARCH_MARKER: &str = "<<<<<<< SEARCH";

/// Blank lines allowed between a header line and its fence
const MAX_HEADER_GAP: usize = 2;

static SEARCH_REPLACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^<<<<<<< SEARCH[ \t]*\r?\n(.*?)^=======[ \t]*\r?\n(.*?)^>>>>>>> REPLACE")
        .expect("valid search/replace regex")
});

static BARE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_@+~\-.][A-Za-z0-9_.@+~\-/\\]*$").expect("valid path regex")
});

/// Command word that may precede the header path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCommand {
    Create,
    Overwrite,
    Patch,
}

impl HeaderCommand {
    fn from_word(word: &str) -> Option<Self> {
        match word.trim_end_matches(':') {
            "CREATE" => Some(Self::Create),
            "OVERWRITE" | "REWRITE" => Some(Self::Overwrite),
            "PATCH" | "MODIFY" => Some(Self::Patch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub command: Option<HeaderCommand>,
    pub path: String,
}

fn strip_wrapping<'a>(s: &'a str, marks: &[&str]) -> &'a str {
    let mut s = s.trim();
    loop {
        let before = s;
        for m in marks {
            if let Some(inner) = s.strip_prefix(m).and_then(|r| r.strip_suffix(m)) {
                s = inner.trim();
            }
        }
        if s == before {
            return s;
        }
    }
}

fn strip_label(s: &str) -> &str {
    for label in ["file:", "filename:", "path:"] {
        if s.len() >= label.len() && s[..label.len()].eq_ignore_ascii_case(label) {
            return s[label.len()..].trim();
        }
    }
    s
}

/// Remove markdown decoration around a header line.
fn undecorate(line: &str) -> String {
    // `**` never appears in a path; `__` can (`__init__.py`), so only unwrap it
    let bold_free = line.replace("**", "");
    let s = bold_free.trim().trim_start_matches('#').trim();
    let s = ["- ", "* ", "+ "]
        .iter()
        .find_map(|b| s.strip_prefix(b))
        .unwrap_or(s)
        .trim();
    let s = strip_wrapping(s, &["__"]);
    let s = s.strip_suffix(':').unwrap_or(s).trim();
    let s = strip_label(s);
    strip_wrapping(s, &["__"]).to_string()
}

fn is_bare_path(token: &str) -> bool {
    BARE_PATH_RE.is_match(token)
        && (token.contains('.') || token.contains('/'))
        && !token.ends_with('.')
        && !token.ends_with('/')
}

/// Parse a path token; backquoted spans may hold anything `normalize_rel_path` accepts.
fn path_token(token: &str, lenient: bool) -> Option<String> {
    let quoted = token.len() >= 2 && token.starts_with('`') && token.ends_with('`');
    if quoted {
        let inner = &token[1..token.len() - 1];
        if inner.contains('`') {
            return None;
        }
        return normalize_rel_path(inner);
    }
    if token.chars().any(char::is_whitespace) {
        return None;
    }
    let unquoted = token.trim_matches(|c| c == '\'' || c == '"');
    if lenient || is_bare_path(unquoted) {
        normalize_rel_path(unquoted)
    } else {
        None
    }
}

/// Parse a header line such as `### **File: src/a.rs**` or `CREATE src/new.ts`.
pub fn parse_header(line: &str) -> Option<Header> {
    let s = undecorate(line);
    if s.is_empty() {
        return None;
    }
    if let Some((word, rest)) = s.split_once(char::is_whitespace) {
        if let Some(command) = HeaderCommand::from_word(word) {
            return path_token(&undecorate(rest), true).map(|path| Header {
                command: Some(command),
                path,
            });
        }
    }
    path_token(&s, false).map(|path| Header {
        command: None,
        path,
    })
}

/// Header carried in the info string, e.g. `rust src/main.rs` or `rust:src/main.rs`.
fn info_header(fence: &Fence) -> Option<Header> {
    fence.info.split_whitespace().find_map(|token| {
        let candidate = token.rsplit(':').next().unwrap_or(token);
        path_token(candidate, false)
            .filter(|_| candidate.contains('/') || candidate.contains('.'))
            .map(|path| Header {
                command: None,
                path,
            })
    })
}

/// Strip the single line terminator the regex leaves before a marker line.
fn chomp(s: &str) -> &str {
    let s = s.strip_suffix('\n').unwrap_or(s);
    s.strip_suffix('\r').unwrap_or(s)
}

/// Extract every SEARCH/REPLACE block in `body`.
pub fn parse_search_replace(body: &str) -> Vec<SearchReplace> {
    SEARCH_REPLACE_RE
        .captures_iter(body)
        .map(|caps| SearchReplace {
            search: chomp(&caps[1]).to_string(),
            replace: chomp(&caps[2]).to_string(),
        })
        .collect()
}

/// Build the operation for a headed fence body.
fn block_operation(header: Header, body: &str) -> Option<ParsedOperation> {
    let Header { command, path } = header;
    let creates = command == Some(HeaderCommand::Create);

    if body.contains(SEARCH_MARKER) {
        let blocks = parse_search_replace(body);
        if blocks.is_empty() {
            return None;
        }
        let is_new_file = creates || blocks[0].search.trim().is_empty();
        return Some(ParsedOperation::Patch {
            file_path: path,
            blocks,
            is_new_file,
        });
    }

    if command == Some(HeaderCommand::Patch) {
        return None;
    }
    Some(ParsedOperation::Overwrite {
        file_path: path,
        content: body.to_string(),
        is_new_file: creates,
    })
}

/// Nearest non-blank line above the fence, within `MAX_HEADER_GAP` blank lines.
fn header_line<'a>(lines: &[LineSpan<'a>], fence: &Fence) -> Option<LineSpan<'a>> {
    let idx = lines.iter().position(|l| l.start == fence.open_line.start)?;
    lines[..idx]
        .iter()
        .rev()
        .take(MAX_HEADER_GAP + 1)
        .find(|l| !l.text.trim().is_empty())
        .copied()
}

/// Claims free fences whose header names a file.
pub struct PathBlockMatcher;

impl Matcher for PathBlockMatcher {
    fn name(&self) -> &'static str {
        "path-block"
    }

    fn scan(&self, input: &Residual<'_>, fences: &[Fence]) -> MatchOutput {
        let mut out = MatchOutput::default();
        let lines = line_spans(input.text());

        for fence in fences {
            if !input.is_free(&fence.span) {
                continue;
            }
            // Unclaimed diff fences are never whole-file bodies
            if matches!(fence.lang().as_str(), "diff" | "udiff" | "patch") {
                continue;
            }

            let (header, header_span) = match info_header(fence) {
                Some(h) => (h, None),
                None => {
                    let Some(line) = header_line(&lines, fence) else {
                        continue;
                    };
                    if fences.iter().any(|f| f.contains(line.start))
                        || !input.is_free(&line.range())
                    {
                        continue;
                    }
                    let Some(h) = parse_header(line.text) else {
                        continue;
                    };
                    (h, Some(line.range()))
                }
            };

            let Some(op) = block_operation(header, &fence.body) else {
                continue;
            };
            let offset = header_span
                .as_ref()
                .map_or(fence.span.start, |r| r.start);
            out.found.push(Found { offset, op });
            out.spans.push(fence.span.clone());
            out.spans.extend(header_span);
        }
        out
    }
}
