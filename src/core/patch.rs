//! Search/replace block application
//!
//! Blocks are matched against LF-normalized text. Matching is exact first
//! (first occurrence wins); when that fails and whitespace-tolerant matching
//! is enabled, a contiguous run of lines equal after trimming is accepted.

use similar::{ChangeTag, TextDiff};

use crate::core::parse::SearchReplace;

/// How a search block was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    /// Lines matched after trimming leading/trailing whitespace
    Whitespace,
    /// Empty search against an empty base
    Empty,
}

/// Convert CRLF to LF; lone CRs are kept.
pub fn to_lf(s: &str) -> String {
    if s.contains("\r\n") {
        s.replace("\r\n", "\n")
    } else {
        s.to_string()
    }
}

/// True when `s` predominantly uses CRLF line endings.
pub fn uses_crlf(s: &str) -> bool {
    let crlf = s.matches("\r\n").count();
    let lf = s.matches('\n').count();
    crlf > 0 && crlf * 2 >= lf
}

/// Convert LF to CRLF, leaving existing CRLF intact.
pub fn to_crlf(s: &str) -> String {
    to_lf(s).replace('\n', "\r\n")
}

/// True when `s` uses both CRLF and bare LF line endings.
pub fn has_mixed_endings(s: &str) -> bool {
    let crlf = s.matches("\r\n").count();
    crlf > 0 && crlf < s.matches('\n').count()
}

/// Re-terminate the lines of `edited` (LF-normalized) with the endings they
/// carried in `original`. Lines absent from `original` take its dominant ending.
pub fn restore_line_endings(original: &str, edited: &str) -> String {
    let endings: Vec<&str> = original
        .split_inclusive('\n')
        .map(|l| if l.ends_with("\r\n") { "\r\n" } else { "\n" })
        .collect();
    let fallback = if uses_crlf(original) { "\r\n" } else { "\n" };

    let base = to_lf(original);
    let diff = TextDiff::from_lines(base.as_str(), edited);
    let mut out = String::with_capacity(edited.len() + endings.len());
    for change in diff.iter_all_changes() {
        let line = change.value();
        let Some(body) = line.strip_suffix('\n') else {
            if change.tag() != ChangeTag::Delete {
                out.push_str(line);
            }
            continue;
        };
        let ending = match change.tag() {
            ChangeTag::Delete => continue,
            ChangeTag::Equal => change
                .old_index()
                .and_then(|i| endings.get(i))
                .copied()
                .unwrap_or(fallback),
            ChangeTag::Insert => fallback,
        };
        out.push_str(body);
        out.push_str(ending);
    }
    out
}

/// Apply one block to `content`. Returns `None` when the search text is not found.
pub fn apply_block(content: &str, block: &SearchReplace, fuzzy: bool) -> Option<(String, MatchKind)> {
    let search = to_lf(&block.search);
    let replace = to_lf(&block.replace);

    if search.trim().is_empty() {
        return content
            .trim()
            .is_empty()
            .then(|| (replace, MatchKind::Empty));
    }

    if let Some(at) = content.find(&search) {
        let mut out = String::with_capacity(content.len() + replace.len());
        out.push_str(&content[..at]);
        out.push_str(&replace);
        out.push_str(&content[at + search.len()..]);
        return Some((out, MatchKind::Exact));
    }

    if fuzzy {
        return replace_fuzzy(content, &search, &replace).map(|s| (s, MatchKind::Whitespace));
    }
    None
}

/// First window of `haystack` whose lines equal `needle` after trimming.
pub fn find_contiguous_match_fuzzy(haystack: &[&str], needle: &[&str]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&start| {
        needle
            .iter()
            .enumerate()
            .all(|(i, n)| haystack[start + i].trim() == n.trim())
    })
}

fn trim_blank_edges<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].to_vec(),
        _ => Vec::new(),
    }
}

fn replace_fuzzy(content: &str, search: &str, replace: &str) -> Option<String> {
    // Pieces keep their terminators so untouched lines round-trip byte for byte
    let pieces: Vec<&str> = content.split_inclusive('\n').collect();
    let bare: Vec<&str> = pieces
        .iter()
        .map(|p| p.strip_suffix('\n').unwrap_or(p))
        .collect();
    let search_lines: Vec<&str> = search.lines().collect();
    let needle = trim_blank_edges(&search_lines);

    let start = find_contiguous_match_fuzzy(&bare, &needle)?;
    let end = start + needle.len();

    let mut out = String::with_capacity(content.len() + replace.len());
    for p in &pieces[..start] {
        out.push_str(p);
    }
    let replacement = replace.trim_end_matches('\n');
    out.push_str(replacement);
    if pieces[end - 1].ends_with('\n') && !replacement.is_empty() {
        out.push('\n');
    }
    for p in &pieces[end..] {
        out.push_str(p);
    }
    Some(out)
}
