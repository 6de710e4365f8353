//! Unified diff fences
//!
//! Each `@@` hunk becomes one search/replace block: context plus removed
//! lines form the search text, context plus added lines the replacement.
//! Line numbers in hunk headers are ignored; LLMs rarely get them right.

use super::{Fence, Found, MatchOutput, Matcher, ParsedOperation, Residual, SearchReplace};
use crate::core::ops::normalize_rel_path;

/// A header side: either a real path or `/dev/null`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DiffSide {
    DevNull,
    Path(String),
}

fn parse_side(raw: &str) -> Option<DiffSide> {
    // Drop trailing "\t<timestamp>" that diff(1) emits
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == "/dev/null" {
        return Some(DiffSide::DevNull);
    }
    let raw = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    normalize_rel_path(raw).map(DiffSide::Path)
}

#[derive(Debug, Default)]
struct Hunk {
    search: Vec<String>,
    replace: Vec<String>,
}

impl Hunk {
    fn is_empty(&self) -> bool {
        self.search.is_empty() && self.replace.is_empty()
    }

    fn into_block(self) -> SearchReplace {
        SearchReplace {
            search: self.search.join("\n"),
            replace: self.replace.join("\n"),
        }
    }
}

/// One `--- / +++` section of a diff.
#[derive(Debug)]
struct FileSection {
    offset: usize,
    old: DiffSide,
    new: DiffSide,
    hunks: Vec<Hunk>,
}

fn is_header_pair(lines: &[&str], i: usize) -> bool {
    lines[i].starts_with("--- ") && i + 1 < lines.len() && lines[i + 1].starts_with("+++ ")
}

fn split_sections(body: &str) -> Vec<FileSection> {
    let lines: Vec<&str> = body.lines().map(|l| l.trim_end_matches('\r')).collect();
    let mut offsets = Vec::with_capacity(lines.len());
    let mut pos = 0;
    for piece in body.split_inclusive('\n') {
        offsets.push(pos);
        pos += piece.len();
    }

    let mut sections = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if !is_header_pair(&lines, i) {
            i += 1;
            continue;
        }
        let old = parse_side(&lines[i][4..]);
        let new = parse_side(&lines[i + 1][4..]);
        let offset = offsets.get(i).copied().unwrap_or(0);
        i += 2;

        let mut hunks: Vec<Hunk> = Vec::new();
        let mut current: Option<Hunk> = None;
        while i < lines.len() && !is_header_pair(&lines, i) {
            let line = lines[i];
            i += 1;
            if line.starts_with("@@") {
                if let Some(h) = current.take().filter(|h| !h.is_empty()) {
                    hunks.push(h);
                }
                current = Some(Hunk::default());
                continue;
            }
            let Some(hunk) = current.as_mut() else {
                continue;
            };
            match line.chars().next() {
                Some(' ') => {
                    hunk.search.push(line[1..].to_string());
                    hunk.replace.push(line[1..].to_string());
                }
                // Editors and LLMs often strip the lone space of blank context lines
                None => {
                    hunk.search.push(String::new());
                    hunk.replace.push(String::new());
                }
                Some('-') => hunk.search.push(line[1..].to_string()),
                Some('+') => hunk.replace.push(line[1..].to_string()),
                Some('\\') => {}
                // "diff --git", "index ..." and similar end the hunk
                Some(_) => {
                    if let Some(h) = current.take().filter(|h| !h.is_empty()) {
                        hunks.push(h);
                    }
                }
            }
        }
        if let Some(h) = current.take().filter(|h| !h.is_empty()) {
            hunks.push(h);
        }

        if let (Some(old), Some(new)) = (old, new) {
            sections.push(FileSection {
                offset,
                old,
                new,
                hunks,
            });
        }
    }
    sections
}

fn section_ops(section: FileSection) -> Vec<ParsedOperation> {
    let FileSection { old, new, hunks, .. } = section;
    match (old, new) {
        (DiffSide::DevNull, DiffSide::DevNull) => Vec::new(),
        (DiffSide::DevNull, DiffSide::Path(file_path)) => {
            let content: Vec<String> = hunks.into_iter().flat_map(|h| h.replace).collect();
            let mut replace = content.join("\n");
            if !replace.is_empty() {
                replace.push('\n');
            }
            vec![ParsedOperation::Patch {
                file_path,
                blocks: vec![SearchReplace {
                    search: String::new(),
                    replace,
                }],
                is_new_file: true,
            }]
        }
        (DiffSide::Path(file_path), DiffSide::DevNull) => {
            vec![ParsedOperation::Delete { file_path }]
        }
        (DiffSide::Path(from_path), DiffSide::Path(to_path)) => {
            let mut ops = Vec::new();
            // Edit in place first, then rename; reverting in reverse order undoes cleanly
            if !hunks.is_empty() {
                ops.push(ParsedOperation::Patch {
                    file_path: from_path.clone(),
                    blocks: hunks.into_iter().map(Hunk::into_block).collect(),
                    is_new_file: false,
                });
            }
            if from_path != to_path {
                ops.push(ParsedOperation::Move { from_path, to_path });
            }
            ops
        }
    }
}

/// Parse the body of a unified diff into operations with body-relative offsets.
pub fn parse_unified_diff(body: &str) -> Vec<(usize, ParsedOperation)> {
    split_sections(body)
        .into_iter()
        .flat_map(|section| {
            let offset = section.offset;
            section_ops(section).into_iter().map(move |op| (offset, op))
        })
        .collect()
}

fn looks_like_diff(fence: &Fence) -> bool {
    matches!(fence.lang().as_str(), "diff" | "udiff" | "patch")
        || fence.body.trim_start().starts_with("--- ")
}

/// Claims diff fences that yield at least one operation.
pub struct DiffMatcher;

impl Matcher for DiffMatcher {
    fn name(&self) -> &'static str {
        "unified-diff"
    }

    fn scan(&self, input: &Residual<'_>, fences: &[Fence]) -> MatchOutput {
        let mut out = MatchOutput::default();
        for fence in fences {
            if !looks_like_diff(fence) || !input.is_free(&fence.span) {
                continue;
            }
            let ops = parse_unified_diff(&fence.body);
            if ops.is_empty() {
                continue;
            }
            // Body starts on the line after the opening fence
            let base = fence.open_line.end;
            out.found.extend(ops.into_iter().map(|(rel, op)| Found {
                offset: base + rel,
                op,
            }));
            out.spans.push(fence.span.clone());
        }
        out
    }
}
