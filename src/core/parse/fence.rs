//! Fenced code block scanner
//!
//! Fences open with three or more backticks (or tildes) and close on a bare
//! fence of at least the same length. An inner fence that carries an info
//! string nests, so a markdown file containing its own code samples stays in
//! one block.

use std::ops::Range;

use super::{LineSpan, line_spans};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fence {
    /// Opening fence line through the closing fence line (inclusive)
    pub span: Range<usize>,
    /// Byte range of the opening fence line
    pub open_line: Range<usize>,
    /// Info string after the opening fence, trimmed
    pub info: String,
    /// Lines between the fences joined with `\n`, no trailing newline
    pub body: String,
    /// Whether a closing fence was found before end of input
    pub closed: bool,
}

impl Fence {
    /// First word of the info string, lowercased (usually the language).
    pub fn lang(&self) -> String {
        self.info
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase()
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.span.contains(&offset)
    }
}

/// Count of leading fence characters if `t` starts a fence of `ch`.
fn fence_run(t: &str, ch: char) -> Option<usize> {
    let n = t.chars().take_while(|&c| c == ch).count();
    (n >= 3).then_some(n)
}

fn opening(t: &str) -> Option<(char, usize)> {
    ['`', '~']
        .into_iter()
        .find_map(|ch| fence_run(t, ch).map(|n| (ch, n)))
}

/// Find all top-level fenced blocks in `text`.
pub fn scan_fences(text: &str) -> Vec<Fence> {
    let lines = line_spans(text);
    let mut fences = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let t = lines[i].text.trim_start();
        let Some((ch, open_len)) = opening(t) else {
            i += 1;
            continue;
        };

        let info = t[open_len..].trim().to_string();
        // Backtick info strings may not contain backticks (CommonMark)
        if ch == '`' && info.contains('`') {
            i += 1;
            continue;
        }

        let mut depth = 0usize;
        let mut close = None;
        for (j, line) in lines.iter().enumerate().skip(i + 1) {
            let lt = line.text.trim();
            let Some(n) = fence_run(lt, ch) else {
                continue;
            };
            if n < open_len {
                continue;
            }
            if lt[n..].trim().is_empty() {
                if depth == 0 {
                    close = Some(j);
                    break;
                }
                depth -= 1;
            } else {
                depth += 1;
            }
        }

        let body_end = close.unwrap_or(lines.len());
        let body = join_lines(&lines[i + 1..body_end]);
        let span_end = match close {
            Some(j) => lines[j].end,
            None => text.len(),
        };

        fences.push(Fence {
            span: lines[i].start..span_end,
            open_line: lines[i].range(),
            info,
            body,
            closed: close.is_some(),
        });

        i = close.map_or(lines.len(), |j| j + 1);
    }

    fences
}

fn join_lines(lines: &[LineSpan<'_>]) -> String {
    lines
        .iter()
        .map(|l| l.text)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_simple_fence() {
        let text = "intro\n```rust\nfn a() {}\n```\nafter\n";
        let fences = scan_fences(text);
        assert_eq!(fences.len(), 1);
        let f = &fences[0];
        assert_eq!(f.lang(), "rust");
        assert_eq!(f.body, "fn a() {}");
        assert!(f.closed);
        assert_eq!(&text[f.span.clone()], "```rust\nfn a() {}\n```\n");
    }

    #[test]
    fn nested_fence_with_info_string_stays_inside() {
        let text = "```md\n# Doc\n```sh\nls\n```\nend\n```\n";
        let fences = scan_fences(text);
        assert_eq!(fences.len(), 1);
        assert_eq!(fences[0].body, "# Doc\n```sh\nls\n```\nend");
    }

    #[test]
    fn longer_outer_fence_ignores_short_inner() {
        let text = "````\n```\ninner\n```\n````\n";
        let fences = scan_fences(text);
        assert_eq!(fences.len(), 1);
        assert_eq!(fences[0].body, "```\ninner\n```");
    }

    #[test]
    fn unclosed_fence_runs_to_end() {
        let text = "```\nabc\n";
        let fences = scan_fences(text);
        assert_eq!(fences.len(), 1);
        assert!(!fences[0].closed);
        assert_eq!(fences[0].body, "abc");
        assert_eq!(fences[0].span, 0..text.len());
    }

    #[test]
    fn tilde_fences_are_recognized() {
        let fences = scan_fences("~~~py\nx = 1\n~~~\n");
        assert_eq!(fences.len(), 1);
        assert_eq!(fences[0].lang(), "py");
    }

    #[test]
    fn consecutive_fences() {
        let fences = scan_fences("```\na\n```\n```\nb\n```\n");
        assert_eq!(fences.len(), 2);
        assert_eq!(fences[1].body, "b");
    }
}
