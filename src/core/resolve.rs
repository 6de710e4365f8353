//! Resolution of parsed operations against base content
//!
//! All Patch/Overwrite operations for one file are folded in document order
//! onto that file's pre-image:
//! 1. Patch blocks apply one by one; misses are counted, not fatal
//! 2. Overwrite replaces the content and resets both block counters
//! 3. The last operation's kind decides the resolved kind
//!
//! Delete and Move pass through untouched. Output order follows each file's
//! first mention.

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, instrument};

use crate::core::ops::ChangeOperation;
use crate::core::parse::ParsedOperation;
use crate::core::patch::{apply_block, has_mixed_endings, restore_line_endings, to_crlf, to_lf, uses_crlf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Fall back to trimmed-line matching when an exact search misses
    pub fuzzy_whitespace: bool,
    /// Terminate whole-file bodies with a newline
    pub ensure_trailing_newline: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            fuzzy_whitespace: true,
            ensure_trailing_newline: true,
        }
    }
}

/// Distinct paths a batch will read or mutate, in first-mention order.
pub fn snapshot_paths(ops: &[ParsedOperation]) -> Vec<String> {
    let set: IndexSet<&str> = ops.iter().map(ParsedOperation::primary_path).collect();
    set.into_iter().map(str::to_string).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastKind {
    Patch,
    Overwrite,
}

#[derive(Debug)]
struct FileAcc {
    existed: bool,
    crlf: bool,
    /// Pre-image kept when it mixes CRLF and LF, for per-line endings
    mixed: Option<String>,
    /// LF-normalized working content
    content: String,
    total_blocks: u32,
    applied_blocks: u32,
    last: LastKind,
}

impl FileAcc {
    fn new(base: Option<String>) -> Self {
        let crlf = base.as_deref().is_some_and(uses_crlf);
        let content = base.as_deref().map(to_lf).unwrap_or_default();
        Self {
            existed: base.is_some(),
            crlf,
            mixed: base.filter(|b| has_mixed_endings(b)),
            content,
            total_blocks: 0,
            applied_blocks: 0,
            last: LastKind::Patch,
        }
    }

    fn finish(self, file_path: String, opts: &ResolveOptions) -> ChangeOperation {
        let is_new_file = !self.existed;
        let mut content = self.content;
        let whole_body = self.last == LastKind::Overwrite || is_new_file;
        if opts.ensure_trailing_newline && whole_body && !content.is_empty() && !content.ends_with('\n')
        {
            content.push('\n');
        }
        if let Some(original) = &self.mixed {
            content = restore_line_endings(original, &content);
        } else if self.crlf {
            content = to_crlf(&content);
        }

        match self.last {
            LastKind::Patch => ChangeOperation::Patch {
                file_path,
                content,
                is_new_file,
                total_blocks: self.total_blocks,
                applied_blocks: self.applied_blocks,
            },
            LastKind::Overwrite => ChangeOperation::Overwrite {
                file_path,
                content,
                is_new_file,
            },
        }
    }
}

enum Slot {
    File(String),
    Passthrough(ChangeOperation),
}

/// Fold parsed operations into resolved change operations.
///
/// `base` returns a file's pre-image, or `None` when the file does not exist.
#[instrument(level = "debug", skip_all, fields(ops = ops.len()))]
pub fn resolve<F>(ops: &[ParsedOperation], base: F, opts: &ResolveOptions) -> Vec<ChangeOperation>
where
    F: Fn(&str) -> Option<String>,
{
    let mut slots: Vec<Slot> = Vec::new();
    let mut files: IndexMap<String, FileAcc> = IndexMap::new();

    for op in ops {
        match op {
            ParsedOperation::Patch {
                file_path, blocks, ..
            } => {
                let acc = files.entry(file_path.clone()).or_insert_with(|| {
                    slots.push(Slot::File(file_path.clone()));
                    FileAcc::new(base(file_path))
                });
                for (i, block) in blocks.iter().enumerate() {
                    acc.total_blocks += 1;
                    match apply_block(&acc.content, block, opts.fuzzy_whitespace) {
                        Some((next, kind)) => {
                            acc.content = next;
                            acc.applied_blocks += 1;
                            debug!(path = %file_path, block = i, ?kind, "search block located");
                        }
                        None => debug!(path = %file_path, block = i, "search block not found"),
                    }
                }
                acc.last = LastKind::Patch;
            }
            ParsedOperation::Overwrite {
                file_path, content, ..
            } => {
                let acc = files.entry(file_path.clone()).or_insert_with(|| {
                    slots.push(Slot::File(file_path.clone()));
                    FileAcc::new(base(file_path))
                });
                acc.content = to_lf(content);
                acc.total_blocks = 0;
                acc.applied_blocks = 0;
                acc.last = LastKind::Overwrite;
            }
            ParsedOperation::Delete { file_path } => {
                slots.push(Slot::Passthrough(ChangeOperation::Delete {
                    file_path: file_path.clone(),
                }));
            }
            ParsedOperation::Move { from_path, to_path } => {
                slots.push(Slot::Passthrough(ChangeOperation::Move {
                    from_path: from_path.clone(),
                    to_path: to_path.clone(),
                }));
            }
        }
    }

    slots
        .into_iter()
        .filter_map(|slot| match slot {
            Slot::Passthrough(op) => Some(op),
            Slot::File(path) => files
                .shift_remove(&path)
                .map(|acc| acc.finish(path, opts)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parse::SearchReplace;
    use std::collections::HashMap;

    fn sr(search: &str, replace: &str) -> SearchReplace {
        SearchReplace {
            search: search.into(),
            replace: replace.into(),
        }
    }

    fn patch(path: &str, blocks: Vec<SearchReplace>) -> ParsedOperation {
        ParsedOperation::Patch {
            file_path: path.into(),
            blocks,
            is_new_file: false,
        }
    }

    fn overwrite(path: &str, content: &str) -> ParsedOperation {
        ParsedOperation::Overwrite {
            file_path: path.into(),
            content: content.into(),
            is_new_file: false,
        }
    }

    fn bases(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn partial_patch_counts_located_blocks() {
        let base = bases(&[("a.rs", "one\ntwo\nthree\n")]);
        let ops = [patch(
            "a.rs",
            vec![sr("one", "uno"), sr("missing", "x"), sr("three", "tres")],
        )];
        let out = resolve(&ops, |p| base.get(p).cloned(), &ResolveOptions::default());
        assert_eq!(
            out,
            vec![ChangeOperation::Patch {
                file_path: "a.rs".into(),
                content: "uno\ntwo\ntres\n".into(),
                is_new_file: false,
                total_blocks: 3,
                applied_blocks: 2,
            }]
        );
    }

    #[test]
    fn overwrite_resets_counters_and_last_kind_wins() {
        let base = bases(&[("a.rs", "old\n")]);
        let ops = [
            patch("a.rs", vec![sr("nope", "x")]),
            overwrite("a.rs", "fresh"),
            patch("a.rs", vec![sr("fresh", "fresher")]),
        ];
        let out = resolve(&ops, |p| base.get(p).cloned(), &ResolveOptions::default());
        assert_eq!(
            out,
            vec![ChangeOperation::Patch {
                file_path: "a.rs".into(),
                content: "fresher".into(),
                is_new_file: false,
                total_blocks: 1,
                applied_blocks: 1,
            }]
        );

        let ops = [patch("a.rs", vec![sr("old", "x")]), overwrite("a.rs", "new")];
        let out = resolve(&ops, |p| base.get(p).cloned(), &ResolveOptions::default());
        assert_eq!(
            out,
            vec![ChangeOperation::Overwrite {
                file_path: "a.rs".into(),
                content: "new\n".into(),
                is_new_file: false,
            }]
        );
    }

    #[test]
    fn order_follows_first_mention() {
        let base = bases(&[("a", "a\n"), ("b", "b\n")]);
        let ops = [
            patch("b", vec![sr("b", "B")]),
            ParsedOperation::Delete {
                file_path: "c".into(),
            },
            patch("a", vec![sr("a", "A")]),
            patch("b", vec![sr("B", "BB")]),
        ];
        let out = resolve(&ops, |p| base.get(p).cloned(), &ResolveOptions::default());
        let paths: Vec<_> = out.iter().map(ChangeOperation::primary_path).collect();
        assert_eq!(paths, ["b", "c", "a"]);
        assert_eq!(out[0].content(), Some("BB\n"));
    }

    #[test]
    fn absent_base_marks_new_file() {
        let ops = [overwrite("n.txt", "hi")];
        let out = resolve(&ops, |_| None, &ResolveOptions::default());
        assert!(out[0].creates_file());
        assert_eq!(out[0].content(), Some("hi\n"));

        let opts = ResolveOptions {
            ensure_trailing_newline: false,
            ..ResolveOptions::default()
        };
        let out = resolve(&ops, |_| None, &opts);
        assert_eq!(out[0].content(), Some("hi"));
    }

    #[test]
    fn crlf_files_keep_crlf() {
        let base = bases(&[("w.txt", "a\r\nb\r\n")]);
        let ops = [patch("w.txt", vec![sr("a\nb", "a\nB")])];
        let out = resolve(&ops, |p| base.get(p).cloned(), &ResolveOptions::default());
        assert_eq!(out[0].content(), Some("a\r\nB\r\n"));
    }

    #[test]
    fn mixed_endings_are_kept_per_line() {
        let base = bases(&[("m.txt", "one\r\ntwo\nthree\nfour\n")]);
        let ops = [patch("m.txt", vec![sr("three", "THREE")])];
        let out = resolve(&ops, |p| base.get(p).cloned(), &ResolveOptions::default());
        assert_eq!(out[0].content(), Some("one\r\ntwo\nTHREE\nfour\n"));
    }

    #[test]
    fn snapshot_paths_are_distinct_and_use_move_source() {
        let ops = [
            patch("a", vec![]),
            ParsedOperation::Move {
                from_path: "m".into(),
                to_path: "n".into(),
            },
            overwrite("a", ""),
        ];
        assert_eq!(snapshot_paths(&ops), ["a", "m"]);
    }
}
