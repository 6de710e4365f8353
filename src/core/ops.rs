//! Typed change operations and review records
//!
//! `ChangeOperation` is the resolved, ready-to-apply form of one file edit.
//! `ReviewChange` wraps it with a session-stable id and a review status.

use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Content ID for change detection (xxh64 hash)
pub type ContentId = String;

/// Shared normalizer for content ids: LF line endings, no trailing blanks
pub fn normalize_for_cid(s: &str) -> String {
    s.lines()
        .map(|l| l.trim_end_matches(&[' ', '\t', '\r'][..]))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Generate deterministic content ID using xxh64 with fixed seed
pub fn generate_cid(content: &str) -> ContentId {
    let normalized = normalize_for_cid(content);
    let h = xxhash_rust::xxh64::xxh64(normalized.as_bytes(), 0);
    format!("{:016x}", h)
}

/// One resolved file mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeOperation {
    #[serde(rename_all = "camelCase")]
    Patch {
        file_path: String,
        content: String,
        is_new_file: bool,
        total_blocks: u32,
        applied_blocks: u32,
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

impl ChangeOperation {
    /// The path read or mutated first; `from_path` for moves.
    pub fn primary_path(&self) -> &str {
        match self {
            ChangeOperation::Patch { file_path, .. }
            | ChangeOperation::Overwrite { file_path, .. }
            | ChangeOperation::Delete { file_path } => file_path,
            ChangeOperation::Move { from_path, .. } => from_path,
        }
    }

    /// Short lowercase label, matching the serialized tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeOperation::Patch { .. } => "patch",
            ChangeOperation::Overwrite { .. } => "overwrite",
            ChangeOperation::Delete { .. } => "delete",
            ChangeOperation::Move { .. } => "move",
        }
    }

    /// Proposed post-image for content-bearing operations.
    pub fn content(&self) -> Option<&str> {
        match self {
            ChangeOperation::Patch { content, .. } | ChangeOperation::Overwrite { content, .. } => {
                Some(content)
            }
            ChangeOperation::Delete { .. } | ChangeOperation::Move { .. } => None,
        }
    }

    /// True when the operation creates the file it writes.
    pub fn creates_file(&self) -> bool {
        match self {
            ChangeOperation::Patch { is_new_file, .. }
            | ChangeOperation::Overwrite { is_new_file, .. } => *is_new_file,
            ChangeOperation::Delete { .. } | ChangeOperation::Move { .. } => false,
        }
    }

    /// True for a patch where some search block was not located.
    pub fn is_partial_patch(&self) -> bool {
        matches!(
            self,
            ChangeOperation::Patch { total_blocks, applied_blocks, .. }
                if applied_blocks < total_blocks
        )
    }

    /// Human-readable target, e.g. `a.ts → b.ts` for moves.
    pub fn describe_target(&self) -> String {
        match self {
            ChangeOperation::Move { from_path, to_path } => format!("{from_path} → {to_path}"),
            other => other.primary_path().to_string(),
        }
    }
}

/// Session-stable change identifier (1-based, list position at creation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(pub u32);

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ChangeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse::<u32>().map(ChangeId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Applied,
    Error,
    Identical,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Applied => "applied",
            ReviewStatus::Error => "error",
            ReviewStatus::Identical => "identical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewChange {
    pub id: ChangeId,
    pub operation: ChangeOperation,
    pub status: ReviewStatus,
}

impl ReviewChange {
    pub fn new(id: ChangeId, operation: ChangeOperation) -> Self {
        Self {
            id,
            operation,
            status: ReviewStatus::Pending,
        }
    }
}

/// Normalize a path captured from markdown into project-relative form.
///
/// Strips quotes/backticks, converts backslashes, drops `./` segments.
/// Returns `None` for empty, absolute, or parent-escaping paths.
pub fn normalize_rel_path(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '`' || c == '\'' || c == '"')
        .trim();
    if trimmed.is_empty() {
        return None;
    }
    let slashed = trimmed.replace('\\', "/");
    if slashed.starts_with('/') || Path::new(&slashed).is_absolute() {
        return None;
    }
    // Windows drive letters survive Path::is_absolute on unix
    if slashed.len() >= 2 && slashed.as_bytes()[1] == b':' {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    for c in Path::new(&slashed).components() {
        match c {
            Component::Normal(p) => parts.push(p.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
