//! Backup maintenance operations
//!
//! Listing, inspection and cleanup of the backups created by review sessions.
//! Backups still referenced by a live session or the last review are never
//! removed.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::backup::{
    BackupId, BackupIndexEntry, BackupManifest, BackupStore, FsBackupStore, read_index,
    read_manifest,
};

/// Backup ID resolution result
#[derive(Debug)]
pub enum BackupIdResolution {
    Single(String),
    Multiple(Vec<String>),
    NotFound,
}

/// Concise backup info for listing
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub id: String,
    pub timestamp: String,
    pub files: usize,
    pub absent: usize,
    pub sample_paths: Vec<String>, // First 3 files for quick scanning
}

#[derive(Debug, Clone)]
pub struct ListRequest {
    pub since: Option<String>,
    pub limit: usize,
    pub sort_desc: bool,
}

impl Default for ListRequest {
    fn default() -> Self {
        Self {
            since: None,
            limit: 50,
            sort_desc: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ShowResponse {
    pub manifest: BackupManifest,
    pub backup_path: PathBuf,
    pub total_size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupRequest {
    pub older_than: Option<String>,
    pub keep_latest: Option<usize>,
    pub dry_run: bool,
    /// Also sweep abandoned staging directories under `tmp/`
    pub include_incomplete: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct CleanupResult {
    pub removed: Vec<String>,
    pub protected: Vec<String>,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

fn parsed_ts(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Completed backups from the index, one entry per id, newest first.
fn complete_entries(backups_dir: &Path) -> Result<Vec<BackupIndexEntry>> {
    let mut seen = HashSet::new();
    let mut entries: Vec<_> = read_index(backups_dir)?
        .into_iter()
        .filter(|e| seen.insert(e.id.clone()))
        .filter(|e| backup_is_complete(backups_dir, &e.id))
        .collect();
    entries.sort_by(|a, b| {
        parsed_ts(&b.timestamp)
            .cmp(&parsed_ts(&a.timestamp))
            .then_with(|| b.id.cmp(&a.id))
    });
    Ok(entries)
}

/// List backups with filters, minimizing manifest IO
pub fn list_backups(backups_dir: &Path, req: &ListRequest) -> Result<Vec<BackupInfo>> {
    let since_time = req.since.as_deref().map(parse_relative_time).transpose()?;

    let mut entries = complete_entries(backups_dir)?;
    if let Some(since) = since_time {
        entries.retain(|e| parsed_ts(&e.timestamp).is_some_and(|t| t >= since));
    }
    if !req.sort_desc {
        entries.reverse();
    }
    entries.truncate(req.limit);

    // Manifests are read only for the surviving entries
    Ok(entries
        .into_iter()
        .map(|e| {
            let sample_paths = read_manifest(backups_dir, &e.id)
                .map(|m| m.files.iter().take(3).map(|f| f.path.clone()).collect())
                .unwrap_or_default();
            BackupInfo {
                id: e.id,
                timestamp: e.timestamp,
                files: e.files,
                absent: e.absent,
                sample_paths,
            }
        })
        .collect())
}

/// Show detailed information about a backup
pub fn show_backup(backups_dir: &Path, query: &str) -> Result<ShowResponse> {
    let id = resolve_backup_id(backups_dir, query)?;
    let manifest = read_manifest(backups_dir, &id)?;
    let backup_path = backups_dir.join(&id);
    let total_size = calculate_backup_size(&backup_path)?;
    Ok(ShowResponse {
        manifest,
        backup_path,
        total_size,
    })
}

/// Resolve a backup id: exact, `latest`, a suffix of 8+ chars, or a date prefix.
pub fn resolve_backup_id(backups_dir: &Path, query: &str) -> Result<String> {
    match resolve_backup_id_internal(backups_dir, query)? {
        BackupIdResolution::Single(id) => Ok(id),
        BackupIdResolution::Multiple(matches) => {
            bail!(
                "Ambiguous backup ID '{}'. Matches: {}",
                query,
                matches.join(", ")
            );
        }
        BackupIdResolution::NotFound => {
            bail!("No backup found matching '{}'", query);
        }
    }
}

fn resolve_backup_id_internal(backups_dir: &Path, query: &str) -> Result<BackupIdResolution> {
    let entries = complete_entries(backups_dir)?;

    if query == "latest" {
        return Ok(match entries.first() {
            Some(e) => BackupIdResolution::Single(e.id.clone()),
            None => BackupIdResolution::NotFound,
        });
    }

    let mut matches = Vec::new();
    for e in &entries {
        if e.id == query {
            return Ok(BackupIdResolution::Single(e.id.clone()));
        }
        let suffix = query.len() >= 8 && e.id.ends_with(query);
        let date_prefix = query.contains('-') && e.id.starts_with(query);
        if suffix || date_prefix {
            matches.push(e.id.clone());
        }
    }

    Ok(match matches.len() {
        0 => BackupIdResolution::NotFound,
        1 => BackupIdResolution::Single(matches.remove(0)),
        _ => BackupIdResolution::Multiple(matches),
    })
}

/// Remove old backups. Ids in `protected` are reported but never deleted.
pub fn cleanup_backups(
    store: &FsBackupStore,
    req: &CleanupRequest,
    protected: &[BackupId],
) -> Result<CleanupResult> {
    if req.older_than.is_none() && req.keep_latest.is_none() && !req.include_incomplete {
        bail!("Specify --older-than, --keep-latest, or --include-incomplete");
    }
    let backups_dir = store.backups_dir();
    let bound = req.older_than.as_deref().map(parse_relative_time).transpose()?;
    let protected: HashSet<&str> = protected.iter().map(BackupId::as_str).collect();

    let mut result = CleanupResult::default();
    let entries = complete_entries(backups_dir)?;

    for (rank, e) in entries.iter().enumerate() {
        let too_old = bound.is_some_and(|b| parsed_ts(&e.timestamp).is_some_and(|t| t < b));
        let beyond_keep = req.keep_latest.is_some_and(|k| rank >= k);
        let selected = match (bound.is_some(), req.keep_latest.is_some()) {
            (true, true) => too_old && beyond_keep,
            (true, false) => too_old,
            (false, true) => beyond_keep,
            (false, false) => false,
        };
        if !selected {
            continue;
        }
        if protected.contains(e.id.as_str()) {
            debug!(id = %e.id, "skipping backup held by review state");
            result.protected.push(e.id.clone());
            continue;
        }

        let size = calculate_backup_size(&backups_dir.join(&e.id)).unwrap_or(0);
        if !req.dry_run {
            if let Err(err) = store.delete_backup(&BackupId::new(e.id.clone())) {
                warn!(id = %e.id, error = %err, "backup removal failed");
                result.errors.push(format!("{}: {err}", e.id));
                continue;
            }
        }
        result.bytes_freed += size;
        result.removed.push(e.id.clone());
    }

    if req.include_incomplete {
        sweep_staging(backups_dir, req.dry_run, &mut result)?;
    }
    Ok(result)
}

/// Remove leftover `tmp/<id>` staging dirs.
fn sweep_staging(backups_dir: &Path, dry_run: bool, result: &mut CleanupResult) -> Result<()> {
    let tmp = backups_dir.join("tmp");
    if !tmp.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(&tmp).with_context(|| format!("read {}", tmp.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let size = calculate_backup_size(&entry.path()).unwrap_or(0);
        if !dry_run {
            if let Err(err) = fs::remove_dir_all(entry.path()) {
                result.errors.push(format!("tmp/{name}: {err}"));
                continue;
            }
        }
        result.bytes_freed += size;
        result.removed.push(format!("tmp/{name}"));
    }
    Ok(())
}

/// Check if backup is complete (has DONE marker)
fn backup_is_complete(backups_dir: &Path, id: &str) -> bool {
    backups_dir.join(id).join("DONE").exists()
}

/// Parse relative time specifications like "7d", "24h", "2w"
pub fn parse_relative_time(time_str: &str) -> Result<DateTime<Utc>> {
    let time_str = time_str.trim();
    if time_str.is_empty() {
        bail!("Empty time specification");
    }

    let Some(unit) = time_str.chars().last().filter(|c| "wdhms".contains(*c)) else {
        bail!("Invalid time unit in '{}'. Use w, d, h, m, or s", time_str);
    };
    let number_str = &time_str[..time_str.len() - 1];

    let number: i64 = number_str
        .parse()
        .with_context(|| format!("Invalid number '{}' in time specification", number_str))?;
    if number < 0 {
        bail!("Negative durations are not allowed: '{}'", time_str);
    }

    let duration = match unit {
        'w' => Duration::weeks(number),
        'd' => Duration::days(number),
        'h' => Duration::hours(number),
        'm' => Duration::minutes(number),
        _ => Duration::seconds(number),
    };
    Ok(Utc::now() - duration)
}

/// Size of backed-up payload (excludes manifest and DONE)
fn calculate_backup_size(backup_path: &Path) -> Result<u64> {
    fn visit_dir(dir: &Path, total: &mut u64) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let md = entry.metadata()?;
            if md.is_dir() {
                visit_dir(&path, total)?;
                continue;
            }
            let fname = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
            if fname == "manifest.json" || fname == "DONE" {
                continue;
            }
            *total += md.len();
        }
        Ok(())
    }

    let mut total_size = 0u64;
    if backup_path.exists() {
        visit_dir(backup_path, &mut total_size)?;
    }
    Ok(total_size)
}
