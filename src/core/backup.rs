//! Point-in-time file snapshots keyed by an opaque backup id.
//!
//! A backup lives under `<backups_dir>/<ID>` with a manifest and a DONE
//! marker for crash safety. Files are copied into `<backups_dir>/tmp/<ID>`
//! first and the directory is atomically renamed into place on finalize.
//! Requested paths that did not exist are recorded as absent.

use anyhow::{Context, Result, bail};
use blake3::Hasher as Blake3;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, ErrorKind, Read, Write},
    path::{Component, Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::infra::io::atomic_write;

/// Backed-up file payloads live under this subdirectory of a backup
const FILES_DIR: &str = "files";

/// Opaque handle to one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(String);

impl BackupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("{path} is not present in backup {id}")]
    NotFound { id: BackupId, path: String },
    #[error("backup {0} does not exist or is incomplete")]
    UnknownBackup(BackupId),
    #[error("path must be project-relative: {0}")]
    InvalidPath(String),
    #[error("{path} is not valid UTF-8 text")]
    NotUtf8 { id: BackupId, path: String },
    #[error("checksum mismatch for {path} in backup {id}")]
    ChecksumMismatch { id: BackupId, path: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Snapshot service used by the review controller.
pub trait BackupStore: Send + Sync {
    /// Copy every existing file in `relative_paths`; missing files are recorded as absent.
    fn backup_files(&self, root: &Path, relative_paths: &[String]) -> Result<BackupId, BackupError>;

    /// Backed-up content of one file. `NotFound` when it was absent at backup time,
    /// `NotUtf8` when it is not text.
    fn read_file(&self, id: &BackupId, relative_path: &str) -> Result<String, BackupError>;

    /// Restore one file under `root` to its backed-up bytes.
    fn revert_file(&self, root: &Path, id: &BackupId, relative_path: &str)
    -> Result<(), BackupError>;

    /// Discard the whole backup. Deleting an unknown id is not an error.
    fn delete_backup(&self, id: &BackupId) -> Result<(), BackupError>;
}

/// Per-file metadata recorded in the backup manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBackupMeta {
    pub path: String,             // project-relative, forward slashes
    pub size_bytes: u64,          // backed-up content size
    pub last_modified: u64,       // secs since UNIX_EPOCH (source file)
    pub checksum: Option<String>, // blake3:<hex>
}

/// Manifest describing a completed or in-progress backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: String,        // e.g., 2025-08-14T10-30-15Z_a9Jh5Qx2Lm
    pub timestamp: String, // RFC3339 creation time
    pub root: PathBuf,
    pub success: bool, // set on finalize
    pub last_updated: String,
    pub files: Vec<FileBackupMeta>,
    /// Requested paths that did not exist at backup time
    #[serde(default)]
    pub absent: Vec<String>,
}

impl BackupManifest {
    pub fn file(&self, path: &str) -> Option<&FileBackupMeta> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Lightweight index record for quick listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupIndexEntry {
    pub id: String,
    pub timestamp: String,
    pub success: bool,
    pub files: usize,
    #[serde(default)]
    pub absent: usize,
}

/// Builder for a single backup; stage in tmp, then finalize.
#[derive(Debug)]
pub struct BackupManager {
    root: PathBuf,
    backups_dir: PathBuf,
    id: String,
    tmp_dir: PathBuf,   // .../tmp/<id>
    final_dir: PathBuf, // .../<id>
    manifest: BackupManifest,
    finalized: bool,
}

impl BackupManager {
    /// Start a new backup of files under `root`, staged in `<backups_dir>/tmp/<ID>`.
    pub fn begin(backups_dir: &Path, root: &Path) -> Result<Self> {
        let tmp_root = backups_dir.join("tmp");
        fs::create_dir_all(&tmp_root)
            .with_context(|| format!("create tmp dir: {}", tmp_root.display()))?;

        let id = generate_backup_id();
        let tmp_dir = tmp_root.join(&id);
        let final_dir = backups_dir.join(&id);
        fs::create_dir_all(tmp_dir.join(FILES_DIR))
            .with_context(|| format!("create backup tmp: {}", tmp_dir.display()))?;

        let now = Utc::now().to_rfc3339();
        let manifest = BackupManifest {
            id: id.clone(),
            timestamp: now.clone(),
            root: root.to_path_buf(),
            success: false,
            last_updated: now,
            files: Vec::new(),
            absent: Vec::new(),
        };

        Ok(Self {
            root: root.to_path_buf(),
            backups_dir: backups_dir.to_path_buf(),
            id,
            tmp_dir,
            final_dir,
            manifest,
            finalized: false,
        })
    }

    /// Back up one project-relative file. Returns `false` when it does not exist.
    pub fn backup_file(&mut self, rel: &str) -> Result<bool> {
        let rel_path = validate_repo_rel(Path::new(rel))?;
        let key = rel_key(&rel_path);
        if self.manifest.file(&key).is_some() || self.manifest.absent.contains(&key) {
            return Ok(true);
        }

        let source_path = self.root.join(&rel_path);
        let meta = match fs::metadata(&source_path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %key, "absent at backup time");
                self.manifest.absent.push(key);
                return Ok(false);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("stat source: {}", source_path.display()));
            }
        };
        if !meta.is_file() {
            bail!("unsupported file type for backup: {}", key);
        }

        let backup_path = self.tmp_dir.join(FILES_DIR).join(&rel_path);
        if let Some(parent) = backup_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create backup parent: {}", parent.display()))?;
        }
        // fs::copy follows symlinks, so the target's bytes are captured
        fs::copy(&source_path, &backup_path)
            .with_context(|| format!("copy file to backup: {}", backup_path.display()))?;

        let size_bytes = fs::metadata(&backup_path)
            .with_context(|| format!("stat backup: {}", backup_path.display()))?
            .len();
        let last_modified = meta
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        self.manifest.files.push(FileBackupMeta {
            path: key,
            size_bytes,
            last_modified,
            checksum: Some(stream_blake3(&backup_path)?),
        });
        self.manifest.last_updated = Utc::now().to_rfc3339();
        Ok(true)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write manifest, atomically rename tmp→final, create DONE, append index.
    pub fn finalize(mut self) -> Result<BackupManifest> {
        self.manifest.success = true;
        self.manifest.last_updated = Utc::now().to_rfc3339();

        let manifest_path = self.tmp_dir.join("manifest.json");
        let manifest_text =
            serde_json::to_string_pretty(&self.manifest).context("serialize manifest")?;
        atomic_write(&manifest_path, manifest_text.as_bytes())
            .with_context(|| format!("write manifest: {}", manifest_path.display()))?;
        let _ = sync_dir(&self.tmp_dir);

        fs::rename(&self.tmp_dir, &self.final_dir).with_context(|| {
            format!(
                "rename {} → {}",
                self.tmp_dir.display(),
                self.final_dir.display()
            )
        })?;
        let _ = sync_dir(&self.backups_dir);

        let done_path = self.final_dir.join("DONE");
        fs::write(&done_path, "")
            .with_context(|| format!("create DONE: {}", done_path.display()))?;
        File::open(&done_path)?.sync_all().ok();
        let _ = sync_dir(&self.final_dir);

        // Mark finalized only after successful rename + DONE creation
        self.finalized = true;

        self.append_to_index()?;
        Ok(self.manifest.clone())
    }

    fn append_to_index(&self) -> Result<()> {
        let index_path = self.backups_dir.join("index.jsonl");
        let _guard = acquire_lock(&self.backups_dir.join(".lock"))?;

        let entry = BackupIndexEntry {
            id: self.manifest.id.clone(),
            timestamp: self.manifest.timestamp.clone(),
            success: self.manifest.success,
            files: self.manifest.files.len(),
            absent: self.manifest.absent.len(),
        };
        let line = serde_json::to_string(&entry).context("serialize index entry")?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .with_context(|| format!("open index: {}", index_path.display()))?;
        writeln!(f, "{line}").context("append index")?;
        f.sync_all().ok();
        Ok(())
    }
}

impl Drop for BackupManager {
    fn drop(&mut self) {
        if !self.finalized {
            // Abandoned staging dir; nothing references it
            let _ = fs::remove_dir_all(&self.tmp_dir);
        }
    }
}

/// Filesystem-backed `BackupStore`.
#[derive(Debug, Clone)]
pub struct FsBackupStore {
    backups_dir: PathBuf,
}

impl FsBackupStore {
    pub fn new(backups_dir: impl Into<PathBuf>) -> Self {
        Self {
            backups_dir: backups_dir.into(),
        }
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    fn backup_dir(&self, id: &BackupId) -> Result<PathBuf, BackupError> {
        // Ids are single path segments; reject anything that could escape
        let ok = !id.as_str().is_empty()
            && id.as_str() != "tmp"
            && Path::new(id.as_str()).components().count() == 1
            && matches!(
                Path::new(id.as_str()).components().next(),
                Some(Component::Normal(_))
            );
        if !ok {
            return Err(BackupError::UnknownBackup(id.clone()));
        }
        let dir = self.backups_dir.join(id.as_str());
        if !dir.join("DONE").exists() {
            return Err(BackupError::UnknownBackup(id.clone()));
        }
        Ok(dir)
    }

    fn payload_path(&self, id: &BackupId, rel: &str) -> Result<(PathBuf, String), BackupError> {
        let rel_path =
            validate_repo_rel(Path::new(rel)).map_err(|_| BackupError::InvalidPath(rel.into()))?;
        let dir = self.backup_dir(id)?;
        Ok((dir.join(FILES_DIR).join(&rel_path), rel_key(&rel_path)))
    }

    /// Manifest of a finalized backup.
    pub fn manifest(&self, id: &BackupId) -> Result<BackupManifest, BackupError> {
        self.backup_dir(id)?;
        Ok(read_manifest(&self.backups_dir, id.as_str())?)
    }
}

impl BackupStore for FsBackupStore {
    #[instrument(level = "debug", skip(self, relative_paths), fields(files = relative_paths.len()))]
    fn backup_files(&self, root: &Path, relative_paths: &[String]) -> Result<BackupId, BackupError> {
        fs::create_dir_all(&self.backups_dir)
            .with_context(|| format!("create backups dir: {}", self.backups_dir.display()))?;

        let mut mgr = BackupManager::begin(&self.backups_dir, root)?;
        for rel in relative_paths {
            mgr.backup_file(rel).map_err(|e| {
                if validate_repo_rel(Path::new(rel)).is_err() {
                    BackupError::InvalidPath(rel.clone())
                } else {
                    BackupError::Other(e)
                }
            })?;
        }
        let manifest = mgr.finalize()?;
        info!(
            id = %manifest.id,
            files = manifest.files.len(),
            absent = manifest.absent.len(),
            "backup created"
        );
        Ok(BackupId::new(manifest.id))
    }

    fn read_file(&self, id: &BackupId, relative_path: &str) -> Result<String, BackupError> {
        let (path, key) = self.payload_path(id, relative_path)?;
        match fs::read(&path) {
            // Reverts copy raw bytes; only text pre-images can be edited
            Ok(bytes) => String::from_utf8(bytes).map_err(|_| BackupError::NotUtf8 {
                id: id.clone(),
                path: key,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackupError::NotFound {
                id: id.clone(),
                path: key,
            }),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("read backup file: {}", path.display()))
                .into()),
        }
    }

    #[instrument(level = "debug", skip(self, root))]
    fn revert_file(&self, root: &Path, id: &BackupId, relative_path: &str) -> Result<(), BackupError> {
        let (src, key) = self.payload_path(id, relative_path)?;
        if !src.exists() {
            return Err(BackupError::NotFound {
                id: id.clone(),
                path: key,
            });
        }

        let manifest = read_manifest(&self.backups_dir, id.as_str())?;
        if let Some(expected) = manifest.file(&key).and_then(|f| f.checksum.as_deref()) {
            let actual = stream_blake3(&src)?;
            if actual != expected {
                warn!(path = %key, %expected, %actual, "backup payload corrupted");
                return Err(BackupError::ChecksumMismatch {
                    id: id.clone(),
                    path: key,
                });
            }
        }

        let bytes = fs::read(&src).with_context(|| format!("read backup: {}", src.display()))?;
        let dest = root.join(&key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create parent: {}", parent.display()))?;
        }
        atomic_write(&dest, &bytes).with_context(|| format!("restore {}", dest.display()))?;
        debug!(path = %key, "restored from backup");
        Ok(())
    }

    fn delete_backup(&self, id: &BackupId) -> Result<(), BackupError> {
        let dir = match self.backup_dir(id) {
            Ok(d) => d,
            Err(BackupError::UnknownBackup(_)) => {
                debug!(%id, "delete of unknown backup ignored");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        // Drop DONE first so a half-deleted backup never looks complete
        let _ = fs::remove_file(dir.join("DONE"));
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("remove backup: {}", dir.display()))
                    .into());
            }
        }
        info!(%id, "backup deleted");
        Ok(())
    }
}

/// Cross-platform directory fsync helper.
#[cfg(unix)]
fn sync_dir(p: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let f = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(p)?;
    f.sync_all()
}

#[cfg(windows)]
fn sync_dir(_p: &Path) -> std::io::Result<()> {
    // Windows does not expose a reliable directory fsync; best-effort no-op.
    Ok(())
}

/// Generate a sortable, filesystem-safe backup ID.
fn generate_backup_id() -> String {
    let ts = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let alphabet = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..10)
        .map(|_| {
            let idx = rng.random_range(0..alphabet.len());
            alphabet[idx] as char
        })
        .collect();
    format!("{}_{}", ts, suffix)
}

/// Stream a file into a blake3 digest as `blake3:<hex>`.
fn stream_blake3(path: &Path) -> Result<String> {
    let mut f =
        File::open(path).with_context(|| format!("open for checksum: {}", path.display()))?;
    let mut hasher = Blake3::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Simple file lock; guard deletes the lock on drop.
struct LockGuard {
    path: PathBuf,
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.sync_all();
        let _ = fs::remove_file(&self.path);
    }
}

fn acquire_lock(lock_path: &Path) -> Result<LockGuard> {
    let open_new = || {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
    };
    let file = match open_new() {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            // Locks older than 60s are stale; remove and retry once
            let stale = fs::metadata(lock_path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .is_some_and(|age| age.as_secs() > 60);
            if !(stale && fs::remove_file(lock_path).is_ok()) {
                return Err(anyhow::Error::new(e)
                    .context(format!("acquire lock: {}", lock_path.display())));
            }
            open_new().with_context(|| {
                format!("acquire lock after stale cleanup: {}", lock_path.display())
            })?
        }
        Err(e) => {
            return Err(
                anyhow::Error::new(e).context(format!("acquire lock: {}", lock_path.display()))
            );
        }
    };
    let mut file = file;
    writeln!(file, "pid={}", std::process::id()).ok();
    file.sync_all().ok();
    Ok(LockGuard {
        path: lock_path.to_path_buf(),
        file,
    })
}

/// Read the append-only index; ignores malformed lines.
pub fn read_index(backups_dir: &Path) -> Result<Vec<BackupIndexEntry>> {
    let index_path = backups_dir.join("index.jsonl");
    if !index_path.exists() {
        return Ok(Vec::new());
    }

    let file =
        File::open(&index_path).with_context(|| format!("open index: {}", index_path.display()))?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read index line {}", i + 1))?;
        let t = line.trim();
        if t.is_empty() {
            continue;
        }
        // Tolerate partial/corrupt lines
        if let Ok(e) = serde_json::from_str::<BackupIndexEntry>(t) {
            out.push(e);
        }
    }
    Ok(out)
}

/// Load a backup manifest; requires DONE to be present.
pub fn read_manifest(backups_dir: &Path, id: &str) -> Result<BackupManifest> {
    let base = backups_dir.join(id);
    if !base.join("DONE").exists() {
        bail!("Backup {} is incomplete (missing DONE)", id);
    }
    let manifest_path = base.join("manifest.json");
    let s = fs::read_to_string(&manifest_path)
        .with_context(|| format!("read manifest: {}", manifest_path.display()))?;
    let m: BackupManifest = serde_json::from_str(&s)
        .with_context(|| format!("parse manifest: {}", manifest_path.display()))?;
    Ok(m)
}

/// Validate that the given path is project-relative and non-escaping.
fn validate_repo_rel(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        bail!("path must be project-relative: {}", p.display());
    }
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::ParentDir => bail!("path escapes project: {}", p.display()),
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir => {
                bail!("path must be project-relative: {}", p.display())
            }
            Component::Normal(_) => out.push(c.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        bail!("empty path");
    }
    Ok(out)
}

/// Forward-slash key used in manifests.
fn rel_key(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
