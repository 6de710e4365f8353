//! Review state persisted between CLI invocations

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::review::ReviewState;
use crate::core::workspace::WorkspaceSelection;
use crate::infra::io::atomic_write;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    /// Project root the review state belongs to
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub review: ReviewState,
    #[serde(default)]
    pub workspace: WorkspaceSelection,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            root: None,
            review: ReviewState::default(),
            workspace: WorkspaceSelection::default(),
        }
    }
}

/// JSON state file guarded by an advisory lock on `<file>.lock`.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state; a missing file yields the default.
    pub fn load(&self) -> Result<PersistedState> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedState::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read state: {}", self.path.display()));
            }
        };
        let state: PersistedState = serde_json::from_str(&text)
            .with_context(|| format!("parse state: {}", self.path.display()))?;
        if state.version > STATE_VERSION {
            bail!(
                "state file {} has version {}; this build understands up to {}",
                self.path.display(),
                state.version,
                STATE_VERSION
            );
        }
        Ok(state)
    }

    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let text = serde_json::to_string_pretty(state).context("serialize state")?;
        atomic_write(&self.path, text.as_bytes())
            .with_context(|| format!("write state: {}", self.path.display()))?;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    /// Run `f` on the loaded state under an exclusive lock, then save it.
    ///
    /// The state is saved even when `f` fails, since filesystem effects may
    /// already have happened.
    pub fn with_locked<T>(&self, f: impl FnOnce(&mut PersistedState) -> Result<T>) -> Result<T> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create state dir: {}", parent.display()))?;
        }
        let lock_path = self.path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("open lock: {}", lock_path.display()))?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock
            .write()
            .with_context(|| format!("lock state: {}", lock_path.display()))?;

        let mut state = self.load()?;
        let result = f(&mut state);
        self.save(&state)?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_default_and_round_trips() {
        let dir = tempdir().unwrap();
        let sf = StateFile::new(dir.path().join(".mda/state.json"));
        assert_eq!(sf.load().unwrap(), PersistedState::default());

        let out = sf
            .with_locked(|s| {
                s.workspace.selected.insert("a.rs".into());
                Ok(7)
            })
            .unwrap();
        assert_eq!(out, 7);
        assert!(sf.load().unwrap().workspace.selected.contains("a.rs"));
    }

    #[test]
    fn saves_even_when_closure_fails() {
        let dir = tempdir().unwrap();
        let sf = StateFile::new(dir.path().join("state.json"));
        let res: Result<()> = sf.with_locked(|s| {
            s.workspace.active = Some("x".into());
            bail!("boom")
        });
        assert!(res.is_err());
        assert_eq!(sf.load().unwrap().workspace.active.as_deref(), Some("x"));
    }

    #[test]
    fn corrupt_file_names_path() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("state.json");
        fs::write(&p, "{not json").unwrap();
        let err = StateFile::new(&p).load().unwrap_err();
        assert!(format!("{err:#}").contains("state.json"));
    }
}
