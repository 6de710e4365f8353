//! Review session controller
//!
//! Owns the project root, a backup store and the review state. A session is
//! born from one markdown response: the touched files are snapshotted, every
//! operation is resolved against its pre-image, and each resulting change
//! then moves through its own state machine:
//!
//! ```text
//! pending --apply ok--> applied --revert ok--> pending
//! pending --apply err-> error        identical (initial, terminal)
//! ```
//!
//! A failure is recorded against the one change that caused it; nothing
//! aborts the session.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::backup::{BackupError, BackupId, BackupStore};
use crate::core::executor::{apply_operation, revert_operation};
use crate::core::ops::{ChangeId, ChangeOperation, ContentId, ReviewChange, ReviewStatus, generate_cid};
use crate::core::parse::parse;
use crate::core::resolve::{ResolveOptions, resolve, snapshot_paths};
use crate::core::workspace::{Direction, WorkspaceHooks, reconcile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSession {
    pub changes: Vec<ReviewChange>,
    pub backup_id: BackupId,
    pub active_change_id: Option<ChangeId>,
    #[serde(default)]
    pub errors: BTreeMap<ChangeId, String>,
}

impl ReviewSession {
    pub fn change(&self, id: ChangeId) -> Option<&ReviewChange> {
        self.changes.iter().find(|c| c.id == id)
    }

    pub fn has_applied(&self) -> bool {
        self.changes.iter().any(|c| c.status == ReviewStatus::Applied)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for c in &self.changes {
            match c.status {
                ReviewStatus::Pending => counts.pending += 1,
                ReviewStatus::Applied => counts.applied += 1,
                ReviewStatus::Error => counts.error += 1,
                ReviewStatus::Identical => counts.identical += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub applied: usize,
    pub error: usize,
    pub identical: usize,
}

/// A closed session kept because something in it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastReview {
    pub changes: Vec<ReviewChange>,
    pub backup_id: BackupId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewState {
    pub session: Option<ReviewSession>,
    pub last_review: Option<LastReview>,
    /// Content id of the most recently reviewed response
    pub processed_response: Option<ContentId>,
}

impl ReviewState {
    /// Backups the state still depends on.
    pub fn referenced_backups(&self) -> Vec<BackupId> {
        self.session
            .iter()
            .map(|s| s.backup_id.clone())
            .chain(self.last_review.iter().map(|l| l.backup_id.clone()))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("no review session is active")]
    NoSession,
    #[error("a review session is already active; end it first")]
    SessionActive,
    #[error("unknown change #{0}")]
    UnknownChange(ChangeId),
    #[error("change #{id} is {status}; cannot {action}")]
    InvalidTransition {
        id: ChangeId,
        status: ReviewStatus,
        action: &'static str,
    },
    #[error("there is no finished review to re-enter")]
    NothingToReenter,
    #[error("a newer response has not been reviewed yet")]
    StaleResponse,
    #[error("backup failed: {0}")]
    Backup(#[from] BackupError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { changes: usize, pending: usize },
    /// The response held no recognizable operations
    NothingFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    Applied,
    Reverted,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub succeeded: Vec<ChangeId>,
    pub failed: Vec<(ChangeId, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    /// Nothing was applied; the backup was deleted
    Discarded,
    /// Something was applied; kept as the last review
    Retained,
    NoSession,
}

/// Initial status of a resolved operation given its pre-image.
pub fn classify(op: &ChangeOperation, pre_image: Option<&str>) -> ReviewStatus {
    let unchanged = match (op.content(), pre_image) {
        (Some(post), Some(pre)) => post == pre,
        _ => false,
    };
    if unchanged && !op.is_partial_patch() {
        ReviewStatus::Identical
    } else {
        ReviewStatus::Pending
    }
}

fn first_actionable(changes: &[ReviewChange], wanted: impl Fn(ReviewStatus) -> bool) -> Option<ChangeId> {
    changes
        .iter()
        .find(|c| wanted(c.status))
        .or_else(|| changes.first())
        .map(|c| c.id)
}

pub struct ReviewController<S: BackupStore> {
    root: PathBuf,
    store: S,
    state: ReviewState,
    options: ResolveOptions,
}

impl<S: BackupStore> ReviewController<S> {
    pub fn new(root: impl Into<PathBuf>, store: S, options: ResolveOptions) -> Self {
        Self::with_state(root, store, options, ReviewState::default())
    }

    pub fn with_state(
        root: impl Into<PathBuf>,
        store: S,
        options: ResolveOptions,
        state: ReviewState,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            state,
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn state(&self) -> &ReviewState {
        &self.state
    }

    pub fn into_state(self) -> ReviewState {
        self.state
    }

    pub fn session(&self) -> Option<&ReviewSession> {
        self.state.session.as_ref()
    }

    pub fn last_review(&self) -> Option<&LastReview> {
        self.state.last_review.as_ref()
    }

    /// Parse `markdown`, snapshot the touched files and open a session.
    #[instrument(skip_all, fields(bytes = markdown.len()))]
    pub fn start_review(&mut self, markdown: &str) -> Result<StartOutcome, ReviewError> {
        if self.state.session.is_some() {
            return Err(ReviewError::SessionActive);
        }

        let cid = generate_cid(markdown);
        let parsed = parse(markdown);
        if parsed.is_empty() {
            info!("response contains no file operations");
            self.state.processed_response = Some(cid);
            return Ok(StartOutcome::NothingFound);
        }

        let paths = snapshot_paths(&parsed);
        let backup_id = self.store.backup_files(&self.root, &paths)?;

        // The previous review can no longer be re-entered
        if let Some(stale) = self.state.last_review.take() {
            self.delete_backup_logged(&stale.backup_id);
        }

        let store = &self.store;
        let bases: HashMap<String, Result<Option<String>, String>> = paths
            .par_iter()
            .map(|p| {
                let content = match store.read_file(&backup_id, p) {
                    Ok(c) => Ok(Some(c)),
                    Err(BackupError::NotFound { .. }) => Ok(None),
                    Err(e) => {
                        warn!(path = %p, error = %e, "pre-image unreadable");
                        Err(e.to_string())
                    }
                };
                (p.clone(), content)
            })
            .collect();

        let resolved = resolve(
            &parsed,
            |p| bases.get(p).cloned().and_then(Result::ok).flatten(),
            &self.options,
        );

        let mut errors = BTreeMap::new();
        let changes: Vec<ReviewChange> = resolved
            .into_iter()
            .zip(1u32..)
            .map(|(op, n)| {
                let id = ChangeId(n);
                let status = match bases.get(op.primary_path()) {
                    // Content edits need a text pre-image; delete and move copy bytes
                    Some(Err(msg)) if op.content().is_some() => {
                        errors.insert(id, format!("cannot edit {}: {msg}", op.primary_path()));
                        ReviewStatus::Error
                    }
                    Some(Ok(pre)) => classify(&op, pre.as_deref()),
                    _ => classify(&op, None),
                };
                ReviewChange {
                    id,
                    operation: op,
                    status,
                }
            })
            .collect();

        let active_change_id = first_actionable(&changes, |s| s == ReviewStatus::Pending);
        let outcome = StartOutcome::Started {
            changes: changes.len(),
            pending: changes
                .iter()
                .filter(|c| c.status == ReviewStatus::Pending)
                .count(),
        };
        info!(backup = %backup_id, ?outcome, "review started");

        self.state.session = Some(ReviewSession {
            changes,
            backup_id,
            active_change_id,
            errors,
        });
        self.state.processed_response = Some(cid);
        Ok(outcome)
    }

    /// Close the session, keeping it as the last review only if something was applied.
    #[instrument(skip_all)]
    pub fn end_review(&mut self) -> EndOutcome {
        let Some(session) = self.state.session.take() else {
            return EndOutcome::NoSession;
        };
        if session.has_applied() {
            if let Some(older) = self.state.last_review.take() {
                self.delete_backup_logged(&older.backup_id);
            }
            info!(backup = %session.backup_id, "review ended; kept as last review");
            self.state.last_review = Some(LastReview {
                changes: session.changes,
                backup_id: session.backup_id,
            });
            EndOutcome::Retained
        } else {
            self.delete_backup_logged(&session.backup_id);
            info!("review ended; nothing applied");
            EndOutcome::Discarded
        }
    }

    /// True when the last review may be resumed for `current_response`.
    ///
    /// A non-empty response that differs from the processed one blocks re-entry.
    pub fn can_reenter(&self, current_response: Option<&str>) -> bool {
        if self.state.session.is_some() || self.state.last_review.is_none() {
            return false;
        }
        match current_response.filter(|r| !r.trim().is_empty()) {
            None => true,
            Some(text) => self.state.processed_response.as_deref() == Some(generate_cid(text).as_str()),
        }
    }

    /// Restore the last review as the live session (one-shot).
    #[instrument(skip_all)]
    pub fn reenter_review(&mut self, current_response: Option<&str>) -> Result<(), ReviewError> {
        if self.state.session.is_some() {
            return Err(ReviewError::SessionActive);
        }
        if self.state.last_review.is_none() {
            return Err(ReviewError::NothingToReenter);
        }
        if !self.can_reenter(current_response) {
            return Err(ReviewError::StaleResponse);
        }
        let Some(last) = self.state.last_review.take() else {
            return Err(ReviewError::NothingToReenter);
        };
        let active_change_id = first_actionable(&last.changes, |s| s != ReviewStatus::Identical);
        info!(backup = %last.backup_id, "re-entered last review");
        self.state.session = Some(ReviewSession {
            changes: last.changes,
            backup_id: last.backup_id,
            active_change_id,
            errors: BTreeMap::new(),
        });
        Ok(())
    }

    pub fn set_active_change(&mut self, id: ChangeId) -> Result<(), ReviewError> {
        let session = self.state.session.as_mut().ok_or(ReviewError::NoSession)?;
        if session.change(id).is_none() {
            return Err(ReviewError::UnknownChange(id));
        }
        session.active_change_id = Some(id);
        Ok(())
    }

    pub fn error_for(&self, id: ChangeId) -> Option<&str> {
        self.session()?.errors.get(&id).map(String::as_str)
    }

    /// Backed-up content of the file a change reads; `None` when it did not exist.
    pub fn pre_image(&self, id: ChangeId) -> Result<Option<String>, ReviewError> {
        let session = self.session().ok_or(ReviewError::NoSession)?;
        let change = session.change(id).ok_or(ReviewError::UnknownChange(id))?;
        match self
            .store
            .read_file(&session.backup_id, change.operation.primary_path())
        {
            Ok(c) => Ok(Some(c)),
            Err(BackupError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply one pending change. Execution failures are recorded, not returned.
    #[instrument(skip(self, hooks))]
    pub fn apply_change(
        &mut self,
        id: ChangeId,
        hooks: &mut dyn WorkspaceHooks,
    ) -> Result<ChangeOutcome, ReviewError> {
        let Self {
            root, state, ..
        } = self;
        let session = state.session.as_mut().ok_or(ReviewError::NoSession)?;
        let idx = index_of(session, id)?;
        let change = &mut session.changes[idx];
        if change.status != ReviewStatus::Pending {
            return Err(ReviewError::InvalidTransition {
                id,
                status: change.status,
                action: "apply",
            });
        }

        match apply_operation(root, &change.operation) {
            Ok(()) => {
                change.status = ReviewStatus::Applied;
                session.errors.remove(&id);
                reconcile(&session.changes[idx].operation, Direction::Apply, hooks);
                info!(%id, "change applied");
                Ok(ChangeOutcome::Applied)
            }
            Err(e) => {
                let msg = e.to_string();
                warn!(%id, error = %msg, "apply failed");
                change.status = ReviewStatus::Error;
                session.errors.insert(id, msg.clone());
                Ok(ChangeOutcome::Failed(msg))
            }
        }
    }

    /// Revert one applied change. On failure the change stays applied.
    #[instrument(skip(self, hooks))]
    pub fn revert_change(
        &mut self,
        id: ChangeId,
        hooks: &mut dyn WorkspaceHooks,
    ) -> Result<ChangeOutcome, ReviewError> {
        let Self {
            root, store, state, ..
        } = self;
        let session = state.session.as_mut().ok_or(ReviewError::NoSession)?;
        let idx = index_of(session, id)?;
        let status = session.changes[idx].status;
        if status != ReviewStatus::Applied {
            return Err(ReviewError::InvalidTransition {
                id,
                status,
                action: "revert",
            });
        }

        let result = revert_operation(
            root,
            &*store,
            &session.backup_id,
            &session.changes[idx].operation,
        );
        match result {
            Ok(()) => {
                session.changes[idx].status = ReviewStatus::Pending;
                session.errors.remove(&id);
                reconcile(&session.changes[idx].operation, Direction::Revert, hooks);
                info!(%id, "change reverted");
                Ok(ChangeOutcome::Reverted)
            }
            Err(e) => {
                let msg = e.to_string();
                warn!(%id, error = %msg, "revert failed");
                session.errors.insert(id, msg.clone());
                Ok(ChangeOutcome::Failed(msg))
            }
        }
    }

    /// Apply every pending change in list order; failures do not stop the loop.
    pub fn apply_all_pending_changes(
        &mut self,
        hooks: &mut dyn WorkspaceHooks,
    ) -> Result<BulkReport, ReviewError> {
        let ids = self.ids_with_status(ReviewStatus::Pending)?;
        let mut report = BulkReport::default();
        for id in ids {
            match self.apply_change(id, hooks)? {
                ChangeOutcome::Failed(msg) => report.failed.push((id, msg)),
                _ => report.succeeded.push(id),
            }
        }
        debug!(ok = report.succeeded.len(), failed = report.failed.len(), "apply all");
        Ok(report)
    }

    /// Revert every applied change in reverse list order.
    pub fn revert_all_applied_changes(
        &mut self,
        hooks: &mut dyn WorkspaceHooks,
    ) -> Result<BulkReport, ReviewError> {
        let mut ids = self.ids_with_status(ReviewStatus::Applied)?;
        ids.reverse();
        let mut report = BulkReport::default();
        for id in ids {
            match self.revert_change(id, hooks)? {
                ChangeOutcome::Failed(msg) => report.failed.push((id, msg)),
                _ => report.succeeded.push(id),
            }
        }
        debug!(ok = report.succeeded.len(), failed = report.failed.len(), "revert all");
        Ok(report)
    }

    /// Drop the live session and the last review along with both backups.
    #[instrument(skip_all)]
    pub fn abandon(&mut self) {
        if let Some(session) = self.state.session.take() {
            self.delete_backup_logged(&session.backup_id);
        }
        if let Some(last) = self.state.last_review.take() {
            self.delete_backup_logged(&last.backup_id);
        }
        self.state.processed_response = None;
    }

    /// Tear down all review state, then point the controller at `new_root`.
    pub fn switch_root(&mut self, new_root: impl Into<PathBuf>) {
        self.abandon();
        self.root = new_root.into();
    }

    fn ids_with_status(&self, status: ReviewStatus) -> Result<Vec<ChangeId>, ReviewError> {
        let session = self.session().ok_or(ReviewError::NoSession)?;
        Ok(session
            .changes
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.id)
            .collect())
    }

    fn delete_backup_logged(&self, id: &BackupId) {
        if let Err(e) = self.store.delete_backup(id) {
            warn!(%id, error = %e, "failed to delete backup");
        }
    }
}

fn index_of(session: &ReviewSession, id: ChangeId) -> Result<usize, ReviewError> {
    session
        .changes
        .iter()
        .position(|c| c.id == id)
        .ok_or(ReviewError::UnknownChange(id))
}
