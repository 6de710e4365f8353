//! Single-change filesystem mutations and their inverses

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::backup::{BackupError, BackupId, BackupStore};
use crate::core::ops::ChangeOperation;
use crate::infra::io::{delete_file, move_file, write_file_content};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot move to {}: destination already exists", path.display())]
    DestinationExists { path: PathBuf },
    #[error(transparent)]
    Backup(#[from] BackupError),
}

fn io_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> ApplyError + 'a {
    move |source| {
        if op == "move" && source.kind() == io::ErrorKind::AlreadyExists {
            ApplyError::DestinationExists {
                path: path.to_path_buf(),
            }
        } else {
            ApplyError::Io {
                op,
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Perform the mutation described by `op` under `root`.
#[instrument(level = "debug", skip(root, op), fields(kind = op.kind(), target = %op.describe_target()))]
pub fn apply_operation(root: &Path, op: &ChangeOperation) -> Result<(), ApplyError> {
    match op {
        ChangeOperation::Patch {
            file_path, content, ..
        }
        | ChangeOperation::Overwrite {
            file_path, content, ..
        } => {
            let path = root.join(file_path);
            write_file_content(&path, content).map_err(io_err("write", &path))?;
        }
        ChangeOperation::Delete { file_path } => {
            let path = root.join(file_path);
            delete_file(&path).map_err(io_err("delete", &path))?;
        }
        ChangeOperation::Move { from_path, to_path } => {
            let to = root.join(to_path);
            move_file(&root.join(from_path), &to).map_err(io_err("move", &to))?;
        }
    }
    debug!("applied");
    Ok(())
}

/// Undo a previously applied `op` using the session backup.
#[instrument(level = "debug", skip(root, store, op), fields(kind = op.kind(), target = %op.describe_target()))]
pub fn revert_operation<S: BackupStore + ?Sized>(
    root: &Path,
    store: &S,
    backup_id: &BackupId,
    op: &ChangeOperation,
) -> Result<(), ApplyError> {
    match op {
        ChangeOperation::Patch {
            file_path,
            is_new_file,
            ..
        }
        | ChangeOperation::Overwrite {
            file_path,
            is_new_file,
            ..
        } => {
            if *is_new_file {
                let path = root.join(file_path);
                match delete_file(&path) {
                    Ok(()) => {}
                    // Already gone is the desired end state
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err("delete", &path)(e)),
                }
            } else {
                store.revert_file(root, backup_id, file_path)?;
            }
        }
        ChangeOperation::Delete { file_path } => {
            store.revert_file(root, backup_id, file_path)?;
        }
        ChangeOperation::Move { from_path, to_path } => {
            let from = root.join(from_path);
            move_file(&root.join(to_path), &from).map_err(io_err("move", &from))?;
        }
    }
    debug!("reverted");
    Ok(())
}
