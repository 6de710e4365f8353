//! Backup store: snapshot, read, restore, listing and cleanup.

use anyhow::Result;
use std::fs;
use tempfile::TempDir;

use mdapply::core::backup::{BackupError, BackupId, BackupStore, FsBackupStore};
use mdapply::core::backup_ops::{
    CleanupRequest, ListRequest, cleanup_backups, list_backups, resolve_backup_id, show_backup,
};

fn setup() -> Result<(TempDir, std::path::PathBuf, FsBackupStore)> {
    let temp = TempDir::new()?;
    let root = temp.path().join("repo");
    fs::create_dir_all(root.join("src"))?;
    fs::write(root.join("src/a.rs"), "alpha\n")?;
    fs::write(root.join("b.txt"), "bravo\n")?;
    let store = FsBackupStore::new(temp.path().join("backups"));
    Ok((temp, root, store))
}

fn paths(p: &[&str]) -> Vec<String> {
    p.iter().map(|s| s.to_string()).collect()
}

#[test]
fn snapshot_records_present_and_absent_files() -> Result<()> {
    let (_temp, root, store) = setup()?;
    let id = store.backup_files(&root, &paths(&["src/a.rs", "new.rs"]))?;

    assert_eq!(store.read_file(&id, "src/a.rs")?, "alpha\n");
    assert!(matches!(
        store.read_file(&id, "new.rs"),
        Err(BackupError::NotFound { .. })
    ));

    let manifest = store.manifest(&id)?;
    assert_eq!(manifest.files.len(), 1);
    assert_eq!(manifest.absent, vec!["new.rs".to_string()]);
    assert!(manifest.success);
    Ok(())
}

#[test]
fn snapshot_is_isolated_from_later_edits() -> Result<()> {
    let (_temp, root, store) = setup()?;
    let id = store.backup_files(&root, &paths(&["b.txt"]))?;

    fs::write(root.join("b.txt"), "changed\n")?;
    assert_eq!(store.read_file(&id, "b.txt")?, "bravo\n");

    store.revert_file(&root, &id, "b.txt")?;
    assert_eq!(fs::read_to_string(root.join("b.txt"))?, "bravo\n");
    Ok(())
}

#[test]
fn restore_rejects_tampered_payload() -> Result<()> {
    let (_temp, root, store) = setup()?;
    let id = store.backup_files(&root, &paths(&["b.txt"]))?;

    let payload = store.backups_dir().join(id.as_str()).join("files/b.txt");
    fs::write(&payload, "tampered\n")?;
    fs::write(root.join("b.txt"), "current\n")?;

    assert!(matches!(
        store.revert_file(&root, &id, "b.txt"),
        Err(BackupError::ChecksumMismatch { .. })
    ));
    assert_eq!(fs::read_to_string(root.join("b.txt"))?, "current\n");
    Ok(())
}

#[test]
fn unknown_and_escaping_ids_are_rejected() -> Result<()> {
    let (_temp, root, store) = setup()?;
    store.backup_files(&root, &paths(&["b.txt"]))?;

    for bogus in ["nope", "../repo", "tmp", ""] {
        assert!(matches!(
            store.read_file(&BackupId::new(bogus), "b.txt"),
            Err(BackupError::UnknownBackup(_))
        ));
    }
    assert!(store.backup_files(&root, &paths(&["../outside.txt"])).is_err());
    Ok(())
}

#[test]
fn delete_is_idempotent() -> Result<()> {
    let (_temp, root, store) = setup()?;
    let id = store.backup_files(&root, &paths(&["b.txt"]))?;
    store.delete_backup(&id)?;
    store.delete_backup(&id)?;
    assert!(matches!(
        store.read_file(&id, "b.txt"),
        Err(BackupError::UnknownBackup(_))
    ));
    Ok(())
}

#[test]
fn list_and_show_resolve_ids() -> Result<()> {
    let (_temp, root, store) = setup()?;
    let first = store.backup_files(&root, &paths(&["src/a.rs"]))?;
    let second = store.backup_files(&root, &paths(&["src/a.rs", "b.txt"]))?;

    let listed = list_backups(store.backups_dir(), &ListRequest::default())?;
    assert_eq!(listed.len(), 2);
    let ids: Vec<&str> = listed.iter().map(|b| b.id.as_str()).collect();
    assert!(ids.contains(&first.as_str()));
    assert!(ids.contains(&second.as_str()));

    let suffix = &second.as_str()[second.as_str().len() - 10..];
    assert_eq!(resolve_backup_id(store.backups_dir(), suffix)?, second.as_str());
    assert!(resolve_backup_id(store.backups_dir(), "zzzzzzzzzzzz").is_err());

    let shown = show_backup(store.backups_dir(), second.as_str())?;
    assert_eq!(shown.manifest.files.len(), 2);
    assert!(shown.total_size > 0);

    let limited = list_backups(
        store.backups_dir(),
        &ListRequest {
            limit: 1,
            ..ListRequest::default()
        },
    )?;
    assert_eq!(limited.len(), 1);
    Ok(())
}

#[test]
fn cleanup_spares_protected_backups() -> Result<()> {
    let (_temp, root, store) = setup()?;
    let held = store.backup_files(&root, &paths(&["b.txt"]))?;
    let loose = store.backup_files(&root, &paths(&["src/a.rs"]))?;

    let req = CleanupRequest {
        keep_latest: Some(0),
        ..CleanupRequest::default()
    };
    let result = cleanup_backups(&store, &req, std::slice::from_ref(&held))?;
    assert_eq!(result.removed, vec![loose.as_str().to_string()]);
    assert_eq!(result.protected, vec![held.as_str().to_string()]);

    assert!(store.read_file(&held, "b.txt").is_ok());
    assert!(store.read_file(&loose, "src/a.rs").is_err());
    Ok(())
}

#[test]
fn cleanup_dry_run_and_staging_sweep() -> Result<()> {
    let (_temp, root, store) = setup()?;
    let id = store.backup_files(&root, &paths(&["b.txt"]))?;
    fs::create_dir_all(store.backups_dir().join("tmp/stale/files"))?;

    let dry = CleanupRequest {
        keep_latest: Some(0),
        include_incomplete: true,
        dry_run: true,
        ..CleanupRequest::default()
    };
    let result = cleanup_backups(&store, &dry, &[])?;
    assert_eq!(result.removed.len(), 2);
    assert!(store.read_file(&id, "b.txt").is_ok());
    assert!(store.backups_dir().join("tmp/stale").exists());

    let real = CleanupRequest {
        include_incomplete: true,
        ..CleanupRequest::default()
    };
    let result = cleanup_backups(&store, &real, &[])?;
    assert_eq!(result.removed, vec!["tmp/stale".to_string()]);
    assert!(!store.backups_dir().join("tmp/stale").exists());
    assert!(store.read_file(&id, "b.txt").is_ok());

    assert!(cleanup_backups(&store, &CleanupRequest::default(), &[]).is_err());
    Ok(())
}

#[test]
fn binary_payload_is_not_read_as_text_but_restores_exactly() -> Result<()> {
    let (_temp, root, store) = setup()?;
    let latin1 = b"caf\xe9\n".to_vec();
    fs::write(root.join("menu.txt"), &latin1)?;
    let id = store.backup_files(&root, &paths(&["menu.txt"]))?;

    assert!(matches!(
        store.read_file(&id, "menu.txt"),
        Err(BackupError::NotUtf8 { .. })
    ));

    fs::write(root.join("menu.txt"), "cafe\n")?;
    store.revert_file(&root, &id, "menu.txt")?;
    assert_eq!(fs::read(root.join("menu.txt"))?, latin1);
    Ok(())
}
