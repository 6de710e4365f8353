//! `mda backup` handlers: list, show and cleanup.

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::{AppContext, BackupArgs, BackupCleanupArgs, BackupCommand, BackupListArgs, BackupShowArgs};
use crate::cli_ext::review_cmd::Project;
use crate::core::backup_ops::{
    BackupInfo, CleanupRequest, ListRequest, cleanup_backups, list_backups, show_backup,
};

pub fn run(args: BackupArgs, root: Option<PathBuf>, ctx: &AppContext) -> Result<()> {
    let project = Project::open(root)?;

    match args.command {
        BackupCommand::List(a) => backup_list(&project, &a, ctx),
        BackupCommand::Show(a) => backup_show(&project, &a, ctx),
        BackupCommand::Cleanup(a) => backup_cleanup(&project, &a, ctx),
    }
}

fn backup_list(project: &Project, a: &BackupListArgs, ctx: &AppContext) -> Result<()> {
    let req = ListRequest {
        since: a.since.clone(),
        limit: a.limit,
        sort_desc: !a.asc,
    };
    let backups = list_backups(project.store.backups_dir(), &req)?;

    if a.json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        if !ctx.quiet {
            println!("No backups found.");
        }
        return Ok(());
    }

    for b in &backups {
        print_backup_line(b);
    }
    Ok(())
}

fn print_backup_line(b: &BackupInfo) {
    let samples = if b.sample_paths.is_empty() {
        String::new()
    } else {
        format!("  [{}]", b.sample_paths.join(", "))
    };
    println!(
        "{timestamp:<25} {id:<32} files={files:>4} absent={absent:>3}{samples}",
        timestamp = b.timestamp,
        id = b.id,
        files = b.files,
        absent = b.absent,
        samples = samples
    );
}

fn backup_show(project: &Project, a: &BackupShowArgs, ctx: &AppContext) -> Result<()> {
    let resp = show_backup(project.store.backups_dir(), &a.id)?;

    if a.json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
        return Ok(());
    }

    let m = &resp.manifest;
    println!("id: {}", m.id);
    println!("timestamp: {}", m.timestamp);
    println!("root: {}", m.root.display());
    println!("files: {}", m.files.len());
    println!("absent: {}", m.absent.len());
    println!("backup_path: {}", resp.backup_path.display());
    println!("payload_size_bytes: {}", resp.total_size);

    if a.verbose {
        println!("file entries:");
        for f in &m.files {
            println!("  - {} ({} bytes)", f.path, f.size_bytes);
        }
        for p in &m.absent {
            println!("  - {p} (absent)");
        }
    } else if !ctx.quiet {
        for f in m.files.iter().take(3) {
            println!("  - {}", f.path);
        }
        if m.files.len() > 3 {
            println!("  … and {} more", m.files.len() - 3);
        }
    }

    Ok(())
}

fn backup_cleanup(project: &Project, a: &BackupCleanupArgs, ctx: &AppContext) -> Result<()> {
    let req = CleanupRequest {
        older_than: a.older_than.clone(),
        keep_latest: a.keep_latest,
        include_incomplete: a.include_incomplete,
        dry_run: a.dry_run,
    };

    // Backups the review state still points at are never removed
    let protected = project.load()?.review.referenced_backups();
    let result = cleanup_backups(&project.store, &req, &protected)?;

    if a.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if a.dry_run && !ctx.quiet {
        println!("DRY RUN - no backups were deleted");
    }

    for e in &result.errors {
        eprintln!("error: {e}");
    }

    if result.removed.is_empty() {
        if !ctx.quiet {
            println!("No backups matched cleanup criteria");
        }
        return Ok(());
    }

    if !ctx.quiet {
        let action = if a.dry_run { "Would remove" } else { "Removed" };
        println!("{} {} backup(s):", action, result.removed.len());
        for id in &result.removed {
            println!("  - {id}");
        }
        for id in &result.protected {
            println!("  kept {id} (in use by review state)");
        }
        if result.bytes_freed > 0 {
            println!("Space freed: {} bytes", result.bytes_freed);
        }
    }

    Ok(())
}
