//! End-to-end review flows: parse, snapshot, apply, revert.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use mdapply::core::backup::FsBackupStore;
use mdapply::core::ops::{ChangeId, ChangeOperation, ReviewStatus};
use mdapply::core::resolve::ResolveOptions;
use mdapply::core::review::{ChangeOutcome, EndOutcome, ReviewController, StartOutcome};
use mdapply::core::workspace::{NoopWorkspace, WorkspaceSelection};
use mdapply::infra::state::StateFile;

struct Fixture {
    _tmp: TempDir,
    ctl: ReviewController<FsBackupStore>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let root = tmp.path().join("project");
        fs::create_dir_all(&root).unwrap();
        let store = FsBackupStore::new(tmp.path().join("backups"));
        let ctl = ReviewController::new(root, store, ResolveOptions::default());
        Self { _tmp: tmp, ctl }
    }

    fn root(&self) -> &Path {
        self.ctl.root()
    }

    fn write(&self, rel: &str, content: &str) {
        let p = self.root().join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, content).unwrap();
    }

    fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.root().join(rel)).ok()
    }
}

#[test]
fn delete_directive_applies_and_reverts_from_backup() {
    let mut fx = Fixture::new();
    fx.write("src/old.ts", "export const old = true;\n");

    fx.ctl.start_review("Remove the dead module.\n\nDELETE src/old.ts\n").unwrap();
    let change = &fx.ctl.session().unwrap().changes[0];
    assert_eq!(
        change.operation,
        ChangeOperation::Delete {
            file_path: "src/old.ts".into()
        }
    );

    let mut ws = WorkspaceSelection::default();
    ws.selected.insert("src/old.ts".into());
    ws.active = Some("src/old.ts".into());

    assert_eq!(fx.ctl.apply_change(ChangeId(1), &mut ws).unwrap(), ChangeOutcome::Applied);
    assert!(fx.read("src/old.ts").is_none());
    assert!(ws.selected.is_empty());
    assert_eq!(ws.active, None);

    assert_eq!(fx.ctl.revert_change(ChangeId(1), &mut ws).unwrap(), ChangeOutcome::Reverted);
    assert_eq!(fx.read("src/old.ts").as_deref(), Some("export const old = true;\n"));
    assert_eq!(fx.ctl.session().unwrap().changes[0].status, ReviewStatus::Pending);
}

#[test]
fn new_file_block_creates_and_revert_deletes() {
    let mut fx = Fixture::new();
    let md = "Add this:\n\nsrc/new.ts\n```ts\nexport const x = 1;\n```\n";

    fx.ctl.start_review(md).unwrap();
    let op = fx.ctl.session().unwrap().changes[0].operation.clone();
    match &op {
        ChangeOperation::Overwrite {
            file_path,
            is_new_file,
            content,
        } => {
            assert_eq!(file_path, "src/new.ts");
            assert!(*is_new_file);
            assert_eq!(content, "export const x = 1;\n");
        }
        other => panic!("expected overwrite, got {other:?}"),
    }

    let mut ws = WorkspaceSelection::default();
    fx.ctl.apply_change(ChangeId(1), &mut ws).unwrap();
    assert_eq!(fx.read("src/new.ts").as_deref(), Some("export const x = 1;\n"));
    assert!(ws.selected.contains("src/new.ts"));

    fx.ctl.revert_change(ChangeId(1), &mut ws).unwrap();
    assert!(fx.read("src/new.ts").is_none());
    assert!(ws.selected.is_empty());
}

#[test]
fn partially_matched_patch_stays_pending() {
    let mut fx = Fixture::new();
    fx.write("src/lib.rs", "fn a() {}\nfn b() {}\n");
    let md = "\
src/lib.rs
```rust
<<<<<<< SEARCH
fn a() {}
=======
fn a() {}
>>>>>>> REPLACE
<<<<<<< SEARCH
fn missing() {}
=======
fn other() {}
>>>>>>> REPLACE
```
";

    fx.ctl.start_review(md).unwrap();
    let change = &fx.ctl.session().unwrap().changes[0];
    match &change.operation {
        ChangeOperation::Patch {
            total_blocks,
            applied_blocks,
            content,
            ..
        } => {
            assert_eq!((*total_blocks, *applied_blocks), (2, 1));
            assert_eq!(content, "fn a() {}\nfn b() {}\n");
        }
        other => panic!("expected patch, got {other:?}"),
    }
    assert_eq!(change.status, ReviewStatus::Pending);
}

#[test]
fn move_revert_renames_back_and_remaps_selection() {
    let mut fx = Fixture::new();
    fx.write("a.ts", "export {};\n");

    fx.ctl.start_review("MOVE a.ts TO b.ts\n").unwrap();
    let mut ws = WorkspaceSelection::default();
    ws.selected.insert("a.ts".into());
    ws.active = Some("a.ts".into());

    fx.ctl.apply_change(ChangeId(1), &mut ws).unwrap();
    assert!(fx.read("a.ts").is_none());
    assert_eq!(fx.read("b.ts").as_deref(), Some("export {};\n"));
    assert_eq!(ws.active.as_deref(), Some("b.ts"));

    fx.ctl.revert_change(ChangeId(1), &mut ws).unwrap();
    assert!(fx.read("b.ts").is_none());
    assert_eq!(fx.read("a.ts").as_deref(), Some("export {};\n"));
    assert_eq!(ws.selected.iter().collect::<Vec<_>>(), ["a.ts"]);
    assert_eq!(ws.active.as_deref(), Some("a.ts"));
}

#[test]
fn changes_are_isolated_from_each_other() {
    let mut fx = Fixture::new();
    fx.write("one.txt", "1\n");
    fx.write("two.txt", "2\n");
    let md = "one.txt\n```\nuno\n```\n\ntwo.txt\n```\ndos\n```\n";

    fx.ctl.start_review(md).unwrap();
    let mut ws = NoopWorkspace;
    fx.ctl.apply_change(ChangeId(2), &mut ws).unwrap();
    assert_eq!(fx.read("one.txt").as_deref(), Some("1\n"));
    assert_eq!(fx.read("two.txt").as_deref(), Some("dos\n"));

    fx.ctl.apply_change(ChangeId(1), &mut ws).unwrap();
    fx.ctl.revert_change(ChangeId(2), &mut ws).unwrap();
    assert_eq!(fx.read("one.txt").as_deref(), Some("uno\n"));
    assert_eq!(fx.read("two.txt").as_deref(), Some("2\n"));
}

#[test]
fn crlf_file_round_trips_byte_for_byte() {
    let mut fx = Fixture::new();
    fx.write("win.txt", "a\r\nb\r\n");
    let md = "win.txt\n```\n<<<<<<< SEARCH\na\n=======\nz\n>>>>>>> REPLACE\n```\n";

    fx.ctl.start_review(md).unwrap();
    fx.ctl.apply_change(ChangeId(1), &mut NoopWorkspace).unwrap();
    assert_eq!(fx.read("win.txt").as_deref(), Some("z\r\nb\r\n"));

    fx.ctl.revert_change(ChangeId(1), &mut NoopWorkspace).unwrap();
    assert_eq!(fx.read("win.txt").as_deref(), Some("a\r\nb\r\n"));
}

#[test]
fn unified_diff_edit_and_bulk_operations() {
    let mut fx = Fixture::new();
    fx.write("src/main.rs", "fn main() {\n    println!(\"hi\");\n}\n");
    fx.write("gone.txt", "bye\n");
    let md = "\
```diff
--- a/src/main.rs
+++ b/src/main.rs
@@ -1,3 +1,3 @@
 fn main() {
-    println!(\"hi\");
+    println!(\"hello\");
 }
```

DELETE gone.txt
";

    let outcome = fx.ctl.start_review(md).unwrap();
    assert_eq!(
        outcome,
        StartOutcome::Started {
            changes: 2,
            pending: 2
        }
    );

    let report = fx.ctl.apply_all_pending_changes(&mut NoopWorkspace).unwrap();
    assert_eq!(report.succeeded.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(
        fx.read("src/main.rs").as_deref(),
        Some("fn main() {\n    println!(\"hello\");\n}\n")
    );
    assert!(fx.read("gone.txt").is_none());

    let report = fx.ctl.revert_all_applied_changes(&mut NoopWorkspace).unwrap();
    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(fx.read("gone.txt").as_deref(), Some("bye\n"));
    assert_eq!(
        fx.read("src/main.rs").as_deref(),
        Some("fn main() {\n    println!(\"hi\");\n}\n")
    );
}

#[test]
fn one_failure_does_not_stop_bulk_apply() {
    let mut fx = Fixture::new();
    fx.write("keep.txt", "k\n");
    let md = "DELETE missing.txt\n\nkeep.txt\n```\nK\n```\n";

    fx.ctl.start_review(md).unwrap();
    let report = fx.ctl.apply_all_pending_changes(&mut NoopWorkspace).unwrap();
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(fx.read("keep.txt").as_deref(), Some("K\n"));

    let session = fx.ctl.session().unwrap();
    let statuses: Vec<_> = session.changes.iter().map(|c| c.status).collect();
    assert!(statuses.contains(&ReviewStatus::Error));
    assert!(statuses.contains(&ReviewStatus::Applied));
}

#[test]
fn session_survives_persistence_between_invocations() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("a.txt"), "a\n").unwrap();
    let state_file = StateFile::new(tmp.path().join("state.json"));
    let store = FsBackupStore::new(tmp.path().join("backups"));

    // First invocation: start and apply
    state_file
        .with_locked(|s| {
            let mut ctl = ReviewController::with_state(
                &root,
                store.clone(),
                ResolveOptions::default(),
                std::mem::take(&mut s.review),
            );
            ctl.start_review("a.txt\n```\nb\n```\n")?;
            ctl.apply_change(ChangeId(1), &mut s.workspace)?;
            s.review = ctl.into_state();
            Ok(())
        })
        .unwrap();
    assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "b\n");

    // Second invocation: revert and end
    let end = state_file
        .with_locked(|s| {
            let mut ctl = ReviewController::with_state(
                &root,
                store.clone(),
                ResolveOptions::default(),
                std::mem::take(&mut s.review),
            );
            ctl.revert_change(ChangeId(1), &mut s.workspace)?;
            let end = ctl.end_review();
            s.review = ctl.into_state();
            Ok(end)
        })
        .unwrap();
    assert_eq!(end, EndOutcome::Discarded);
    assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "a\n");
    assert!(state_file.load().unwrap().review.session.is_none());
}

#[test]
fn non_utf8_file_is_never_rewritten() {
    let mut fx = Fixture::new();
    let latin1 = b"caf\xe9\nold\n".to_vec();
    fs::write(fx.root().join("menu.txt"), &latin1).unwrap();
    let md = "menu.txt\n```\n<<<<<<< SEARCH\nold\n=======\nnew\n>>>>>>> REPLACE\n```\n";

    fx.ctl.start_review(md).unwrap();
    let session = fx.ctl.session().unwrap();
    assert_eq!(session.changes[0].status, ReviewStatus::Error);
    assert!(fx.ctl.error_for(ChangeId(1)).unwrap().contains("UTF-8"));

    assert!(fx.ctl.apply_change(ChangeId(1), &mut NoopWorkspace).is_err());
    let report = fx.ctl.apply_all_pending_changes(&mut NoopWorkspace).unwrap();
    assert!(report.succeeded.is_empty());
    assert_eq!(fs::read(fx.root().join("menu.txt")).unwrap(), latin1);
}

#[test]
fn non_utf8_file_can_still_be_deleted_and_restored() {
    let mut fx = Fixture::new();
    let bytes = b"\xff\xferaw\x00\n".to_vec();
    fs::write(fx.root().join("blob.bin"), &bytes).unwrap();

    fx.ctl.start_review("DELETE blob.bin\n").unwrap();
    assert_eq!(fx.ctl.session().unwrap().changes[0].status, ReviewStatus::Pending);

    fx.ctl.apply_change(ChangeId(1), &mut NoopWorkspace).unwrap();
    assert!(!fx.root().join("blob.bin").exists());
    fx.ctl.revert_change(ChangeId(1), &mut NoopWorkspace).unwrap();
    assert_eq!(fs::read(fx.root().join("blob.bin")).unwrap(), bytes);
}

#[test]
fn mixed_line_endings_are_kept_on_untouched_lines() {
    let mut fx = Fixture::new();
    fx.write("mixed.txt", "head\r\nmid\nold\ntail\n");
    let md = "mixed.txt\n```\n<<<<<<< SEARCH\nold\n=======\nnew\n>>>>>>> REPLACE\n```\n";

    fx.ctl.start_review(md).unwrap();
    fx.ctl.apply_change(ChangeId(1), &mut NoopWorkspace).unwrap();
    assert_eq!(fx.read("mixed.txt").as_deref(), Some("head\r\nmid\nnew\ntail\n"));

    fx.ctl.revert_change(ChangeId(1), &mut NoopWorkspace).unwrap();
    assert_eq!(fx.read("mixed.txt").as_deref(), Some("head\r\nmid\nold\ntail\n"));
}
