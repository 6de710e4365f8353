//! Selection/active-file reconciliation after apply and revert

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::ops::ChangeOperation;

/// Editor-side state the engine keeps consistent with the filesystem.
pub trait WorkspaceHooks {
    fn add_selected_file(&mut self, path: &str);
    fn remove_selected_file(&mut self, path: &str);
    /// Rename an entry in place; no-op when `old` is not selected.
    fn remap_selected_file(&mut self, old: &str, new: &str);
    fn active_file(&self) -> Option<&str>;
    fn set_active_file(&mut self, path: Option<&str>);
    fn trigger_file_tree_refresh(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Apply,
    Revert,
}

/// Update selection state after `op` was applied or reverted.
pub fn reconcile(op: &ChangeOperation, direction: Direction, hooks: &mut dyn WorkspaceHooks) {
    match (op, direction) {
        (
            ChangeOperation::Patch {
                file_path,
                is_new_file: true,
                ..
            }
            | ChangeOperation::Overwrite {
                file_path,
                is_new_file: true,
                ..
            },
            Direction::Apply,
        ) => hooks.add_selected_file(file_path),
        (
            ChangeOperation::Patch {
                file_path,
                is_new_file: true,
                ..
            }
            | ChangeOperation::Overwrite {
                file_path,
                is_new_file: true,
                ..
            },
            Direction::Revert,
        )
        | (ChangeOperation::Delete { file_path }, Direction::Apply) => {
            hooks.remove_selected_file(file_path);
            if hooks.active_file() == Some(file_path.as_str()) {
                hooks.set_active_file(None);
            }
        }
        (ChangeOperation::Move { from_path, to_path }, Direction::Apply) => {
            remap(hooks, from_path, to_path);
        }
        (ChangeOperation::Move { from_path, to_path }, Direction::Revert) => {
            remap(hooks, to_path, from_path);
        }
        // Edits to existing files and restored deletions leave selection alone
        (ChangeOperation::Patch { .. } | ChangeOperation::Overwrite { .. }, _)
        | (ChangeOperation::Delete { .. }, Direction::Revert) => {}
    }
    hooks.trigger_file_tree_refresh();
}

fn remap(hooks: &mut dyn WorkspaceHooks, old: &str, new: &str) {
    hooks.remap_selected_file(old, new);
    if hooks.active_file() == Some(old) {
        hooks.set_active_file(Some(new));
    }
}

/// Persisted selection list plus the active file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSelection {
    pub selected: IndexSet<String>,
    pub active: Option<String>,
    /// Refresh requests since load; consumers reset it after redrawing
    #[serde(skip)]
    pub refresh_requests: u32,
}

impl WorkspaceHooks for WorkspaceSelection {
    fn add_selected_file(&mut self, path: &str) {
        self.selected.insert(path.to_string());
    }

    fn remove_selected_file(&mut self, path: &str) {
        self.selected.shift_remove(path);
    }

    fn remap_selected_file(&mut self, old: &str, new: &str) {
        if let Some(idx) = self.selected.get_index_of(old) {
            self.selected.shift_remove_index(idx);
            if !self.selected.contains(new) {
                let (end, _) = self.selected.insert_full(new.to_string());
                self.selected.move_index(end, idx);
            }
        }
    }

    fn active_file(&self) -> Option<&str> {
        self.active.as_deref()
    }

    fn set_active_file(&mut self, path: Option<&str>) {
        self.active = path.map(str::to_string);
    }

    fn trigger_file_tree_refresh(&mut self) {
        self.refresh_requests += 1;
        debug!(count = self.refresh_requests, "file tree refresh requested");
    }
}

/// Hooks that ignore every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWorkspace;

impl WorkspaceHooks for NoopWorkspace {
    fn add_selected_file(&mut self, _path: &str) {}
    fn remove_selected_file(&mut self, _path: &str) {}
    fn remap_selected_file(&mut self, _old: &str, _new: &str) {}
    fn active_file(&self) -> Option<&str> {
        None
    }
    fn set_active_file(&mut self, _path: Option<&str>) {}
    fn trigger_file_tree_refresh(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(paths: &[&str], active: Option<&str>) -> WorkspaceSelection {
        WorkspaceSelection {
            selected: paths.iter().map(|s| s.to_string()).collect(),
            active: active.map(str::to_string),
            refresh_requests: 0,
        }
    }

    fn new_file(path: &str) -> ChangeOperation {
        ChangeOperation::Overwrite {
            file_path: path.into(),
            content: String::new(),
            is_new_file: true,
        }
    }

    #[test]
    fn new_file_apply_selects_and_revert_deselects() {
        let mut ws = selection(&[], None);
        reconcile(&new_file("n.rs"), Direction::Apply, &mut ws);
        assert!(ws.selected.contains("n.rs"));

        ws.active = Some("n.rs".into());
        reconcile(&new_file("n.rs"), Direction::Revert, &mut ws);
        assert!(ws.selected.is_empty());
        assert_eq!(ws.active, None);
        assert_eq!(ws.refresh_requests, 2);
    }

    #[test]
    fn delete_apply_clears_active_and_revert_is_inert() {
        let op = ChangeOperation::Delete {
            file_path: "d.rs".into(),
        };
        let mut ws = selection(&["a.rs", "d.rs"], Some("d.rs"));
        reconcile(&op, Direction::Apply, &mut ws);
        assert_eq!(ws.selected.iter().collect::<Vec<_>>(), ["a.rs"]);
        assert_eq!(ws.active, None);

        reconcile(&op, Direction::Revert, &mut ws);
        assert_eq!(ws.selected.len(), 1);
        assert_eq!(ws.refresh_requests, 2);
    }

    #[test]
    fn move_remaps_in_place_both_ways() {
        let op = ChangeOperation::Move {
            from_path: "a.ts".into(),
            to_path: "b.ts".into(),
        };
        let mut ws = selection(&["x", "a.ts", "y"], Some("a.ts"));
        reconcile(&op, Direction::Apply, &mut ws);
        assert_eq!(ws.selected.iter().collect::<Vec<_>>(), ["x", "b.ts", "y"]);
        assert_eq!(ws.active.as_deref(), Some("b.ts"));

        reconcile(&op, Direction::Revert, &mut ws);
        assert_eq!(ws.selected.iter().collect::<Vec<_>>(), ["x", "a.ts", "y"]);
        assert_eq!(ws.active.as_deref(), Some("a.ts"));
    }

    #[test]
    fn existing_file_edits_only_refresh() {
        let op = ChangeOperation::Patch {
            file_path: "e.rs".into(),
            content: String::new(),
            is_new_file: false,
            total_blocks: 1,
            applied_blocks: 1,
        };
        let mut ws = selection(&["e.rs"], Some("e.rs"));
        reconcile(&op, Direction::Apply, &mut ws);
        assert_eq!(ws, {
            let mut expected = selection(&["e.rs"], Some("e.rs"));
            expected.refresh_requests = 1;
            expected
        });
    }
}
