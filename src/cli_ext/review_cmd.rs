//! CLI handlers for the review session.
//!
//! Every command loads the persisted state under the state-file lock, runs a
//! [`ReviewController`] over it and writes the result back, so consecutive
//! invocations behave like one long-lived session.

use std::fs;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use owo_colors::OwoColorize;
use serde::Serialize;
use similar::TextDiff;
use tabled::{Table, Tabled};
use tracing::{info, instrument, warn};

use crate::cli::{
    AppContext, FocusArgs, InputArgs, ParseArgs, ReenterArgs, ReviewArgs, SelectArgs, SelectCommand, ShowArgs,
    StatusArgs, TargetArgs,
};
use crate::core::backup::FsBackupStore;
use crate::core::ops::{ChangeId, ChangeOperation, ReviewChange, ReviewStatus, normalize_rel_path};
use crate::core::parse::{ParsedOperation, parse};
use crate::core::review::{
    BulkReport, ChangeOutcome, EndOutcome, ReviewController, ReviewError, ReviewSession, ReviewState, StartOutcome,
};
use crate::core::workspace::{WorkspaceHooks, WorkspaceSelection};
use crate::infra::config::{Config, load_config};
use crate::infra::io::discover_root;
use crate::infra::state::{PersistedState, StateFile};

/// Resolved project: root, config, backup store and state file.
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
    pub store: FsBackupStore,
    pub state_file: StateFile,
}

impl Project {
    pub fn open(root: Option<PathBuf>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        let root = discover_root(root, &cwd);
        let config = load_config(&root)?;
        let store = FsBackupStore::new(config.backup_dir(&root));
        let state_file = StateFile::new(config.state_file(&root));
        Ok(Self {
            root,
            config,
            store,
            state_file,
        })
    }

    /// Run `f` against a controller built from the locked state, then persist.
    ///
    /// State recorded under a different root is torn down against that root's
    /// own backup store before `f` sees an empty controller.
    pub fn with_controller<T>(
        &self,
        f: impl FnOnce(&mut ReviewController<FsBackupStore>, &mut WorkspaceSelection) -> Result<T>,
    ) -> Result<T> {
        self.state_file.with_locked(|persisted| {
            let mut review = std::mem::take(&mut persisted.review);
            if let Some(old_root) = self.foreign_root(persisted) {
                warn!(from = %old_root.display(), to = %self.root.display(), "project root changed; dropping review state");
                let mut old = ReviewController::with_state(
                    old_root.clone(),
                    self.store_for(&old_root),
                    self.config.resolve_options(),
                    review,
                );
                old.switch_root(self.root.clone());
                review = old.into_state();
                persisted.workspace = WorkspaceSelection::default();
            }
            persisted.root = Some(self.root.clone());

            let mut ctl =
                ReviewController::with_state(self.root.clone(), self.store.clone(), self.config.resolve_options(), review);
            let result = f(&mut ctl, &mut persisted.workspace);
            persisted.review = ctl.into_state();
            result
        })
    }

    /// Persisted state as seen from this root; another root's review reads as empty.
    pub fn load(&self) -> Result<PersistedState> {
        let mut state = self.state_file.load()?;
        if let Some(other) = self.foreign_root(&state) {
            info!(recorded = %other.display(), "state belongs to another root");
            state.review = ReviewState::default();
            state.workspace = WorkspaceSelection::default();
        }
        Ok(state)
    }

    fn foreign_root(&self, state: &PersistedState) -> Option<PathBuf> {
        state.root.clone().filter(|r| *r != self.root)
    }

    /// Backup store configured for `root`, falling back to this project's layout.
    fn store_for(&self, root: &Path) -> FsBackupStore {
        let dir = match load_config(root) {
            Ok(config) => config.backup_dir(root),
            Err(e) => {
                warn!(root = %root.display(), error = %e, "cannot read previous root's config");
                self.config.backup_dir(root)
            }
        };
        FsBackupStore::new(dir)
    }
}

/// Read the markdown response from a file, stdin or the clipboard.
fn read_input(input: &InputArgs) -> Result<String> {
    if input.from_clipboard {
        return get_clipboard_content();
    }
    match input.file.as_deref() {
        Some(p) if p != Path::new("-") => {
            fs::read_to_string(p).with_context(|| format!("Failed to read {}", p.display()))
        }
        Some(_) => read_stdin(),
        None if !std::io::stdin().is_terminal() => read_stdin(),
        None => bail!("Provide a markdown FILE, `-` for stdin, or --from-clipboard"),
    }
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read stdin")?;
    Ok(buf)
}

/// Get content from system clipboard
fn get_clipboard_content() -> Result<String> {
    use arboard::Clipboard;
    let mut clipboard = Clipboard::new().context("Failed to access clipboard")?;
    clipboard
        .get_text()
        .context("Failed to get text from clipboard")
}

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "#")]
    n: usize,
    op: String,
    target: String,
    detail: String,
}

fn parsed_detail(op: &ParsedOperation) -> String {
    match op {
        ParsedOperation::Patch {
            blocks,
            is_new_file,
            ..
        } => {
            let n = blocks.len();
            let plural = if n == 1 { "" } else { "s" };
            if *is_new_file {
                format!("{n} block{plural}, new file")
            } else {
                format!("{n} block{plural}")
            }
        }
        ParsedOperation::Overwrite {
            content,
            is_new_file,
            ..
        } => {
            let lines = content.lines().count();
            if *is_new_file {
                format!("{lines} lines, new file")
            } else {
                format!("{lines} lines")
            }
        }
        ParsedOperation::Delete { .. } => String::new(),
        ParsedOperation::Move { to_path, .. } => format!("to {to_path}"),
    }
}

fn parsed_kind(op: &ParsedOperation) -> &'static str {
    match op {
        ParsedOperation::Patch { .. } => "patch",
        ParsedOperation::Overwrite { .. } => "overwrite",
        ParsedOperation::Delete { .. } => "delete",
        ParsedOperation::Move { .. } => "move",
    }
}

/// `mda parse`: print what the response would do, touching nothing.
pub fn parse_response(args: ParseArgs, ctx: &AppContext) -> Result<()> {
    let markdown = read_input(&args.input)?;
    let ops = parse(&markdown);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&ops)?);
        return Ok(());
    }
    if ops.is_empty() {
        if !ctx.quiet {
            println!("No file operations found.");
        }
        return Ok(());
    }

    let rows: Vec<OperationRow> = ops
        .iter()
        .enumerate()
        .map(|(i, op)| OperationRow {
            n: i + 1,
            op: parsed_kind(op).to_string(),
            target: op.primary_path().to_string(),
            detail: parsed_detail(op),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "#")]
    id: String,
    status: String,
    op: String,
    target: String,
    note: String,
}

fn paint_status(status: ReviewStatus, ctx: &AppContext) -> String {
    let label = status.to_string();
    if ctx.no_color {
        return label;
    }
    match status {
        ReviewStatus::Pending => label.yellow().to_string(),
        ReviewStatus::Applied => label.green().to_string(),
        ReviewStatus::Error => label.red().to_string(),
        ReviewStatus::Identical => label.dimmed().to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    let first = s.lines().next().unwrap_or_default();
    if first.chars().count() <= max {
        first.to_string()
    } else {
        let cut: String = first.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

fn change_note(change: &ReviewChange, session: &ReviewSession) -> String {
    if let Some(err) = session.errors.get(&change.id) {
        return truncate(err, 60);
    }
    let op = &change.operation;
    match op {
        ChangeOperation::Patch {
            total_blocks,
            applied_blocks,
            ..
        } if op.is_partial_patch() => format!("{applied_blocks}/{total_blocks} blocks matched"),
        _ if op.creates_file() => "new file".to_string(),
        _ => String::new(),
    }
}

fn print_session(session: &ReviewSession, ctx: &AppContext) {
    let rows: Vec<ChangeRow> = session
        .changes
        .iter()
        .map(|c| {
            let marker = if session.active_change_id == Some(c.id) { ">" } else { " " };
            ChangeRow {
                id: format!("{marker}{}", c.id),
                status: paint_status(c.status, ctx),
                op: c.operation.kind().to_string(),
                target: c.operation.describe_target(),
                note: change_note(c, session),
            }
        })
        .collect();
    println!("{}", Table::new(rows));

    if !ctx.quiet {
        let counts = session.counts();
        println!(
            "{} pending, {} applied, {} failed, {} unchanged (backup {})",
            counts.pending, counts.applied, counts.error, counts.identical, session.backup_id
        );
    }
}

#[derive(Serialize)]
struct ReviewReport<'a> {
    started: bool,
    session: Option<&'a ReviewSession>,
}

/// `mda review`: snapshot the touched files and open a session.
#[instrument(skip_all)]
pub fn review(args: ReviewArgs, root: Option<PathBuf>, ctx: &AppContext) -> Result<()> {
    let markdown = read_input(&args.input)?;
    let project = Project::open(root)?;

    let (outcome, session) = project.with_controller(|ctl, _ws| {
        let outcome = ctl.start_review(&markdown)?;
        Ok((outcome, ctl.session().cloned()))
    })?;

    if args.json {
        let report = ReviewReport {
            started: matches!(outcome, StartOutcome::Started { .. }),
            session: session.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match (outcome, session) {
        (StartOutcome::Started { changes, pending }, Some(session)) => {
            info!(changes, pending, "review session opened");
            print_session(&session, ctx);
        }
        _ => {
            if !ctx.quiet {
                println!("No file operations found in the response.");
            }
        }
    }
    Ok(())
}

/// `mda status`
pub fn status(args: StatusArgs, root: Option<PathBuf>, ctx: &AppContext) -> Result<()> {
    let project = Project::open(root)?;
    let state = project.load()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&state.review)?);
        return Ok(());
    }

    match &state.review.session {
        Some(session) => print_session(session, ctx),
        None => {
            if let Some(last) = &state.review.last_review {
                println!(
                    "No active review. The last review ({} changes) can be resumed with `mda reenter`.",
                    last.changes.len()
                );
            } else if !ctx.quiet {
                println!("No active review.");
            }
        }
    }
    Ok(())
}

/// Unified diff of `old` -> `new`, colored per line unless disabled.
fn render_diff(old: &str, new: &str, old_name: &str, new_name: &str, context: usize, ctx: &AppContext) -> String {
    let diff = TextDiff::from_lines(old, new);
    let text = diff
        .unified_diff()
        .context_radius(context)
        .header(old_name, new_name)
        .to_string();
    if ctx.no_color {
        return text;
    }
    text.lines()
        .map(|l| {
            if l.starts_with("+++") || l.starts_with("---") {
                l.bold().to_string()
            } else if l.starts_with('+') {
                l.green().to_string()
            } else if l.starts_with('-') {
                l.red().to_string()
            } else if l.starts_with("@@") {
                l.cyan().to_string()
            } else {
                l.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `mda show ID`: diff the change against its pre-image.
pub fn show(args: ShowArgs, root: Option<PathBuf>, ctx: &AppContext) -> Result<()> {
    let project = Project::open(root)?;
    let (change, pre, error) = project.with_controller(|ctl, _ws| {
        let pre = ctl.pre_image(args.id)?;
        let change = ctl
            .session()
            .and_then(|s| s.change(args.id))
            .cloned()
            .with_context(|| format!("unknown change #{}", args.id))?;
        Ok((change, pre, ctl.error_for(args.id).map(str::to_string)))
    })?;

    println!(
        "#{} {} {} [{}]",
        change.id,
        change.operation.kind(),
        change.operation.describe_target(),
        paint_status(change.status, ctx)
    );
    if let Some(err) = error {
        let line = format!("error: {err}");
        if ctx.no_color {
            println!("{line}");
        } else {
            println!("{}", line.red());
        }
    }

    let path = change.operation.primary_path();
    let old = pre.unwrap_or_default();
    match &change.operation {
        ChangeOperation::Move { from_path, to_path } => {
            println!("rename {from_path} → {to_path}");
        }
        ChangeOperation::Delete { .. } => {
            let diff = render_diff(&old, "", &format!("a/{path}"), "/dev/null", args.context, ctx);
            println!("{}", diff.trim_end());
        }
        op => {
            let new = op.content().unwrap_or_default();
            let old_name = if op.creates_file() { "/dev/null".to_string() } else { format!("a/{path}") };
            if old == new {
                println!("(no content change)");
            } else {
                let diff = render_diff(&old, new, &old_name, &format!("b/{path}"), args.context, ctx);
                println!("{}", diff.trim_end());
            }
        }
    }
    Ok(())
}

struct ReportLine {
    id: ChangeId,
    target: String,
}

fn targets(ctl: &ReviewController<FsBackupStore>, ids: &[ChangeId]) -> Vec<ReportLine> {
    ids.iter()
        .filter_map(|id| {
            let change = ctl.session()?.change(*id)?;
            Some(ReportLine {
                id: *id,
                target: change.operation.describe_target(),
            })
        })
        .collect()
}

/// Run one action per id; guard errors are collected rather than aborting the batch.
fn for_each_id(
    ctl: &mut ReviewController<FsBackupStore>,
    ws: &mut dyn WorkspaceHooks,
    ids: &[ChangeId],
    action: fn(
        &mut ReviewController<FsBackupStore>,
        ChangeId,
        &mut dyn WorkspaceHooks,
    ) -> Result<ChangeOutcome, ReviewError>,
) -> Result<BulkReport> {
    if ctl.session().is_none() {
        bail!(ReviewError::NoSession);
    }
    let mut report = BulkReport::default();
    for &id in ids {
        match action(ctl, id, ws) {
            Ok(ChangeOutcome::Failed(msg)) => report.failed.push((id, msg)),
            Ok(_) => report.succeeded.push(id),
            Err(e) => report.failed.push((id, e.to_string())),
        }
    }
    Ok(report)
}

fn print_report(verb: &str, report: &BulkReport, names: &[ReportLine], ctx: &AppContext) -> Result<()> {
    let name_of = |id: ChangeId| {
        names
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.target.as_str())
            .unwrap_or("?")
    };
    if !ctx.quiet {
        for id in &report.succeeded {
            let mark = if ctx.no_color { "ok".to_string() } else { "ok".green().to_string() };
            println!("{mark} {verb} #{id} {}", name_of(*id));
        }
        if report.succeeded.is_empty() && report.failed.is_empty() {
            println!("Nothing to do.");
        }
    }
    for (id, msg) in &report.failed {
        let mark = if ctx.no_color { "failed".to_string() } else { "failed".red().to_string() };
        eprintln!("{mark} #{id} {}: {msg}", name_of(*id));
    }
    if !report.failed.is_empty() {
        bail!("{} change(s) failed", report.failed.len());
    }
    Ok(())
}

/// `mda apply`
#[instrument(skip_all, fields(all = args.all))]
pub fn apply(args: TargetArgs, root: Option<PathBuf>, ctx: &AppContext) -> Result<()> {
    let project = Project::open(root)?;
    let (report, names) = project.with_controller(|ctl, ws| {
        let report = if args.all {
            ctl.apply_all_pending_changes(ws)?
        } else {
            for_each_id(ctl, ws, &args.ids, |c, id, ws| c.apply_change(id, ws))?
        };
        let mut ids = report.succeeded.clone();
        ids.extend(report.failed.iter().map(|(id, _)| *id));
        let names = targets(ctl, &ids);
        Ok((report, names))
    })?;
    print_report("applied", &report, &names, ctx)
}

/// `mda revert`
#[instrument(skip_all, fields(all = args.all))]
pub fn revert(args: TargetArgs, root: Option<PathBuf>, ctx: &AppContext) -> Result<()> {
    let project = Project::open(root)?;
    let (report, names) = project.with_controller(|ctl, ws| {
        let report = if args.all {
            ctl.revert_all_applied_changes(ws)?
        } else {
            for_each_id(ctl, ws, &args.ids, |c, id, ws| c.revert_change(id, ws))?
        };
        let mut ids = report.succeeded.clone();
        ids.extend(report.failed.iter().map(|(id, _)| *id));
        let names = targets(ctl, &ids);
        Ok((report, names))
    })?;
    print_report("reverted", &report, &names, ctx)
}

/// `mda focus ID`
pub fn focus(args: FocusArgs, root: Option<PathBuf>, ctx: &AppContext) -> Result<()> {
    let project = Project::open(root)?;
    project.with_controller(|ctl, _ws| Ok(ctl.set_active_change(args.id)?))?;
    if !ctx.quiet {
        println!("Active change: #{}", args.id);
    }
    Ok(())
}

/// `mda end`
pub fn end(root: Option<PathBuf>, ctx: &AppContext) -> Result<()> {
    let project = Project::open(root)?;
    let outcome = project.with_controller(|ctl, _ws| Ok(ctl.end_review()))?;
    if !ctx.quiet {
        match outcome {
            EndOutcome::Discarded => println!("Review ended; nothing was applied, backup removed."),
            EndOutcome::Retained => println!("Review ended; resume it with `mda reenter`."),
            EndOutcome::NoSession => println!("No active review."),
        }
    }
    Ok(())
}

/// `mda reenter [FILE]`
pub fn reenter(args: ReenterArgs, root: Option<PathBuf>, ctx: &AppContext) -> Result<()> {
    let current = args
        .file
        .as_deref()
        .map(|p| fs::read_to_string(p).with_context(|| format!("Failed to read {}", p.display())))
        .transpose()?;
    let project = Project::open(root)?;
    let session = project.with_controller(|ctl, _ws| {
        ctl.reenter_review(current.as_deref())?;
        Ok(ctl.session().cloned())
    })?;
    if let Some(session) = session {
        print_session(&session, ctx);
    }
    Ok(())
}

/// `mda discard`
pub fn discard(root: Option<PathBuf>, ctx: &AppContext) -> Result<()> {
    let project = Project::open(root)?;
    project.with_controller(|ctl, _ws| {
        ctl.abandon();
        Ok(())
    })?;
    if !ctx.quiet {
        println!("Review state and its backups discarded.");
    }
    Ok(())
}

/// `mda select ...`
pub fn select(args: SelectArgs, root: Option<PathBuf>, ctx: &AppContext) -> Result<()> {
    let project = Project::open(root)?;
    let selection = project.state_file.with_locked(|state| {
        let ws = &mut state.workspace;
        match &args.command {
            SelectCommand::Add { paths } => {
                for p in paths {
                    ws.add_selected_file(&checked_path(p)?);
                }
            }
            SelectCommand::Remove { paths } => {
                for p in paths {
                    let rel = checked_path(p)?;
                    ws.remove_selected_file(&rel);
                    if ws.active_file() == Some(rel.as_str()) {
                        ws.set_active_file(None);
                    }
                }
            }
            SelectCommand::Active { path } => {
                let rel = path.as_deref().map(checked_path).transpose()?;
                ws.set_active_file(rel.as_deref());
            }
            SelectCommand::List { .. } => {}
        }
        Ok(ws.clone())
    })?;

    if let SelectCommand::List { json } = args.command {
        if json {
            println!("{}", serde_json::to_string_pretty(&selection)?);
        } else {
            for p in &selection.selected {
                let marker = if selection.active.as_deref() == Some(p.as_str()) { "*" } else { " " };
                println!("{marker} {p}");
            }
            if selection.selected.is_empty() && !ctx.quiet {
                println!("No files selected.");
            }
        }
    }
    Ok(())
}

fn checked_path(raw: &str) -> Result<String> {
    normalize_rel_path(raw).with_context(|| format!("not a project-relative path: {raw}"))
}
