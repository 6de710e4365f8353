use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::core::ops::ChangeId;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
}

#[derive(Parser)]
#[command(name = "mda")]
#[command(about = "Review and apply file edits described in an AI assistant's markdown response")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project root (default: git top-level, else current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the operations found in a response without touching files
    Parse(ParseArgs),

    /// Start a review session from a response
    Review(ReviewArgs),

    /// List the changes of the current session
    Status(StatusArgs),

    /// Show the diff and any error for one change
    Show(ShowArgs),

    /// Apply pending changes
    Apply(TargetArgs),

    /// Revert applied changes
    Revert(TargetArgs),

    /// Make a change the active one
    Focus(FocusArgs),

    /// End the session (kept for re-entry if anything was applied)
    End,

    /// Resume the last finished review
    Reenter(ReenterArgs),

    /// Drop the session and last review along with their backups
    Discard,

    /// Manage the selected-file list
    Select(SelectArgs),

    /// Inspect and clean up backups
    Backup(BackupArgs),

    /// Initialize an mdapply.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Where the markdown response comes from
#[derive(Debug, Clone, Args)]
pub struct InputArgs {
    /// Markdown file, or `-` for stdin
    #[arg(conflicts_with = "from_clipboard")]
    pub file: Option<PathBuf>,

    /// Read the response from the system clipboard
    #[arg(long)]
    pub from_clipboard: bool,
}

#[derive(Debug, Parser)]
pub struct ParseArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ReviewArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// Change id (as listed by `status`)
    pub id: ChangeId,

    /// Lines of context around each diff hunk
    #[arg(long, default_value = "3")]
    pub context: usize,
}

#[derive(Debug, Parser)]
pub struct TargetArgs {
    /// Change ids
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub ids: Vec<ChangeId>,

    /// Every eligible change
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Parser)]
pub struct FocusArgs {
    pub id: ChangeId,
}

#[derive(Debug, Parser)]
pub struct ReenterArgs {
    /// Current response; re-entry is refused if it has not been reviewed yet
    pub file: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct SelectArgs {
    #[command(subcommand)]
    pub command: SelectCommand,
}

#[derive(Debug, Subcommand)]
pub enum SelectCommand {
    /// Add files to the selection
    Add { paths: Vec<String> },
    /// Remove files from the selection
    Remove { paths: Vec<String> },
    /// Set (or with no path, clear) the active file
    Active { path: Option<String> },
    /// Print the selection
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Parser)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupCommand,
}

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// List backups
    List(BackupListArgs),
    /// Show one backup (id, unique suffix, date prefix, or `latest`)
    Show(BackupShowArgs),
    /// Remove old backups; those held by the review state are kept
    Cleanup(BackupCleanupArgs),
}

#[derive(Debug, Parser)]
pub struct BackupListArgs {
    /// Only backups newer than this (e.g. 7d, 24h, 2w)
    #[arg(long)]
    pub since: Option<String>,

    /// Maximum entries to print
    #[arg(long, default_value = "20")]
    pub limit: usize,

    /// Oldest first
    #[arg(long)]
    pub asc: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct BackupShowArgs {
    pub id: String,

    /// List every file entry
    #[arg(long)]
    pub verbose: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct BackupCleanupArgs {
    /// Remove backups older than this (e.g. 7d, 24h)
    #[arg(long)]
    pub older_than: Option<String>,

    /// Keep only the N newest backups
    #[arg(long)]
    pub keep_latest: Option<usize>,

    /// Also remove abandoned staging directories
    #[arg(long)]
    pub include_incomplete: bool,

    /// Report what would be removed
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct InitArgs {
    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn apply_requires_ids_or_all() {
        assert!(Cli::try_parse_from(["mda", "apply"]).is_err());
        assert!(Cli::try_parse_from(["mda", "apply", "1", "--all"]).is_err());

        let cli = Cli::try_parse_from(["mda", "apply", "#2", "3"]).unwrap();
        match cli.command {
            Commands::Apply(t) => assert_eq!(t.ids, vec![ChangeId(2), ChangeId(3)]),
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn input_file_conflicts_with_clipboard() {
        assert!(Cli::try_parse_from(["mda", "review", "r.md", "--from-clipboard"]).is_err());
        assert!(Cli::try_parse_from(["mda", "--root", "/tmp", "review", "-"]).is_ok());
    }
}
