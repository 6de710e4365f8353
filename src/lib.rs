//! **mdapply** - Review, apply and revert file edits pasted from an LLM markdown response
//!
//! A response is parsed into file operations, every touched file is snapshotted,
//! and each change can then be applied or reverted on its own.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Change model, parsing, resolution and the review engine
pub mod core {
    /// Operation types, change ids and content ids
    pub mod ops;
    pub use ops::{ChangeId, ChangeOperation, ReviewChange, ReviewStatus};

    /// Markdown response parser (directives, unified diffs, path-labelled blocks)
    pub mod parse;
    pub use parse::{ParsedOperation, SearchReplace, parse};

    /// Search/replace block application with whitespace-tolerant fallback
    pub mod patch;

    /// Folds parsed operations into final per-file changes
    pub mod resolve;
    pub use resolve::{ResolveOptions, resolve};

    /// Snapshot store keyed by backup id
    pub mod backup;
    pub use backup::{BackupError, BackupId, BackupStore, FsBackupStore};

    /// Listing, inspection and cleanup of backups
    pub mod backup_ops;

    /// Filesystem application and reversal of a single change
    pub mod executor;

    /// Selection and active-file reconciliation
    pub mod workspace;
    pub use workspace::{WorkspaceHooks, WorkspaceSelection};

    /// Review session state machine
    pub mod review;
    pub use review::{ReviewController, ReviewError, ReviewState};
}

/// Infrastructure - Configuration, I/O and persisted state
pub mod infra {
    /// Configuration management with TOML and environment sources
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// File writes, moves and project root discovery
    pub mod io;

    /// Locked JSON state between invocations
    pub mod state;
    pub use state::{PersistedState, StateFile};
}

/// Subcommand handlers
pub mod cli_ext {
    /// Review session commands
    pub mod review_cmd;

    /// Backup maintenance commands
    pub mod backup_cmd;
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli, Commands};
pub use infra::{Config, load_config};
