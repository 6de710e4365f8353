use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::resolve::ResolveOptions;

/// Config file names looked up in the project root, first match wins
pub const CONFIG_FILES: [&str; 2] = ["mdapply.toml", ".mdapply.toml"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Where session state and backups live
    pub storage: StorageConfig,

    /// Patch resolution settings
    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig
{
    /// Backup directory; `~` expands, relative paths resolve against the project root
    pub backup_dir: Option<String>,

    /// Review state file; same resolution rules as `backup_dir`
    pub state_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig
{
    pub fuzzy_whitespace: bool,
    pub ensure_trailing_newline: bool,
}

impl Default for ReviewConfig
{
    fn default() -> Self
    {
        Self { fuzzy_whitespace: true, ensure_trailing_newline: true }
    }
}

impl From<&ReviewConfig> for ResolveOptions
{
    fn from(c: &ReviewConfig) -> Self
    {
        Self {
            fuzzy_whitespace: c.fuzzy_whitespace,
            ensure_trailing_newline: c.ensure_trailing_newline,
        }
    }
}

fn resolve_path(
    root: &Path,
    configured: Option<&str>,
    default: &str,
) -> PathBuf
{
    match configured
    {
        Some(raw) =>
        {
            let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
            if expanded.is_absolute() { expanded } else { root.join(expanded) }
        }
        None => root.join(default),
    }
}

impl Config
{
    pub fn backup_dir(
        &self,
        root: &Path,
    ) -> PathBuf
    {
        resolve_path(root, self.storage.backup_dir.as_deref(), ".mda/backups")
    }

    pub fn state_file(
        &self,
        root: &Path,
    ) -> PathBuf
    {
        resolve_path(root, self.storage.state_file.as_deref(), ".mda/state.json")
    }

    pub fn resolve_options(&self) -> ResolveOptions
    {
        ResolveOptions::from(&self.review)
    }
}

pub fn load_config(root: &Path) -> Result<Config>
{
    let mut builder = config::Config::builder();

    // Load from config files in priority order
    for name in &CONFIG_FILES
    {
        let path = root.join(name);
        if path.exists()
        {
            builder = builder.add_source(config::File::from(path));
            break;
        }
    }

    // MDAPPLY_REVIEW__FUZZY_WHITESPACE=false and friends
    builder = builder.add_source(
        config::Environment::with_prefix("MDAPPLY")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: &InitArgs,
    root: &Path,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = root.join(CONFIG_FILES[0]);

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config {
        storage: StorageConfig {
            backup_dir: Some(".mda/backups".to_string()),
            state_file: Some(".mda/state.json".to_string()),
        },
        review: ReviewConfig::default(),
    };
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
