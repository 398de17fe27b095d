//! Configuration management commands.
//!
//! Stores CLI configuration in `~/.trainyard/config.toml`.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::{self, OutputFormat};

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the current configuration
    Show,

    /// Set the API server URL
    SetUrl {
        /// Base URL, e.g. http://localhost:8080
        url: String,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Persistent CLI configuration stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
        }
    }
}

fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".trainyard").join("config.toml"))
}

fn load_from(path: &Path) -> Result<CliConfig> {
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn save_to(path: &Path, cfg: &CliConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// API URL from the config file, if one has been written.
pub fn load_api_url() -> Option<String> {
    let path = config_path().ok()?;
    if !path.exists() {
        return None;
    }
    load_from(&path).ok().map(|cfg| cfg.api_url)
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    let path = config_path()?;

    match cmd {
        ConfigCommands::Show => {
            let cfg = load_from(&path)?;
            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    output::print_detail("File", &path.display().to_string());
                    output::print_detail("API URL", &cfg.api_url);
                }
                _ => output::print_item(&cfg, format)?,
            }
        }

        ConfigCommands::SetUrl { url } => {
            let mut cfg = load_from(&path)?;
            cfg.api_url = url.trim_end_matches('/').to_string();
            save_to(&path, &cfg)?;
            output::print_success(&format!("api_url = {}", cfg.api_url));
        }

        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                output::print_info(&format!(
                    "{} already exists. Use --force to overwrite.",
                    path.display()
                ));
                return Ok(());
            }
            save_to(&path, &CliConfig::default())?;
            output::print_success(&format!("Wrote {}", path.display()));
        }
    }

    Ok(())
}
