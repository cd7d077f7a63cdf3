//! Configuration for the autoflow CLI.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (AUTOFLOW_ENDPOINT, AUTOFLOW_WORKSPACE)
//! 2. Config file (.autoflow/config.yaml)
//! 3. Defaults (~/.autoflow/config.yaml)
//!
//! Config file discovery searches the current directory and its parents,
//! then the home directory fallback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::monitor::{DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};

/// Location of the blueprint config document inside a workspace bucket
const BLUEPRINT_CONFIG_KEY: &str = "automl-blueprint/config/blueprint-config.json";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,

    #[serde(default)]
    pub platform: Option<PlatformSection>,

    #[serde(default)]
    pub monitor: Option<MonitorSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformSection {
    /// Base URL of the platform gateway
    pub endpoint: Option<String>,

    /// Workspace bucket blueprints run against
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorSection {
    pub poll_interval_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
    pub page_size: Option<usize>,
}

/// Resolved settings the CLI runs with
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: String,
    pub workspace: String,
    pub monitor: MonitorSettings,

    /// Path to the config file settings came from (if found)
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub page_size: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Object-store URI of a workspace's blueprint config document
pub fn default_config_uri(workspace: &str) -> String {
    format!("s3://{workspace}/{BLUEPRINT_CONFIG_KEY}")
}

/// Find a config file by searching the current directory and its
/// parents, then the home-directory fallback
fn find_config_file() -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let config_path = current.join(".autoflow").join("config.yaml");
            if config_path.exists() {
                return Some(config_path);
            }

            if !current.pop() {
                break;
            }
        }
    }

    let fallback = dirs::home_dir()?.join(".autoflow").join("config.yaml");
    fallback.exists().then_some(fallback)
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load settings from all sources
pub fn load_settings() -> Result<Settings> {
    let config_file = find_config_file();
    let file = match &config_file {
        Some(path) => Some(load_config_file(path)?),
        None => None,
    };

    let platform = file
        .as_ref()
        .and_then(|f| f.platform.clone())
        .unwrap_or_default();

    let endpoint = std::env::var("AUTOFLOW_ENDPOINT")
        .ok()
        .or(platform.endpoint)
        .context("No platform endpoint configured: set AUTOFLOW_ENDPOINT or add platform.endpoint to .autoflow/config.yaml")?;

    let workspace = std::env::var("AUTOFLOW_WORKSPACE")
        .ok()
        .or(platform.workspace)
        .context("No workspace configured: set AUTOFLOW_WORKSPACE or add platform.workspace to .autoflow/config.yaml")?;

    let monitor_file = file.and_then(|f| f.monitor).unwrap_or_default();
    let defaults = MonitorSettings::default();
    let monitor = MonitorSettings {
        poll_interval: monitor_file
            .poll_interval_seconds
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval),
        timeout: monitor_file
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        page_size: monitor_file.page_size.unwrap_or(defaults.page_size),
    };

    Ok(Settings {
        endpoint,
        workspace,
        monitor,
        config_file,
    })
}
