//! Configuration file (livemd.toml) and command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use livemd_render::{MarkdownOptions, DEFAULT_TITLE};
use livemd_server::{LiveConfig, DEFAULT_PORT};
use serde::Deserialize;

/// Configuration file structure (livemd.toml).
#[derive(Debug, Deserialize, Default, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub document: DocumentConfig,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct DocumentConfig {
    #[serde(default = "default_source")]
    pub source: PathBuf,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_title")]
    pub title: String,
    /// Path to a custom minijinja document template
    pub template: Option<PathBuf>,
    #[serde(default)]
    pub raw_html: bool,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct ServerSettings {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_open")]
    pub open: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            output: default_output(),
            title: default_title(),
            template: None,
            raw_html: false,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            root: default_root(),
            host: default_host(),
            port: default_port(),
            open: default_open(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_source() -> PathBuf {
    PathBuf::from("README.md")
}
fn default_output() -> PathBuf {
    PathBuf::from("index.html")
}
fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}
fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_open() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    100
}

/// Values given on the command line, which win over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub source: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub no_open: bool,
}

/// Load configuration from `path` if it exists.
/// Returns an error if the config file exists but is malformed.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ConfigFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        return Ok(config);
    }
    Ok(ConfigFile::default())
}

impl ConfigFile {
    /// Merge command-line overrides and produce the loop configuration.
    ///
    /// Reads the custom template, if one is configured. A relative template
    /// path is resolved against the directory holding `config_path`.
    pub fn into_live_config(self, config_path: &Path, overrides: Overrides) -> Result<LiveConfig> {
        let template = match &self.document.template {
            Some(path) => {
                let path = resolve_from_config(config_path, path);
                Some(
                    fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read template {}", path.display()))?,
                )
            }
            None => None,
        };

        Ok(LiveConfig {
            source: overrides.source.unwrap_or(self.document.source),
            output: overrides.output.unwrap_or(self.document.output),
            root: self.server.root,
            host: overrides.host.unwrap_or(self.server.host),
            port: overrides.port.unwrap_or(self.server.port),
            open: self.server.open && !overrides.no_open,
            title: self.document.title,
            debounce: Duration::from_millis(self.server.debounce_ms),
            markdown: MarkdownOptions {
                raw_html: self.document.raw_html,
                ..Default::default()
            },
            template,
        })
    }
}

fn resolve_from_config(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(path),
        _ => path.to_path_buf(),
    }
}
