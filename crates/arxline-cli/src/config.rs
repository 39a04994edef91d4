//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use arxline_arxiv::ArxivConfig;
use arxline_semantic_scholar::S2Config;
use arxline_source::{CollectOptions, SourceConfig};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use serde::Deserialize;

/// Global configuration for arxline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub workers: WorkersConfig,
    pub source: SourceSection,
    pub arxiv: ArxivSection,
    pub s2: S2Section,
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub assignments: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            cache_dir: PathBuf::from("./cache"),
            assignments: PathBuf::from("./assignments.csv"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub download: usize,
    pub references: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            download: 16,
            references: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub max_versions: u32,
    pub skip_large_bib: bool,
    pub bib_threshold_mb: f64,
    pub skip_missing_source: bool,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            max_versions: 20,
            skip_large_bib: true,
            bib_threshold_mb: 5.0,
            skip_missing_source: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArxivSection {
    pub api_url: String,
    pub source_url: String,
    pub delay_ms: u64,
    pub batch_size: usize,
}

impl Default for ArxivSection {
    fn default() -> Self {
        let d = ArxivConfig::default();
        Self {
            api_url: d.api_url,
            source_url: d.source_url,
            delay_ms: d.delay.as_millis() as u64,
            batch_size: d.batch_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S2Section {
    pub api_url: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    pub delay_ms: u64,
}

impl Default for S2Section {
    fn default() -> Self {
        Self {
            api_url: S2Config::default().api_url,
            api_key: std::env::var("S2_API_KEY").ok(),
            delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Seconds without data before a transfer counts as stalled
    pub read_timeout: u64,
    pub max_retries: u32,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            read_timeout: 30,
            max_retries: 3,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./arxline.toml (current directory)
    /// 2. ~/.config/arxline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("arxline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "arxline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            max_versions: self.source.max_versions,
            collect: CollectOptions {
                skip_large_bib: self.source.skip_large_bib,
                ..Default::default()
            },
            skip_missing_source: self.source.skip_missing_source,
            workers: self.workers.download,
        }
        .with_bib_threshold_mb(self.source.bib_threshold_mb)
    }

    pub fn arxiv_config(&self) -> ArxivConfig {
        ArxivConfig {
            api_url: self.arxiv.api_url.clone(),
            source_url: self.arxiv.source_url.clone(),
            delay: Duration::from_millis(self.arxiv.delay_ms),
            batch_size: self.arxiv.batch_size,
        }
    }

    pub fn s2_config(&self) -> S2Config {
        S2Config {
            api_url: self.s2.api_url.clone(),
            api_key: self.s2.api_key.clone(),
            delay: Duration::from_millis(self.s2.delay_ms),
        }
    }

    /// Effective settings as a table, for `arxline config`
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Setting").fg(Color::Cyan),
                Cell::new("Value").fg(Color::Cyan),
            ]);

        table.add_row(vec!["Data directory", &self.output.data_dir.display().to_string()]);
        table.add_row(vec!["Cache directory", &self.output.cache_dir.display().to_string()]);
        table.add_row(vec!["Assignments", &self.output.assignments.display().to_string()]);
        table.add_row(vec![
            "Workers",
            &format!(
                "{} download, {} references",
                self.workers.download, self.workers.references
            ),
        ]);
        table.add_row(vec!["Max versions", &self.source.max_versions.to_string()]);
        table.add_row(vec![
            "Large .bib files",
            &if self.source.skip_large_bib {
                format!("skipped above {} MB", self.source.bib_threshold_mb)
            } else {
                "kept".to_string()
            },
        ]);
        table.add_row(vec![
            "Missing source",
            if self.source.skip_missing_source {
                "skipped"
            } else {
                "failed"
            },
        ]);
        table.add_row(vec!["arXiv API URL", &self.arxiv.api_url]);
        table.add_row(vec!["arXiv source URL", &self.arxiv.source_url]);
        table.add_row(vec!["arXiv delay", &format!("{}ms", self.arxiv.delay_ms)]);
        table.add_row(vec!["arXiv batch size", &self.arxiv.batch_size.to_string()]);
        table.add_row(vec!["S2 API URL", &self.s2.api_url]);
        table.add_row(vec![
            "S2 API key",
            if self.s2.api_key.is_some() {
                "configured"
            } else {
                "not set"
            },
        ]);
        table.add_row(vec!["S2 delay", &format!("{}ms", self.s2.delay_ms)]);
        table.add_row(vec!["Read timeout", &format!("{}s", self.http.read_timeout)]);
        table.add_row(vec!["Max retries", &self.http.max_retries.to_string()]);
        table.to_string()
    }
}
