//! Configuration loading and resolution
//!
//! The TOML file has an `[activation]` section describing what to annotate and
//! an optional `[logging]` section. Raw values are resolved into an
//! [`ActivationConfig`] once at startup:
//! - relative paths are joined to `work_dir`
//! - data source templates are glob-expanded into concrete directories
//! - `{date}` and `{models}` are substituted in the output template

use crate::templates::{self, DEFAULT_OUTPUT_FORMAT};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Config file looked up relative to the current directory
pub const DEFAULT_CONFIG_PATH: &str = "cfg/config.toml";

/// Top-level variable holding the cell struct array in MAT-files
pub const DEFAULT_TABLE_VARIABLE: &str = "fullCellDataMod";

/// Bucket every labeled source directory must contain
pub const NEGATIVE_BUCKET: &str = "fakes";

const MAX_SOURCE_DEPTH: usize = 16;

/// Configuration file contents
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Annotation run settings
    pub activation: RawActivation,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[activation]` section as written in the file
#[derive(Debug, Clone, Deserialize)]
pub struct RawActivation {
    /// Base directory for every relative path
    pub work_dir: String,

    /// Glob templates naming the source directories
    pub data_sources: Vec<String>,

    /// Output table naming template
    #[serde(default)]
    pub output_format: Option<String>,

    /// Classifier weights location
    pub model: String,

    /// Resize policy selector (0, 1 or 2)
    #[serde(default)]
    pub stretch_level: ResizePolicy,

    /// What to do with images in `unclassified/`
    #[serde(default)]
    pub flag_unclassified: UnclassifiedPolicy,

    /// How cell identifiers are derived from image paths
    #[serde(default)]
    pub id_strategy: IdStrategy,

    /// Struct-array variable name inside MAT-files
    #[serde(default = "default_table_variable")]
    pub table_variable: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_table_variable() -> String {
    DEFAULT_TABLE_VARIABLE.to_string()
}

/// Image resize policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum ResizePolicy {
    /// Pad symmetrically, no scaling, then center-crop
    #[default]
    PadCenter,
    /// Scale towards 224 keeping aspect ratio, then pad and center-crop
    ScaleThenPad,
    /// Scale both dimensions to 224 independently
    ForceResize,
}

impl TryFrom<u8> for ResizePolicy {
    type Error = String;

    fn try_from(level: u8) -> std::result::Result<Self, Self::Error> {
        match level {
            0 => Ok(ResizePolicy::PadCenter),
            1 => Ok(ResizePolicy::ScaleThenPad),
            2 => Ok(ResizePolicy::ForceResize),
            other => Err(format!("stretch_level must be 0, 1 or 2 (got {})", other)),
        }
    }
}

/// Treatment of images found under `unclassified/`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnclassifiedPolicy {
    /// Leave them out of the index
    Exclude,
    /// Index them with label 0
    Negative,
    /// Index them with label 1
    #[default]
    Positive,
    /// Index them without a ground-truth label
    Unlabeled,
}

impl std::str::FromStr for UnclassifiedPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "exclude" => Ok(Self::Exclude),
            "negative" => Ok(Self::Negative),
            "positive" => Ok(Self::Positive),
            "unlabeled" => Ok(Self::Unlabeled),
            other => Err(format!("unknown unclassified policy '{}'", other)),
        }
    }
}

/// Cell identifier derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Last run of digits in the path is the 1-based row
    #[default]
    Direct,
    /// `{frame_name}_{ordinal}` paired into the table's `cell_id` column
    Pairing,
}

impl std::str::FromStr for IdStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "pairing" => Ok(Self::Pairing),
            other => Err(format!("unknown id strategy '{}'", other)),
        }
    }
}

impl fmt::Display for IdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdStrategy::Direct => write!(f, "direct"),
            IdStrategy::Pairing => write!(f, "pairing"),
        }
    }
}

/// Resolved annotation run configuration
#[derive(Debug, Clone)]
pub struct ActivationConfig {
    /// Concrete source directories, in configuration order
    pub sources: Vec<PathBuf>,
    /// Output table template, still containing `{source}`
    pub out_path: String,
    /// Classifier weights location
    pub model_path: PathBuf,
    pub resize_policy: ResizePolicy,
    pub unclassified: UnclassifiedPolicy,
    pub id_strategy: IdStrategy,
    pub table_variable: String,
    pub logging: LoggingConfig,
}

impl ActivationConfig {
    /// Load and resolve a configuration file, using today's date for `{date}`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content, chrono::Local::now().date_naive())
    }

    /// Parse and resolve configuration text
    pub fn from_toml_str(content: &str, today: NaiveDate) -> Result<Self> {
        let raw: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        Self::resolve(raw, today)
    }

    /// Resolve raw file values into concrete paths
    pub fn resolve(raw: TomlConfig, today: NaiveDate) -> Result<Self> {
        let activation = raw.activation;

        let mut work_dir = activation.work_dir.clone();
        if !work_dir.ends_with('/') {
            work_dir.push('/');
        }

        let output = activation
            .output_format
            .as_deref()
            .unwrap_or(DEFAULT_OUTPUT_FORMAT);
        let output = templates::expand_output_format(output, today, &activation.data_sources);
        let out_path = templates::to_absolute(&work_dir, &output);

        let mut sources = Vec::new();
        for raw_source in &activation.data_sources {
            let raw_source = raw_source.strip_suffix('/').unwrap_or(raw_source);
            let template = templates::to_absolute(&work_dir, raw_source);
            sources.extend(expand_source_template(&template)?);
        }

        if sources.is_empty() {
            warn!("No source directories resolved from {} templates", activation.data_sources.len());
        }

        Ok(Self {
            sources,
            out_path,
            model_path: PathBuf::from(templates::to_absolute(&work_dir, &activation.model)),
            resize_policy: activation.stretch_level,
            unclassified: activation.flag_unclassified,
            id_strategy: activation.id_strategy,
            table_variable: activation.table_variable,
            logging: raw.logging,
        })
    }
}

/// Expand a source directory template into concrete directories
///
/// Matches are sorted. When the first match has no `fakes` entry the
/// template is expanded one level deeper (`{template}/*`) until it does.
/// A template matching nothing contributes no sources.
pub fn expand_source_template(template: &str) -> Result<Vec<PathBuf>> {
    let mut pattern = template.to_string();

    for _ in 0..MAX_SOURCE_DEPTH {
        let entries = glob::glob(&pattern)
            .map_err(|e| Error::Config(format!("Invalid source template {}: {}", pattern, e)))?;
        let mut matches: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).collect();
        matches.sort();

        let Some(first) = matches.first() else {
            warn!("No file was found with the template {}. Skipping...", pattern);
            return Ok(Vec::new());
        };

        if first.join(NEGATIVE_BUCKET).exists() {
            debug!("Template {} resolved to {} sources", pattern, matches.len());
            return Ok(matches);
        }

        pattern.push_str("/*");
    }

    warn!("No labeled source directory found under {}. Skipping...", template);
    Ok(Vec::new())
}

/// Config file resolution priority:
/// 1. Command-line argument or environment variable (highest priority)
/// 2. `cfg/config.toml` in the current directory
/// 3. `~/.config/cellscore/config.toml`
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    let local = PathBuf::from(DEFAULT_CONFIG_PATH);
    if local.exists() {
        return Ok(local);
    }

    if let Some(user_config) = dirs::config_dir().map(|d| d.join("cellscore").join("config.toml")) {
        if user_config.exists() {
            return Ok(user_config);
        }
    }

    Err(Error::NotFound(format!(
        "No configuration file found (tried {} and the user config directory)",
        DEFAULT_CONFIG_PATH
    )))
}
