use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::quality::QualityRules;
use crate::transform::TransformSpec;

/// Parsed, validated pipeline declaration. Immutable after [`PipelineConfig::load`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline_name: String,
    pub version: String,
    pub sources: Vec<SourceSpec>,
    pub destinations: Vec<DestinationSpec>,
    pub quality_checks: QualityCheckConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Csv,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    #[serde(alias = "delimited")]
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: SourceType,
    pub path: PathBuf,
    #[serde(default = "default_format")]
    pub format: SourceFormat,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_true")]
    pub header: bool,
    /// Overrides the built-in transformation preset for this source.
    #[serde(default)]
    pub transform: Option<TransformSpec>,
}

impl SourceSpec {
    /// The validated single-byte delimiter.
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b',')
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    Database,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    #[serde(alias = "upsert")]
    Merge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationSpec {
    pub name: String,
    pub source: String,
    #[serde(rename = "type", default = "default_destination_type")]
    pub destination_type: DestinationType,
    pub table: String,
    pub merge_key: String,
    #[serde(default = "default_update_mode")]
    pub update_type: UpdateMode,
    /// Target columns, in insert order. Falls back to the table preset, then
    /// to every column of the transformed dataset.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Overrides the built-in quality rule preset for this table.
    #[serde(default)]
    pub quality_rules: Option<QualityRules>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub threshold: f64,
    #[serde(default)]
    pub fail_on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_log_path")]
    pub output_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output_path: default_log_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Total attempts per batch, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Upper bound for a single batch attempt.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub run_timeout_seconds: Option<u64>,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry_attempts: default_retry_attempts(),
            timeout_seconds: default_timeout_seconds(),
            max_workers: default_max_workers(),
            backoff_base_ms: default_backoff_base_ms(),
            run_timeout_seconds: None,
            database_path: default_database_path(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_source_type() -> SourceType {
    SourceType::Csv
}
fn default_format() -> SourceFormat {
    SourceFormat::Csv
}
fn default_delimiter() -> String {
    ",".to_string()
}
fn default_destination_type() -> DestinationType {
    DestinationType::Database
}
fn default_update_mode() -> UpdateMode {
    UpdateMode::Merge
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> LogFormat {
    LogFormat::Json
}
fn default_log_path() -> PathBuf {
    PathBuf::from("logs/pipeline.log")
}
fn default_batch_size() -> usize {
    1000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_max_workers() -> usize {
    4
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_database_path() -> PathBuf {
    PathBuf::from("sales_analytics.db")
}

impl PipelineConfig {
    /// Reads and validates a pipeline declaration. `.toml` files are parsed
    /// as TOML, anything else as JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
        let config = if is_toml {
            Self::from_toml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut source_names = HashSet::new();
        for source in &self.sources {
            if !source_names.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateName {
                    kind: "source",
                    name: source.name.clone(),
                });
            }
            if source.delimiter.len() != 1 || !source.delimiter.is_ascii() {
                return Err(ConfigError::InvalidDelimiter {
                    source_name: source.name.clone(),
                    delimiter: source.delimiter.clone(),
                });
            }
        }

        let mut destination_names = HashSet::new();
        for dest in &self.destinations {
            if !destination_names.insert(dest.name.as_str()) {
                return Err(ConfigError::DuplicateName {
                    kind: "destination",
                    name: dest.name.clone(),
                });
            }
            if !source_names.contains(dest.source.as_str()) {
                return Err(ConfigError::UnknownSource {
                    destination: dest.name.clone(),
                    source_name: dest.source.clone(),
                });
            }
            if dest.merge_key.trim().is_empty() {
                return Err(ConfigError::EmptyMergeKey(dest.name.clone()));
            }
            let patterns = dest.quality_rules.iter().flat_map(|r| r.patterns.iter());
            for rule in patterns {
                if let Err(e) = regex::Regex::new(&rule.pattern) {
                    return Err(ConfigError::InvalidSetting {
                        field: "quality_rules.patterns",
                        reason: format!("destination '{}' column '{}': {e}", dest.name, rule.column),
                    });
                }
            }
        }

        let threshold = self.quality_checks.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::ThresholdOutOfRange(threshold));
        }

        let s = &self.settings;
        if s.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if s.retry_attempts == 0 {
            return Err(invalid("retry_attempts", "must be at least 1"));
        }
        if s.timeout_seconds == 0 {
            return Err(invalid("timeout_seconds", "must be greater than 0"));
        }
        if s.max_workers == 0 {
            return Err(invalid("max_workers", "must be at least 1"));
        }
        if s.run_timeout_seconds == Some(0) {
            return Err(invalid("run_timeout_seconds", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn destinations_for<'a>(
        &'a self,
        source: &'a str,
    ) -> impl Iterator<Item = &'a DestinationSpec> + 'a {
        self.destinations.iter().filter(move |d| d.source == source)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        field,
        reason: reason.to_string(),
    }
}
