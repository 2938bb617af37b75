//! Engine configuration: identifier widths, row bucket width, paging and worker pool sizing.
//!
//! Loads from (in precedence order): defaults, an optional TOML file, and environment
//! variables (`TSQ__*`, double underscore separating nested sections).

use crate::error::QueryError;
use crate::rowseq::MAX_DELTA;
use crate::types::Value;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

/// Default width of a metric identifier, in bytes.
pub const DEFAULT_METRIC_WIDTH: usize = 3;
/// Default width of a tag name identifier, in bytes.
pub const DEFAULT_TAG_NAME_WIDTH: usize = 3;
/// Default width of a tag value identifier, in bytes.
pub const DEFAULT_TAG_VALUE_WIDTH: usize = 3;
/// Default time span covered by one storage row, in seconds.
pub const DEFAULT_ROW_SPAN_SECS: u32 = 3600;

/// Fixed widths of the identifiers embedded in row keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeyWidths {
    pub metric: usize,
    pub tag_name: usize,
    pub tag_value: usize,
}

impl Default for KeyWidths {
    fn default() -> Self {
        Self {
            metric: DEFAULT_METRIC_WIDTH,
            tag_name: DEFAULT_TAG_NAME_WIDTH,
            tag_value: DEFAULT_TAG_VALUE_WIDTH,
        }
    }
}

impl KeyWidths {
    pub fn new(metric: usize, tag_name: usize, tag_value: usize) -> Self {
        Self {
            metric,
            tag_name,
            tag_value,
        }
    }

    /// Width of one `name_id ++ value_id` pair.
    #[inline]
    pub fn tag_pair(&self) -> usize {
        self.tag_name + self.tag_value
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.metric == 0 || self.tag_name == 0 || self.tag_value == 0 {
            return Err(QueryError::Config(format!(
                "identifier widths must be non-zero: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Defaults applied to availability (gap-filled) queries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// Alignment interval in seconds when the request does not give one.
    pub interval_secs: u64,
    /// Value emitted for intervals without data.
    pub fallback: f64,
    /// Whether the fallback value is reported as an integer.
    pub fallback_is_integer: bool,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            fallback: 0.0,
            fallback_is_integer: false,
        }
    }
}

impl AvailabilityConfig {
    /// The fallback as a typed value.
    pub fn fallback_value(&self) -> Value {
        if self.fallback_is_integer {
            Value::Integer(self.fallback as i64)
        } else {
            Value::Float(self.fallback)
        }
    }
}

/// Configuration options for the query engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub widths: KeyWidths,
    /// Time span covered by one physical row (row keys are aligned on it).
    pub row_span_secs: u32,
    /// Maximum number of rows returned by one storage page.
    pub scan_page_size: usize,
    /// Worker threads for running independent queries in parallel.
    pub worker_threads: usize,
    pub availability: AvailabilityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            widths: KeyWidths::default(),
            row_span_secs: DEFAULT_ROW_SPAN_SECS,
            scan_page_size: 128,
            worker_threads: 4,
            availability: AvailabilityConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads defaults, then `path` (if given), then `TSQ__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, QueryError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(QueryError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix("TSQ")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .ignore_empty(true),
        );
        let cfg: EngineConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses a TOML document layered on top of the defaults. No environment lookup.
    pub fn from_toml_str(toml: &str) -> Result<Self, QueryError> {
        let cfg: EngineConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        self.widths.validate()?;
        if self.row_span_secs == 0 {
            return Err(QueryError::Config("row_span_secs must be > 0".to_string()));
        }
        if u64::from(self.row_span_secs) > MAX_DELTA {
            return Err(QueryError::Config(format!(
                "row_span_secs {} exceeds the qualifier delta range of {} seconds",
                self.row_span_secs, MAX_DELTA
            )));
        }
        if self.scan_page_size == 0 {
            return Err(QueryError::Config("scan_page_size must be > 0".to_string()));
        }
        if self.worker_threads == 0 {
            return Err(QueryError::Config("worker_threads must be > 0".to_string()));
        }
        if self.availability.interval_secs == 0 {
            return Err(QueryError::Config(
                "availability.interval_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
