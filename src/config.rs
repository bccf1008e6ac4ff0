//! Configuration loading
//!
//! Settings live in `config.toml` inside the data directory. Every section is
//! optional; anything missing falls back to the defaults below.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ProgressError, Result};
use crate::scheduler::IntervalTable;

pub const CONFIG_FILE: &str = "config.toml";
pub const DATABASE_FILE: &str = "progress.sqlite";
pub const MODE_STATE_FILE: &str = "mode-state.json";

const DEFAULT_CONFIG: &str = r#"# Dojo progress configuration

[scheduler]
# Days until the next review for Leitner boxes 1..5 (must not decrease)
intervals = [1, 3, 7, 14, 30]

[cache]
# How long a computed progress snapshot stays valid
ttl_seconds = 300

[readiness]
# Fraction of terminology that must be mastered before grading
terminology_threshold = 0.8
# Fraction of patterns that must be mastered before grading
pattern_threshold = 0.8
# Minimum accumulated study time before grading
min_study_hours = 10.0

[analytics]
# Offset from UTC used to decide which calendar day a session belongs to
utc_offset_minutes = 0
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub readiness: ReadinessConfig,
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval in days for box 1..=5, index = box - 1
    pub intervals: Vec<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            intervals: IntervalTable::default().days().to_vec(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval_table(&self) -> Result<IntervalTable> {
        IntervalTable::new(&self.intervals)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 300 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Requirements a student must meet before grading for the next rank
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub terminology_threshold: f64,
    pub pattern_threshold: f64,
    pub min_study_hours: f64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            terminology_threshold: 0.8,
            pattern_threshold: 0.8,
            min_study_hours: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub utc_offset_minutes: i32,
}

impl AnalyticsConfig {
    /// Offset used for calendar-day bucketing; out-of-range values fall back to UTC
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }
}

impl Config {
    /// Load configuration from file, or defaults when the file does not exist
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            debug!("No config at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&content)?;
        // Fail early on a table that would break scheduling
        config.scheduler.interval_table()?;
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}

/// Write the commented default configuration unless one already exists
pub fn write_default_config(data_dir: &Path) -> Result<PathBuf> {
    let config_path = data_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        std::fs::write(&config_path, DEFAULT_CONFIG)?;
        info!("Created default configuration at {:?}", config_path);
    }
    Ok(config_path)
}

/// Data directory: `./.dojo` when present in the working directory, else `~/.dojo`
pub fn data_dir() -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let project_dir = cwd.join(".dojo");
    if project_dir.exists() {
        return Ok(project_dir);
    }

    let home = dirs::home_dir().ok_or(ProgressError::NoDataDir)?;
    Ok(home.join(".dojo"))
}
