use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AssetLevel, AssetQuotaConfig, LobClass, TimeRestriction, MONETIZATION_LOB};

const DEFAULT_CONFIG_FILE: &str = "slotbook.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub rules: RulesConfig,
    pub quota: QuotaConfig,
    pub fairness: FairnessDefaults,
    pub auction: AuctionConfig,
    pub business_hours: BusinessHours,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub wal_file: String,
    /// Compact the WAL once this many events were appended since the last compaction.
    pub compact_threshold: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_file: "slotbook.wal".into(),
            compact_threshold: 1000,
        }
    }
}

impl StorageConfig {
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub port: Option<u16>,
}

// ── Booking rules ────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub max_length: MaxLengthRule,
    pub no_consecutive: NoConsecutiveRule,
    pub rolling_window: RollingWindowRule,
    pub lead_time: LeadTimeRule,
    pub cooldown: CooldownRule,
    pub concurrent: ConcurrentRule,
    pub blackout: BlackoutRule,
    pub share_cap: ShareCapRule,
    pub purpose: PurposeRule,
    pub exclusivity: ExclusivityRule,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxLengthRule {
    pub enabled: bool,
    pub max_days: i64,
}

impl Default for MaxLengthRule {
    fn default() -> Self {
        Self { enabled: true, max_days: 7 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NoConsecutiveRule {
    pub enabled: bool,
}

impl Default for NoConsecutiveRule {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingWindowRule {
    pub enabled: bool,
    pub window_days: u64,
    pub max_days: i64,
}

impl Default for RollingWindowRule {
    fn default() -> Self {
        Self { enabled: true, window_days: 30, max_days: 14 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadTimeRule {
    pub enabled: bool,
    pub lead_days: u64,
}

impl Default for LeadTimeRule {
    fn default() -> Self {
        Self { enabled: true, lead_days: 3 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownRule {
    pub enabled: bool,
    pub cooldown_days: u64,
}

impl Default for CooldownRule {
    fn default() -> Self {
        Self { enabled: true, cooldown_days: 3 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrentRule {
    pub enabled: bool,
    pub max_active: usize,
}

impl Default for ConcurrentRule {
    fn default() -> Self {
        Self { enabled: true, max_active: 2 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackoutRule {
    pub enabled: bool,
    pub dates: Vec<NaiveDate>,
}

impl Default for BlackoutRule {
    fn default() -> Self {
        Self { enabled: true, dates: Vec::new() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareCapRule {
    pub enabled: bool,
    /// Max fraction of a calendar quarter one asset+LOB may hold.
    pub percent: f64,
}

impl Default for ShareCapRule {
    fn default() -> Self {
        Self { enabled: true, percent: 0.40 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PurposeRule {
    pub enabled: bool,
    pub window_days: u64,
}

impl Default for PurposeRule {
    fn default() -> Self {
        Self { enabled: true, window_days: 30 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusivityRule {
    pub enabled: bool,
    /// Asset type → LOBs allowed to book it. Types without an entry are open to all.
    pub allowed: HashMap<String, Vec<String>>,
}

impl Default for ExclusivityRule {
    fn default() -> Self {
        Self { enabled: true, allowed: HashMap::new() }
    }
}

// ── Slot quotas and bid caps ─────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub primary: AssetQuotaConfig,
    pub secondary: AssetQuotaConfig,
    pub tertiary: AssetQuotaConfig,
    /// LOBs counted as external demand. Everything else except Monetization is internal.
    pub external_lobs: Vec<String>,
    pub monetization_lob: String,
    pub bid_caps: ClassCaps,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            primary: AssetQuotaConfig {
                internal_guarantee: 0.60,
                external_limit: 0.40,
                monetization_limit: 0.20,
            },
            secondary: AssetQuotaConfig {
                internal_guarantee: 0.70,
                external_limit: 0.30,
                monetization_limit: 0.15,
            },
            tertiary: AssetQuotaConfig {
                internal_guarantee: 0.80,
                external_limit: 0.20,
                monetization_limit: 0.10,
            },
            external_lobs: Vec::new(),
            monetization_lob: MONETIZATION_LOB.into(),
            bid_caps: ClassCaps::default(),
        }
    }
}

impl QuotaConfig {
    pub fn level_defaults(&self, level: AssetLevel) -> AssetQuotaConfig {
        match level {
            AssetLevel::Primary => self.primary,
            AssetLevel::Secondary => self.secondary,
            AssetLevel::Tertiary => self.tertiary,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassCaps {
    pub internal: ClassCap,
    pub external: ClassCap,
    pub monetization: ClassCap,
}

impl Default for ClassCaps {
    fn default() -> Self {
        Self {
            internal: ClassCap {
                max_bid_multiplier: 2.0,
                time_restriction: TimeRestriction::None,
            },
            external: ClassCap {
                max_bid_multiplier: 1.5,
                time_restriction: TimeRestriction::None,
            },
            monetization: ClassCap {
                max_bid_multiplier: 1.2,
                time_restriction: TimeRestriction::BusinessHours,
            },
        }
    }
}

impl ClassCaps {
    pub fn for_class(&self, class: LobClass) -> ClassCap {
        match class {
            LobClass::Internal => self.internal,
            LobClass::External => self.external,
            LobClass::Monetization => self.monetization,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ClassCap {
    pub max_bid_multiplier: f64,
    pub time_restriction: TimeRestriction,
}

// ── Fairness scoring ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoiType {
    ImmediateRevenue,
    Engagement,
    Conversion,
    Revenue,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoiTarget {
    pub roi_type: RoiType,
    pub metric: String,
    pub target: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LevelValues {
    pub primary: f64,
    pub secondary: f64,
    pub tertiary: f64,
}

impl LevelValues {
    pub fn get(&self, level: AssetLevel) -> f64 {
        match level {
            AssetLevel::Primary => self.primary,
            AssetLevel::Secondary => self.secondary,
            AssetLevel::Tertiary => self.tertiary,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessDefaults {
    pub roi_cap: f64,
    pub window_days: i64,
    pub time_decay_factor: f64,
    pub time_fairness_cap: f64,
    pub fairness_bonus: f64,
    pub internal_weight: f64,
    pub external_weight: f64,
    /// Monetization strategic weight when nothing more specific is configured.
    pub revenue_floor: LevelValues,
    /// LOB → how its performance is measured.
    pub roi_table: HashMap<String, RoiTarget>,
}

impl Default for FairnessDefaults {
    fn default() -> Self {
        let roi_table = [
            (MONETIZATION_LOB, RoiType::ImmediateRevenue, "revenue_per_day", 1000.0),
            ("AI Bot", RoiType::Engagement, "user_interactions", 1000.0),
            ("Marketing", RoiType::Conversion, "conversions", 100.0),
            ("Sales", RoiType::Revenue, "pipeline_revenue", 50_000.0),
        ]
        .into_iter()
        .map(|(lob, roi_type, metric, target)| {
            (
                lob.to_string(),
                RoiTarget { roi_type, metric: metric.to_string(), target },
            )
        })
        .collect();

        Self {
            roi_cap: 2.0,
            window_days: 30,
            time_decay_factor: 0.5,
            time_fairness_cap: 2.0,
            fairness_bonus: 0.3,
            internal_weight: 1.4,
            external_weight: 1.0,
            revenue_floor: LevelValues { primary: 1.8, secondary: 1.65, tertiary: 1.5 },
            roi_table,
        }
    }
}

// ── Auction ──────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionConfig {
    /// Auto-bid target above the running highest bid, in percent.
    pub auto_bid_increment_percent: u32,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self { auto_bid_increment_percent: 10 }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessHours {
    /// First hour (UTC) inside business hours.
    pub start_hour: u32,
    /// First hour (UTC) after business hours.
    pub end_hour: u32,
    pub weekdays_only: bool,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self { start_hour: 9, end_hour: 17, weekdays_only: true }
    }
}

impl BusinessHours {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if self.weekdays_only && matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        (self.start_hour..self.end_hour).contains(&at.hour())
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl Config {
    /// Defaults, then the TOML file (explicit path, `SLOTBOOK_CONFIG`, or `./slotbook.toml`
    /// if present), then `SLOTBOOK_*` environment overrides.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match resolve_config_path(explicit_path) {
            Some(path) => read_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(dir) = env::var("SLOTBOOK_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = parse_env::<u16>("SLOTBOOK_METRICS_PORT")? {
            self.metrics.port = Some(port);
        }
        if let Some(threshold) = parse_env::<u64>("SLOTBOOK_COMPACT_THRESHOLD")? {
            self.storage.compact_threshold = threshold;
        }
        if let Ok(level) = env::var("SLOTBOOK_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, limits) in [
            ("quota.primary", self.quota.primary),
            ("quota.secondary", self.quota.secondary),
            ("quota.tertiary", self.quota.tertiary),
        ] {
            limits
                .validate()
                .map_err(|e| ConfigError::Validation(format!("{name}: {e}")))?;
        }
        if self.rules.max_length.max_days < 1 {
            return Err(ConfigError::Validation("rules.max_length.max_days must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.rules.share_cap.percent) {
            return Err(ConfigError::Validation("rules.share_cap.percent must be within [0, 1]".into()));
        }
        if self.fairness.window_days < 1 {
            return Err(ConfigError::Validation("fairness.window_days must be at least 1".into()));
        }
        if self.fairness.roi_cap <= 0.0 || self.fairness.time_fairness_cap < 1.0 {
            return Err(ConfigError::Validation(
                "fairness.roi_cap must be positive and fairness.time_fairness_cap at least 1".into(),
            ));
        }
        if let Some((lob, _)) = self.fairness.roi_table.iter().find(|(_, t)| t.target <= 0.0) {
            return Err(ConfigError::Validation(format!(
                "fairness.roi_table.{lob}: target must be positive"
            )));
        }
        let hours = &self.business_hours;
        if hours.start_hour >= hours.end_hour || hours.end_hour > 24 {
            return Err(ConfigError::Validation(
                "business_hours must satisfy start_hour < end_hour <= 24".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = env::var("SLOTBOOK_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
    default.exists().then_some(default)
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw).map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value }),
        Err(_) => Ok(None),
    }
}
