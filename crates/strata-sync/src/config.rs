//! # Storage Configuration
//!
//! Configuration for adapters and the storage manager.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Explicit values (TOML file or code)                                │
//! │     Never replaced by anything below                                   │
//! │                                                                         │
//! │  2. Environment fallbacks (only fill what is missing)                  │
//! │     LOCAL_DATABASE_URL            → local connection string            │
//! │     CLOUD_DATABASE_URL, then      → cloud connection string            │
//! │     DATABASE_URL                                                       │
//! │     STRATA_STORAGE_MODE           → mode, when the file sets none      │
//! │                                                                         │
//! │  3. TOML Config File                                                   │
//! │     ~/.config/strata/storage.toml (Linux)                              │
//! │     ~/Library/Application Support/dev.strata.strata/storage.toml       │
//! │                                                                         │
//! │  4. Default Values (lowest priority)                                   │
//! │     hybrid mode, local primary, periodic sync every 5 minutes          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # storage.toml
//! mode = "hybrid"  # local | cloud | hybrid
//!
//! [local]
//! enabled = true
//! connection_string = "sqlite:./data/local.db"
//!
//! [cloud]
//! enabled = true
//! connection_string = "sqlite:./data/cloud.db"
//! retry_attempts = 3
//! retry_delay_ms = 1000
//!
//! [hybrid]
//! primary_storage = "local"
//! fallback_enabled = true
//! sync_strategy = "periodic"  # realtime | periodic | manual
//! sync_interval_ms = 300000
//! conflict_resolution = "merge"  # local | remote | merge
//! offline_mode = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use strata_core::{AdapterKind, ConflictResolution};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// Local connection string used when neither config nor environment names one.
pub const DEFAULT_LOCAL_URL: &str = "file:./local.db";

/// Environment variable consulted for the local connection string.
pub const LOCAL_URL_ENV: &str = "LOCAL_DATABASE_URL";

/// Environment variables consulted, in order, for the cloud connection string.
pub const CLOUD_URL_ENV: &[&str] = &["CLOUD_DATABASE_URL", "DATABASE_URL"];

/// Reads one environment variable; the seam tests replace.
pub(crate) type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub(crate) fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// =============================================================================
// Storage Mode
// =============================================================================

/// Which backends the manager routes to.
///
/// ## Mode Behavior
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        Storage Mode Behavior                            │
/// │                                                                         │
/// │  LOCAL                                                                 │
/// │  ─────                                                                 │
/// │  • Only the on-device store exists                                     │
/// │  • A failed connect is fatal                                           │
/// │  • sync() is unavailable                                               │
/// │                                                                         │
/// │  CLOUD                                                                 │
/// │  ─────                                                                 │
/// │  • Only the remote store exists, with retry and reconnect              │
/// │  • A failed connect is fatal                                           │
/// │                                                                         │
/// │  HYBRID (Default)                                                      │
/// │  ──────                                                                │
/// │  • Both stores; the primary serves calls, the other is the fallback    │
/// │  • Local writes are pushed to the cloud by sync()                      │
/// │  • Either connect may fail; the manager runs degraded                  │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    Local,
    Cloud,
    #[default]
    Hybrid,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Local => write!(f, "local"),
            StorageMode::Cloud => write!(f, "cloud"),
            StorageMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "offline" => Ok(StorageMode::Local),
            "cloud" | "remote" => Ok(StorageMode::Cloud),
            "hybrid" => Ok(StorageMode::Hybrid),
            other => Err(StorageError::InvalidConfig(format!(
                "Unknown storage mode: '{}'. Valid options: local, cloud, hybrid",
                other
            ))),
        }
    }
}

/// What triggers a hybrid sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Debounced after every local write.
    Realtime,

    /// On a fixed interval, regardless of writes.
    #[default]
    Periodic,

    /// Only when the caller invokes `sync()`.
    Manual,
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStrategy::Realtime => write!(f, "realtime"),
            SyncStrategy::Periodic => write!(f, "periodic"),
            SyncStrategy::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for SyncStrategy {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "realtime" => Ok(SyncStrategy::Realtime),
            "periodic" => Ok(SyncStrategy::Periodic),
            "manual" => Ok(SyncStrategy::Manual),
            other => Err(StorageError::InvalidConfig(format!(
                "Unknown sync strategy: '{}'. Valid options: realtime, periodic, manual",
                other
            ))),
        }
    }
}

/// Remote database flavour, reported by `connection_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudProvider {
    #[default]
    Postgresql,
    Mysql,
    Mongodb,
    Supabase,
    Planetscale,
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudProvider::Postgresql => write!(f, "postgresql"),
            CloudProvider::Mysql => write!(f, "mysql"),
            CloudProvider::Mongodb => write!(f, "mongodb"),
            CloudProvider::Supabase => write!(f, "supabase"),
            CloudProvider::Planetscale => write!(f, "planetscale"),
        }
    }
}

// =============================================================================
// Adapter Options
// =============================================================================

/// Options every adapter accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageOptions {
    /// Store connection string (`sqlite:`, `file:` or `memory:`).
    /// Falls back to the environment when absent.
    #[serde(default)]
    pub connection_string: Option<String>,

    /// Whether this adapter may run sync passes at all.
    #[serde(default)]
    pub sync_enabled: bool,

    /// Interval of the adapter's own auto-sync timer (milliseconds).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,

    /// Policy applied when both sides changed the same record.
    #[serde(default = "default_conflict_resolution")]
    pub conflict_resolution: ConflictResolution,

    /// Start the auto-sync timer on connect when sync is enabled.
    /// The manager turns this off for the adapters it owns.
    #[serde(default = "default_true")]
    pub auto_sync: bool,
}

fn default_sync_interval() -> u64 {
    5 * 60 * 1000
}

fn default_conflict_resolution() -> ConflictResolution {
    ConflictResolution::Merge
}

fn default_true() -> bool {
    true
}

impl Default for StorageOptions {
    fn default() -> Self {
        StorageOptions {
            connection_string: None,
            sync_enabled: false,
            sync_interval_ms: default_sync_interval(),
            conflict_resolution: default_conflict_resolution(),
            auto_sync: true,
        }
    }
}

impl StorageOptions {
    /// Options pointing at an explicit connection string.
    pub fn with_connection(connection_string: impl Into<String>) -> Self {
        StorageOptions {
            connection_string: Some(connection_string.into()),
            ..Default::default()
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

/// Options for the cloud adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudStorageOptions {
    #[serde(flatten)]
    pub base: StorageOptions,

    #[serde(default)]
    pub provider: CloudProvider,

    #[serde(default)]
    pub region: Option<String>,

    /// Require TLS to the remote store.
    #[serde(default = "default_true")]
    pub ssl: bool,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Transaction timeout (milliseconds).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Attempts per connect and per operation, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay before the second attempt (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Growth factor between delays. 1.0 keeps the delay fixed.
    #[serde(default = "default_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
}

fn default_pool_size() -> u32 {
    10
}
fn default_timeout() -> u64 {
    30_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    1.0
}

impl Default for CloudStorageOptions {
    fn default() -> Self {
        CloudStorageOptions {
            base: StorageOptions::default(),
            provider: CloudProvider::default(),
            region: None,
            ssl: true,
            pool_size: default_pool_size(),
            timeout_ms: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            retry_backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl CloudStorageOptions {
    /// Options pointing at an explicit connection string.
    pub fn with_connection(connection_string: impl Into<String>) -> Self {
        CloudStorageOptions {
            base: StorageOptions::with_connection(connection_string),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// =============================================================================
// Manager Settings
// =============================================================================

/// Local backend settings for the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub options: StorageOptions,
}

impl Default for LocalSettings {
    fn default() -> Self {
        LocalSettings {
            enabled: true,
            options: StorageOptions::default(),
        }
    }
}

/// Cloud backend settings for the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub options: CloudStorageOptions,
}

impl Default for CloudSettings {
    fn default() -> Self {
        CloudSettings {
            enabled: true,
            options: CloudStorageOptions::default(),
        }
    }
}

/// Policy for hybrid mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSettings {
    /// Backend that serves calls while it is connected.
    #[serde(default = "default_primary")]
    pub primary_storage: AdapterKind,

    /// Route to the other backend when the primary is disconnected.
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,

    #[serde(default)]
    pub sync_strategy: SyncStrategy,

    /// Period of the manager's periodic sync (milliseconds).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,

    #[serde(default = "default_conflict_resolution")]
    pub conflict_resolution: ConflictResolution,

    /// Keep running on the local store when the cloud cannot be reached
    /// at connect time. When false, that failure is fatal.
    #[serde(default = "default_true")]
    pub offline_mode: bool,
}

fn default_primary() -> AdapterKind {
    AdapterKind::Local
}

impl Default for HybridSettings {
    fn default() -> Self {
        HybridSettings {
            primary_storage: default_primary(),
            fallback_enabled: true,
            sync_strategy: SyncStrategy::default(),
            sync_interval_ms: default_sync_interval(),
            conflict_resolution: default_conflict_resolution(),
            offline_mode: true,
        }
    }
}

impl HybridSettings {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

// =============================================================================
// Main Storage Configuration
// =============================================================================

/// Complete storage manager configuration.
///
/// ## Example Config File
/// ```toml
/// mode = "hybrid"
///
/// [local]
/// connection_string = "sqlite:./data/local.db"
///
/// [cloud]
/// connection_string = "sqlite:./data/cloud.db"
/// retry_attempts = 5
///
/// [hybrid]
/// primary_storage = "cloud"
/// sync_strategy = "realtime"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub mode: StorageMode,

    #[serde(default)]
    pub local: LocalSettings,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub hybrid: HybridSettings,
}

impl StorageConfig {
    pub fn new(mode: StorageMode) -> Self {
        StorageConfig {
            mode,
            ..Default::default()
        }
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later fills in for earlier)
    /// 1. Default values
    /// 2. Config file (storage.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> StorageResult<Self> {
        let mut config = Self::default();
        let mut mode_in_file = false;

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading storage config from file");
                let contents = std::fs::read_to_string(&path)?;
                let table: toml::Table = toml::from_str(&contents)?;
                mode_in_file = table.contains_key("mode");
                config = table.try_into()?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides(mode_in_file, &process_env);
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load storage config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> StorageResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| StorageError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Storage config saved");
        Ok(())
    }

    /// Lists every problem with this configuration.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let cloud_url = self.cloud.options.base.connection_string.as_deref();

        if self.mode == StorageMode::Cloud && cloud_url.is_none() {
            problems.push("Cloud mode requires a connection string".to_string());
        }

        if self.mode == StorageMode::Hybrid && !self.local.enabled && !self.cloud.enabled {
            problems.push("Hybrid mode requires at least one adapter to be enabled".to_string());
        }

        if self.uses(AdapterKind::Cloud) && cloud_url.is_none() {
            problems.push("Cloud adapter requires a connection string when enabled".to_string());
        }

        if self.uses(AdapterKind::Cloud) && self.cloud.options.retry_attempts == 0 {
            problems.push("Cloud retry_attempts must be greater than 0".to_string());
        }

        if self.mode == StorageMode::Hybrid
            && self.hybrid.sync_strategy == SyncStrategy::Periodic
            && self.hybrid.sync_interval_ms == 0
        {
            problems.push("Periodic sync requires a sync_interval_ms greater than 0".to_string());
        }

        problems
    }

    /// Validates the configuration.
    pub fn validate(&self) -> StorageResult<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(StorageError::InvalidConfig(problems.join("; ")))
        }
    }

    /// Whether the manager will construct the given adapter.
    pub fn uses(&self, kind: AdapterKind) -> bool {
        match (self.mode, kind) {
            (StorageMode::Local, AdapterKind::Local) | (StorageMode::Cloud, AdapterKind::Cloud) => {
                self.enabled(kind)
            }
            (StorageMode::Hybrid, kind) => self.enabled(kind),
            _ => false,
        }
    }

    fn enabled(&self, kind: AdapterKind) -> bool {
        match kind {
            AdapterKind::Local => self.local.enabled,
            AdapterKind::Cloud => self.cloud.enabled,
        }
    }

    /// Applies environment fallbacks. A mode set in the config file wins
    /// over `STRATA_STORAGE_MODE`.
    fn apply_env_overrides(&mut self, mode_in_file: bool, env: EnvLookup<'_>) {
        if let Some(mode) = env("STRATA_STORAGE_MODE") {
            match mode.parse::<StorageMode>() {
                Ok(parsed) if mode_in_file && parsed != self.mode => warn!(
                    env = %parsed,
                    file = %self.mode,
                    "Ignoring STRATA_STORAGE_MODE, config file sets the mode"
                ),
                Ok(parsed) => {
                    info!(mode = %parsed, "Storage mode taken from environment");
                    self.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown storage mode in environment"),
            }
        }

        self.fill_connection_defaults(env);
    }

    /// Fills missing connection strings from the environment. Explicit
    /// values are never replaced.
    pub(crate) fn fill_connection_defaults(&mut self, env: EnvLookup<'_>) {
        let local = &mut self.local.options.connection_string;
        if local.is_none() {
            *local = env(LOCAL_URL_ENV);
        }

        let cloud = &mut self.cloud.options.base.connection_string;
        if cloud.is_none() {
            *cloud = CLOUD_URL_ENV.iter().find_map(|key| env(key));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "strata", "strata")
            .map(|dirs| dirs.config_dir().join("storage.toml"))
    }
}

// =============================================================================
// Profiles and User Preferences
// =============================================================================

/// Deployment environment a configuration is derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Development,
    Production,
    Test,
}

impl Profile {
    /// Reads `STRATA_ENV`, defaulting to development.
    pub fn from_env() -> Self {
        process_env("STRATA_ENV")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl std::str::FromStr for Profile {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Profile::Development),
            "production" | "prod" => Ok(Profile::Production),
            "test" => Ok(Profile::Test),
            other => Err(StorageError::InvalidConfig(format!(
                "Unknown profile: '{}'. Valid options: development, production, test",
                other
            ))),
        }
    }
}

/// How often the user wants hybrid data synchronised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFrequency {
    Realtime,
    Frequent,
    #[default]
    Moderate,
    Rare,
}

impl SyncFrequency {
    pub fn interval(&self) -> Duration {
        match self {
            SyncFrequency::Realtime => Duration::from_secs(30),
            SyncFrequency::Frequent => Duration::from_secs(2 * 60),
            SyncFrequency::Moderate => Duration::from_secs(5 * 60),
            SyncFrequency::Rare => Duration::from_secs(30 * 60),
        }
    }
}

/// How much data the user is willing to send off the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPrivacy {
    /// Local storage only.
    Strict,
    #[default]
    Moderate,
    /// Prefer the cloud.
    Relaxed,
}

/// User-facing storage preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default = "default_true")]
    pub allow_cloud_storage: bool,

    #[serde(default = "default_true")]
    pub allow_offline_mode: bool,

    #[serde(default)]
    pub sync_frequency: SyncFrequency,

    #[serde(default)]
    pub data_privacy: DataPrivacy,
}

impl Default for UserPreferences {
    fn default() -> Self {
        UserPreferences {
            allow_cloud_storage: true,
            allow_offline_mode: true,
            sync_frequency: SyncFrequency::default(),
            data_privacy: DataPrivacy::default(),
        }
    }
}

impl StorageConfig {
    /// Builds the configuration for a profile, shaped by user preferences.
    pub fn for_profile(profile: Profile, prefs: &UserPreferences) -> Self {
        Self::profile_defaults(profile, &process_env).with_preferences(prefs)
    }

    pub(crate) fn profile_defaults(profile: Profile, env: EnvLookup<'_>) -> Self {
        match profile {
            Profile::Development => {
                let cloud_url = env("DATABASE_URL");
                StorageConfig {
                    mode: StorageMode::Hybrid,
                    local: LocalSettings {
                        enabled: true,
                        options: StorageOptions::with_connection(
                            env(LOCAL_URL_ENV).unwrap_or_else(|| "file:./dev.db".into()),
                        ),
                    },
                    cloud: CloudSettings {
                        enabled: cloud_url.is_some(),
                        options: CloudStorageOptions {
                            base: StorageOptions {
                                connection_string: cloud_url,
                                ..Default::default()
                            },
                            ssl: false,
                            retry_attempts: 2,
                            timeout_ms: 10_000,
                            ..Default::default()
                        },
                    },
                    hybrid: HybridSettings {
                        primary_storage: AdapterKind::Local,
                        sync_strategy: SyncStrategy::Periodic,
                        sync_interval_ms: 30_000,
                        conflict_resolution: ConflictResolution::Local,
                        ..Default::default()
                    },
                }
            }
            Profile::Production => StorageConfig {
                mode: StorageMode::Hybrid,
                local: LocalSettings {
                    enabled: true,
                    options: StorageOptions::with_connection("file:./app.db"),
                },
                cloud: CloudSettings {
                    enabled: true,
                    options: CloudStorageOptions {
                        base: StorageOptions {
                            connection_string: env("DATABASE_URL"),
                            ..Default::default()
                        },
                        ssl: true,
                        retry_attempts: 5,
                        timeout_ms: 30_000,
                        pool_size: 20,
                        ..Default::default()
                    },
                },
                hybrid: HybridSettings {
                    primary_storage: AdapterKind::Cloud,
                    sync_strategy: SyncStrategy::Periodic,
                    sync_interval_ms: 5 * 60 * 1000,
                    conflict_resolution: ConflictResolution::Remote,
                    ..Default::default()
                },
            },
            Profile::Test => StorageConfig {
                mode: StorageMode::Local,
                local: LocalSettings {
                    enabled: true,
                    options: StorageOptions::with_connection(
                        env("TEST_DATABASE_URL").unwrap_or_else(|| "file:./test.db".into()),
                    ),
                },
                cloud: CloudSettings {
                    enabled: false,
                    ..Default::default()
                },
                hybrid: HybridSettings::default(),
            },
        }
    }

    /// Applies user preferences on top of this configuration.
    ///
    /// ## Rules (in order)
    /// - strict privacy → local mode, cloud disabled
    /// - relaxed privacy → cloud becomes the hybrid primary
    /// - cloud not allowed → local mode, cloud disabled
    /// - offline not allowed → no fallback, no offline mode
    /// - sync frequency → hybrid interval (realtime also switches strategy)
    pub fn with_preferences(mut self, prefs: &UserPreferences) -> Self {
        match prefs.data_privacy {
            DataPrivacy::Strict => self.force_local(),
            DataPrivacy::Relaxed => self.hybrid.primary_storage = AdapterKind::Cloud,
            DataPrivacy::Moderate => {}
        }

        if !prefs.allow_cloud_storage {
            self.force_local();
        }

        if !prefs.allow_offline_mode {
            self.hybrid.fallback_enabled = false;
            self.hybrid.offline_mode = false;
        }

        self.hybrid.sync_interval_ms = prefs.sync_frequency.interval().as_millis() as u64;
        if prefs.sync_frequency == SyncFrequency::Realtime {
            self.hybrid.sync_strategy = SyncStrategy::Realtime;
        }

        self
    }

    fn force_local(&mut self) {
        self.mode = StorageMode::Local;
        self.cloud.enabled = false;
    }
}

// =============================================================================
// Presets
// =============================================================================

impl StorageConfig {
    /// Everything on the device, nothing leaves it.
    pub fn local_only() -> Self {
        StorageConfig {
            mode: StorageMode::Local,
            local: LocalSettings {
                enabled: true,
                options: StorageOptions::with_connection("file:./local.db"),
            },
            cloud: CloudSettings {
                enabled: false,
                ..Default::default()
            },
            hybrid: HybridSettings::default(),
        }
    }

    /// Everything in the cloud. The connection string comes from the
    /// environment unless set afterwards.
    pub fn cloud_only() -> Self {
        StorageConfig {
            mode: StorageMode::Cloud,
            local: LocalSettings {
                enabled: false,
                ..Default::default()
            },
            cloud: CloudSettings {
                enabled: true,
                options: CloudStorageOptions {
                    ssl: true,
                    retry_attempts: 5,
                    ..Default::default()
                },
            },
            hybrid: HybridSettings::default(),
        }
    }

    /// Local cache in front of a large cloud pool, synced as writes happen.
    pub fn high_performance() -> Self {
        StorageConfig {
            mode: StorageMode::Hybrid,
            local: LocalSettings {
                enabled: true,
                options: StorageOptions::with_connection("file:./cache.db"),
            },
            cloud: CloudSettings {
                enabled: true,
                options: CloudStorageOptions {
                    pool_size: 50,
                    timeout_ms: 5_000,
                    ..Default::default()
                },
            },
            hybrid: HybridSettings {
                primary_storage: AdapterKind::Local,
                fallback_enabled: true,
                sync_strategy: SyncStrategy::Realtime,
                sync_interval_ms: 10_000,
                conflict_resolution: ConflictResolution::Merge,
                offline_mode: true,
            },
        }
    }

    /// Local first with infrequent syncs to save bandwidth.
    pub fn mobile() -> Self {
        StorageConfig {
            mode: StorageMode::Hybrid,
            local: LocalSettings {
                enabled: true,
                options: StorageOptions::with_connection("file:./mobile.db"),
            },
            cloud: CloudSettings {
                enabled: true,
                options: CloudStorageOptions {
                    retry_attempts: 3,
                    timeout_ms: 15_000,
                    ..Default::default()
                },
            },
            hybrid: HybridSettings {
                primary_storage: AdapterKind::Local,
                fallback_enabled: true,
                sync_strategy: SyncStrategy::Periodic,
                sync_interval_ms: 10 * 60 * 1000,
                conflict_resolution: ConflictResolution::Local,
                offline_mode: true,
            },
        }
    }

    /// Picks a preset from the environment: a cloud database URL enables the
    /// hybrid cache preset, otherwise everything stays local.
    pub fn auto_detect() -> Self {
        Self::detect_with(&process_env)
    }

    pub(crate) fn detect_with(env: EnvLookup<'_>) -> Self {
        let mut config = if env("DATABASE_URL").is_some() {
            Self::high_performance()
        } else {
            Self::local_only()
        };
        config.fill_connection_defaults(env);
        config
    }
}
