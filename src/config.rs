use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub discovery: DiscoveryConfig,
    pub detector: DetectorConfig,
    pub optimizer: OptimizerConfig,
    pub applicator: ApplicatorConfig,
    pub validator: ValidatorConfig,
    pub logging: LoggingConfig,
    pub secrets: SecretsConfig,
}

/// Reserved for a future transport binding. No HTTP surface is implemented
/// by the core itself; this section exists so a binding can be added
/// without a breaking config change.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub connection_pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub interval_seconds: u64,
    pub max_queries_per_poll: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Estimated-row threshold above which a table counts as "large", per engine.
    pub large_table_rows: u64,
    pub stale_stats_ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub completion_soft_timeout_sec: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub completion_hard_timeout_sec: u64,
    pub min_improvement_pct: f64,
    pub max_regression_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicatorConfig {
    pub business_hours_enabled: bool,
    pub business_hours_start: u8,
    pub business_hours_end: u8,
    pub enable_ddl_execution: bool,
    pub allow_dangerous_operations: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub iterations: u32,
    pub auto_revert_on_regression: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Base64-encoded 32-byte AES-256-GCM key. Generated fresh on first run
    /// in dev if unset; production deployments must set `APP_SECRETS_KEY`.
    pub key_base64: Option<String>,
}

impl Config {
    /// Load configuration with environment variable override support
    ///
    /// Loading order:
    /// 1. Load from config.toml file
    /// 2. Override with environment variables (prefixed with APP_)
    /// 3. Validate the final configuration
    pub fn load() -> Result<Self, anyhow::Error> {
        // 1. Load from config file
        let mut config = if let Some(config_path) = Self::find_config_file() {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        // 2. Override with environment variables
        config.apply_env_overrides();

        // 3. Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables (all `APP_`-prefixed):
    /// - `APP_STORE_URL`, `APP_STORE_POOL_SIZE`
    /// - `APP_DISCOVERY_INTERVAL_SECONDS` (accepts "60s", "1h"), `APP_DISCOVERY_MAX_QUERIES_PER_POLL`
    /// - `APP_DETECTOR_LARGE_TABLE_ROWS`, `APP_DETECTOR_STALE_STATS_RATIO`
    /// - `APP_OPTIMIZER_SOFT_TIMEOUT_SEC`, `APP_OPTIMIZER_HARD_TIMEOUT_SEC`
    /// - `APP_OPTIMIZER_MIN_IMPROVEMENT_PCT`, `APP_OPTIMIZER_MAX_REGRESSION_PCT`
    /// - `APP_APPLICATOR_BUSINESS_HOURS_ENABLED`, `APP_APPLICATOR_ALLOW_DANGEROUS_OPERATIONS`
    /// - `APP_VALIDATOR_ITERATIONS`, `APP_VALIDATOR_AUTO_REVERT`
    /// - `APP_LOG_LEVEL`
    /// - `APP_SECRETS_KEY` (base64 AES-256-GCM key)
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("APP_STORE_URL") {
            self.store.url = url;
            tracing::info!("Override store.url from env");
        }

        if let Ok(size) = std::env::var("APP_STORE_POOL_SIZE")
            && let Ok(size) = size.parse()
        {
            self.store.connection_pool_size = size;
            tracing::info!("Override store.connection_pool_size from env: {}", size);
        }

        if let Ok(interval) = std::env::var("APP_DISCOVERY_INTERVAL_SECONDS") {
            match parse_duration_to_secs(&interval) {
                Ok(val) => {
                    self.discovery.interval_seconds = val;
                    tracing::info!("Override discovery.interval_seconds from env: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_DISCOVERY_INTERVAL_SECONDS '{}': {} (keep {})",
                    interval,
                    e,
                    self.discovery.interval_seconds
                ),
            }
        }

        if let Ok(max) = std::env::var("APP_DISCOVERY_MAX_QUERIES_PER_POLL")
            && let Ok(max) = max.parse()
        {
            self.discovery.max_queries_per_poll = max;
            tracing::info!("Override discovery.max_queries_per_poll from env: {}", max);
        }

        if let Ok(rows) = std::env::var("APP_DETECTOR_LARGE_TABLE_ROWS")
            && let Ok(rows) = rows.parse()
        {
            self.detector.large_table_rows = rows;
            tracing::info!("Override detector.large_table_rows from env: {}", rows);
        }

        if let Ok(ratio) = std::env::var("APP_DETECTOR_STALE_STATS_RATIO")
            && let Ok(ratio) = ratio.parse()
        {
            self.detector.stale_stats_ratio = ratio;
            tracing::info!("Override detector.stale_stats_ratio from env: {}", ratio);
        }

        if let Ok(sec) = std::env::var("APP_OPTIMIZER_SOFT_TIMEOUT_SEC") {
            match parse_duration_to_secs(&sec) {
                Ok(val) => self.optimizer.completion_soft_timeout_sec = val,
                Err(e) => tracing::warn!("Invalid APP_OPTIMIZER_SOFT_TIMEOUT_SEC: {}", e),
            }
        }

        if let Ok(sec) = std::env::var("APP_OPTIMIZER_HARD_TIMEOUT_SEC") {
            match parse_duration_to_secs(&sec) {
                Ok(val) => self.optimizer.completion_hard_timeout_sec = val,
                Err(e) => tracing::warn!("Invalid APP_OPTIMIZER_HARD_TIMEOUT_SEC: {}", e),
            }
        }

        if let Ok(pct) = std::env::var("APP_OPTIMIZER_MIN_IMPROVEMENT_PCT")
            && let Ok(pct) = pct.parse()
        {
            self.optimizer.min_improvement_pct = pct;
        }

        if let Ok(pct) = std::env::var("APP_OPTIMIZER_MAX_REGRESSION_PCT")
            && let Ok(pct) = pct.parse()
        {
            self.optimizer.max_regression_pct = pct;
        }

        if let Ok(v) = std::env::var("APP_APPLICATOR_BUSINESS_HOURS_ENABLED")
            && let Ok(v) = v.parse()
        {
            self.applicator.business_hours_enabled = v;
        }

        if let Ok(v) = std::env::var("APP_APPLICATOR_ALLOW_DANGEROUS_OPERATIONS")
            && let Ok(v) = v.parse()
        {
            self.applicator.allow_dangerous_operations = v;
            tracing::warn!(
                "Override applicator.allow_dangerous_operations from env: {}",
                v
            );
        }

        if let Ok(v) = std::env::var("APP_VALIDATOR_ITERATIONS")
            && let Ok(v) = v.parse()
        {
            self.validator.iterations = v;
        }

        if let Ok(v) = std::env::var("APP_VALIDATOR_AUTO_REVERT")
            && let Ok(v) = v.parse()
        {
            self.validator.auto_revert_on_regression = v;
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(key) = std::env::var("APP_SECRETS_KEY") {
            self.secrets.key_base64 = Some(key);
            tracing::info!("Override secrets.key_base64 from env");
        }
    }

    /// Validate configuration.
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.store.url.is_empty() {
            anyhow::bail!("store.url cannot be empty");
        }
        if self.store.connection_pool_size == 0 {
            anyhow::bail!("store.connection_pool_size must be > 0");
        }
        if self.discovery.interval_seconds == 0 {
            anyhow::bail!("discovery.interval_seconds must be > 0");
        }
        if self.optimizer.completion_hard_timeout_sec <= self.optimizer.completion_soft_timeout_sec
        {
            anyhow::bail!("optimizer.completion_hard_timeout_sec must exceed soft timeout");
        }
        if self.validator.iterations == 0 {
            anyhow::bail!("validator.iterations must be > 0");
        }
        if self.secrets.key_base64.is_none() {
            tracing::warn!(
                "secrets.key_base64 not set; a random key will be generated for this process \
                 and ciphertext will not survive a restart"
            );
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/sqlwatch.db".to_string(), connection_pool_size: 4 }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { interval_seconds: 3600, max_queries_per_poll: 100 }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { large_table_rows: 100_000, stale_stats_ratio: 10.0 }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            completion_soft_timeout_sec: 300,
            completion_hard_timeout_sec: 330,
            min_improvement_pct: 10.0,
            max_regression_pct: 5.0,
        }
    }
}

impl Default for ApplicatorConfig {
    fn default() -> Self {
        Self {
            business_hours_enabled: false,
            business_hours_start: 9,
            business_hours_end: 17,
            enable_ddl_execution: true,
            allow_dangerous_operations: false,
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { iterations: 3, auto_revert_on_regression: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,sqlwatch=debug".to_string(), file: Some("logs/sqlwatch.log".to_string()) }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self { key_base64: None }
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    // Accept plain numbers (treated as seconds)
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        "d" | "day" | "days" => Ok(n * 60 * 60 * 24),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

// Custom serde deserializers to support numeric or human-friendly string values
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}
