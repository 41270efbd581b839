use std::env;
use std::fmt;
use std::time::Duration;

/// Distinguishes runtime behavior for different deployments of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for hosts embedding the lifecycle engines.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub telemetry: TelemetryConfig,
    pub rules: RuleSettings,
    pub transfer: TransferPolicy,
}

const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_TC_PREFIX: &str = "TC";

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let cache_ttl_secs = match env::var("RULE_CACHE_TTL_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidCacheTtl(raw))?,
            Err(_) => DEFAULT_CACHE_TTL_SECS,
        };

        let tc_prefix = env::var("TC_PREFIX").unwrap_or_else(|_| DEFAULT_TC_PREFIX.to_string());
        let tc_prefix = tc_prefix.trim().to_string();
        if tc_prefix.is_empty() || tc_prefix.contains('/') {
            return Err(ConfigError::InvalidTcPrefix(tc_prefix));
        }

        let transfer = TransferPolicy {
            tc_prefix,
            require_fee_clearance: flag("TC_REQUIRE_FEE_CLEARANCE", true)?,
            allow_pending_fees: flag("TC_ALLOW_PENDING_FEES", false)?,
            auto_update_student_status: flag("TC_AUTO_UPDATE_STUDENT_STATUS", true)?,
        };

        Ok(Self {
            environment,
            telemetry: TelemetryConfig { log_level },
            rules: RuleSettings {
                cache_ttl: Duration::from_secs(cache_ttl_secs),
            },
            transfer,
        })
    }
}

fn flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag { name, value: raw }),
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Settings for the process-wide rule cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSettings {
    pub cache_ttl: Duration,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

/// Leaving-certificate workflow switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPolicy {
    pub tc_prefix: String,
    pub require_fee_clearance: bool,
    pub allow_pending_fees: bool,
    /// Flip student and academic record status when a transfer is approved.
    pub auto_update_student_status: bool,
}

impl TransferPolicy {
    /// Whether outstanding fees block a new transfer request.
    pub fn blocks_pending_fees(&self) -> bool {
        self.require_fee_clearance && !self.allow_pending_fees
    }
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            tc_prefix: DEFAULT_TC_PREFIX.to_string(),
            require_fee_clearance: true,
            allow_pending_fees: false,
            auto_update_student_status: true,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidCacheTtl(String),
    InvalidTcPrefix(String),
    InvalidFlag { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidCacheTtl(value) => {
                write!(f, "RULE_CACHE_TTL_SECS must be a whole number of seconds, got '{value}'")
            }
            ConfigError::InvalidTcPrefix(value) => {
                write!(f, "TC_PREFIX must be non-empty and must not contain '/', got '{value}'")
            }
            ConfigError::InvalidFlag { name, value } => {
                write!(f, "{name} must be a boolean flag, got '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
