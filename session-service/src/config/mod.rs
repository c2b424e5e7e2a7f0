use chrono::Duration;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionServiceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub session: SessionConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Upper bound on `lifetime_days`; expiry arithmetic must stay in range.
const MAX_LIFETIME_DAYS: i64 = 3_650;

/// Session lifetime policy and I/O budgets.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub lifetime_days: i64,
    pub refresh_horizon_hours: i64,
    pub cache_key_prefix: String,
    pub cache_timeout_ms: u64,
    pub store_timeout_ms: u64,
    pub auth_timeout_ms: u64,
    pub repopulate_on_miss: bool,
    /// `0` disables the background expiry sweep.
    pub sweep_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            lifetime_days: 30,
            refresh_horizon_hours: 48,
            cache_key_prefix: "session:".to_string(),
            cache_timeout_ms: 250,
            store_timeout_ms: 2_000,
            auth_timeout_ms: 3_000,
            repopulate_on_miss: true,
            sweep_interval_seconds: 3_600,
        }
    }
}

impl SessionConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::days(self.lifetime_days)
    }

    pub fn refresh_horizon(&self) -> Duration {
        Duration::hours(self.refresh_horizon_hours)
    }

    pub fn cache_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_timeout_ms)
    }

    pub fn auth_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.auth_timeout_ms)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.cookie_name.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_COOKIE_NAME must not be empty"
            )));
        }

        if self.lifetime_days <= 0 || self.lifetime_days > MAX_LIFETIME_DAYS {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_LIFETIME_DAYS must be between 1 and {}",
                MAX_LIFETIME_DAYS
            )));
        }

        // Duration::hours panics on overflow
        if self.refresh_horizon_hours <= 0 || self.refresh_horizon_hours >= self.lifetime_days * 24 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_REFRESH_HORIZON_HOURS must be positive and shorter than the session lifetime"
            )));
        }

        if self.cache_timeout_ms == 0 || self.store_timeout_ms == 0 || self.auth_timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Session timeouts must be greater than 0"
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub secure_cookies: bool,
}

impl SessionServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let defaults = SessionConfig::default();

        let config = SessionServiceConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("session-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            session: SessionConfig {
                cookie_name: get_env(
                    "SESSION_COOKIE_NAME",
                    Some(&defaults.cookie_name),
                    false,
                )?,
                lifetime_days: parse_env("SESSION_LIFETIME_DAYS", defaults.lifetime_days)?,
                refresh_horizon_hours: parse_env(
                    "SESSION_REFRESH_HORIZON_HOURS",
                    defaults.refresh_horizon_hours,
                )?,
                cache_key_prefix: get_env(
                    "SESSION_CACHE_KEY_PREFIX",
                    Some(&defaults.cache_key_prefix),
                    false,
                )?,
                cache_timeout_ms: parse_env("SESSION_CACHE_TIMEOUT_MS", defaults.cache_timeout_ms)?,
                store_timeout_ms: parse_env("SESSION_STORE_TIMEOUT_MS", defaults.store_timeout_ms)?,
                auth_timeout_ms: parse_env("SESSION_AUTH_TIMEOUT_MS", defaults.auth_timeout_ms)?,
                repopulate_on_miss: parse_env(
                    "SESSION_REPOPULATE_ON_MISS",
                    defaults.repopulate_on_miss,
                )?,
                sweep_interval_seconds: parse_env(
                    "SESSION_SWEEP_INTERVAL_SECONDS",
                    defaults.sweep_interval_seconds,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                secure_cookies: is_prod || parse_env("SESSION_SECURE_COOKIES", false)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.database.max_connections == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MAX_CONNECTIONS must be greater than 0"
            )));
        }

        self.session.validate()?;

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if !self.security.secure_cookies {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Session cookies must be secure in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod && default.is_none() {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("DEV".parse::<Environment>(), Ok(Environment::Dev));
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Prod));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_default_session_policy() {
        let session = SessionConfig::default();
        assert_eq!(session.lifetime(), Duration::days(30));
        assert_eq!(session.refresh_horizon(), Duration::hours(48));
        assert!(session.validate().is_ok());
    }

    #[test]
    fn test_horizon_must_be_shorter_than_lifetime() {
        let session = SessionConfig {
            lifetime_days: 1,
            refresh_horizon_hours: 24,
            ..SessionConfig::default()
        };
        assert!(session.validate().is_err());
    }

    #[test]
    fn test_oversized_lifetime_and_horizon_are_rejected() {
        let huge_lifetime = SessionConfig {
            lifetime_days: 100_000_000,
            ..SessionConfig::default()
        };
        assert!(huge_lifetime.validate().is_err());

        let huge_horizon = SessionConfig {
            refresh_horizon_hours: i64::MAX,
            ..SessionConfig::default()
        };
        assert!(huge_horizon.validate().is_err());

        let longest = SessionConfig {
            lifetime_days: MAX_LIFETIME_DAYS,
            ..SessionConfig::default()
        };
        assert!(longest.validate().is_ok());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<u64>("X", " 42 ").unwrap(), 42);
        assert!(parse_value::<bool>("X", "yes").is_err());
        assert!(parse_value::<i64>("X", "ten").is_err());
    }
}
