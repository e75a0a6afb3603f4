use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, str::FromStr};
use tracing::debug;

pub const DEFAULT_CBR_URL: &str = "https://cbr.ru/scripts/XML_daily.asp";
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    /// Upper bound for connecting and for each command
    pub timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            timeout_ms: 2000,
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: String,
    pub api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        TelegramConfig {
            token: "YOUR_TELEGRAM_BOT_TOKEN".to_string(),
            api_url: DEFAULT_TELEGRAM_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    pub timeout_secs: u64,
    /// Currency pinned at 1.0 in every snapshot
    pub base_currency: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            url: DEFAULT_CBR_URL.to_string(),
            timeout_secs: 10,
            base_currency: "RUB".to_string(),
        }
    }
}

/// Local time of the daily refresh.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub telegram: TelegramConfig,
    pub source: SourceConfig,
    pub schedule: ScheduleConfig,
}

impl AppConfig {
    /// Loads the config file (explicit path, else the default location when it
    /// exists, else built-in defaults) and applies environment overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => {
                let default_path = Self::default_config_path()?;
                if default_path.exists() {
                    Self::load_from_path(&default_path)?
                } else {
                    debug!("No config file at {}, using defaults", default_path.display());
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "rates-bot")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("REDIS_HOST") {
            self.redis.host = host;
        }
        if let Some(port) = lookup("REDIS_PORT") {
            self.redis.port = parse_var("REDIS_PORT", &port)?;
        }
        if let Some(db) = lookup("REDIS_DB") {
            self.redis.db = parse_var("REDIS_DB", &db)?;
        }
        if let Some(token) = lookup("TELEGRAM_TOKEN") {
            self.telegram.token = token;
        }
        if let Some(url) = lookup("CBR_URL") {
            self.source.url = url;
        }
        if let Some(base) = lookup("BASE_CURRENCY") {
            self.source.base_currency = base.trim().to_uppercase();
        }
        if let Some(hour) = lookup("REFRESH_HOUR") {
            self.schedule.hour = parse_var("REFRESH_HOUR", &hour)?;
        }
        if let Some(minute) = lookup("REFRESH_MINUTE") {
            self.schedule.minute = parse_var("REFRESH_MINUTE", &minute)?;
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {name}: {value:?}"))
}
