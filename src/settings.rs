//! Process settings read from the environment
//!
//! `.env` is loaded by `main` before [`Settings::from_env`] runs.

use std::path::PathBuf;
use std::time::Duration;

use poise::serenity_prelude::GuildId;
use thiserror::Error;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value `{value}`")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone)]
pub struct Settings {
    pub token: String,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub maintenance_interval: Duration,
    /// Register commands in this guild only
    pub dev_guild: Option<GuildId>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("token", &"<redacted>")
            .field("data_dir", &self.data_dir)
            .field("log_dir", &self.log_dir)
            .field("maintenance_interval", &self.maintenance_interval)
            .field("dev_guild", &self.dev_guild)
            .finish()
    }
}

impl Settings {
    /// Read settings from the process environment
    ///
    /// # Errors
    /// Returns an error if `DISCORD_TOKEN` is missing or a value does not parse.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, treating blank values as unset
    ///
    /// # Errors
    /// Returns an error if `DISCORD_TOKEN` is missing or a value does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let token = get("DISCORD_TOKEN").ok_or(SettingsError::Missing("DISCORD_TOKEN"))?;
        let data_dir =
            get("DATA_DIR").map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from);
        let log_dir = get("LOG_DIR").map_or_else(|| PathBuf::from(DEFAULT_LOG_DIR), PathBuf::from);

        let interval_secs = match get("MAINTENANCE_INTERVAL_SECS") {
            Some(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(SettingsError::Invalid {
                        key: "MAINTENANCE_INTERVAL_SECS",
                        value,
                    });
                }
            },
            None => DEFAULT_MAINTENANCE_INTERVAL_SECS,
        };

        let dev_guild = match get("DEV_GUILD_ID") {
            Some(value) => match value.parse::<u64>() {
                Ok(id) if id > 0 => Some(GuildId::new(id)),
                _ => {
                    return Err(SettingsError::Invalid {
                        key: "DEV_GUILD_ID",
                        value,
                    });
                }
            },
            None => None,
        };

        Ok(Self {
            token,
            data_dir,
            log_dir,
            maintenance_interval: Duration::from_secs(interval_secs),
            dev_guild,
        })
    }

    #[must_use]
    pub fn guild_configs_path(&self) -> PathBuf {
        self.data_dir.join("guild_configs.yaml")
    }

    #[must_use]
    pub fn sanctions_path(&self) -> PathBuf {
        self.data_dir.join("sanctions.yaml")
    }

    #[must_use]
    pub fn violations_path(&self) -> PathBuf {
        self.data_dir.join("violations.yaml")
    }
}
