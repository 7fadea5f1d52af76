use std::{ops::Deref, path::PathBuf, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::GuildId;
use tracing::info;

use crate::Error;
use crate::duration::to_chrono;
use crate::moderation::{
    AutoModerator, GuildModerationConfig, ModerationPlatform, PruneStats, SanctionStore,
    YamlViolationLog,
};
use crate::settings::Settings;

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("guild_configs", &self.guild_configs)
            .field("config_path", &self.config_path)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct DataInner {
    // Map of guild_id -> moderation configuration
    pub guild_configs: DashMap<GuildId, GuildModerationConfig>,
    pub automod: AutoModerator,
    pub settings: Settings,
    config_path: PathBuf,
    // Serializes config file writes
    save_lock: tokio::sync::Mutex<()>,
}

impl Data {
    /// Create data with no guild configurations
    #[must_use]
    pub fn new(settings: Settings, automod: AutoModerator) -> Self {
        Self(Arc::new(DataInner {
            guild_configs: DashMap::new(),
            automod,
            config_path: settings.guild_configs_path(),
            settings,
            save_lock: tokio::sync::Mutex::new(()),
        }))
    }

    /// Load guild configurations and active sanctions from the data directory.
    ///
    /// Missing files start empty. Sanctions are loaded but not re-armed; call
    /// [`AutoModerator::rearm`] once the client is ready.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed.
    pub async fn load(
        settings: Settings,
        platform: Arc<dyn ModerationPlatform>,
    ) -> Result<Self, Error> {
        let sanctions = SanctionStore::load(settings.sanctions_path()).await?;
        let log = Arc::new(YamlViolationLog::new(settings.violations_path()));
        let data = Self::new(settings, AutoModerator::new(platform, sanctions, log));

        match tokio::fs::read_to_string(&data.config_path).await {
            Ok(content) => {
                let configs: Vec<GuildModerationConfig> = serde_yaml::from_str(&content)?;
                for config in configs {
                    data.guild_configs
                        .insert(GuildId::new(config.guild_id), config);
                }
                info!(
                    count = data.guild_configs.len(),
                    path = %data.config_path.display(),
                    "Loaded guild configurations"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(data)
    }

    /// Configuration for a guild, or the defaults if it has none yet
    #[must_use]
    pub fn guild_config(&self, guild_id: GuildId) -> GuildModerationConfig {
        self.guild_configs
            .get(&guild_id)
            .map_or_else(
                || GuildModerationConfig::for_guild(guild_id.get()),
                |entry| entry.value().clone(),
            )
    }

    /// Edit a guild's configuration and save every configuration to disk.
    ///
    /// The map entry is released before saving.
    ///
    /// # Errors
    /// Returns the error produced by `edit`, or a save error.
    pub async fn update_guild_config<T, E>(
        &self,
        guild_id: GuildId,
        edit: impl FnOnce(&mut GuildModerationConfig) -> Result<T, E>,
    ) -> Result<T, Error>
    where
        E: Into<Error>,
    {
        let value = {
            let mut entry = self
                .guild_configs
                .entry(guild_id)
                .or_insert_with(|| GuildModerationConfig::for_guild(guild_id.get()));
            edit(entry.value_mut()).map_err(Into::into)?
        };

        self.save().await?;
        Ok(value)
    }

    /// Save guild configurations to the YAML file
    ///
    /// # Errors
    /// This function will return an error if:
    /// - The data directory cannot be created
    /// - The guild configurations cannot be serialized to YAML
    /// - The YAML data cannot be written to the config file
    pub async fn save(&self) -> Result<(), Error> {
        let _guard = self.save_lock.lock().await;

        let mut configs: Vec<GuildModerationConfig> = self
            .guild_configs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        configs.sort_by_key(|config| config.guild_id);

        let yaml = serde_yaml::to_string(&configs)?;

        if let Some(parent) = self
            .config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.config_path, yaml).await?;

        Ok(())
    }

    /// Drop counters that no configured window or timeout can still use
    pub fn run_maintenance(&self, now: DateTime<Utc>) -> PruneStats {
        let (window_age, warning_age) = self.prune_ages();
        self.automod.prune_idle(now, window_age, warning_age)
    }

    fn prune_ages(&self) -> (Duration, Duration) {
        let defaults = GuildModerationConfig::default();
        let (mut window, mut warning) = (
            defaults
                .effective_spam_window()
                .max(defaults.effective_raid_window()),
            defaults.effective_warning_timeout(),
        );

        for entry in &self.guild_configs {
            let config = entry.value();
            window = window
                .max(config.effective_spam_window())
                .max(config.effective_raid_window());
            warning = warning.max(config.effective_warning_timeout());
        }

        (to_chrono(window), to_chrono(warning))
    }
}
