//! Automatic moderation engine
//!
//! Message and join facts come in through [`AutoModerator`]; rules and the
//! raid detector decide whether something happened and the
//! [`ActionExecutor`] applies and records the guild's configured response.

pub mod config;
pub mod counters;
pub mod error;
pub mod escalation;
pub mod executor;
pub mod log;
pub mod platform;
pub mod raid;
pub mod record;
pub mod rules;
pub mod scheduler;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};
use tracing::{info, warn};

pub use config::{EscalationAction, GuildModerationConfig, ModAction, ViolationKind};
pub use counters::{MemoryWarningStore, MemoryWindowStore, WarningState, WarningStore, WindowStore};
pub use error::{ModerationError, ModerationResult};
pub use executor::{ActionExecutor, ManualAction};
pub use log::{Case, ViolationLog, YamlViolationLog};
pub use platform::{ModerationPlatform, SerenityPlatform};
pub use raid::{JoinFacts, RaidDetector};
pub use record::{ActionTaken, SanctionKind, SanctionRecord, SanctionState, ViolationRecord};
pub use rules::{MessageFacts, Violation};
pub use scheduler::ReversalScheduler;
pub use store::SanctionStore;

use crate::MODERATION_TARGET;
use crate::duration::format_duration;

/// Entry point for the moderation pipeline
#[derive(Clone)]
pub struct AutoModerator {
    platform: Arc<dyn ModerationPlatform>,
    windows: Arc<dyn WindowStore>,
    warnings: Arc<dyn WarningStore>,
    log: Arc<dyn ViolationLog>,
    raid: RaidDetector,
    executor: ActionExecutor,
    scheduler: ReversalScheduler,
}

/// Counts removed by one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub windows: usize,
    pub warnings: usize,
    pub timers: usize,
}

impl AutoModerator {
    /// Build a moderator with in-memory counters
    #[must_use]
    pub fn new(
        platform: Arc<dyn ModerationPlatform>,
        sanctions: SanctionStore,
        log: Arc<dyn ViolationLog>,
    ) -> Self {
        Self::with_stores(
            platform,
            sanctions,
            log,
            Arc::new(MemoryWindowStore::new()),
            Arc::new(MemoryWarningStore::new()),
        )
    }

    /// Build a moderator over caller-provided counter stores
    #[must_use]
    pub fn with_stores(
        platform: Arc<dyn ModerationPlatform>,
        sanctions: SanctionStore,
        log: Arc<dyn ViolationLog>,
        windows: Arc<dyn WindowStore>,
        warnings: Arc<dyn WarningStore>,
    ) -> Self {
        let scheduler = ReversalScheduler::new(sanctions, Arc::clone(&platform));
        let executor = ActionExecutor::new(
            Arc::clone(&platform),
            Arc::clone(&warnings),
            Arc::clone(&log),
            scheduler.clone(),
        );

        Self {
            platform,
            raid: RaidDetector::new(Arc::clone(&windows)),
            windows,
            warnings,
            log,
            executor,
            scheduler,
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &ReversalScheduler {
        &self.scheduler
    }

    /// Restore persisted sanctions; call before handling events
    pub async fn rearm(&self) -> usize {
        self.scheduler.rearm().await
    }

    /// Evaluate a message and act on the first violation
    pub async fn handle_message(
        &self,
        config: &GuildModerationConfig,
        facts: &MessageFacts,
    ) -> Option<ViolationRecord> {
        let violation = rules::evaluate(
            config,
            facts,
            self.windows.as_ref(),
            self.platform.as_ref(),
        )
        .await?;

        Some(self.executor.handle_violation(config, facts, &violation).await)
    }

    /// Count a member join and lock the guild down on a burst
    pub async fn handle_member_join(
        &self,
        config: &GuildModerationConfig,
        join: &JoinFacts,
    ) -> Option<ViolationRecord> {
        let joins = self.raid.record_join(config, join)?;
        self.executor.handle_raid(config, joins).await
    }

    /// Lift a member's mute early and record the case.
    ///
    /// Cancels the pending reversal when there is one. Without a tracked
    /// sanction the mute role is still removed if one is configured, or the
    /// native timeout is lifted otherwise. Returns whether a tracked mute was
    /// cancelled.
    ///
    /// # Errors
    /// Returns an error if the platform call fails.
    pub async fn unmute(
        &self,
        config: &GuildModerationConfig,
        user_id: u64,
        moderator_id: u64,
        reason: &str,
    ) -> ModerationResult<bool> {
        let tracked = match self.scheduler.store().active_mute_for(config.guild_id, user_id) {
            Some(record) => {
                self.scheduler.cancel(&record.id).await?;
                true
            }
            None => {
                let guild_id = GuildId::new(config.guild_id);
                let user = UserId::new(user_id);
                match config.mute_role_id {
                    Some(role_id) => {
                        self.platform
                            .remove_role(guild_id, user, RoleId::new(role_id), reason)
                            .await?;
                    }
                    None => self.platform.clear_timeout(guild_id, user).await?,
                }
                false
            }
        };

        self.executor
            .record_case(config, user_id, moderator_id, ActionTaken::Unmute, reason, true)
            .await;
        Ok(tracked)
    }

    /// Apply a moderator-issued sanction
    pub async fn moderate(
        &self,
        config: &GuildModerationConfig,
        user_id: u64,
        moderator_id: u64,
        action: ManualAction,
        reason: &str,
    ) -> ViolationRecord {
        self.executor
            .handle_manual(config, user_id, moderator_id, action, reason)
            .await
    }

    /// Bulk-delete recent messages in a channel and report it to the log channel
    ///
    /// # Errors
    /// Returns an error if the messages cannot be fetched or deleted.
    pub async fn purge(
        &self,
        config: &GuildModerationConfig,
        channel_id: u64,
        limit: u8,
        author: Option<u64>,
        moderator_id: u64,
    ) -> ModerationResult<usize> {
        let deleted = self
            .platform
            .purge(ChannelId::new(channel_id), limit, author.map(UserId::new))
            .await?;

        info!(
            target: MODERATION_TARGET,
            guild_id = config.guild_id,
            channel_id,
            moderator_id,
            deleted,
            "Messages purged"
        );

        if let Some(log_channel) = config.log_channel {
            let target = author.map_or_else(|| "anyone".to_string(), |id| format!("<@{id}>"));
            let description = format!(
                "**Moderator:** <@{moderator_id}>\n**Channel:** <#{channel_id}>\n\
                 **Messages deleted:** {deleted}\n**From:** {target}"
            );
            if let Err(e) = self
                .platform
                .post_log(ChannelId::new(log_channel), "Messages purged", &description)
                .await
            {
                warn!(target: MODERATION_TARGET, error = %e, "Failed to post purge notice");
            }
        }

        Ok(deleted)
    }

    /// Create a role that cannot talk anywhere, for use as the mute role
    ///
    /// # Errors
    /// Returns an error if the role cannot be created.
    pub async fn create_mute_role(&self, guild_id: u64) -> ModerationResult<u64> {
        let role_id = self.platform.create_mute_role(GuildId::new(guild_id)).await?;
        info!(target: MODERATION_TARGET, guild_id, %role_id, "Created mute role");
        Ok(role_id.get())
    }

    /// A member's case history in a guild, newest first
    ///
    /// # Errors
    /// Returns an error if the violation log cannot be read.
    pub async fn infractions(&self, guild_id: u64, user_id: u64) -> ModerationResult<Vec<Case>> {
        let records = self.log.read_all().await?;
        Ok(log::cases_for(records, guild_id, user_id))
    }

    /// Start a manual lockdown
    ///
    /// # Errors
    /// Returns an error if no channel could be locked.
    pub async fn lockdown(
        &self,
        config: &GuildModerationConfig,
        duration_secs: u64,
        reason: &str,
    ) -> ModerationResult<Option<SanctionRecord>> {
        let record = self.executor.lockdown(config, duration_secs, reason).await?;

        if let (Some(record), Some(log_channel)) = (&record, config.log_channel) {
            let channels = match &record.kind {
                SanctionKind::Lockdown { channels } => channels.len(),
                SanctionKind::Mute { .. } => 0,
            };
            let description = format!(
                "**Channels:** {channels}\n**Duration:** {}\n**Reason:** {reason}",
                format_duration(duration_secs)
            );
            if let Err(e) = self
                .platform
                .post_log(ChannelId::new(log_channel), "Lockdown started", &description)
                .await
            {
                warn!(target: MODERATION_TARGET, error = %e, "Failed to post lockdown notice");
            }
        }

        Ok(record)
    }

    /// Lift an active lockdown early, returning whether one was active
    ///
    /// # Errors
    /// Returns an error if the lockdown record changed state concurrently.
    pub async fn unlock(&self, guild_id: u64) -> ModerationResult<bool> {
        match self.scheduler.store().active_lockdown_for(guild_id) {
            Some(record) => {
                self.scheduler.cancel(&record.id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[must_use]
    pub fn warnings(&self, guild_id: u64, user_id: u64) -> Option<WarningState> {
        self.warnings.get((guild_id, user_id))
    }

    /// Forget a member's warnings, returning whether there were any
    pub fn clear_warnings(&self, guild_id: u64, user_id: u64) -> bool {
        self.warnings.reset((guild_id, user_id))
    }

    /// Drop idle counters and finished timer handles
    pub fn prune_idle(
        &self,
        now: DateTime<Utc>,
        window_age: Duration,
        warning_age: Duration,
    ) -> PruneStats {
        let stats = PruneStats {
            windows: self.windows.prune(now, window_age),
            warnings: self.warnings.prune(now, warning_age),
            timers: self.scheduler.prune_finished(),
        };

        if stats != PruneStats::default() {
            info!(
                target: MODERATION_TARGET,
                windows = stats.windows,
                warnings = stats.warnings,
                timers = stats.timers,
                "Pruned idle moderation state"
            );
        }

        stats
    }
}
