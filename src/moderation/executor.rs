//! Action executor
//!
//! Turns a violation into the guild's configured action. Platform calls are
//! best-effort: each failure is logged and the remaining steps still run.
//! Every call to [`ActionExecutor::handle_violation`],
//! [`ActionExecutor::handle_raid`] or [`ActionExecutor::handle_manual`] writes
//! exactly one [`ViolationRecord`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
use tracing::{error, warn};

use super::config::{EscalationAction, GuildModerationConfig, ModAction, ViolationKind};
use super::counters::WarningStore;
use super::escalation::{WarningOutcome, register_warning};
use super::log::{SNAPSHOT_DISPLAY_LIMIT, ViolationLog, truncate_for_display};
use super::platform::ModerationPlatform;
use super::record::{ActionTaken, ChannelLock, SanctionRecord, ViolationRecord};
use super::rules::{MessageFacts, Violation};
use super::scheduler::ReversalScheduler;
use super::{ModerationError, ModerationResult};
use crate::MODERATION_TARGET;
use crate::duration::{format_duration, to_chrono};
use crate::logging;

/// How long a public warning stays visible
pub const WARNING_LIFETIME: Duration = Duration::from_secs(10);
/// Days of message history removed on ban
pub const BAN_PURGE_DAYS: u8 = 1;
/// Longest native timeout the platform accepts
pub const MAX_TIMEOUT_SECS: u64 = 28 * 24 * 60 * 60;

/// Sanction issued through a moderator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualAction {
    Warn,
    Mute { duration_secs: u64 },
    Kick,
    Ban,
    Unban,
}

/// Applies moderation actions and records them
#[derive(Clone)]
pub struct ActionExecutor {
    platform: Arc<dyn ModerationPlatform>,
    warnings: Arc<dyn WarningStore>,
    log: Arc<dyn ViolationLog>,
    scheduler: ReversalScheduler,
    /// Guilds with a lockdown being set up right now
    locking: Arc<DashSet<u64>>,
}

/// Log a failed best-effort call and report whether it succeeded
fn succeeded(step: &str, guild_id: u64, result: ModerationResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) if e.is_missing_permissions() => {
            warn!(target: MODERATION_TARGET, guild_id, step, "Missing permissions");
            false
        }
        Err(e) => {
            error!(target: MODERATION_TARGET, guild_id, step, error = %e, "Moderation step failed");
            false
        }
    }
}

impl ActionExecutor {
    #[must_use]
    pub fn new(
        platform: Arc<dyn ModerationPlatform>,
        warnings: Arc<dyn WarningStore>,
        log: Arc<dyn ViolationLog>,
        scheduler: ReversalScheduler,
    ) -> Self {
        Self {
            platform,
            warnings,
            log,
            scheduler,
            locking: Arc::new(DashSet::new()),
        }
    }

    /// Apply the configured action for a message violation
    pub async fn handle_violation(
        &self,
        config: &GuildModerationConfig,
        facts: &MessageFacts,
        violation: &Violation,
    ) -> ViolationRecord {
        let guild_id = facts.guild_id;
        let user_id = facts.author_id;
        let reason = format!("{}: {}", violation.kind.label(), violation.detail);

        let deleted = succeeded(
            "delete message",
            guild_id,
            self.platform
                .delete_message(
                    ChannelId::new(facts.channel_id),
                    MessageId::new(facts.message_id),
                )
                .await,
        );

        let (action, enforced) = match config.action_for(violation.kind) {
            ModAction::Delete => (ActionTaken::Delete, deleted),
            ModAction::Warn => self.warn(config, facts, violation.kind, &reason).await,
            ModAction::Mute => {
                self.mute(config, user_id, config.effective_mute_duration(), &reason)
                    .await
            }
            ModAction::Kick => (ActionTaken::Kick, self.kick(guild_id, user_id, &reason).await),
            ModAction::Ban => (ActionTaken::Ban, self.ban(guild_id, user_id, &reason).await),
        };

        let record = ViolationRecord::new(
            guild_id,
            Some(user_id),
            Some(facts.channel_id),
            violation.kind,
            action,
            facts.content.clone(),
        )
        .with_enforced(enforced);

        self.record(config, &record, &violation.detail).await;
        record
    }

    /// Lock the guild down after a join burst.
    ///
    /// Returns `None` when a lockdown is already active or being set up.
    /// Otherwise one record is written, with `enforced: false` when no
    /// channel could be locked (including guilds without text channels).
    pub async fn handle_raid(
        &self,
        config: &GuildModerationConfig,
        joins: usize,
    ) -> Option<ViolationRecord> {
        let duration_secs = config.effective_raid_duration();
        let reason = format!(
            "Raid protection: {joins} joins within {}",
            format_duration(config.effective_raid_window())
        );

        let enforced = match self.lockdown(config, duration_secs, &reason).await {
            Ok(Some(_)) => true,
            Ok(None) => return None,
            Err(e) => {
                error!(
                    target: MODERATION_TARGET,
                    guild_id = config.guild_id,
                    error = %e,
                    "Raid lockdown failed"
                );
                false
            }
        };

        let record = ViolationRecord::new(
            config.guild_id,
            None,
            None,
            ViolationKind::Raid,
            ActionTaken::Lockdown { duration_secs },
            String::new(),
        )
        .with_enforced(enforced);

        self.record(config, &record, &reason).await;
        Some(record)
    }

    /// Deny `@everyone` from sending in every text channel for `duration_secs`.
    ///
    /// Returns `Ok(None)` when the guild is already locked down.
    ///
    /// # Errors
    /// Returns an error if the channel list cannot be fetched or no text
    /// channel could be locked.
    pub async fn lockdown(
        &self,
        config: &GuildModerationConfig,
        duration_secs: u64,
        reason: &str,
    ) -> ModerationResult<Option<SanctionRecord>> {
        let guild_id = config.guild_id;
        if self.scheduler.store().active_lockdown_for(guild_id).is_some()
            || !self.locking.insert(guild_id)
        {
            return Ok(None);
        }

        let result = self.lock_channels(config, duration_secs, reason).await;
        self.locking.remove(&guild_id);
        result
    }

    async fn lock_channels(
        &self,
        config: &GuildModerationConfig,
        duration_secs: u64,
        reason: &str,
    ) -> ModerationResult<Option<SanctionRecord>> {
        let guild_id = GuildId::new(config.guild_id);
        let channels = self.platform.text_channels(guild_id).await?;

        let mut locks: Vec<ChannelLock> = Vec::with_capacity(channels.len());
        for channel_id in channels {
            match self.platform.lock_channel(guild_id, channel_id).await {
                Ok(lock) => locks.push(lock),
                Err(e) => {
                    succeeded("lock channel", config.guild_id, Err(e));
                }
            }
        }

        if locks.is_empty() {
            return Err(ModerationError::NoLockableChannels);
        }

        let record = SanctionRecord::lockdown(
            config.guild_id,
            locks,
            duration_secs,
            reason,
            config.log_channel,
        );
        self.scheduler.schedule(record.clone()).await;

        Ok(Some(record))
    }

    async fn warn(
        &self,
        config: &GuildModerationConfig,
        facts: &MessageFacts,
        kind: ViolationKind,
        reason: &str,
    ) -> (ActionTaken, bool) {
        let outcome = register_warning(
            self.warnings.as_ref(),
            facts.guild_id,
            facts.author_id,
            Utc::now(),
            config.effective_warning_threshold(),
            config.effective_warning_timeout(),
        );

        match outcome {
            WarningOutcome::Warned { count, threshold } => {
                let notice = format!(
                    "<@{}>, your message was removed ({}). Warning {count}/{threshold}.",
                    facts.author_id,
                    kind.label().to_lowercase()
                );
                let sent = succeeded(
                    "send warning",
                    facts.guild_id,
                    self.platform
                        .send_transient(
                            ChannelId::new(facts.channel_id),
                            &notice,
                            WARNING_LIFETIME,
                        )
                        .await,
                );
                (ActionTaken::Warn { count, threshold }, sent)
            }
            WarningOutcome::Escalate => {
                let reason = format!("Repeated violations ({reason})");
                let (action, enforced) = match config.escalation_action {
                    EscalationAction::Mute => {
                        self.mute(
                            config,
                            facts.author_id,
                            config.effective_escalation_mute_duration(),
                            &reason,
                        )
                        .await
                    }
                    EscalationAction::Kick => (
                        ActionTaken::Kick,
                        self.kick(facts.guild_id, facts.author_id, &reason).await,
                    ),
                    EscalationAction::Ban => (
                        ActionTaken::Ban,
                        self.ban(facts.guild_id, facts.author_id, &reason).await,
                    ),
                };
                let action = Box::new(action);
                (ActionTaken::Escalated { action }, enforced)
            }
        }
    }

    /// Mute a member for `duration_secs`.
    ///
    /// Uses the configured mute role with a scheduled reversal, or the
    /// platform's native timeout when no role is set.
    pub async fn mute(
        &self,
        config: &GuildModerationConfig,
        user_id: u64,
        duration_secs: u64,
        reason: &str,
    ) -> (ActionTaken, bool) {
        let guild_id = config.guild_id;

        let Some(role_id) = config.mute_role_id else {
            let duration_secs = duration_secs.min(MAX_TIMEOUT_SECS);
            let until = Utc::now() + to_chrono(duration_secs);
            let timed_out = succeeded(
                "timeout member",
                guild_id,
                self.platform
                    .timeout_member(GuildId::new(guild_id), UserId::new(user_id), until)
                    .await,
            );
            return (ActionTaken::Timeout { duration_secs }, timed_out);
        };

        let added = succeeded(
            "add mute role",
            guild_id,
            self.platform
                .add_role(
                    GuildId::new(guild_id),
                    UserId::new(user_id),
                    RoleId::new(role_id),
                    reason,
                )
                .await,
        );

        if added {
            // A new mute replaces the timer of an older one
            if let Some(previous) = self.scheduler.store().active_mute_for(guild_id, user_id) {
                self.scheduler.discard(&previous.id).await;
            }
            let record = SanctionRecord::mute(
                guild_id,
                user_id,
                role_id,
                duration_secs,
                reason,
                config.log_channel,
            );
            self.scheduler.schedule(record).await;
        }

        (ActionTaken::Mute { duration_secs }, added)
    }

    /// Apply a moderator's sanction and record it as a case
    pub async fn handle_manual(
        &self,
        config: &GuildModerationConfig,
        user_id: u64,
        moderator_id: u64,
        action: ManualAction,
        reason: &str,
    ) -> ViolationRecord {
        let guild_id = config.guild_id;

        let (action, enforced) = match action {
            ManualAction::Warn => {
                self.notify(guild_id, user_id, "warned in", reason).await;
                (ActionTaken::ManualWarn, true)
            }
            ManualAction::Mute { duration_secs } => {
                let muted = self.mute(config, user_id, duration_secs, reason).await;
                self.notify(guild_id, user_id, "muted in", reason).await;
                muted
            }
            ManualAction::Kick => (ActionTaken::Kick, self.kick(guild_id, user_id, reason).await),
            ManualAction::Ban => (ActionTaken::Ban, self.ban(guild_id, user_id, reason).await),
            ManualAction::Unban => {
                let unbanned = succeeded(
                    "unban user",
                    guild_id,
                    self.platform
                        .unban(GuildId::new(guild_id), UserId::new(user_id), reason)
                        .await,
                );
                (ActionTaken::Unban, unbanned)
            }
        };

        self.record_case(config, user_id, moderator_id, action, reason, enforced).await
    }

    /// Record an action a moderator already carried out
    pub async fn record_case(
        &self,
        config: &GuildModerationConfig,
        user_id: u64,
        moderator_id: u64,
        action: ActionTaken,
        reason: &str,
        enforced: bool,
    ) -> ViolationRecord {
        let record = ViolationRecord::manual(config.guild_id, user_id, moderator_id, action, reason)
            .with_enforced(enforced);
        self.record(config, &record, reason).await;
        record
    }

    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> bool {
        self.notify(guild_id, user_id, "kicked from", reason).await;
        succeeded(
            "kick member",
            guild_id,
            self.platform
                .kick(GuildId::new(guild_id), UserId::new(user_id), reason)
                .await,
        )
    }

    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> bool {
        self.notify(guild_id, user_id, "banned from", reason).await;
        succeeded(
            "ban member",
            guild_id,
            self.platform
                .ban(
                    GuildId::new(guild_id),
                    UserId::new(user_id),
                    BAN_PURGE_DAYS,
                    reason,
                )
                .await,
        )
    }

    /// Best-effort DM before a kick or ban
    async fn notify(&self, guild_id: u64, user_id: u64, verb: &str, reason: &str) {
        let content = format!("You have been {verb} the server (id {guild_id}).\nReason: {reason}");
        if let Err(e) = self.platform.send_dm(UserId::new(user_id), &content).await {
            warn!(
                target: MODERATION_TARGET,
                guild_id,
                user_id,
                error = %e,
                "Could not notify member"
            );
        }
    }

    /// Append to the durable log, emit the tracing event and post to the log channel
    async fn record(&self, config: &GuildModerationConfig, record: &ViolationRecord, detail: &str) {
        logging::log_violation(record);

        if let Err(e) = self.log.append(record).await {
            error!(
                target: MODERATION_TARGET,
                violation_id = %record.id,
                error = %e,
                "Failed to write violation log"
            );
        }

        let Some(log_channel) = config.log_channel else {
            return;
        };

        let (title, description) = describe(record, detail);
        if let Err(e) = self
            .platform
            .post_log(ChannelId::new(log_channel), &title, &description)
            .await
        {
            warn!(
                target: MODERATION_TARGET,
                violation_id = %record.id,
                error = %e,
                "Failed to post to log channel"
            );
        }
    }
}

/// Title and body of a log channel embed
fn describe(record: &ViolationRecord, detail: &str) -> (String, String) {
    let mut lines = Vec::new();

    if let Some(user_id) = record.user_id {
        lines.push(format!("**User:** <@{user_id}>"));
    }
    if let Some(moderator_id) = record.moderator_id {
        lines.push(format!("**Moderator:** <@{moderator_id}>"));
    }
    if let Some(channel_id) = record.channel_id {
        lines.push(format!("**Channel:** <#{channel_id}>"));
    }
    match &record.reason {
        Some(reason) => lines.push(format!("**Reason:** {reason}")),
        None => lines.push(format!("**Trigger:** {detail}")),
    }
    lines.push(format!("**Action:** {}", record.action));
    if !record.enforced {
        lines.push("**Note:** the action could not be fully applied".to_string());
    }
    if !record.content.is_empty() {
        lines.push(format!(
            "**Message:** {}",
            truncate_for_display(&record.content, SNAPSHOT_DISPLAY_LIMIT)
        ));
    }

    let title = match record.kind {
        ViolationKind::Raid => "Raid detected".to_string(),
        ViolationKind::Manual => format!("Moderator action: {}", record.action),
        kind => format!("Auto-moderation: {}", kind.label()),
    };

    (title, lines.join("\n"))
}
