//! Outbound platform operations
//!
//! Everything the moderation engine does to Discord goes through the
//! [`ModerationPlatform`] trait, so the engine can be driven by a mock in
//! tests and by [`SerenityPlatform`] in production.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    self as serenity, ChannelId, ChannelType, CreateEmbed, CreateMessage, EditMember, EditRole,
    GetMessages, GuildId, Http, MessageId, PermissionOverwrite, PermissionOverwriteType,
    Permissions, RoleId, UserId,
};
use tracing::{debug, warn};

use super::record::ChannelLock;
use super::{ModerationError, ModerationResult};
use crate::MODERATION_TARGET;

/// Embed color used for log channel posts
pub const LOG_EMBED_COLOR: u32 = 0x00E6_7E22;
/// Name of the role created by mute role setup
pub const MUTE_ROLE_NAME: &str = "Muted";
/// Messages older than this cannot be bulk deleted
const BULK_DELETE_MAX_AGE_SECS: i64 = 14 * 24 * 60 * 60;

/// Operations the moderation engine performs on the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ModerationPlatform: Send + Sync {
    /// Delete a single message
    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId)
    -> ModerationResult<()>;

    /// Post a message that removes itself after `lifetime`
    async fn send_transient(
        &self,
        channel_id: ChannelId,
        content: &str,
        lifetime: Duration,
    ) -> ModerationResult<()>;

    /// Send a direct message to a user
    async fn send_dm(&self, user_id: UserId, content: &str) -> ModerationResult<()>;

    /// Post an embed to a moderation log channel
    async fn post_log(
        &self,
        channel_id: ChannelId,
        title: &str,
        description: &str,
    ) -> ModerationResult<()>;

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult<()>;

    /// Remove a role; a missing member or role counts as success
    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult<()>;

    /// Apply the platform's own communication timeout until `until`
    async fn timeout_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        until: DateTime<Utc>,
    ) -> ModerationResult<()>;

    /// Lift a native timeout
    async fn clear_timeout(&self, guild_id: GuildId, user_id: UserId) -> ModerationResult<()>;

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ModerationResult<()>;

    /// Ban a user, purging `purge_days` days of their messages
    async fn ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        purge_days: u8,
        reason: &str,
    ) -> ModerationResult<()>;

    async fn unban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ModerationResult<()>;

    /// Delete up to `limit` recent messages, only those by `author` when given.
    ///
    /// Returns how many messages were deleted.
    async fn purge(
        &self,
        channel_id: ChannelId,
        limit: u8,
        author: Option<UserId>,
    ) -> ModerationResult<usize>;

    /// Create a role that cannot send messages in any channel
    async fn create_mute_role(&self, guild_id: GuildId) -> ModerationResult<RoleId>;

    /// Codes of every active invite of a guild
    async fn invite_codes(&self, guild_id: GuildId) -> ModerationResult<Vec<String>>;

    /// Ids of every text channel of a guild
    async fn text_channels(&self, guild_id: GuildId) -> ModerationResult<Vec<ChannelId>>;

    /// Deny `@everyone` from sending messages, returning the previous overwrite
    async fn lock_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> ModerationResult<ChannelLock>;

    /// Restore the `@everyone` overwrite captured by [`Self::lock_channel`]
    async fn unlock_channel(&self, guild_id: GuildId, lock: &ChannelLock) -> ModerationResult<()>;
}

/// [`ModerationPlatform`] backed by the serenity HTTP client
#[derive(Clone)]
pub struct SerenityPlatform {
    http: Arc<Http>,
}

impl SerenityPlatform {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn everyone(guild_id: GuildId) -> PermissionOverwriteType {
    PermissionOverwriteType::Role(RoleId::new(guild_id.get()))
}

#[async_trait::async_trait]
impl ModerationPlatform for SerenityPlatform {
    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> ModerationResult<()> {
        let http: &Http = &self.http;
        channel_id.delete_message(http, message_id).await?;
        Ok(())
    }

    async fn send_transient(
        &self,
        channel_id: ChannelId,
        content: &str,
        lifetime: Duration,
    ) -> ModerationResult<()> {
        let http: &Http = &self.http;
        let message = channel_id.say(http, content).await?;

        let http = Arc::clone(&self.http);
        tokio::spawn(async move {
            tokio::time::sleep(lifetime).await;
            if let Err(e) = message.channel_id.delete_message(&*http, message.id).await {
                debug!(target: MODERATION_TARGET, error = %e, "Transient message already gone");
            }
        });

        Ok(())
    }

    async fn send_dm(&self, user_id: UserId, content: &str) -> ModerationResult<()> {
        let http: &Http = &self.http;
        let channel = user_id.create_dm_channel(http).await?;
        channel.say(http, content).await?;
        Ok(())
    }

    async fn post_log(
        &self,
        channel_id: ChannelId,
        title: &str,
        description: &str,
    ) -> ModerationResult<()> {
        let http: &Http = &self.http;
        let embed = CreateEmbed::new()
            .title(title)
            .description(description)
            .color(LOG_EMBED_COLOR)
            .timestamp(serenity::Timestamp::now());

        channel_id
            .send_message(http, CreateMessage::new().embed(embed))
            .await?;
        Ok(())
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult<()> {
        self.http
            .add_member_role(guild_id, user_id, role_id, Some(reason))
            .await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult<()> {
        match self
            .http
            .remove_member_role(guild_id, user_id, role_id, Some(reason))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                let error = ModerationError::from(e);
                if error.is_unknown_target() {
                    debug!(
                        target: MODERATION_TARGET,
                        %guild_id, %user_id, %role_id,
                        "Member or role no longer exists, nothing to remove"
                    );
                    Ok(())
                } else {
                    Err(error)
                }
            }
        }
    }

    async fn timeout_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        until: DateTime<Utc>,
    ) -> ModerationResult<()> {
        let http: &Http = &self.http;
        let until = serenity::Timestamp::from_unix_timestamp(until.timestamp())
            .map_err(|e| ModerationError::Other(format!("Invalid timeout end: {e}")))?;
        let edit = EditMember::new().disable_communication_until_datetime(until);
        guild_id.edit_member(http, user_id, edit).await?;
        Ok(())
    }

    async fn clear_timeout(&self, guild_id: GuildId, user_id: UserId) -> ModerationResult<()> {
        let http: &Http = &self.http;
        guild_id
            .edit_member(http, user_id, EditMember::new().enable_communication())
            .await?;
        Ok(())
    }

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ModerationResult<()> {
        let http: &Http = &self.http;
        guild_id.kick_with_reason(http, user_id, reason).await?;
        Ok(())
    }

    async fn ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        purge_days: u8,
        reason: &str,
    ) -> ModerationResult<()> {
        let http: &Http = &self.http;
        guild_id
            .ban_with_reason(http, user_id, purge_days, reason)
            .await?;
        Ok(())
    }

    async fn unban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> ModerationResult<()> {
        self.http.remove_ban(guild_id, user_id, Some(reason)).await?;
        Ok(())
    }

    async fn purge(
        &self,
        channel_id: ChannelId,
        limit: u8,
        author: Option<UserId>,
    ) -> ModerationResult<usize> {
        let http: &Http = &self.http;
        let oldest = serenity::Timestamp::now().unix_timestamp() - BULK_DELETE_MAX_AGE_SECS;
        let messages = channel_id
            .messages(http, GetMessages::new().limit(limit))
            .await?;

        let ids = messages
            .iter()
            .filter(|message| author.is_none_or(|author| message.author.id == author))
            .filter(|message| message.timestamp.unix_timestamp() > oldest)
            .map(|message| message.id)
            .collect::<Vec<_>>();

        let deleted = ids.len();
        match deleted {
            0 => {}
            1 => channel_id.delete_message(http, ids[0]).await?,
            _ => channel_id.delete_messages(http, ids).await?,
        }

        Ok(deleted)
    }

    async fn create_mute_role(&self, guild_id: GuildId) -> ModerationResult<RoleId> {
        let http: &Http = &self.http;
        let role = guild_id
            .create_role(
                http,
                EditRole::new()
                    .name(MUTE_ROLE_NAME)
                    .permissions(Permissions::empty())
                    .audit_log_reason("Mute role setup"),
            )
            .await?;

        let deny = Permissions::SEND_MESSAGES
            | Permissions::SEND_MESSAGES_IN_THREADS
            | Permissions::ADD_REACTIONS
            | Permissions::SPEAK;
        for channel_id in guild_id.channels(http).await?.into_keys() {
            let overwrite = PermissionOverwrite {
                allow: Permissions::empty(),
                deny,
                kind: PermissionOverwriteType::Role(role.id),
            };
            if let Err(e) = channel_id.create_permission(http, overwrite).await {
                warn!(
                    target: MODERATION_TARGET,
                    %guild_id, %channel_id,
                    error = %e,
                    "Could not deny the mute role in channel"
                );
            }
        }

        Ok(role.id)
    }

    async fn invite_codes(&self, guild_id: GuildId) -> ModerationResult<Vec<String>> {
        let http: &Http = &self.http;
        let invites = guild_id.invites(http).await?;
        Ok(invites.into_iter().map(|invite| invite.code).collect())
    }

    async fn text_channels(&self, guild_id: GuildId) -> ModerationResult<Vec<ChannelId>> {
        let http: &Http = &self.http;
        let channels = guild_id.channels(http).await?;

        let mut text_channels = channels
            .iter()
            .filter_map(|(id, channel)| (channel.kind == ChannelType::Text).then_some(*id))
            .collect::<Vec<_>>();
        text_channels.sort_unstable();

        Ok(text_channels)
    }

    async fn lock_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> ModerationResult<ChannelLock> {
        let http: &Http = &self.http;
        let channel = channel_id
            .to_channel(http)
            .await?
            .guild()
            .ok_or_else(|| ModerationError::NotFound(format!("guild channel {channel_id}")))?;

        let target = everyone(guild_id);
        let previous = channel
            .permission_overwrites
            .iter()
            .find(|overwrite| overwrite.kind == target);

        let lock = ChannelLock {
            channel_id: channel_id.get(),
            previous_allow: previous.map(|overwrite| overwrite.allow.bits()),
            previous_deny: previous.map(|overwrite| overwrite.deny.bits()),
        };

        let allow = previous.map_or_else(Permissions::empty, |overwrite| overwrite.allow)
            - Permissions::SEND_MESSAGES;
        let deny = previous.map_or_else(Permissions::empty, |overwrite| overwrite.deny)
            | Permissions::SEND_MESSAGES;

        channel_id
            .create_permission(
                http,
                PermissionOverwrite {
                    allow,
                    deny,
                    kind: target,
                },
            )
            .await?;

        Ok(lock)
    }

    async fn unlock_channel(&self, guild_id: GuildId, lock: &ChannelLock) -> ModerationResult<()> {
        let http: &Http = &self.http;
        let channel_id = ChannelId::new(lock.channel_id);

        let result = if lock.had_overwrite() {
            channel_id
                .create_permission(
                    http,
                    PermissionOverwrite {
                        allow: Permissions::from_bits_truncate(lock.previous_allow.unwrap_or(0)),
                        deny: Permissions::from_bits_truncate(lock.previous_deny.unwrap_or(0)),
                        kind: everyone(guild_id),
                    },
                )
                .await
        } else {
            channel_id.delete_permission(http, everyone(guild_id)).await
        };

        match result.map_err(ModerationError::from) {
            Ok(()) => Ok(()),
            Err(e) if e.is_unknown_target() => {
                warn!(
                    target: MODERATION_TARGET,
                    %guild_id, %channel_id,
                    "Locked channel no longer exists"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
