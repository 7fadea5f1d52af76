//! Gateway event dispatch
//!
//! Events are turned into plain facts and handed to the moderation engine.
//! Nothing here returns an error to the framework: failures are logged and
//! the next event is processed normally.

use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    self as serenity, Context, FullEvent, GuildId, Member, Message, Permissions, RoleId, UserId,
};
use tracing::{debug, info, warn};

use crate::moderation::{JoinFacts, MessageFacts};
use crate::{Data, EVENT_TARGET, Error};

pub async fn handle_event(
    ctx: &Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!(
                target: EVENT_TARGET,
                user = %data_about_bot.user.name,
                shard_id = ctx.shard_id.0,
                guilds = data_about_bot.guilds.len(),
                "Connected"
            );
        }
        FullEvent::Message { new_message } => handle_message(ctx, data, new_message).await,
        FullEvent::GuildMemberAddition { new_member } => {
            handle_member_join(data, new_member).await;
        }
        _ => {}
    }

    Ok(())
}

async fn handle_message(ctx: &Context, data: &Data, message: &Message) {
    if !should_inspect(message) {
        return;
    }
    let Some(guild_id) = message.guild_id else {
        return;
    };

    let config = data.guild_config(guild_id);
    if !config.enabled {
        return;
    }

    let is_admin = config.ignore_admins && author_is_admin(ctx, guild_id, message).await;
    let Some(facts) = message_facts(message, is_admin) else {
        return;
    };

    if let Some(record) = data.automod.handle_message(&config, &facts).await {
        debug!(
            target: EVENT_TARGET,
            guild_id = %guild_id,
            message_id = %message.id,
            kind = %record.kind,
            "Message moderated"
        );
    }
}

async fn handle_member_join(data: &Data, member: &Member) {
    let config = data.guild_config(member.guild_id);
    if !config.enabled {
        return;
    }

    let join = JoinFacts {
        guild_id: member.guild_id.get(),
        user_id: member.user.id.get(),
        timestamp: Utc::now(),
    };

    if let Some(record) = data.automod.handle_member_join(&config, &join).await {
        warn!(
            target: EVENT_TARGET,
            guild_id = %member.guild_id,
            action = %record.action,
            enforced = record.enforced,
            "Raid protection triggered"
        );
    }
}

/// Only guild messages from human members are moderated
fn should_inspect(message: &Message) -> bool {
    !message.author.bot && message.webhook_id.is_none() && message.guild_id.is_some()
}

/// Build the facts the rules see from a gateway message
#[must_use]
pub fn message_facts(message: &Message, author_is_admin: bool) -> Option<MessageFacts> {
    let guild_id = message.guild_id?;
    let author_roles = message
        .member
        .as_ref()
        .map(|member| member.roles.iter().map(|role| role.get()).collect())
        .unwrap_or_default();
    let timestamp =
        DateTime::from_timestamp(message.timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now);

    Some(MessageFacts {
        guild_id: guild_id.get(),
        channel_id: message.channel_id.get(),
        message_id: message.id.get(),
        author_id: message.author.id.get(),
        author_roles,
        author_is_admin,
        content: message.content.clone(),
        user_mentions: message.mentions.len(),
        role_mentions: message.mention_roles.len(),
        timestamp,
    })
}

/// Whether the author holds `ADMINISTRATOR` or owns the guild.
///
/// Resolved from the cache when the guild is cached, over HTTP otherwise.
/// Lookup failures count as not admin.
async fn author_is_admin(ctx: &Context, guild_id: GuildId, message: &Message) -> bool {
    let user_id = message.author.id;
    let member_roles: Vec<RoleId> = message
        .member
        .as_ref()
        .map(|member| member.roles.clone())
        .unwrap_or_default();

    let cached = ctx.cache.guild(guild_id).map(|guild| {
        is_admin(
            guild.owner_id,
            user_id,
            guild_id,
            &member_roles,
            guild.roles.values().map(|role| (role.id, role.permissions)),
        )
    });
    if let Some(admin) = cached {
        return admin;
    }

    match resolve_over_http(&ctx.http, guild_id, user_id).await {
        Ok(admin) => admin,
        Err(e) => {
            warn!(
                target: EVENT_TARGET,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %e,
                "Could not resolve member permissions"
            );
            false
        }
    }
}

async fn resolve_over_http(
    http: &serenity::Http,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<bool, serenity::Error> {
    let guild = guild_id.to_partial_guild(http).await?;
    let member = guild_id.member(http, user_id).await?;
    Ok(is_admin(
        guild.owner_id,
        user_id,
        guild_id,
        &member.roles,
        guild.roles.values().map(|role| (role.id, role.permissions)),
    ))
}

/// Union of `@everyone` and the member's role permissions, owner always admin
fn is_admin(
    owner_id: UserId,
    user_id: UserId,
    guild_id: GuildId,
    member_roles: &[RoleId],
    roles: impl IntoIterator<Item = (RoleId, Permissions)>,
) -> bool {
    if owner_id == user_id {
        return true;
    }

    let everyone = RoleId::new(guild_id.get());
    let resolved = roles
        .into_iter()
        .filter(|(id, _)| *id == everyone || member_roles.contains(id))
        .fold(Permissions::empty(), |acc, (_, perms)| acc | perms);

    resolved.contains(Permissions::ADMINISTRATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use poise::serenity_prelude::{ChannelId, MessageId, User};

    fn roles() -> Vec<(RoleId, Permissions)> {
        vec![
            (RoleId::new(1), Permissions::SEND_MESSAGES),
            (RoleId::new(20), Permissions::KICK_MEMBERS),
            (RoleId::new(30), Permissions::ADMINISTRATOR),
        ]
    }

    #[test]
    fn test_owner_is_admin() {
        assert!(is_admin(
            UserId::new(5),
            UserId::new(5),
            GuildId::new(1),
            &[],
            roles()
        ));
    }

    #[test]
    fn test_admin_role_grants_admin() {
        assert!(is_admin(
            UserId::new(9),
            UserId::new(5),
            GuildId::new(1),
            &[RoleId::new(30)],
            roles()
        ));
        assert!(!is_admin(
            UserId::new(9),
            UserId::new(5),
            GuildId::new(1),
            &[RoleId::new(20)],
            roles()
        ));
    }

    #[test]
    fn test_everyone_role_counts() {
        let roles = vec![(RoleId::new(1), Permissions::ADMINISTRATOR)];
        assert!(is_admin(UserId::new(9), UserId::new(5), GuildId::new(1), &[], roles));
    }

    fn guild_message() -> Message {
        let mut author = User::default();
        author.id = UserId::new(4);

        let mut message = Message::default();
        message.id = MessageId::new(3);
        message.channel_id = ChannelId::new(2);
        message.guild_id = Some(GuildId::new(1));
        message.author = author;
        message.content = "hello <@&7>".to_string();
        message.mention_roles = vec![RoleId::new(7)];
        message
    }

    #[test]
    fn test_message_facts() {
        let facts = message_facts(&guild_message(), true).unwrap();
        assert_eq!(facts.guild_id, 1);
        assert_eq!(facts.channel_id, 2);
        assert_eq!(facts.message_id, 3);
        assert_eq!(facts.author_id, 4);
        assert!(facts.author_is_admin);
        assert_eq!(facts.user_mentions, 0);
        assert_eq!(facts.role_mentions, 1);
        assert!(facts.author_roles.is_empty());
    }

    #[test]
    fn test_bots_and_dms_are_skipped() {
        let message = guild_message();
        assert!(should_inspect(&message));

        let mut bot = guild_message();
        bot.author.bot = true;
        assert!(!should_inspect(&bot));

        let mut dm = guild_message();
        dm.guild_id = None;
        assert!(!should_inspect(&dm));
        assert!(message_facts(&dm, false).is_none());
    }
}
