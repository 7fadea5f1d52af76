//! Admin commands
//!
//! Every command is guild-only. Configuration commands need `MANAGE_GUILD`,
//! sanction commands need `MODERATE_MEMBERS`, `KICK_MEMBERS`, `BAN_MEMBERS`
//! or `MANAGE_MESSAGES`. Each configuration change is saved before the reply
//! is sent.

use std::collections::HashMap;

use poise::serenity_prelude::{self as serenity, GuildId, Mentionable, RoleId, UserId};

use crate::duration::{format_duration, parse_duration};
use crate::moderation::config::{
    COUNT_SETTINGS, ConfigError, DURATION_SETTINGS, EscalationAction, GuildModerationConfig,
    ModAction, TOGGLES, ViolationKind,
};
use crate::moderation::executor::MAX_TIMEOUT_SECS;
use crate::moderation::{Case, ManualAction, ViolationRecord};
use crate::{Context, Error};

/// Reason used when a moderator gives none
const DEFAULT_REASON: &str = "No reason provided";
/// Cases listed by `infractions`
const INFRACTIONS_SHOWN: usize = 10;

/// Add or remove an entry from a list setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum ListEdit {
    #[name = "add"]
    Add,
    #[name = "remove"]
    Remove,
}

/// All commands the bot registers
#[must_use]
pub fn commands() -> Vec<poise::Command<crate::Data, Error>> {
    vec![
        automod(),
        warn(),
        mute(),
        unmute(),
        kick(),
        ban(),
        unban(),
        purge(),
        infractions(),
        lockdown(),
        unlock(),
        warnings(),
        clearwarnings(),
    ]
}

fn guild(ctx: Context<'_>) -> Result<GuildId, Error> {
    ctx.guild_id()
        .ok_or_else(|| "This command only works in a server".into())
}

/// Whether a moderator may sanction a target.
///
/// Nobody can target themselves or the owner; the owner can target anyone
/// else; everyone else needs a strictly higher top role.
fn may_act_on(
    owner_id: UserId,
    moderator: (UserId, &[RoleId]),
    target: (UserId, &[RoleId]),
    positions: &HashMap<RoleId, u16>,
) -> bool {
    let (moderator_id, moderator_roles) = moderator;
    let (target_id, target_roles) = target;
    if moderator_id == target_id || target_id == owner_id {
        return false;
    }
    if moderator_id == owner_id {
        return true;
    }

    let top = |roles: &[RoleId]| {
        roles
            .iter()
            .filter_map(|role| positions.get(role).copied())
            .max()
            .unwrap_or(0)
    };
    top(moderator_roles) > top(target_roles)
}

/// Refuse to act on yourself or on someone ranked at or above you
async fn check_target(ctx: Context<'_>, target: &serenity::Member) -> Result<(), Error> {
    if target.user.id == ctx.author().id {
        return Err("You cannot use this on yourself.".into());
    }
    let Some(moderator) = ctx.author_member().await else {
        return Ok(());
    };

    let allowed = ctx.guild().map(|guild| {
        let positions = guild
            .roles
            .values()
            .map(|role| (role.id, role.position))
            .collect::<HashMap<_, _>>();
        may_act_on(
            guild.owner_id,
            (moderator.user.id, moderator.roles.as_slice()),
            (target.user.id, target.roles.as_slice()),
            &positions,
        )
    });

    match allowed {
        Some(false) => Err("You cannot act on a member with an equal or higher role.".into()),
        _ => Ok(()),
    }
}

/// Reply line for a manual sanction
fn sanction_reply(user: UserId, verb: &str, record: &ViolationRecord) -> String {
    let reason = record.reason.as_deref().unwrap_or(DEFAULT_REASON);
    let mut reply = format!(
        "{} {verb} ({}).\n**Reason:** {reason}",
        user.mention(),
        record.action
    );
    if !record.enforced {
        reply.push_str("\n**Note:** the action could not be fully applied; check my permissions.");
    }
    reply
}

/// Newest cases of a member, one line each
fn infractions_text(subject: &str, cases: &[Case]) -> String {
    if cases.is_empty() {
        return format!("{subject} has no infractions.");
    }

    let mut lines = vec![format!("**Infractions for {subject}** ({} total)", cases.len())];
    for case in cases.iter().take(INFRACTIONS_SHOWN) {
        let record = &case.record;
        let why = match (&record.reason, record.kind) {
            (Some(reason), _) => reason.clone(),
            (None, kind) => format!("Auto-moderation: {}", kind.label()),
        };
        lines.push(format!(
            "**Case #{}** | {} | {} | {why}",
            case.number,
            record.action,
            record.timestamp.format("%Y-%m-%d")
        ));
    }
    if cases.len() > INFRACTIONS_SHOWN {
        lines.push(format!(
            "Showing the {INFRACTIONS_SHOWN} most recent of {} infractions.",
            cases.len()
        ));
    }
    lines.join("\n")
}

/// Parse a setting value; duration settings accept `30s`, `10m`, `2h`, `1d`, `1w`
fn parse_setting_value(name: &str, raw: &str) -> Result<u64, ConfigError> {
    let name = name.trim().to_ascii_lowercase();
    let invalid = || ConfigError::InvalidValue {
        setting: name.clone(),
        value: raw.to_string(),
    };

    if DURATION_SETTINGS.contains(&name.as_str()) {
        parse_duration(raw).ok_or_else(invalid)
    } else if COUNT_SETTINGS.contains(&name.as_str()) {
        match raw.trim().parse::<u64>() {
            Ok(0) => Err(ConfigError::ZeroValue(name.clone())),
            Ok(value) => Ok(value),
            Err(_) => Err(invalid()),
        }
    } else {
        Err(ConfigError::UnknownSetting(name.clone()))
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn list_or_none<I, T>(items: I, render: impl Fn(T) -> String) -> String
where
    I: IntoIterator<Item = T>,
{
    let rendered: Vec<String> = items.into_iter().map(render).collect();
    if rendered.is_empty() {
        "none".to_string()
    } else {
        rendered.join(", ")
    }
}

/// Human-readable summary of a guild's configuration
fn status_text(config: &GuildModerationConfig) -> String {
    let lines = [
        format!("**Auto-moderation:** {}", on_off(config.enabled)),
        format!(
            "**Word filter:** {} (default list {}, {} custom words) -> {}",
            on_off(config.word_filter_enabled),
            on_off(config.use_default_words),
            config.custom_words.len(),
            config.word_filter_action
        ),
        format!(
            "**Spam:** {} ({} messages / {}) -> {}",
            on_off(config.spam_enabled),
            config.effective_spam_threshold(),
            format_duration(config.effective_spam_window()),
            config.spam_action
        ),
        format!(
            "**Invites:** {} (own invites {}) -> {}",
            on_off(config.invite_filter_enabled),
            if config.whitelist_own_server_invites {
                "allowed"
            } else {
                "blocked"
            },
            config.invite_action
        ),
        format!(
            "**Links:** {} (allowed: {}) -> {}",
            on_off(config.url_filter_enabled),
            list_or_none(&config.allowed_domains, Clone::clone),
            config.url_action
        ),
        format!(
            "**Mentions:** {} (max {}) -> {}",
            on_off(config.mention_filter_enabled),
            config.effective_mention_threshold(),
            config.mention_action
        ),
        format!(
            "**Raid protection:** {} ({} joins / {}, lockdown {})",
            on_off(config.raid_protection_enabled),
            config.effective_raid_threshold(),
            format_duration(config.effective_raid_window()),
            format_duration(config.effective_raid_duration())
        ),
        format!(
            "**Warnings:** {} within {} -> {} (escalation mute {})",
            config.effective_warning_threshold(),
            format_duration(config.effective_warning_timeout()),
            config.escalation_action,
            format_duration(config.effective_escalation_mute_duration())
        ),
        format!(
            "**Mute:** {} using {}",
            format_duration(config.effective_mute_duration()),
            config
                .mute_role_id
                .map_or_else(|| "timeout".to_string(), |id| format!("<@&{id}>"))
        ),
        format!("**Ignore admins:** {}", on_off(config.ignore_admins)),
        format!(
            "**Ignored roles:** {}",
            list_or_none(&config.ignored_roles, |id| format!("<@&{id}>"))
        ),
        format!(
            "**Ignored channels:** {}",
            list_or_none(&config.ignored_channels, |id| format!("<#{id}>"))
        ),
        format!(
            "**Log channel:** {}",
            config
                .log_channel
                .map_or_else(|| "none".to_string(), |id| format!("<#{id}>"))
        ),
    ];
    lines.join("\n")
}

/// Configure automatic moderation
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands(
        "status",
        "enable",
        "toggle",
        "threshold",
        "action",
        "escalation",
        "word",
        "domain",
        "ignore_role",
        "ignore_channel",
        "muterole",
        "logchannel"
    ),
    subcommand_required
)]
pub async fn automod(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the current configuration
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let config = ctx.data().guild_config(guild(ctx)?);
    ctx.say(status_text(&config)).await?;
    Ok(())
}

/// Turn automatic moderation on or off
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn enable(
    ctx: Context<'_>,
    #[description = "Whether auto-moderation runs in this server"] enabled: bool,
) -> Result<(), Error> {
    ctx.data()
        .update_guild_config(guild(ctx)?, |config| {
            config.enabled = enabled;
            Ok::<_, ConfigError>(())
        })
        .await?;
    ctx.say(format!("Auto-moderation is now **{}**.", on_off(enabled)))
        .await?;
    Ok(())
}

/// Switch a single check on or off
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn toggle(
    ctx: Context<'_>,
    #[description = "word_filter, default_words, spam, invites, own_invites, urls, mentions, raid or ignore_admins"]
    check: String,
    #[description = "New state"] enabled: bool,
) -> Result<(), Error> {
    let name = check.trim().to_ascii_lowercase();
    ctx.data()
        .update_guild_config(guild(ctx)?, |config| config.set_toggle(&name, enabled))
        .await?;
    ctx.say(format!("`{name}` is now **{}**.", on_off(enabled)))
        .await?;
    Ok(())
}

/// Set a numeric threshold or duration
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn threshold(
    ctx: Context<'_>,
    #[description = "Setting name, e.g. user_spam_threshold or mute_duration"] setting: String,
    #[description = "Count, or a duration like 30s, 10m, 2h"] value: String,
) -> Result<(), Error> {
    let name = setting.trim().to_ascii_lowercase();
    let parsed = parse_setting_value(&name, &value)?;
    ctx.data()
        .update_guild_config(guild(ctx)?, |config| config.set_threshold(&name, parsed))
        .await?;

    let shown = if DURATION_SETTINGS.contains(&name.as_str()) {
        format_duration(parsed)
    } else {
        parsed.to_string()
    };
    ctx.say(format!("`{name}` set to **{shown}**.")).await?;
    Ok(())
}

/// Choose the action for a violation type
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn action(
    ctx: Context<'_>,
    #[description = "word_filter, spam, invite_link, url or mass_mention"] violation: String,
    #[description = "delete, warn, mute, kick or ban"] action: String,
) -> Result<(), Error> {
    let kind: ViolationKind = violation.parse()?;
    let action: ModAction = action.parse()?;
    ctx.data()
        .update_guild_config(guild(ctx)?, |config| config.set_action(kind, action))
        .await?;
    ctx.say(format!("{} violations now result in **{action}**.", kind.label()))
        .await?;
    Ok(())
}

/// Choose what happens when the warning threshold is reached
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn escalation(
    ctx: Context<'_>,
    #[description = "mute, kick or ban"] action: String,
) -> Result<(), Error> {
    let action: EscalationAction = action.parse()?;
    ctx.data()
        .update_guild_config(guild(ctx)?, |config| {
            config.escalation_action = action;
            Ok::<_, ConfigError>(())
        })
        .await?;
    ctx.say(format!("Repeated violations now result in **{action}**."))
        .await?;
    Ok(())
}

/// Add or remove a filtered word
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn word(
    ctx: Context<'_>,
    #[description = "add or remove"] edit: ListEdit,
    #[description = "The word"] word: String,
) -> Result<(), Error> {
    let changed = ctx
        .data()
        .update_guild_config(guild(ctx)?, |config| {
            Ok::<_, ConfigError>(match edit {
                ListEdit::Add => config.add_word(&word),
                ListEdit::Remove => config.remove_word(&word),
            })
        })
        .await?;

    let reply = match (edit, changed) {
        (ListEdit::Add, true) => "Word added to the filter.",
        (ListEdit::Add, false) => "That word is already filtered.",
        (ListEdit::Remove, true) => "Word removed from the filter.",
        (ListEdit::Remove, false) => "That word was not in the filter.",
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Add or remove an allowed link domain
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn domain(
    ctx: Context<'_>,
    #[description = "add or remove"] edit: ListEdit,
    #[description = "Domain, e.g. example.com"] domain: String,
) -> Result<(), Error> {
    let changed = ctx
        .data()
        .update_guild_config(guild(ctx)?, |config| {
            Ok::<_, ConfigError>(match edit {
                ListEdit::Add => config.add_domain(&domain),
                ListEdit::Remove => config.remove_domain(&domain),
            })
        })
        .await?;

    let reply = match (edit, changed) {
        (ListEdit::Add, true) => "Domain allowed.",
        (ListEdit::Add, false) => "That domain is already allowed or is not valid.",
        (ListEdit::Remove, true) => "Domain removed from the allow list.",
        (ListEdit::Remove, false) => "That domain was not allowed.",
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Exempt a role from every check, or stop exempting it
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn ignore_role(
    ctx: Context<'_>,
    #[description = "Role to toggle"] role: serenity::Role,
) -> Result<(), Error> {
    let ignored = ctx
        .data()
        .update_guild_config(guild(ctx)?, |config| {
            Ok::<_, ConfigError>(config.toggle_ignored_role(role.id.get()))
        })
        .await?;
    let state = if ignored { "now ignored" } else { "no longer ignored" };
    ctx.say(format!("{} is {state}.", role.mention())).await?;
    Ok(())
}

/// Exempt a channel from every check, or stop exempting it
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn ignore_channel(
    ctx: Context<'_>,
    #[description = "Channel to toggle"] channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let ignored = ctx
        .data()
        .update_guild_config(guild(ctx)?, |config| {
            Ok::<_, ConfigError>(config.toggle_ignored_channel(channel.id.get()))
        })
        .await?;
    let state = if ignored { "now ignored" } else { "no longer ignored" };
    ctx.say(format!("{} is {state}.", channel.mention())).await?;
    Ok(())
}

/// Set the mute role, or create one; leave empty to use native timeouts
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn muterole(
    ctx: Context<'_>,
    #[description = "Role applied to muted members"] role: Option<serenity::Role>,
    #[description = "Create a new Muted role that cannot talk in any channel"] create: Option<bool>,
) -> Result<(), Error> {
    let guild_id = guild(ctx)?;
    let role_id = match (role, create.unwrap_or(false)) {
        (Some(_), true) => return Err("Pick an existing role or create one, not both.".into()),
        (Some(role), false) => Some(role.id.get()),
        (None, true) => {
            ctx.defer().await?;
            Some(ctx.data().automod.create_mute_role(guild_id.get()).await?)
        }
        (None, false) => None,
    };

    ctx.data()
        .update_guild_config(guild_id, |config| {
            config.mute_role_id = role_id;
            Ok::<_, ConfigError>(())
        })
        .await?;

    match role_id {
        Some(id) => ctx.say(format!("Mutes now use <@&{id}>.")).await?,
        None => ctx.say("Mute role cleared; mutes now use timeouts.").await?,
    };
    Ok(())
}

/// Set the moderation log channel; leave empty to disable
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn logchannel(
    ctx: Context<'_>,
    #[description = "Channel for moderation logs"] channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let channel_id = channel.as_ref().map(|channel| channel.id.get());
    ctx.data()
        .update_guild_config(guild(ctx)?, |config| {
            config.log_channel = channel_id;
            Ok::<_, ConfigError>(())
        })
        .await?;

    match channel {
        Some(channel) => {
            ctx.say(format!("Moderation logs go to {}.", channel.mention()))
                .await?
        }
        None => ctx.say("Moderation logging disabled.").await?,
    };
    Ok(())
}

/// Warn a member and record the case
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn warn(
    ctx: Context<'_>,
    #[description = "Member to warn"] member: serenity::Member,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    check_target(ctx, &member).await?;
    let config = ctx.data().guild_config(guild(ctx)?);
    let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());

    let record = ctx
        .data()
        .automod
        .moderate(&config, member.user.id.get(), ctx.author().id.get(), ManualAction::Warn, &reason)
        .await;
    ctx.say(sanction_reply(member.user.id, "has been warned", &record))
        .await?;
    Ok(())
}

/// Mute a member for a while
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to mute"] member: serenity::Member,
    #[description = "How long, e.g. 30m, 2h or 1d"] duration: String,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    check_target(ctx, &member).await?;
    let config = ctx.data().guild_config(guild(ctx)?);
    let duration_secs = parse_duration(&duration).ok_or_else(|| ConfigError::InvalidValue {
        setting: "duration".to_string(),
        value: duration.clone(),
    })?;
    if config.mute_role_id.is_none() && duration_secs > MAX_TIMEOUT_SECS {
        return Err("Timeouts cannot exceed 28 days; set a mute role for longer mutes.".into());
    }
    let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());

    ctx.defer().await?;
    let record = ctx
        .data()
        .automod
        .moderate(
            &config,
            member.user.id.get(),
            ctx.author().id.get(),
            ManualAction::Mute { duration_secs },
            &reason,
        )
        .await;
    ctx.say(sanction_reply(member.user.id, "has been muted", &record))
        .await?;
    Ok(())
}

/// Lift a member's mute early
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Member to unmute"] user: serenity::User,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let config = ctx.data().guild_config(guild(ctx)?);
    let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
    let tracked = ctx
        .data()
        .automod
        .unmute(&config, user.id.get(), ctx.author().id.get(), &reason)
        .await?;
    let reply = if tracked {
        format!("{} has been unmuted.", user.mention())
    } else {
        format!(
            "{} had no tracked mute; cleared the mute role or timeout.",
            user.mention()
        )
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Kick a member from the server
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "KICK_MEMBERS")]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Member to kick"] member: serenity::Member,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    check_target(ctx, &member).await?;
    let config = ctx.data().guild_config(guild(ctx)?);
    let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());

    let record = ctx
        .data()
        .automod
        .moderate(&config, member.user.id.get(), ctx.author().id.get(), ManualAction::Kick, &reason)
        .await;
    ctx.say(sanction_reply(member.user.id, "has been kicked", &record))
        .await?;
    Ok(())
}

/// Ban a member from the server
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Member to ban"] member: serenity::Member,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    check_target(ctx, &member).await?;
    let config = ctx.data().guild_config(guild(ctx)?);
    let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());

    let record = ctx
        .data()
        .automod
        .moderate(&config, member.user.id.get(), ctx.author().id.get(), ManualAction::Ban, &reason)
        .await;
    ctx.say(sanction_reply(member.user.id, "has been banned", &record))
        .await?;
    Ok(())
}

/// Lift a ban
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "User to unban"] user: serenity::User,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let config = ctx.data().guild_config(guild(ctx)?);
    let reason = reason.unwrap_or_else(|| DEFAULT_REASON.to_string());

    let record = ctx
        .data()
        .automod
        .moderate(&config, user.id.get(), ctx.author().id.get(), ManualAction::Unban, &reason)
        .await;
    ctx.say(sanction_reply(user.id, "has been unbanned", &record))
        .await?;
    Ok(())
}

/// Delete recent messages in this channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn purge(
    ctx: Context<'_>,
    #[description = "How many recent messages to scan (1-100)"]
    #[min = 1]
    #[max = 100]
    amount: u8,
    #[description = "Only delete messages from this user"] user: Option<serenity::User>,
) -> Result<(), Error> {
    if !(1..=100).contains(&amount) {
        return Err("Pick an amount between 1 and 100.".into());
    }
    let config = ctx.data().guild_config(guild(ctx)?);

    ctx.defer_ephemeral().await?;
    let deleted = ctx
        .data()
        .automod
        .purge(
            &config,
            ctx.channel_id().get(),
            amount,
            user.as_ref().map(|user| user.id.get()),
            ctx.author().id.get(),
        )
        .await?;

    let reply = match user {
        Some(user) => format!("Deleted {deleted} messages from {}.", user.mention()),
        None => format!("Deleted {deleted} messages."),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Show a member's moderation history
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn infractions(
    ctx: Context<'_>,
    #[description = "Member to look up (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let guild_id = guild(ctx)?;
    let user = user.unwrap_or_else(|| ctx.author().clone());

    let cases = ctx
        .data()
        .automod
        .infractions(guild_id.get(), user.id.get())
        .await?;
    ctx.say(infractions_text(&user.mention().to_string(), &cases))
        .await?;
    Ok(())
}

/// Stop @everyone from sending messages in every text channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn lockdown(
    ctx: Context<'_>,
    #[description = "How long, e.g. 30m or 2h (defaults to the raid lockdown duration)"]
    duration: Option<String>,
) -> Result<(), Error> {
    let config = ctx.data().guild_config(guild(ctx)?);
    let duration_secs = match duration.as_deref() {
        Some(raw) => parse_duration(raw).ok_or_else(|| ConfigError::InvalidValue {
            setting: "duration".to_string(),
            value: raw.to_string(),
        })?,
        None => config.effective_raid_duration(),
    };

    ctx.defer().await?;
    let reason = format!("Manual lockdown by {}", ctx.author().name);
    let reply = match ctx
        .data()
        .automod
        .lockdown(&config, duration_secs, &reason)
        .await?
    {
        Some(_) => format!("Server locked down for **{}**.", format_duration(duration_secs)),
        None => "A lockdown is already active.".to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Lift an active lockdown early
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn unlock(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild(ctx)?;
    ctx.defer().await?;
    let reply = if ctx.data().automod.unlock(guild_id.get()).await? {
        "Lockdown lifted."
    } else {
        "There is no active lockdown."
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Show a member's current warning count
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn warnings(
    ctx: Context<'_>,
    #[description = "Member to inspect"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild(ctx)?;
    let config = ctx.data().guild_config(guild_id);
    let reply = match ctx.data().automod.warnings(guild_id.get(), user.id.get()) {
        Some(state) if state.count > 0 => format!(
            "{} has **{}/{}** warnings (period started <t:{}:R>).",
            user.mention(),
            state.count,
            config.effective_warning_threshold(),
            state.last_reset.timestamp()
        ),
        _ => format!("{} has no active warnings.", user.mention()),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Reset a member's warning count
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn clearwarnings(
    ctx: Context<'_>,
    #[description = "Member to reset"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild(ctx)?;
    let reply = if ctx
        .data()
        .automod
        .clear_warnings(guild_id.get(), user.id.get())
    {
        format!("Cleared warnings for {}.", user.mention())
    } else {
        format!("{} had no warnings.", user.mention())
    };
    ctx.say(reply).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_set() {
        let names: Vec<String> = commands().into_iter().map(|cmd| cmd.name).collect();
        assert_eq!(
            names,
            vec![
                "automod",
                "warn",
                "mute",
                "unmute",
                "kick",
                "ban",
                "unban",
                "purge",
                "infractions",
                "lockdown",
                "unlock",
                "warnings",
                "clearwarnings"
            ]
        );
        assert!(commands().iter().all(|cmd| cmd.guild_only));
    }

    #[test]
    fn test_automod_subcommands() {
        let cmd = automod();
        let subcommands: Vec<&str> = cmd.subcommands.iter().map(|sub| sub.name.as_str()).collect();
        assert_eq!(subcommands.len(), 12);
        for name in ["status", "toggle", "threshold", "ignore_role", "logchannel"] {
            assert!(subcommands.contains(&name), "missing {name}");
        }
        assert!(cmd.subcommand_required);
        assert!(cmd.required_permissions.contains(serenity::Permissions::MANAGE_GUILD));
    }

    #[test]
    fn test_sanction_commands_need_moderate_members() {
        for cmd in [
            warn(),
            mute(),
            unmute(),
            infractions(),
            lockdown(),
            unlock(),
            warnings(),
            clearwarnings(),
        ] {
            assert!(
                cmd.required_permissions
                    .contains(serenity::Permissions::MODERATE_MEMBERS),
                "{} is unrestricted",
                cmd.name
            );
        }
    }

    #[test]
    fn test_removal_commands_need_their_own_permission() {
        let expected = [
            (kick(), serenity::Permissions::KICK_MEMBERS),
            (ban(), serenity::Permissions::BAN_MEMBERS),
            (unban(), serenity::Permissions::BAN_MEMBERS),
            (purge(), serenity::Permissions::MANAGE_MESSAGES),
        ];
        for (cmd, permission) in expected {
            assert_eq!(cmd.required_permissions, permission, "{}", cmd.name);
        }
    }

    #[test]
    fn test_may_act_on_follows_role_hierarchy() {
        let owner = UserId::new(1);
        let moderator = UserId::new(2);
        let target = UserId::new(3);
        let (senior, junior) = (RoleId::new(10), RoleId::new(11));
        let positions = HashMap::from([(senior, 5), (junior, 2)]);

        assert!(may_act_on(owner, (moderator, &[senior]), (target, &[junior]), &positions));
        assert!(!may_act_on(owner, (moderator, &[junior]), (target, &[senior]), &positions));
        assert!(!may_act_on(owner, (moderator, &[senior]), (target, &[senior]), &positions));
        assert!(!may_act_on(owner, (moderator, &[senior]), (owner, &[]), &positions));
        assert!(!may_act_on(owner, (moderator, &[senior]), (moderator, &[]), &positions));
        assert!(may_act_on(owner, (owner, &[]), (target, &[senior]), &positions));
        assert!(may_act_on(owner, (moderator, &[junior]), (target, &[]), &positions));
    }

    #[test]
    fn test_infractions_text() {
        assert_eq!(infractions_text("<@4>", &[]), "<@4> has no infractions.");

        let automatic = ViolationRecord::new(
            1,
            Some(4),
            Some(3),
            ViolationKind::Spam,
            crate::moderation::ActionTaken::Delete,
            "",
        );
        let manual = ViolationRecord::manual(
            1,
            4,
            9,
            crate::moderation::ActionTaken::Kick,
            "posting scams",
        );
        let cases = vec![
            Case { number: 2, record: manual },
            Case { number: 1, record: automatic },
        ];

        let text = infractions_text("<@4>", &cases);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "**Infractions for <@4>** (2 total)");
        assert!(lines[1].starts_with("**Case #2** | kick |"));
        assert!(lines[1].ends_with("| posting scams"));
        assert!(lines[2].ends_with("| Auto-moderation: Spam"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_infractions_text_caps_listing() {
        let cases: Vec<Case> = (1..=12)
            .rev()
            .map(|number| Case {
                number,
                record: ViolationRecord::manual(
                    1,
                    4,
                    9,
                    crate::moderation::ActionTaken::ManualWarn,
                    "again",
                ),
            })
            .collect();

        let text = infractions_text("<@4>", &cases);
        assert!(text.contains("**Case #12**"));
        assert!(!text.contains("**Case #2**"));
        assert!(text.ends_with("Showing the 10 most recent of 12 infractions."));
    }

    #[test]
    fn test_sanction_reply_flags_unenforced_actions() {
        let user = UserId::new(4);
        let mut record =
            ViolationRecord::manual(1, 4, 9, crate::moderation::ActionTaken::Ban, "raiding");
        let reply = sanction_reply(user, "has been banned", &record);
        assert!(reply.contains("**Reason:** raiding"));
        assert!(!reply.contains("could not be fully applied"));

        record.enforced = false;
        let reply = sanction_reply(user, "has been banned", &record);
        assert!(reply.contains("could not be fully applied"));
    }

    #[test]
    fn test_parse_setting_value() {
        assert_eq!(parse_setting_value("mute_duration", "10m"), Ok(600));
        assert_eq!(parse_setting_value("Raid_Window", "30"), Ok(30));
        assert_eq!(parse_setting_value("raid_threshold", "15"), Ok(15));
        assert_eq!(
            parse_setting_value("raid_threshold", "0"),
            Err(ConfigError::ZeroValue("raid_threshold".to_string()))
        );
        assert!(matches!(
            parse_setting_value("warning_timeout", "soon"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_setting_value("raid_threshold", "1h"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            parse_setting_value("volume", "3"),
            Err(ConfigError::UnknownSetting("volume".to_string()))
        );
    }

    #[test]
    fn test_every_numeric_setting_is_settable() {
        let mut config = GuildModerationConfig::for_guild(1);
        for name in DURATION_SETTINGS.iter().chain(COUNT_SETTINGS) {
            assert_eq!(config.set_threshold(name, 7), Ok(()), "{name}");
        }
        for name in TOGGLES {
            assert_eq!(config.set_toggle(name, false), Ok(()), "{name}");
        }
    }

    #[test]
    fn test_status_text() {
        let mut config = GuildModerationConfig::for_guild(1);
        config.mute_role_id = Some(55);
        config.ignored_channels.insert(66);
        config.add_domain("example.com");

        let text = status_text(&config);
        assert!(text.contains("**Auto-moderation:** on"));
        assert!(text.contains("5 messages / 5s"));
        assert!(text.contains("<@&55>"));
        assert!(text.contains("<#66>"));
        assert!(text.contains("example.com"));
        assert!(text.contains("**Log channel:** none"));
        assert_eq!(text.lines().count(), 13);
    }
}
