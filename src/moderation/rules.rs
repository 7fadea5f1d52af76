//! Message rules
//!
//! A guild's configuration is turned into an ordered list of [`Rule`]s. Each
//! message is checked against the list in order and the first match wins, so
//! a message yields at most one [`Violation`].

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use poise::serenity_prelude::GuildId;
use regex::Regex;
use tracing::warn;

use super::config::{GuildModerationConfig, ViolationKind};
use super::counters::{WindowKey, WindowStore};
use super::platform::ModerationPlatform;
use crate::MODERATION_TARGET;
use crate::duration::to_chrono;

/// Built-in word list used when `use_default_words` is on
pub const DEFAULT_WORDS: &[&str] = &[
    "fuck",
    "shit",
    "bitch",
    "cunt",
    "asshole",
    "bastard",
    "dickhead",
    "motherfucker",
    "whore",
    "slut",
];

static INVITE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:https?://)?(?:www\.)?(?:discord(?:app)?\.com/invite|discord\.gg|discord\.me|discord\.io)/([a-z0-9-]+)",
    )
    .unwrap_or_else(|e| panic!("invalid invite regex: {e}"))
});

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:https?://|www\.)([a-z0-9-]+(?:\.[a-z0-9-]+)+)")
        .unwrap_or_else(|e| panic!("invalid url regex: {e}"))
});

/// Message fields the rules look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFacts {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub author_id: u64,
    pub author_roles: Vec<u64>,
    pub author_is_admin: bool,
    pub content: String,
    pub user_mentions: usize,
    pub role_mentions: usize,
    pub timestamp: DateTime<Utc>,
}

/// A detected rule breach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    /// What matched, for logs and warnings
    pub detail: String,
}

impl Violation {
    fn new(kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// One enabled check with the settings it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    WordFilter { words: Vec<String> },
    Spam { threshold: usize, window_secs: u64 },
    InviteLink { allow_own_invites: bool },
    Url { allowed_domains: Vec<String> },
    MassMention { threshold: usize },
}

impl Rule {
    #[must_use]
    pub fn kind(&self) -> ViolationKind {
        match self {
            Self::WordFilter { .. } => ViolationKind::WordFilter,
            Self::Spam { .. } => ViolationKind::Spam,
            Self::InviteLink { .. } => ViolationKind::InviteLink,
            Self::Url { .. } => ViolationKind::Url,
            Self::MassMention { .. } => ViolationKind::MassMention,
        }
    }

    /// Check one message against this rule
    pub async fn check(
        &self,
        facts: &MessageFacts,
        windows: &dyn WindowStore,
        platform: &dyn ModerationPlatform,
    ) -> Option<Violation> {
        match self {
            Self::WordFilter { words } => {
                let content = facts.content.to_lowercase();
                words
                    .iter()
                    .find(|word| content.contains(word.as_str()))
                    .map(|word| Violation::new(ViolationKind::WordFilter, word.clone()))
            }
            Self::Spam {
                threshold,
                window_secs,
            } => {
                let key = WindowKey::Spam {
                    guild_id: facts.guild_id,
                    user_id: facts.author_id,
                };
                let count = windows.hit(key, facts.timestamp, to_chrono(*window_secs));
                if count >= *threshold {
                    windows.clear(key);
                    Some(Violation::new(
                        ViolationKind::Spam,
                        format!("{count} messages in {window_secs}s"),
                    ))
                } else {
                    None
                }
            }
            Self::InviteLink { allow_own_invites } => {
                let codes = invite_codes(&facts.content);
                if codes.is_empty() {
                    return None;
                }
                if *allow_own_invites
                    && all_invites_owned(facts.guild_id, &codes, platform).await
                {
                    return None;
                }
                Some(Violation::new(ViolationKind::InviteLink, codes.join(", ")))
            }
            Self::Url { allowed_domains } => {
                let hosts = url_hosts(&facts.content);
                hosts
                    .into_iter()
                    .find(|host| !domain_allowed(host, allowed_domains))
                    .map(|host| Violation::new(ViolationKind::Url, host))
            }
            Self::MassMention { threshold } => {
                let mentions = facts.user_mentions + facts.role_mentions;
                (mentions >= *threshold).then(|| {
                    Violation::new(ViolationKind::MassMention, format!("{mentions} mentions"))
                })
            }
        }
    }
}

fn as_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Build the ordered rule list for a guild
#[must_use]
pub fn rules_for(config: &GuildModerationConfig) -> Vec<Rule> {
    let mut rules = Vec::with_capacity(5);

    if config.word_filter_enabled {
        let mut words = config
            .custom_words
            .iter()
            .map(|word| word.trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>();
        if config.use_default_words {
            words.extend(DEFAULT_WORDS.iter().map(|word| (*word).to_string()));
        }
        if !words.is_empty() {
            rules.push(Rule::WordFilter { words });
        }
    }

    if config.spam_enabled {
        rules.push(Rule::Spam {
            threshold: as_usize(config.effective_spam_threshold()),
            window_secs: config.effective_spam_window(),
        });
    }

    if config.invite_filter_enabled {
        rules.push(Rule::InviteLink {
            allow_own_invites: config.whitelist_own_server_invites,
        });
    }

    if config.url_filter_enabled {
        rules.push(Rule::Url {
            allowed_domains: config.allowed_domains.iter().cloned().collect(),
        });
    }

    if config.mention_filter_enabled {
        rules.push(Rule::MassMention {
            threshold: as_usize(config.effective_mention_threshold()),
        });
    }

    rules
}

/// Whether a message is exempt from every check
#[must_use]
pub fn is_exempt(config: &GuildModerationConfig, facts: &MessageFacts) -> bool {
    (config.ignore_admins && facts.author_is_admin)
        || config.ignored_channels.contains(&facts.channel_id)
        || facts
            .author_roles
            .iter()
            .any(|role| config.ignored_roles.contains(role))
}

/// Evaluate a message and return the first violation
pub async fn evaluate(
    config: &GuildModerationConfig,
    facts: &MessageFacts,
    windows: &dyn WindowStore,
    platform: &dyn ModerationPlatform,
) -> Option<Violation> {
    if !config.enabled || is_exempt(config, facts) {
        return None;
    }

    for rule in rules_for(config) {
        if let Some(violation) = rule.check(facts, windows, platform).await {
            return Some(violation);
        }
    }

    None
}

/// Invite codes found in a message, case preserved
#[must_use]
pub fn invite_codes(content: &str) -> Vec<String> {
    INVITE_RE
        .captures_iter(content)
        .filter_map(|captures| captures.get(1))
        .map(|code| code.as_str().to_string())
        .collect()
}

/// Hosts of every non-invite URL in a message
#[must_use]
pub fn url_hosts(content: &str) -> Vec<String> {
    let without_invites = INVITE_RE.replace_all(content, " ");
    URL_RE
        .captures_iter(&without_invites)
        .filter_map(|captures| captures.get(1))
        .map(|host| {
            let host = host.as_str().to_lowercase();
            host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
        })
        .collect()
}

/// Exact or subdomain match against the allow-list
#[must_use]
pub fn domain_allowed(host: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|domain| {
        host == domain
            || host
                .strip_suffix(domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

async fn all_invites_owned(
    guild_id: u64,
    codes: &[String],
    platform: &dyn ModerationPlatform,
) -> bool {
    match platform.invite_codes(GuildId::new(guild_id)).await {
        // Invite codes are case-sensitive
        Ok(own) => codes.iter().all(|code| own.contains(code)),
        Err(e) => {
            warn!(
                target: MODERATION_TARGET,
                guild_id,
                error = %e,
                "Could not fetch guild invites, treating invite as foreign"
            );
            false
        }
    }
}
