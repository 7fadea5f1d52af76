//! Per-guild moderation configuration
//!
//! A guild's configuration is created on the first admin write and never
//! deleted; checks are switched off through flags instead. Every field has a
//! default so partially written or older config files still load.

use std::collections::BTreeSet;
use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single kind of rule breach
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    #[display("word_filter")]
    WordFilter,
    #[display("spam")]
    Spam,
    #[display("invite_link")]
    InviteLink,
    #[display("url")]
    Url,
    #[display("mass_mention")]
    MassMention,
    /// Join-rate breach; not produced by message rules
    #[display("raid")]
    Raid,
    /// Sanction issued by a moderator command
    #[display("manual")]
    Manual,
}

impl ViolationKind {
    /// Human readable label for log embeds and warnings
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::WordFilter => "Filtered word",
            Self::Spam => "Spam",
            Self::InviteLink => "Invite link",
            Self::Url => "Link",
            Self::MassMention => "Mass mention",
            Self::Raid => "Raid",
            Self::Manual => "Manual action",
        }
    }
}

impl FromStr for ViolationKind {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "word_filter" | "words" | "word" => Ok(Self::WordFilter),
            "spam" => Ok(Self::Spam),
            "invite_link" | "invite" | "invites" => Ok(Self::InviteLink),
            "url" | "urls" | "link" | "links" => Ok(Self::Url),
            "mass_mention" | "mention" | "mentions" => Ok(Self::MassMention),
            _ => Err(ConfigError::UnknownViolation(raw.to_string())),
        }
    }
}

/// Action applied to a message violation
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModAction {
    #[display("delete")]
    Delete,
    #[display("warn")]
    Warn,
    #[display("mute")]
    Mute,
    #[display("kick")]
    Kick,
    #[display("ban")]
    Ban,
}

impl FromStr for ModAction {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "warn" => Ok(Self::Warn),
            "mute" => Ok(Self::Mute),
            "kick" => Ok(Self::Kick),
            "ban" => Ok(Self::Ban),
            _ => Err(ConfigError::UnknownAction(raw.to_string())),
        }
    }
}

/// Action applied once a user reaches the warning threshold
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    #[display("mute")]
    Mute,
    #[display("kick")]
    Kick,
    #[display("ban")]
    Ban,
}

impl FromStr for EscalationAction {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mute" => Ok(Self::Mute),
            "kick" => Ok(Self::Kick),
            "ban" => Ok(Self::Ban),
            _ => Err(ConfigError::UnknownAction(raw.to_string())),
        }
    }
}

/// Errors raised while editing a guild configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown check `{0}`")]
    UnknownCheck(String),
    #[error("Unknown setting `{0}`")]
    UnknownSetting(String),
    #[error("Unknown violation type `{0}`")]
    UnknownViolation(String),
    #[error("Unknown action `{0}` (expected delete, warn, mute, kick or ban)")]
    UnknownAction(String),
    #[error("Value for `{0}` must be greater than zero")]
    ZeroValue(String),
    #[error("Invalid value `{value}` for `{setting}`")]
    InvalidValue { setting: String, value: String },
}

/// Settings whose value is a duration in seconds
pub const DURATION_SETTINGS: &[&str] = &[
    "spam_window",
    "raid_window",
    "mute_duration",
    "escalation_mute_duration",
    "warning_timeout",
    "raid_duration",
];

/// Settings whose value is a plain count
pub const COUNT_SETTINGS: &[&str] = &[
    "user_spam_threshold",
    "mention_threshold",
    "raid_threshold",
    "warning_threshold",
];

/// Names accepted by [`GuildModerationConfig::set_toggle`]
pub const TOGGLES: &[&str] = &[
    "word_filter",
    "default_words",
    "spam",
    "invites",
    "own_invites",
    "urls",
    "mentions",
    "raid",
    "ignore_admins",
];

/// Moderation settings for one guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildModerationConfig {
    pub guild_id: u64,
    /// Master switch for every automatic check
    pub enabled: bool,

    pub word_filter_enabled: bool,
    pub use_default_words: bool,
    pub custom_words: BTreeSet<String>,

    pub spam_enabled: bool,
    /// Seconds
    pub spam_window: u64,
    pub user_spam_threshold: u64,

    pub invite_filter_enabled: bool,
    pub whitelist_own_server_invites: bool,

    pub url_filter_enabled: bool,
    pub allowed_domains: BTreeSet<String>,

    pub mention_filter_enabled: bool,
    pub mention_threshold: u64,

    pub raid_protection_enabled: bool,
    /// Seconds
    pub raid_window: u64,
    pub raid_threshold: u64,
    /// Seconds
    pub raid_duration: u64,

    pub word_filter_action: ModAction,
    pub spam_action: ModAction,
    pub invite_action: ModAction,
    pub url_action: ModAction,
    pub mention_action: ModAction,

    /// Seconds
    pub mute_duration: u64,
    /// Seconds
    pub escalation_mute_duration: u64,
    pub warning_threshold: u64,
    /// Seconds
    pub warning_timeout: u64,
    pub escalation_action: EscalationAction,

    pub ignore_admins: bool,
    pub ignored_roles: BTreeSet<u64>,
    pub ignored_channels: BTreeSet<u64>,

    pub mute_role_id: Option<u64>,
    pub log_channel: Option<u64>,
}

impl Default for GuildModerationConfig {
    fn default() -> Self {
        Self {
            guild_id: 0,
            enabled: true,
            word_filter_enabled: true,
            use_default_words: true,
            custom_words: BTreeSet::new(),
            spam_enabled: true,
            spam_window: 5,
            user_spam_threshold: 5,
            invite_filter_enabled: true,
            whitelist_own_server_invites: true,
            url_filter_enabled: false,
            allowed_domains: BTreeSet::new(),
            mention_filter_enabled: true,
            mention_threshold: 5,
            raid_protection_enabled: true,
            raid_window: 10,
            raid_threshold: 10,
            raid_duration: 300,
            word_filter_action: ModAction::Warn,
            spam_action: ModAction::Mute,
            invite_action: ModAction::Delete,
            url_action: ModAction::Delete,
            mention_action: ModAction::Warn,
            mute_duration: 300,
            escalation_mute_duration: 600,
            warning_threshold: 3,
            warning_timeout: 3600,
            escalation_action: EscalationAction::Mute,
            ignore_admins: true,
            ignored_roles: BTreeSet::new(),
            ignored_channels: BTreeSet::new(),
            mute_role_id: None,
            log_channel: None,
        }
    }
}

impl GuildModerationConfig {
    /// Create the default configuration for a guild
    #[must_use]
    pub fn for_guild(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }

    /// Configured action for a message violation
    #[must_use]
    pub fn action_for(&self, kind: ViolationKind) -> ModAction {
        match kind {
            ViolationKind::WordFilter => self.word_filter_action,
            ViolationKind::Spam => self.spam_action,
            ViolationKind::InviteLink => self.invite_action,
            ViolationKind::Url => self.url_action,
            ViolationKind::MassMention => self.mention_action,
            // Raids and moderator actions never go through a per-message action
            ViolationKind::Raid | ViolationKind::Manual => ModAction::Delete,
        }
    }

    pub fn set_action(
        &mut self,
        kind: ViolationKind,
        action: ModAction,
    ) -> Result<(), ConfigError> {
        match kind {
            ViolationKind::WordFilter => self.word_filter_action = action,
            ViolationKind::Spam => self.spam_action = action,
            ViolationKind::InviteLink => self.invite_action = action,
            ViolationKind::Url => self.url_action = action,
            ViolationKind::MassMention => self.mention_action = action,
            ViolationKind::Raid | ViolationKind::Manual => {
                return Err(ConfigError::UnknownViolation(kind.to_string()));
            }
        }
        Ok(())
    }

    /// Flip a named check on or off
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownCheck`] for names outside [`TOGGLES`].
    pub fn set_toggle(&mut self, name: &str, value: bool) -> Result<(), ConfigError> {
        let flag = match name.trim().to_ascii_lowercase().as_str() {
            "word_filter" => &mut self.word_filter_enabled,
            "default_words" => &mut self.use_default_words,
            "spam" => &mut self.spam_enabled,
            "invites" => &mut self.invite_filter_enabled,
            "own_invites" => &mut self.whitelist_own_server_invites,
            "urls" => &mut self.url_filter_enabled,
            "mentions" => &mut self.mention_filter_enabled,
            "raid" => &mut self.raid_protection_enabled,
            "ignore_admins" => &mut self.ignore_admins,
            _ => return Err(ConfigError::UnknownCheck(name.to_string())),
        };
        *flag = value;
        Ok(())
    }

    /// Set a numeric threshold; durations are already converted to seconds
    ///
    /// # Errors
    /// Returns an error for unknown names or a zero value.
    pub fn set_threshold(&mut self, name: &str, value: u64) -> Result<(), ConfigError> {
        let name = name.trim().to_ascii_lowercase();
        if value == 0 {
            return Err(ConfigError::ZeroValue(name));
        }

        let slot = match name.as_str() {
            "spam_window" => &mut self.spam_window,
            "user_spam_threshold" => &mut self.user_spam_threshold,
            "mention_threshold" => &mut self.mention_threshold,
            "raid_window" => &mut self.raid_window,
            "raid_threshold" => &mut self.raid_threshold,
            "raid_duration" => &mut self.raid_duration,
            "mute_duration" => &mut self.mute_duration,
            "escalation_mute_duration" => &mut self.escalation_mute_duration,
            "warning_threshold" => &mut self.warning_threshold,
            "warning_timeout" => &mut self.warning_timeout,
            _ => return Err(ConfigError::UnknownSetting(name)),
        };
        *slot = value;
        Ok(())
    }

    /// Add a custom filtered word, returning whether it was new
    pub fn add_word(&mut self, word: &str) -> bool {
        let word = word.trim().to_lowercase();
        !word.is_empty() && self.custom_words.insert(word)
    }

    pub fn remove_word(&mut self, word: &str) -> bool {
        self.custom_words.remove(&word.trim().to_lowercase())
    }

    /// Add an allowed domain, returning whether it was new
    pub fn add_domain(&mut self, domain: &str) -> bool {
        let domain = normalize_domain(domain);
        !domain.is_empty() && self.allowed_domains.insert(domain)
    }

    pub fn remove_domain(&mut self, domain: &str) -> bool {
        self.allowed_domains.remove(&normalize_domain(domain))
    }

    /// Toggle a role in the ignore list, returning whether it is now ignored
    pub fn toggle_ignored_role(&mut self, role_id: u64) -> bool {
        toggle(&mut self.ignored_roles, role_id)
    }

    /// Toggle a channel in the ignore list, returning whether it is now ignored
    pub fn toggle_ignored_channel(&mut self, channel_id: u64) -> bool {
        toggle(&mut self.ignored_channels, channel_id)
    }

    // Zero values in hand-edited files fall back to the defaults.

    #[must_use]
    pub fn effective_spam_window(&self) -> u64 {
        non_zero(self.spam_window, Self::default().spam_window)
    }

    #[must_use]
    pub fn effective_spam_threshold(&self) -> u64 {
        non_zero(self.user_spam_threshold, Self::default().user_spam_threshold)
    }

    #[must_use]
    pub fn effective_mention_threshold(&self) -> u64 {
        non_zero(self.mention_threshold, Self::default().mention_threshold)
    }

    #[must_use]
    pub fn effective_raid_window(&self) -> u64 {
        non_zero(self.raid_window, Self::default().raid_window)
    }

    #[must_use]
    pub fn effective_raid_threshold(&self) -> u64 {
        non_zero(self.raid_threshold, Self::default().raid_threshold)
    }

    #[must_use]
    pub fn effective_raid_duration(&self) -> u64 {
        non_zero(self.raid_duration, Self::default().raid_duration)
    }

    #[must_use]
    pub fn effective_mute_duration(&self) -> u64 {
        non_zero(self.mute_duration, Self::default().mute_duration)
    }

    #[must_use]
    pub fn effective_escalation_mute_duration(&self) -> u64 {
        non_zero(
            self.escalation_mute_duration,
            Self::default().escalation_mute_duration,
        )
    }

    #[must_use]
    pub fn effective_warning_threshold(&self) -> u64 {
        non_zero(self.warning_threshold, Self::default().warning_threshold)
    }

    #[must_use]
    pub fn effective_warning_timeout(&self) -> u64 {
        non_zero(self.warning_timeout, Self::default().warning_timeout)
    }
}

fn non_zero(value: u64, fallback: u64) -> u64 {
    if value == 0 { fallback } else { value }
}

fn toggle(set: &mut BTreeSet<u64>, id: u64) -> bool {
    if set.remove(&id) {
        false
    } else {
        set.insert(id);
        true
    }
}

/// Lowercase a domain and strip any scheme, `www.` prefix, path or port
#[must_use]
pub fn normalize_domain(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let host = without_scheme
        .split(['/', ':', '?', '#'])
        .next()
        .unwrap_or_default();
    host.strip_prefix("www.")
        .unwrap_or(host)
        .trim_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: GuildModerationConfig =
            serde_yaml::from_str("guild_id: 42\nspam_window: 8\n").expect("Failed to deserialize");

        assert_eq!(config.guild_id, 42);
        assert_eq!(config.spam_window, 8);
        assert_eq!(config.user_spam_threshold, 5);
        assert_eq!(config.warning_threshold, 3);
        assert_eq!(config.escalation_action, EscalationAction::Mute);
        assert!(config.enabled);
    }

    #[test]
    fn test_zero_thresholds_use_defaults() {
        let config = GuildModerationConfig {
            spam_window: 0,
            raid_threshold: 0,
            ..GuildModerationConfig::for_guild(1)
        };
        assert_eq!(config.effective_spam_window(), 5);
        assert_eq!(config.effective_raid_threshold(), 10);
    }

    #[test]
    fn test_actions_serialize_as_lowercase() {
        let config = GuildModerationConfig::for_guild(7);
        let serialized = serde_yaml::to_string(&config).expect("Failed to serialize");
        assert!(serialized.contains("word_filter_action: warn"));
        assert!(serialized.contains("spam_action: mute"));
        assert!(serialized.contains("escalation_action: mute"));

        let deserialized: GuildModerationConfig =
            serde_yaml::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_set_toggle_and_threshold() {
        let mut config = GuildModerationConfig::for_guild(1);

        config.set_toggle("urls", true).unwrap();
        assert!(config.url_filter_enabled);
        config.set_toggle("SPAM", false).unwrap();
        assert!(!config.spam_enabled);
        assert_eq!(
            config.set_toggle("music", true),
            Err(ConfigError::UnknownCheck("music".to_string()))
        );

        config.set_threshold("raid_threshold", 4).unwrap();
        assert_eq!(config.raid_threshold, 4);
        assert_eq!(
            config.set_threshold("raid_threshold", 0),
            Err(ConfigError::ZeroValue("raid_threshold".to_string()))
        );
        assert!(config.set_threshold("volume", 3).is_err());
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("Ban".parse::<ModAction>(), Ok(ModAction::Ban));
        assert!("explode".parse::<ModAction>().is_err());
        assert!("delete".parse::<EscalationAction>().is_err());
        assert_eq!("invites".parse::<ViolationKind>(), Ok(ViolationKind::InviteLink));
        assert_eq!("mass-mention".parse::<ViolationKind>(), Ok(ViolationKind::MassMention));

        let mut config = GuildModerationConfig::for_guild(1);
        config.set_action(ViolationKind::Url, ModAction::Kick).unwrap();
        assert_eq!(config.action_for(ViolationKind::Url), ModAction::Kick);
        assert!(config.set_action(ViolationKind::Raid, ModAction::Ban).is_err());
        assert!(config.set_action(ViolationKind::Manual, ModAction::Ban).is_err());
    }

    #[test]
    fn test_word_domain_and_ignore_lists() {
        let mut config = GuildModerationConfig::for_guild(1);

        assert!(config.add_word("  BadWord "));
        assert!(!config.add_word("badword"));
        assert!(config.remove_word("BADWORD"));
        assert!(!config.add_word("   "));

        assert!(config.add_domain("https://www.Example.com/path"));
        assert!(config.allowed_domains.contains("example.com"));
        assert!(config.remove_domain("example.com"));

        assert!(config.toggle_ignored_role(5));
        assert!(!config.toggle_ignored_role(5));
        assert!(config.ignored_roles.is_empty());
        assert!(config.toggle_ignored_channel(9));
        assert!(config.ignored_channels.contains(&9));
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("YouTube.com"), "youtube.com");
        assert_eq!(normalize_domain("http://www.rust-lang.org:443/learn"), "rust-lang.org");
        assert_eq!(normalize_domain(".docs.rs."), "docs.rs");
    }
}
