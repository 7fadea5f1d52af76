//! Sanction and violation records
//!
//! A [`SanctionRecord`] tracks a temporary sanction (role mute or guild
//! lockdown) from the moment it is applied until it is reversed or cancelled.
//! A [`ViolationRecord`] is the immutable log entry written for every action.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::config::ViolationKind;
use super::{ModerationError, ModerationResult};
use crate::MODERATION_TARGET;
use crate::duration::to_chrono;

/// Sanction lifecycle states
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SanctionState {
    /// Applied and waiting for its expiry
    Active,
    /// Undone after the duration elapsed
    Reversed,
    /// Undone early by a moderator
    Cancelled,
}

/// Previous `@everyone` overwrite of a channel before it was locked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLock {
    pub channel_id: u64,
    /// Allow bits of the overwrite that existed before locking, if any
    pub previous_allow: Option<u64>,
    /// Deny bits of the overwrite that existed before locking, if any
    pub previous_deny: Option<u64>,
}

impl ChannelLock {
    /// Whether the channel had an `@everyone` overwrite before locking
    #[must_use]
    pub fn had_overwrite(&self) -> bool {
        self.previous_allow.is_some() || self.previous_deny.is_some()
    }
}

/// What a sanction did and what has to be undone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SanctionKind {
    Mute { user_id: u64, role_id: u64 },
    Lockdown { channels: Vec<ChannelLock> },
}

impl std::fmt::Display for SanctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mute { user_id, .. } => write!(f, "mute of <@{user_id}>"),
            Self::Lockdown { channels } => write!(f, "lockdown of {} channel(s)", channels.len()),
        }
    }
}

/// A temporary sanction with a scheduled reversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanctionRecord {
    pub id: String,
    pub guild_id: u64,
    pub kind: SanctionKind,
    pub reason: String,
    /// Channel the reversal notice is posted to
    pub log_channel: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: SanctionState,
    pub reversed_at: Option<DateTime<Utc>>,
}

impl SanctionRecord {
    fn new(
        guild_id: u64,
        kind: SanctionKind,
        duration_secs: u64,
        reason: impl Into<String>,
        log_channel: Option<u64>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            guild_id,
            kind,
            reason: reason.into(),
            log_channel,
            created_at: now,
            expires_at: now
                .checked_add_signed(to_chrono(duration_secs))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            state: SanctionState::Active,
            reversed_at: None,
        }
    }

    /// Create an active role mute
    #[must_use]
    pub fn mute(
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        duration_secs: u64,
        reason: impl Into<String>,
        log_channel: Option<u64>,
    ) -> Self {
        Self::new(
            guild_id,
            SanctionKind::Mute { user_id, role_id },
            duration_secs,
            reason,
            log_channel,
        )
    }

    /// Create an active guild lockdown
    #[must_use]
    pub fn lockdown(
        guild_id: u64,
        channels: Vec<ChannelLock>,
        duration_secs: u64,
        reason: impl Into<String>,
        log_channel: Option<u64>,
    ) -> Self {
        Self::new(
            guild_id,
            SanctionKind::Lockdown { channels },
            duration_secs,
            reason,
            log_channel,
        )
    }

    /// Time left until expiry, zero when already due
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == SanctionState::Active && self.expires_at <= now
    }

    /// Muted user, if this is a mute
    #[must_use]
    pub fn muted_user(&self) -> Option<u64> {
        match self.kind {
            SanctionKind::Mute { user_id, .. } => Some(user_id),
            SanctionKind::Lockdown { .. } => None,
        }
    }

    /// Transition to Reversed
    ///
    /// # Errors
    /// Returns an error if the record is not Active.
    pub fn reverse(&mut self) -> ModerationResult<()> {
        if self.state != SanctionState::Active {
            return Err(ModerationError::InvalidStateTransition);
        }

        self.state = SanctionState::Reversed;
        self.reversed_at = Some(Utc::now());

        info!(
            target: MODERATION_TARGET,
            sanction_id = %self.id,
            guild_id = %self.guild_id,
            kind = %self.kind,
            "Sanction reversed"
        );

        Ok(())
    }

    /// Transition to Cancelled
    ///
    /// # Errors
    /// Returns an error if the record is not Active.
    pub fn cancel(&mut self) -> ModerationResult<()> {
        if self.state != SanctionState::Active {
            return Err(ModerationError::InvalidStateTransition);
        }

        self.state = SanctionState::Cancelled;
        self.reversed_at = Some(Utc::now());

        info!(
            target: MODERATION_TARGET,
            sanction_id = %self.id,
            guild_id = %self.guild_id,
            kind = %self.kind,
            "Sanction cancelled"
        );

        Ok(())
    }
}

/// Action recorded for a violation or moderator case
#[derive(Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionTaken {
    #[display("delete")]
    Delete,
    #[display("warn ({count}/{threshold})")]
    Warn { count: u64, threshold: u64 },
    #[display("mute ({duration_secs}s)")]
    Mute { duration_secs: u64 },
    /// Native communication timeout used when no mute role is configured
    #[display("timeout ({duration_secs}s)")]
    Timeout { duration_secs: u64 },
    #[display("kick")]
    Kick,
    #[display("ban")]
    Ban,
    /// Sanction applied once the warning threshold was reached
    #[display("escalation: {action}")]
    Escalated { action: Box<ActionTaken> },
    #[display("lockdown ({duration_secs}s)")]
    Lockdown { duration_secs: u64 },
    /// Warning issued by a moderator; does not count toward escalation
    #[display("warn")]
    ManualWarn,
    #[display("unmute")]
    Unmute,
    #[display("unban")]
    Unban,
}

/// One logged violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub id: String,
    pub guild_id: u64,
    /// Absent for raid events
    pub user_id: Option<u64>,
    pub channel_id: Option<u64>,
    pub kind: ViolationKind,
    pub action: ActionTaken,
    /// Whether the platform accepted the enforcement call
    pub enforced: bool,
    /// Message content at the time of the violation
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Moderator who issued a manual action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderator_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ViolationRecord {
    #[must_use]
    pub fn new(
        guild_id: u64,
        user_id: Option<u64>,
        channel_id: Option<u64>,
        kind: ViolationKind,
        action: ActionTaken,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            guild_id,
            user_id,
            channel_id,
            kind,
            action,
            enforced: true,
            content: content.into(),
            timestamp: Utc::now(),
            moderator_id: None,
            reason: None,
        }
    }

    /// Record of a moderator command against `user_id`
    #[must_use]
    pub fn manual(
        guild_id: u64,
        user_id: u64,
        moderator_id: u64,
        action: ActionTaken,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            moderator_id: Some(moderator_id),
            reason: Some(reason.into()),
            ..Self::new(
                guild_id,
                Some(user_id),
                None,
                ViolationKind::Manual,
                action,
                String::new(),
            )
        }
    }

    #[must_use]
    pub fn with_enforced(mut self, enforced: bool) -> Self {
        self.enforced = enforced;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanction_state_transitions() {
        let mut record = SanctionRecord::mute(1, 2, 3, 300, "spam", None);
        assert_eq!(record.state, SanctionState::Active);
        assert_eq!(record.muted_user(), Some(2));
        assert_eq!((record.expires_at - record.created_at).num_seconds(), 300);

        record.reverse().unwrap();
        assert_eq!(record.state, SanctionState::Reversed);
        assert!(record.reversed_at.is_some());

        // Cannot reverse or cancel twice
        assert!(matches!(
            record.reverse(),
            Err(ModerationError::InvalidStateTransition)
        ));
        assert!(record.cancel().is_err());

        let mut record = SanctionRecord::lockdown(1, Vec::new(), 60, "raid", Some(9));
        record.cancel().unwrap();
        assert_eq!(record.state, SanctionState::Cancelled);
        assert!(record.reverse().is_err());
        assert_eq!(record.muted_user(), None);
    }

    #[test]
    fn test_remaining_and_due() {
        let record = SanctionRecord::mute(1, 2, 3, 60, "spam", None);
        let now = record.created_at;

        assert_eq!(record.remaining(now).as_secs(), 60);
        assert!(!record.is_due(now));
        assert!(record.is_due(now + chrono::Duration::seconds(60)));
        assert_eq!(record.remaining(now + chrono::Duration::seconds(120)).as_secs(), 0);
    }

    #[test]
    fn test_sanction_serialization() {
        let record = SanctionRecord::lockdown(
            10,
            vec![ChannelLock {
                channel_id: 20,
                previous_allow: None,
                previous_deny: Some(1024),
            }],
            300,
            "Raid detected",
            Some(30),
        );

        let serialized = serde_yaml::to_string(&record).expect("Failed to serialize");
        assert!(serialized.contains("type: lockdown"));
        assert!(serialized.contains("channel_id: 20"));
        assert!(serialized.contains("state: Active"));

        let deserialized: SanctionRecord =
            serde_yaml::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(deserialized, record);
    }

    #[test]
    fn test_action_taken_display() {
        assert_eq!(ActionTaken::Delete.to_string(), "delete");
        assert_eq!(
            ActionTaken::Warn {
                count: 1,
                threshold: 3
            }
            .to_string(),
            "warn (1/3)"
        );
        assert_eq!(
            ActionTaken::Escalated {
                action: Box::new(ActionTaken::Kick)
            }
            .to_string(),
            "escalation: kick"
        );
        assert_eq!(
            ActionTaken::Escalated {
                action: Box::new(ActionTaken::Timeout { duration_secs: 600 })
            }
            .to_string(),
            "escalation: timeout (600s)"
        );
    }

    #[test]
    fn test_escalation_keeps_concrete_sanction() {
        let record = ViolationRecord::new(
            1,
            Some(2),
            Some(3),
            ViolationKind::Spam,
            ActionTaken::Escalated {
                action: Box::new(ActionTaken::Mute { duration_secs: 900 }),
            },
            "spam",
        );

        let serialized = serde_yaml::to_string(&record).expect("Failed to serialize");
        assert!(serialized.contains("type: escalated"));
        assert!(serialized.contains("type: mute"));
        assert!(serialized.contains("duration_secs: 900"));

        let deserialized: ViolationRecord =
            serde_yaml::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(deserialized, record);
    }

    #[test]
    fn test_manual_record_carries_moderator_and_reason() {
        let record = ViolationRecord::manual(1, 2, 9, ActionTaken::ManualWarn, "be nice");
        assert_eq!(record.kind, ViolationKind::Manual);
        assert_eq!(record.user_id, Some(2));
        assert_eq!(record.channel_id, None);
        assert_eq!(record.moderator_id, Some(9));
        assert_eq!(record.reason.as_deref(), Some("be nice"));

        let serialized = serde_yaml::to_string(&record).expect("Failed to serialize");
        assert!(serialized.contains("moderator_id: 9"));
        let deserialized: ViolationRecord =
            serde_yaml::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(deserialized, record);

        // Automatic records leave both fields out of the file
        let automatic =
            ViolationRecord::new(1, Some(2), Some(3), ViolationKind::Url, ActionTaken::Delete, "");
        let serialized = serde_yaml::to_string(&automatic).expect("Failed to serialize");
        assert!(!serialized.contains("moderator_id"));
        assert!(!serialized.contains("reason"));
    }

    #[test]
    fn test_violation_record_serialization() {
        let record = ViolationRecord::new(
            1,
            Some(2),
            Some(3),
            ViolationKind::InviteLink,
            ActionTaken::Delete,
            "discord.gg/abc",
        )
        .with_enforced(false);

        let serialized = serde_yaml::to_string(&record).expect("Failed to serialize");
        assert!(serialized.contains("kind: invite_link"));
        assert!(serialized.contains("enforced: false"));

        let deserialized: ViolationRecord =
            serde_yaml::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(deserialized, record);
    }
}
