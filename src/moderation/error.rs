//! Error types for the moderation engine
//!
//! This module defines the errors that can occur while evaluating rules,
//! enforcing sanctions and persisting moderation state.

use poise::serenity_prelude as serenity;
use thiserror::Error;

/// Errors that can occur during moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    /// Invalid state transition attempted
    #[error("Invalid state transition")]
    InvalidStateTransition,

    /// Sanction record not found
    #[error("Sanction not found: {0}")]
    NotFound(String),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    /// A lockdown found no text channel it could lock
    #[error("No text channel could be locked")]
    NoLockableChannels,

    /// Reading or writing a data file failed
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    /// A data file could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error
    #[error("Moderation error: {0}")]
    Other(String),
}

impl From<serenity::Error> for ModerationError {
    fn from(error: serenity::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl ModerationError {
    /// Whether the platform rejected the call for lack of permissions
    #[must_use]
    pub fn is_missing_permissions(&self) -> bool {
        matches!(
            self,
            Self::DiscordApi(source) if matches!(
                source.as_ref(),
                serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response))
                    if response.status_code.as_u16() == 403 || response.error.code == 50013
            )
        )
    }

    /// Whether the target member, user or role no longer exists
    #[must_use]
    pub fn is_unknown_target(&self) -> bool {
        matches!(
            self,
            Self::DiscordApi(source) if matches!(
                source.as_ref(),
                serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response))
                    if response.status_code.as_u16() == 404
                        || matches!(response.error.code, 10007 | 10011 | 10013)
            )
        )
    }
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;
