//! Join-rate raid detection

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::config::GuildModerationConfig;
use super::counters::{WindowKey, WindowStore};
use crate::duration::to_chrono;

/// Member join fields the detector looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinFacts {
    pub guild_id: u64,
    pub user_id: u64,
    pub timestamp: DateTime<Utc>,
}

/// Sliding-window join counter per guild
#[derive(Clone)]
pub struct RaidDetector {
    windows: Arc<dyn WindowStore>,
}

impl RaidDetector {
    #[must_use]
    pub fn new(windows: Arc<dyn WindowStore>) -> Self {
        Self { windows }
    }

    /// Record a join and return the join count when it trips the threshold.
    ///
    /// The window is cleared on a trip, so joins later in the same burst start
    /// counting from zero.
    #[must_use]
    pub fn record_join(&self, config: &GuildModerationConfig, join: &JoinFacts) -> Option<usize> {
        if !config.enabled || !config.raid_protection_enabled {
            return None;
        }

        let key = WindowKey::Raid {
            guild_id: join.guild_id,
        };
        let threshold = usize::try_from(config.effective_raid_threshold()).unwrap_or(usize::MAX);
        let count = self.windows.hit(
            key,
            join.timestamp,
            to_chrono(config.effective_raid_window()),
        );

        if count >= threshold {
            self.windows.clear(key);
            Some(count)
        } else {
            None
        }
    }
}
