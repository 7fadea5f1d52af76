//! Warning escalation bookkeeping

use chrono::{DateTime, Utc};

use super::counters::{WarningState, WarningStore};
use crate::duration::to_chrono;

/// Result of registering one warning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningOutcome {
    /// Below the threshold; `count` warnings so far in this period
    Warned { count: u64, threshold: u64 },
    /// Threshold reached; the counter has been reset to zero
    Escalate,
}

/// Register a warning for `(guild_id, user_id)` at `now`.
///
/// The counter restarts when `timeout_secs` have passed since the last reset.
/// Reaching `threshold` resets it to zero and asks for escalation. The whole
/// update happens under the store's per-key lock.
pub fn register_warning(
    store: &dyn WarningStore,
    guild_id: u64,
    user_id: u64,
    now: DateTime<Utc>,
    threshold: u64,
    timeout_secs: u64,
) -> WarningOutcome {
    let threshold = threshold.max(1);
    let timeout = to_chrono(timeout_secs);
    let mut escalate = false;

    let state = store.modify((guild_id, user_id), now, &mut |state: &mut WarningState| {
        if now - state.last_reset > timeout {
            state.count = 0;
            state.last_reset = now;
        }

        state.count += 1;
        if state.count >= threshold {
            state.count = 0;
            state.last_reset = now;
            escalate = true;
        } else {
            escalate = false;
        }
    });

    if escalate {
        WarningOutcome::Escalate
    } else {
        WarningOutcome::Warned {
            count: state.count,
            threshold,
        }
    }
}
