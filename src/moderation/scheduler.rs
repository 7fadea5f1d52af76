//! Timed sanction reversal
//!
//! Each active sanction gets one tokio timer keyed by the sanction id. Timers
//! can be aborted for a manual early reversal, and every sanction is written
//! to the [`SanctionStore`] before its timer is armed so [`ReversalScheduler::rearm`]
//! can restore them after a restart. A reversed or cancelled record is only
//! dropped from the store after its undo has run.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use super::ModerationResult;
use super::platform::ModerationPlatform;
use super::record::{SanctionKind, SanctionRecord, SanctionState};
use super::store::SanctionStore;
use crate::MODERATION_TARGET;
use crate::duration::format_duration;

/// Arms, cancels and restores sanction reversals
#[derive(Clone)]
pub struct ReversalScheduler {
    store: SanctionStore,
    platform: Arc<dyn ModerationPlatform>,
    timers: Arc<DashMap<String, AbortHandle>>,
}

impl ReversalScheduler {
    #[must_use]
    pub fn new(store: SanctionStore, platform: Arc<dyn ModerationPlatform>) -> Self {
        Self {
            store,
            platform,
            timers: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &SanctionStore {
        &self.store
    }

    /// Number of timers that have not fired yet
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Persist a new active sanction and arm its timer
    pub async fn schedule(&self, record: SanctionRecord) {
        info!(
            target: MODERATION_TARGET,
            sanction_id = %record.id,
            guild_id = record.guild_id,
            kind = %record.kind,
            expires_at = %record.expires_at,
            "Sanction scheduled for reversal"
        );

        self.store.add(record.clone());
        self.store.persist_or_log().await;
        self.arm(&record);
    }

    /// Arm (or re-arm) the timer for a stored sanction
    fn arm(&self, record: &SanctionRecord) {
        let delay = record.remaining(Utc::now());
        let id = record.id.clone();
        let scheduler = self.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = scheduler.reverse(&id).await {
                error!(
                    target: MODERATION_TARGET,
                    sanction_id = %id,
                    error = %e,
                    "Failed to reverse sanction"
                );
            }
        })
        .abort_handle();

        if let Some(previous) = self.timers.insert(record.id.clone(), handle) {
            previous.abort();
        }
    }

    /// Re-arm every persisted sanction, reversing overdue ones right away.
    ///
    /// Records that were already reversed or cancelled when the process
    /// stopped get their undo run again; removing a role or restoring an
    /// overwrite twice is harmless. Returns how many sanctions were reversed
    /// immediately.
    pub async fn rearm(&self) -> usize {
        let now = Utc::now();
        let mut overdue = 0;

        for record in self.store.all() {
            match record.state {
                SanctionState::Reversed => {
                    overdue += 1;
                    self.finish(&record, "expired").await;
                }
                SanctionState::Cancelled => {
                    overdue += 1;
                    self.finish(&record, "lifted early").await;
                }
                SanctionState::Active if record.is_due(now) => {
                    overdue += 1;
                    if let Err(e) = self.reverse(&record.id).await {
                        error!(
                            target: MODERATION_TARGET,
                            sanction_id = %record.id,
                            error = %e,
                            "Failed to reverse overdue sanction"
                        );
                    }
                }
                SanctionState::Active => self.arm(&record),
            }
        }

        info!(
            target: MODERATION_TARGET,
            armed = self.pending_timers(),
            overdue,
            "Restored persisted sanctions"
        );

        overdue
    }

    /// Reverse a sanction whose time is up
    ///
    /// # Errors
    /// Returns an error if the sanction is unknown or no longer active.
    pub async fn reverse(&self, id: &str) -> ModerationResult<SanctionRecord> {
        let record = self.store.reverse(id)?;
        self.timers.remove(id);
        self.finish(&record, "expired").await;
        Ok(record)
    }

    /// Cancel a sanction early, aborting its timer and undoing it now
    ///
    /// # Errors
    /// Returns an error if the sanction is unknown or no longer active.
    pub async fn cancel(&self, id: &str) -> ModerationResult<SanctionRecord> {
        if let Some((_, handle)) = self.timers.remove(id) {
            handle.abort();
        }
        let record = self.store.cancel(id)?;
        self.finish(&record, "lifted early").await;
        Ok(record)
    }

    /// Drop a sanction without undoing it, used when a newer one replaces it
    pub async fn discard(&self, id: &str) {
        if let Some((_, handle)) = self.timers.remove(id) {
            handle.abort();
        }
        self.store.remove(id);
        self.store.persist_or_log().await;
    }

    /// Forget handles of timers that already fired
    pub fn prune_finished(&self) -> usize {
        let before = self.timers.len();
        self.timers.retain(|_, handle| !handle.is_finished());
        before.saturating_sub(self.timers.len())
    }

    /// Undo, notify, then drop the record; it stays persisted until the undo returns
    async fn finish(&self, record: &SanctionRecord, how: &str) {
        let undone = self.undo(record).await;
        self.post_notice(record, how, undone).await;
        self.store.remove(&record.id);
        self.store.persist_or_log().await;
    }

    /// Undo the platform side of a sanction, returning whether every step succeeded
    async fn undo(&self, record: &SanctionRecord) -> bool {
        let guild_id = GuildId::new(record.guild_id);

        match &record.kind {
            SanctionKind::Mute { user_id, role_id } => {
                let result = self
                    .platform
                    .remove_role(
                        guild_id,
                        UserId::new(*user_id),
                        RoleId::new(*role_id),
                        "Timed mute ended",
                    )
                    .await;
                match result {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            target: MODERATION_TARGET,
                            sanction_id = %record.id,
                            user_id,
                            error = %e,
                            "Failed to remove mute role"
                        );
                        false
                    }
                }
            }
            SanctionKind::Lockdown { channels } => {
                let mut all_restored = true;
                for lock in channels {
                    if let Err(e) = self.platform.unlock_channel(guild_id, lock).await {
                        all_restored = false;
                        warn!(
                            target: MODERATION_TARGET,
                            sanction_id = %record.id,
                            channel_id = lock.channel_id,
                            error = %e,
                            "Failed to unlock channel"
                        );
                    }
                }
                all_restored
            }
        }
    }

    async fn post_notice(&self, record: &SanctionRecord, how: &str, undone: bool) {
        let Some(log_channel) = record.log_channel else {
            return;
        };

        let duration = format_duration(
            u64::try_from((record.expires_at - record.created_at).num_seconds()).unwrap_or(0),
        );
        let (title, subject) = match &record.kind {
            SanctionKind::Mute { user_id, .. } => {
                ("Member unmuted", format!("**User:** <@{user_id}>"))
            }
            SanctionKind::Lockdown { channels } => (
                "Lockdown lifted",
                format!("**Channels:** {}", channels.len()),
            ),
        };

        let mut description = format!(
            "{subject}\n**Duration:** {duration} ({how})\n**Reason:** {}",
            record.reason
        );
        if !undone {
            description.push_str("\n**Note:** some changes could not be reverted");
        }

        if let Err(e) = self
            .platform
            .post_log(ChannelId::new(log_channel), title, &description)
            .await
        {
            warn!(
                target: MODERATION_TARGET,
                sanction_id = %record.id,
                error = %e,
                "Failed to post reversal notice"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::ModerationError;
    use crate::moderation::platform::MockModerationPlatform;
    use crate::moderation::record::ChannelLock;
    use chrono::DateTime;
    use poise::serenity_prelude::MessageId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Platform whose role removal takes `delay` to complete
    struct SlowRoleRemoval {
        delay: Duration,
        removals: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ModerationPlatform for SlowRoleRemoval {
        async fn delete_message(&self, _: ChannelId, _: MessageId) -> ModerationResult<()> {
            Ok(())
        }

        async fn send_transient(
            &self,
            _: ChannelId,
            _: &str,
            _: Duration,
        ) -> ModerationResult<()> {
            Ok(())
        }

        async fn send_dm(&self, _: UserId, _: &str) -> ModerationResult<()> {
            Ok(())
        }

        async fn post_log(&self, _: ChannelId, _: &str, _: &str) -> ModerationResult<()> {
            Ok(())
        }

        async fn add_role(
            &self,
            _: GuildId,
            _: UserId,
            _: RoleId,
            _: &str,
        ) -> ModerationResult<()> {
            Ok(())
        }

        async fn remove_role(
            &self,
            _: GuildId,
            _: UserId,
            _: RoleId,
            _: &str,
        ) -> ModerationResult<()> {
            tokio::time::sleep(self.delay).await;
            self.removals.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn timeout_member(
            &self,
            _: GuildId,
            _: UserId,
            _: DateTime<Utc>,
        ) -> ModerationResult<()> {
            Ok(())
        }

        async fn clear_timeout(&self, _: GuildId, _: UserId) -> ModerationResult<()> {
            Ok(())
        }

        async fn kick(&self, _: GuildId, _: UserId, _: &str) -> ModerationResult<()> {
            Ok(())
        }

        async fn ban(&self, _: GuildId, _: UserId, _: u8, _: &str) -> ModerationResult<()> {
            Ok(())
        }

        async fn unban(&self, _: GuildId, _: UserId, _: &str) -> ModerationResult<()> {
            Ok(())
        }

        async fn purge(&self, _: ChannelId, _: u8, _: Option<UserId>) -> ModerationResult<usize> {
            Ok(0)
        }

        async fn create_mute_role(&self, _: GuildId) -> ModerationResult<RoleId> {
            Ok(RoleId::new(1))
        }

        async fn invite_codes(&self, _: GuildId) -> ModerationResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn text_channels(&self, _: GuildId) -> ModerationResult<Vec<ChannelId>> {
            Ok(Vec::new())
        }

        async fn lock_channel(
            &self,
            _: GuildId,
            channel_id: ChannelId,
        ) -> ModerationResult<ChannelLock> {
            Ok(ChannelLock {
                channel_id: channel_id.get(),
                previous_allow: None,
                previous_deny: None,
            })
        }

        async fn unlock_channel(&self, _: GuildId, _: &ChannelLock) -> ModerationResult<()> {
            Ok(())
        }
    }

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("raidguard-{}", uuid::Uuid::new_v4()))
            .join("sanctions.yaml")
    }

    fn counting_platform(removals: &Arc<AtomicUsize>) -> MockModerationPlatform {
        let mut platform = MockModerationPlatform::new();
        let counter = Arc::clone(removals);
        platform.expect_remove_role().returning(move |_, _, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        platform.expect_post_log().returning(|_, _, _| Ok(()));
        platform
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_reversed_after_duration() {
        let removals = Arc::new(AtomicUsize::new(0));
        let scheduler = ReversalScheduler::new(
            SanctionStore::in_memory(),
            Arc::new(counting_platform(&removals)),
        );

        let record = SanctionRecord::mute(1, 2, 3, 60, "spam", Some(4));
        let id = record.id.clone();
        scheduler.schedule(record).await;
        assert_eq!(scheduler.pending_timers(), 1);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(removals.load(Ordering::SeqCst), 0);
        assert!(scheduler.store().get(&id).is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(removals.load(Ordering::SeqCst), 1);
        assert!(scheduler.store().get(&id).is_none());
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let removals = Arc::new(AtomicUsize::new(0));
        let scheduler = ReversalScheduler::new(
            SanctionStore::in_memory(),
            Arc::new(counting_platform(&removals)),
        );

        let record = SanctionRecord::mute(1, 2, 3, 60, "spam", None);
        let id = record.id.clone();
        scheduler.schedule(record).await;

        let cancelled = scheduler.cancel(&id).await.unwrap();
        assert_eq!(cancelled.state, SanctionState::Cancelled);
        assert_eq!(removals.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(removals.load(Ordering::SeqCst), 1);
        assert!(matches!(
            scheduler.cancel(&id).await,
            Err(ModerationError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_reverses_overdue_and_arms_pending() {
        let removals = Arc::new(AtomicUsize::new(0));
        let store = SanctionStore::in_memory();

        let mut overdue = SanctionRecord::mute(1, 2, 3, 60, "spam", None);
        overdue.expires_at = Utc::now() - chrono::Duration::seconds(5);
        let pending = SanctionRecord::mute(1, 5, 3, 30, "spam", None);
        store.add(overdue.clone());
        store.add(pending.clone());

        let scheduler = ReversalScheduler::new(store, Arc::new(counting_platform(&removals)));
        assert_eq!(scheduler.rearm().await, 1);
        assert_eq!(removals.load(Ordering::SeqCst), 1);
        assert!(scheduler.store().get(&overdue.id).is_none());
        assert!(scheduler.store().get(&pending.id).is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(removals.load(Ordering::SeqCst), 2);
        assert!(scheduler.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_role_removal_still_closes_record() {
        let mut platform = MockModerationPlatform::new();
        platform
            .expect_remove_role()
            .times(1)
            .returning(|_, _, _, _| Err(ModerationError::Other("gone".to_string())));
        platform
            .expect_post_log()
            .withf(|_, title, description| {
                title.contains("Member unmuted") && description.contains("could not be reverted")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let scheduler = ReversalScheduler::new(SanctionStore::in_memory(), Arc::new(platform));
        let record = SanctionRecord::mute(1, 2, 3, 10, "spam", Some(4));
        let id = record.id.clone();
        scheduler.schedule(record).await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(scheduler.store().get(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lockdown_restores_every_channel() {
        let unlocked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&unlocked);
        let mut platform = MockModerationPlatform::new();
        platform.expect_unlock_channel().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let scheduler = ReversalScheduler::new(SanctionStore::in_memory(), Arc::new(platform));
        let locks = (1..=3)
            .map(|channel_id| ChannelLock {
                channel_id,
                previous_allow: None,
                previous_deny: None,
            })
            .collect();
        scheduler
            .schedule(SanctionRecord::lockdown(1, locks, 300, "raid", None))
            .await;

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(unlocked.load(Ordering::SeqCst), 3);
        assert!(scheduler.store().active_lockdown_for(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_drops_without_undo() {
        let mut platform = MockModerationPlatform::new();
        platform.expect_remove_role().never();

        let scheduler = ReversalScheduler::new(SanctionStore::in_memory(), Arc::new(platform));
        let record = SanctionRecord::mute(1, 2, 3, 10, "spam", None);
        let id = record.id.clone();
        scheduler.schedule(record).await;
        scheduler.discard(&id).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(scheduler.store().is_empty());
        assert_eq!(scheduler.prune_finished(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reversing_mute_stays_on_disk_until_role_removed() {
        let path = temp_path();
        let removals = Arc::new(AtomicUsize::new(0));
        let platform = SlowRoleRemoval {
            delay: Duration::from_secs(10),
            removals: Arc::clone(&removals),
        };
        let scheduler =
            ReversalScheduler::new(SanctionStore::load(&path).await.unwrap(), Arc::new(platform));

        let first = SanctionRecord::mute(1, 2, 3, 60, "spam", None);
        scheduler.schedule(first.clone()).await;

        // The timer fired and the role removal is still running
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(removals.load(Ordering::SeqCst), 0);

        // Another sanction rewrites the file in the meantime
        let second = SanctionRecord::mute(1, 5, 3, 600, "spam", None);
        scheduler.schedule(second.clone()).await;

        let on_disk = SanctionStore::load(&path).await.unwrap();
        assert_eq!(
            on_disk.get(&first.id).map(|record| record.state),
            Some(SanctionState::Reversed)
        );
        assert!(on_disk.get(&second.id).is_some());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(removals.load(Ordering::SeqCst), 1);

        let on_disk = SanctionStore::load(&path).await.unwrap();
        assert!(on_disk.get(&first.id).is_none());
        assert_eq!(on_disk.len(), 1);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_finishes_interrupted_reversals() {
        let removals = Arc::new(AtomicUsize::new(0));
        let store = SanctionStore::in_memory();

        let reversed = SanctionRecord::mute(1, 2, 3, 60, "spam", None);
        let cancelled = SanctionRecord::mute(1, 5, 3, 60, "spam", None);
        store.add(reversed.clone());
        store.add(cancelled.clone());
        store.reverse(&reversed.id).unwrap();
        store.cancel(&cancelled.id).unwrap();

        let scheduler = ReversalScheduler::new(store, Arc::new(counting_platform(&removals)));
        assert_eq!(scheduler.rearm().await, 2);
        assert_eq!(removals.load(Ordering::SeqCst), 2);
        assert!(scheduler.store().is_empty());
        assert_eq!(scheduler.pending_timers(), 0);
    }
}
