//! Violation log sink
//!
//! Every moderation action appends exactly one [`ViolationRecord`]. The YAML
//! sink writes each record as one list item so the file stays a valid YAML
//! sequence no matter how many records are appended.
//!
//! A guild's log doubles as its case history: case numbers are positions in
//! the guild's part of the log, so they never change once assigned.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::ModerationResult;
use super::record::ViolationRecord;

/// Longest message snapshot shown in a log embed
pub const SNAPSHOT_DISPLAY_LIMIT: usize = 1000;

/// Durable sink for violation records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ViolationLog: Send + Sync {
    async fn append(&self, record: &ViolationRecord) -> ModerationResult<()>;

    /// Every record in append order
    async fn read_all(&self) -> ModerationResult<Vec<ViolationRecord>>;
}

/// One entry of a member's moderation history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Case {
    /// Position among the guild's records, starting at 1
    pub number: usize,
    pub record: ViolationRecord,
}

/// A member's cases in one guild, newest first
#[must_use]
pub fn cases_for(records: Vec<ViolationRecord>, guild_id: u64, user_id: u64) -> Vec<Case> {
    let mut cases = records
        .into_iter()
        .filter(|record| record.guild_id == guild_id)
        .enumerate()
        .filter(|(_, record)| record.user_id == Some(user_id))
        .map(|(index, record)| Case {
            number: index + 1,
            record,
        })
        .collect::<Vec<_>>();
    cases.reverse();
    cases
}

/// Append-only YAML file sink
pub struct YamlViolationLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl YamlViolationLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ViolationLog for YamlViolationLog {
    async fn append(&self, record: &ViolationRecord) -> ModerationResult<()> {
        let entry = serde_yaml::to_string(std::slice::from_ref(record))?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn read_all(&self) -> ModerationResult<Vec<ViolationRecord>> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_yaml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sink that keeps records in memory
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemoryViolationLog {
    records: std::sync::Arc<std::sync::Mutex<Vec<ViolationRecord>>>,
}

#[cfg(test)]
impl MemoryViolationLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<ViolationRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl ViolationLog for MemoryViolationLog {
    async fn append(&self, record: &ViolationRecord) -> ModerationResult<()> {
        self.records
            .lock()
            .map_err(|e| super::ModerationError::Other(e.to_string()))?
            .push(record.clone());
        Ok(())
    }

    async fn read_all(&self) -> ModerationResult<Vec<ViolationRecord>> {
        Ok(self.records())
    }
}

/// Shorten a message snapshot for display, respecting char boundaries
#[must_use]
pub fn truncate_for_display(content: &str, limit: usize) -> String {
    if content.chars().count() <= limit {
        return content.to_string();
    }

    let mut truncated: String = content.chars().take(limit.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::config::ViolationKind;
    use crate::moderation::record::ActionTaken;

    #[test]
    fn test_truncate_for_display() {
        assert_eq!(truncate_for_display("short", 10), "short");
        assert_eq!(truncate_for_display("exactly10!", 10), "exactly10!");
        assert_eq!(truncate_for_display("this is far too long", 10), "this is...");
        // Multi-byte characters are never split
        assert_eq!(truncate_for_display("ééééééé", 5), "éé...");
    }

    #[tokio::test]
    async fn test_yaml_log_appends_records() {
        let dir = std::env::temp_dir().join(format!("raidguard-{}", uuid::Uuid::new_v4()));
        let log = YamlViolationLog::new(dir.join("violations.yaml"));
        assert!(log.read_all().await.unwrap().is_empty());

        let first = ViolationRecord::new(
            1,
            Some(2),
            Some(3),
            ViolationKind::Spam,
            ActionTaken::Delete,
            "hello",
        );
        let second = ViolationRecord::new(
            1,
            None,
            None,
            ViolationKind::Raid,
            ActionTaken::Lockdown { duration_secs: 300 },
            "",
        );
        log.append(&first).await.unwrap();
        log.append(&second).await.unwrap();

        let records = log.read_all().await.unwrap();
        assert_eq!(records, vec![first, second]);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_memory_log_keeps_order() {
        let log = MemoryViolationLog::new();
        for kind in [ViolationKind::WordFilter, ViolationKind::Url] {
            let record = ViolationRecord::new(1, Some(2), Some(3), kind, ActionTaken::Delete, "x");
            log.append(&record).await.unwrap();
        }

        let kinds = log.records().iter().map(|r| r.kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec![ViolationKind::WordFilter, ViolationKind::Url]);
    }

    #[test]
    fn test_cases_are_numbered_per_guild() {
        let lockdown = ActionTaken::Lockdown { duration_secs: 60 };
        let records = vec![
            ViolationRecord::new(1, Some(2), Some(3), ViolationKind::Spam, ActionTaken::Delete, ""),
            ViolationRecord::new(8, Some(2), Some(3), ViolationKind::Spam, ActionTaken::Delete, ""),
            ViolationRecord::new(1, None, None, ViolationKind::Raid, lockdown, ""),
            ViolationRecord::manual(1, 2, 9, ActionTaken::ManualWarn, "rude"),
            ViolationRecord::manual(1, 5, 9, ActionTaken::Kick, "other member"),
        ];

        let cases = cases_for(records, 1, 2);
        let numbers = cases.iter().map(|case| case.number).collect::<Vec<_>>();
        // Newest first; guild 8 and raid entries do not belong to the member
        assert_eq!(numbers, vec![3, 1]);
        assert_eq!(cases[0].record.reason.as_deref(), Some("rude"));
        assert!(cases_for(Vec::new(), 1, 2).is_empty());
    }
}
