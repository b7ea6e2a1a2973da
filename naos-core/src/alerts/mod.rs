//! The alert engine: deduplicates events into groups, counts occurrences
//! unthrottled, and routes throttled/priority-aware notifications to the
//! live-push layer. See `spec.md` §4.5 — this is "the hard part".

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AlertError;
use crate::events::{Event, Severity};

pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(60);
pub const RETENTION_WINDOW: chrono::Duration = chrono::Duration::days(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertGroup {
    pub id: Uuid,
    pub group_key: String,
    pub category: String,
    pub priority: Severity,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u64,
    pub acknowledged: bool,
    pub acknowledged_by: Option<Uuid>,
    pub dismissed: bool,
    pub latest_details: Option<serde_json::Value>,
    pub title: String,
}

#[derive(Debug, Default, Clone)]
pub struct AlertFilter {
    pub category: Option<String>,
    pub group_key: Option<String>,
    pub include_dismissed: bool,
}

struct GroupRecord {
    group: AlertGroup,
    last_live_push: Option<std::time::Instant>,
}

/// Derives the group key spec.md §4.5 requires: the event's own
/// `group_key` if present, else `(category, title)` where `title` is taken
/// as the event's message (the closest analogue the event shape has to a
/// distinct "title" field).
fn derive_key(event: &Event) -> String {
    event
        .group_key
        .clone()
        .unwrap_or_else(|| format!("{}::{}", event.category, event.message))
}

pub struct AlertEngine {
    groups: RwLock<HashMap<String, GroupRecord>>,
    throttle_window: Duration,
}

impl AlertEngine {
    pub fn new(throttle_window: Duration) -> Self {
        Self { groups: RwLock::new(HashMap::new()), throttle_window }
    }

    /// Upserts a group for `event`. Returns the resulting group and whether
    /// a live push should fire now, applying both the throttle window and
    /// the priority-routing bypass (`spec.md` §4.5: a critical event always
    /// fans out, and the very first occurrence of a group in this daemon
    /// lifetime is always delivered regardless of severity).
    pub fn submit(&self, event: Event) -> (AlertGroup, bool) {
        let key = derive_key(&event);
        let now = Utc::now();
        let mut groups = self.groups.write();

        let should_push;
        let group = if let Some(record) = groups.get_mut(&key) {
            let escalated = event.severity > record.group.priority;
            record.group.occurrence_count += 1;
            record.group.last_seen = now;
            record.group.latest_details = event.details.clone();
            record.group.priority = record.group.priority.max(event.severity);
            if escalated {
                record.group.acknowledged = false;
                record.group.acknowledged_by = None;
            }

            let within_throttle = record
                .last_live_push
                .map(|t| t.elapsed() < self.throttle_window)
                .unwrap_or(false);
            should_push = event.severity == Severity::Critical || !within_throttle;
            if should_push {
                record.last_live_push = Some(std::time::Instant::now());
            }
            record.group.clone()
        } else {
            let group = AlertGroup {
                id: Uuid::now_v7(),
                group_key: key.clone(),
                category: event.category.clone(),
                priority: event.severity,
                first_seen: now,
                last_seen: now,
                occurrence_count: 1,
                acknowledged: false,
                acknowledged_by: None,
                dismissed: false,
                latest_details: event.details.clone(),
                title: event.message.clone(),
            };
            should_push = true;
            groups.insert(
                key.clone(),
                GroupRecord { group: group.clone(), last_live_push: Some(std::time::Instant::now()) },
            );
            group
        };

        (group, should_push && !groups.get(&key).map(|r| r.group.dismissed).unwrap_or(false))
    }

    pub fn acknowledge(&self, group_id: Uuid, subject: Uuid) -> Result<AlertGroup, AlertError> {
        let mut groups = self.groups.write();
        let record = groups
            .values_mut()
            .find(|r| r.group.id == group_id)
            .ok_or(AlertError::NotFound(group_id))?;
        record.group.acknowledged = true;
        record.group.acknowledged_by = Some(subject);
        Ok(record.group.clone())
    }

    pub fn dismiss(&self, group_id: Uuid) -> Result<AlertGroup, AlertError> {
        let mut groups = self.groups.write();
        let record = groups
            .values_mut()
            .find(|r| r.group.id == group_id)
            .ok_or(AlertError::NotFound(group_id))?;
        record.group.dismissed = true;
        Ok(record.group.clone())
    }

    pub fn list(&self, filter: &AlertFilter) -> Vec<AlertGroup> {
        let groups = self.groups.read();
        groups
            .values()
            .map(|r| &r.group)
            .filter(|g| filter.include_dismissed || !g.dismissed)
            .filter(|g| filter.category.as_deref().map(|c| c == g.category).unwrap_or(true))
            .filter(|g| filter.group_key.as_deref().map(|k| k == g.group_key).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn get(&self, group_id: Uuid) -> Option<AlertGroup> {
        self.groups.read().values().map(|r| &r.group).find(|g| g.id == group_id).cloned()
    }

    /// Daily retention sweep: purges acknowledged-and-dismissed groups
    /// whose `last_seen` is older than [`RETENTION_WINDOW`].
    pub fn sweep_retention(&self) -> usize {
        let cutoff = Utc::now() - RETENTION_WINDOW;
        let mut groups = self.groups.write();
        let before = groups.len();
        groups.retain(|_, r| !(r.group.acknowledged && r.group.dismissed && r.group.last_seen < cutoff));
        before - groups.len()
    }
}

/// A subscriber's category filter, used by the live-push layer to decide
/// fan-out per `spec.md` §4.5: critical bypasses filters entirely; warning
/// and info honor them.
pub fn passes_filter(event_severity: Severity, event_category: &str, subscriber_categories: &[String]) -> bool {
    event_severity == Severity::Critical
        || subscriber_categories.is_empty()
        || subscriber_categories.iter().any(|c| c == event_category)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(group_key: &str, severity: Severity) -> Event {
        Event::new("zfs_checksum", severity, "checksum errors detected").with_group_key(group_key)
    }

    #[test]
    fn repeated_submissions_collapse_into_one_group_with_accurate_count() {
        let engine = AlertEngine::new(Duration::from_secs(60));
        let mut last_group = None;
        let mut pushes = 0;
        for _ in 0..100 {
            let (group, pushed) = engine.submit(event("tank_checksum", Severity::Warning));
            if pushed {
                pushes += 1;
            }
            last_group = Some(group);
        }
        assert_eq!(last_group.unwrap().occurrence_count, 100);
        // First occurrence always pushes; the rest are throttled within the
        // 60s window used in this test.
        assert_eq!(pushes, 1);
    }

    #[test]
    fn acknowledge_survives_unchanged_severity_resubmit() {
        let engine = AlertEngine::new(Duration::from_secs(60));
        let (group, _) = engine.submit(event("k", Severity::Warning));
        engine.acknowledge(group.id, Uuid::nil()).unwrap();
        engine.submit(event("k", Severity::Warning));
        assert!(engine.get(group.id).unwrap().acknowledged);
    }

    #[test]
    fn escalation_clears_acknowledged_bit() {
        let engine = AlertEngine::new(Duration::from_secs(60));
        let (group, _) = engine.submit(event("k", Severity::Warning));
        engine.acknowledge(group.id, Uuid::nil()).unwrap();
        engine.submit(event("k", Severity::Critical));
        assert!(!engine.get(group.id).unwrap().acknowledged);
    }

    #[test]
    fn critical_always_bypasses_throttle_on_first_occurrence() {
        let engine = AlertEngine::new(Duration::from_secs(3600));
        let (_, pushed_first) = engine.submit(event("crit-group", Severity::Critical));
        assert!(pushed_first);
        let (_, pushed_second) = engine.submit(event("crit-group", Severity::Critical));
        // Subsequent criticals still bypass throttle per spec.md.
        assert!(pushed_second);
    }

    #[test]
    fn filter_passthrough_rules() {
        assert!(passes_filter(Severity::Critical, "anything", &["other".to_string()]));
        assert!(passes_filter(Severity::Warning, "zfs", &["zfs".to_string()]));
        assert!(!passes_filter(Severity::Warning, "zfs", &["docker".to_string()]));
        assert!(passes_filter(Severity::Info, "zfs", &[]));
    }

    #[test]
    fn dismiss_suppresses_live_fanout_but_keeps_history() {
        let engine = AlertEngine::new(Duration::from_secs(60));
        let (group, _) = engine.submit(event("k", Severity::Warning));
        engine.dismiss(group.id).unwrap();
        let (_, pushed) = engine.submit(event("k", Severity::Warning));
        assert!(!pushed);
        assert!(engine.list(&AlertFilter { include_dismissed: true, ..Default::default() }).iter().any(|g| g.id == group.id));
    }
}
