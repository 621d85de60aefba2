//! Jobs run by the scheduler: rotating broadcasts and store cleanup.

use std::{sync::Arc, time::Duration};

use chrono::{Datelike, Local, Utc};
use serde_json::json;

use crate::{
    fanout::{all_user_chats, FanOut, FanOutReport, Payload},
    formatting::escape_html,
    session::SessionStore,
    store::{collections, DocumentStore},
    Result,
};

/// Rows deleted per store round-trip during cleanup.
const CLEANUP_BATCH: usize = 100;

/// Named pool of broadcast messages; one is sent per run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageSet {
    pub name: String,
    pub messages: Vec<String>,
}

impl MessageSet {
    /// Rotate through the pool by day of year (0-based).
    pub fn pick(&self, day_ordinal: u32) -> Option<&str> {
        if self.messages.is_empty() {
            return None;
        }
        let idx = day_ordinal as usize % self.messages.len();
        Some(self.messages[idx].as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub announcements_removed: usize,
    pub lost_items_removed: usize,
    pub sessions_dropped: usize,
}

#[derive(Clone)]
pub struct ScheduledJobs {
    store: Arc<dyn DocumentStore>,
    sessions: Arc<SessionStore>,
    fanout: FanOut,
}

impl ScheduledJobs {
    pub fn new(store: Arc<dyn DocumentStore>, sessions: Arc<SessionStore>, fanout: FanOut) -> Self {
        Self {
            store,
            sessions,
            fanout,
        }
    }

    /// Send today's message of `set` to every registered user.
    pub async fn run_scheduled_broadcast(&self, set: &MessageSet) -> Result<FanOutReport> {
        self.broadcast_on(set, Local::now().ordinal0()).await
    }

    async fn broadcast_on(&self, set: &MessageSet, day_ordinal: u32) -> Result<FanOutReport> {
        let Some(message) = set.pick(day_ordinal) else {
            tracing::warn!(set = %set.name, "message set is empty; nothing to send");
            return Ok(FanOutReport::default());
        };

        let users = all_user_chats(self.store.as_ref()).await?;
        let report = self
            .fanout
            .fan_out(users, &Payload::html(escape_html(message)))
            .await;
        tracing::info!(
            set = %set.name,
            succeeded = report.succeeded,
            failed = report.failed,
            "scheduled broadcast sent"
        );
        Ok(report)
    }

    /// Delete announcements and lost-and-found reports whose `timestamp` is
    /// older than `older_than`, then sweep idle sessions.
    pub async fn run_scheduled_cleanup(&self, older_than: Duration) -> Result<CleanupReport> {
        let age_ms = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(age_ms);

        let report = CleanupReport {
            announcements_removed: self.purge_before(collections::ANNOUNCEMENTS, cutoff).await?,
            lost_items_removed: self.purge_before(collections::LOST_AND_FOUND, cutoff).await?,
            sessions_dropped: self.sessions.sweep_expired().await,
        };
        tracing::info!(
            cutoff,
            announcements = report.announcements_removed,
            lost_items = report.lost_items_removed,
            sessions = report.sessions_dropped,
            "scheduled cleanup finished"
        );
        Ok(report)
    }

    async fn purge_before(&self, collection: &str, cutoff_ms: i64) -> Result<usize> {
        let boundary = json!(cutoff_ms);
        let mut removed = 0usize;
        loop {
            let rows = self
                .store
                .query_ordered_range(collection, "timestamp", CLEANUP_BATCH, Some(&boundary))
                .await?;
            let batch = rows.len();
            for row in rows {
                self.store.delete_record(collection, &row.key).await?;
            }
            removed += batch;
            if batch < CLEANUP_BATCH {
                return Ok(removed);
            }
        }
    }
}
