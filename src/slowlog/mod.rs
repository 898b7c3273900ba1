use std::time::Duration;

use chrono::{DateTime, Utc};

/// One entry of the server's slow-query log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlowLogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub command: String,
    pub args: Vec<String>,
    pub client_addr: String,
    pub client_name: String,
}

/// Field slow-log entries are ordered by (always descending).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlowLogSort {
    Id,
    #[default]
    Timestamp,
    Duration,
    Command,
}

/// Sorts entries descending by `key`.
pub fn sort_entries(entries: &mut [SlowLogEntry], key: SlowLogSort) {
    entries.sort_by(|a, b| match key {
        SlowLogSort::Id => b.id.cmp(&a.id),
        SlowLogSort::Timestamp => b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)),
        SlowLogSort::Duration => b.duration.cmp(&a.duration),
        SlowLogSort::Command => b.command.cmp(&a.command),
    });
}
